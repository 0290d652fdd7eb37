//! Per-node freshness results.

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Map, Value};

use crate::criteria::FreshnessCriteria;
use crate::evaluator::FreshnessStatus;

/// Start and end of one phase of a node's evaluation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TimingInfo {
    pub name: String,
    #[serde(with = "timestamp::zulu")]
    pub started_at: DateTime<Utc>,
    #[serde(with = "timestamp::zulu")]
    pub completed_at: DateTime<Utc>,
}

impl TimingInfo {
    pub fn new(
        name: impl Into<String>,
        started_at: DateTime<Utc>,
        completed_at: DateTime<Utc>,
    ) -> Self {
        Self {
            name: name.into(),
            started_at,
            completed_at,
        }
    }
}

/// The outcome of checking one source table.
///
/// Field names and formats are part of the report schema.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FreshnessResult {
    pub unique_id: String,
    #[serde(with = "timestamp::offset_opt")]
    pub max_loaded_at: Option<DateTime<Utc>>,
    #[serde(with = "timestamp::offset_opt")]
    pub snapshotted_at: Option<DateTime<Utc>>,
    pub max_loaded_at_time_ago_in_s: Option<f64>,
    pub status: FreshnessStatus,
    pub criteria: FreshnessCriteria,
    pub adapter_response: Map<String, Value>,
    pub thread_id: String,
    /// Wall time spent on this node, in seconds
    pub execution_time: f64,
    pub timing: Vec<TimingInfo>,
    /// Why the node ended in `runtime error`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl FreshnessResult {
    pub fn is_runtime_error(&self) -> bool {
        self.status == FreshnessStatus::RuntimeError
    }

    /// Looks up a timing phase by name.
    pub fn phase(&self, name: &str) -> Option<&TimingInfo> {
        self.timing.iter().find(|t| t.name == name)
    }
}

/// Timestamp encodings used in the report.
pub(crate) mod timestamp {
    use chrono::{DateTime, SecondsFormat, Utc};
    use serde::Serializer;

    /// `2024-03-01T12:00:00.000000Z`
    pub fn format_zulu(ts: &DateTime<Utc>) -> String {
        ts.format("%Y-%m-%dT%H:%M:%S%.6fZ").to_string()
    }

    /// `2024-03-01T12:00:00+00:00`, with a fraction only when non-zero
    pub fn format_offset(ts: &DateTime<Utc>) -> String {
        ts.to_rfc3339_opts(SecondsFormat::AutoSi, false)
    }

    pub mod zulu {
        use super::*;

        pub fn serialize<S: Serializer>(ts: &DateTime<Utc>, s: S) -> Result<S::Ok, S::Error> {
            s.serialize_str(&format_zulu(ts))
        }
    }

    pub mod offset_opt {
        use super::*;

        pub fn serialize<S: Serializer>(
            ts: &Option<DateTime<Utc>>,
            s: S,
        ) -> Result<S::Ok, S::Error> {
            match ts {
                Some(ts) => s.serialize_str(&format_offset(ts)),
                None => s.serialize_none(),
            }
        }
    }
}
