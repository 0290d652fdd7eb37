//! Freshness verdicts.
//!
//! [`evaluate`] turns resolved criteria and the most recent load timestamp into
//! a status. The current time is passed in, so the same inputs always produce
//! the same verdict.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::criteria::{FreshnessCriteria, FreshnessThreshold};
use crate::executor::FreshnessObservation;

/// Verdict for a single source table.
///
/// Ordered by severity: `Pass < Warn < Error < RuntimeError`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub enum FreshnessStatus {
    #[serde(rename = "pass")]
    Pass,
    #[serde(rename = "warn")]
    Warn,
    #[serde(rename = "error")]
    Error,
    /// The freshness query failed or found no load timestamp.
    #[serde(rename = "runtime error")]
    RuntimeError,
}

impl FreshnessStatus {
    /// Returns the string representation used in reports.
    pub fn as_str(&self) -> &'static str {
        match self {
            FreshnessStatus::Pass => "pass",
            FreshnessStatus::Warn => "warn",
            FreshnessStatus::Error => "error",
            FreshnessStatus::RuntimeError => "runtime error",
        }
    }

    /// `error` and `runtime error` fail an invocation; `pass` and `warn` do not.
    pub fn is_failure(&self) -> bool {
        matches!(self, FreshnessStatus::Error | FreshnessStatus::RuntimeError)
    }
}

impl fmt::Display for FreshnessStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of evaluating one observation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Evaluation {
    pub status: FreshnessStatus,
    /// Seconds between the last load and `now`; `None` when nothing was loaded.
    pub age_seconds: Option<f64>,
}

/// Fractional seconds from `loaded_at` to `now`.
///
/// Negative when the load timestamp lies in the future; the value is not
/// clamped.
pub fn age_in_seconds(loaded_at: DateTime<Utc>, now: DateTime<Utc>) -> f64 {
    let delta = now.signed_duration_since(loaded_at);
    match delta.num_microseconds() {
        Some(micros) => micros as f64 / 1_000_000.0,
        None => delta.num_milliseconds() as f64 / 1_000.0,
    }
}

/// Computes the verdict for `criteria` given what the warehouse reported.
///
/// The most severe breached threshold wins. Comparisons are strict, so an age
/// equal to a threshold does not breach it.
pub fn evaluate(
    criteria: &FreshnessCriteria,
    observation: &FreshnessObservation,
    now: DateTime<Utc>,
) -> Evaluation {
    let Some(loaded_at) = observation.max_loaded_at else {
        return Evaluation {
            status: FreshnessStatus::RuntimeError,
            age_seconds: None,
        };
    };

    let age = age_in_seconds(loaded_at, now);
    let breached = |threshold: Option<FreshnessThreshold>| {
        threshold.is_some_and(|t| age > t.to_seconds() as f64)
    };

    let status = if breached(criteria.error_after) {
        FreshnessStatus::Error
    } else if breached(criteria.warn_after) {
        FreshnessStatus::Warn
    } else {
        FreshnessStatus::Pass
    };

    Evaluation {
        status,
        age_seconds: Some(age),
    }
}
