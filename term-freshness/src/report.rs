//! The versioned freshness report.
//!
//! A [`FreshnessReport`] collects the results of one invocation together with
//! the invocation metadata. [`ReportWriter`] turns it into the JSON document
//! consumed by downstream tooling:
//!
//! ```json
//! {
//!   "metadata": {
//!     "dbt_schema_version": "https://schemas.getdbt.com/dbt/sources/v3.json",
//!     "dbt_version": "0.0.1",
//!     "generated_at": "2024-06-01T12:00:03.512904Z",
//!     "invocation_id": "…",
//!     "env": {}
//!   },
//!   "results": [],
//!   "elapsed_time": 3.41
//! }
//! ```

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use tracing::{info, instrument};

use crate::clock::{Clock, SystemClock};
use crate::error::{ErrorContext, FreshnessError, Result};
use crate::evaluator::FreshnessStatus;
use crate::result::{timestamp, FreshnessResult};
use crate::runner::RunOutput;

/// Identifier of the report document schema.
pub const SCHEMA_VERSION: &str = "https://schemas.getdbt.com/dbt/sources/v3.json";

/// Version recorded in `metadata.dbt_version`.
pub const TOOL_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Results of one invocation, ready to be written.
#[derive(Debug, Clone, PartialEq)]
pub struct FreshnessReport {
    invocation_id: String,
    tool_version: String,
    env: BTreeMap<String, String>,
    results: Vec<FreshnessResult>,
    elapsed_time: f64,
    started_at: Option<DateTime<Utc>>,
}

impl FreshnessReport {
    pub fn build(
        results: Vec<FreshnessResult>,
        invocation_id: impl Into<String>,
        tool_version: impl Into<String>,
        env: BTreeMap<String, String>,
        elapsed_time: f64,
    ) -> Self {
        Self {
            invocation_id: invocation_id.into(),
            tool_version: tool_version.into(),
            env,
            results,
            elapsed_time,
            started_at: None,
        }
    }

    /// Builds the report for a finished run with this crate's version.
    pub fn from_run(
        output: RunOutput,
        invocation_id: impl Into<String>,
        env: BTreeMap<String, String>,
    ) -> Self {
        let mut report = Self::build(
            output.results,
            invocation_id,
            TOOL_VERSION,
            env,
            output.elapsed_time,
        );
        report.started_at = Some(output.started_at);
        report
    }

    pub fn invocation_id(&self) -> &str {
        &self.invocation_id
    }

    pub fn tool_version(&self) -> &str {
        &self.tool_version
    }

    pub fn env(&self) -> &BTreeMap<String, String> {
        &self.env
    }

    pub fn results(&self) -> &[FreshnessResult] {
        &self.results
    }

    pub fn elapsed_time(&self) -> f64 {
        self.elapsed_time
    }

    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        self.started_at
    }

    /// The invocation-level verdict.
    pub fn status(&self) -> FreshnessStatus {
        aggregate_status(&self.results)
    }

    /// `true` when the invocation should exit successfully.
    pub fn is_success(&self) -> bool {
        !self.status().is_failure()
    }

    /// Counts of results per status.
    pub fn status_counts(&self) -> BTreeMap<FreshnessStatus, usize> {
        let mut counts = BTreeMap::new();
        for result in &self.results {
            *counts.entry(result.status).or_insert(0) += 1;
        }
        counts
    }
}

/// Folds per-node statuses into one verdict.
///
/// Any `error` or `runtime error` makes the whole invocation an `error`;
/// otherwise any `warn` makes it a `warn`. No results is a `pass`.
pub fn aggregate_status(results: &[FreshnessResult]) -> FreshnessStatus {
    results
        .iter()
        .map(|r| match r.status {
            FreshnessStatus::RuntimeError => FreshnessStatus::Error,
            status => status,
        })
        .max()
        .unwrap_or(FreshnessStatus::Pass)
}

/// The `metadata` block of the report document.
#[derive(Debug, Clone, Serialize)]
pub struct ReportMetadata<'a> {
    pub dbt_schema_version: &'static str,
    pub dbt_version: &'a str,
    pub generated_at: String,
    pub invocation_id: &'a str,
    pub env: &'a BTreeMap<String, String>,
}

#[derive(Serialize)]
struct ReportDocument<'a> {
    metadata: ReportMetadata<'a>,
    results: &'a [FreshnessResult],
    elapsed_time: f64,
}

/// Serializes reports and writes them to disk.
#[derive(Debug, Clone)]
pub struct ReportWriter {
    clock: Arc<dyn Clock>,
    pretty: bool,
}

impl Default for ReportWriter {
    fn default() -> Self {
        Self::new()
    }
}

impl ReportWriter {
    pub fn new() -> Self {
        Self {
            clock: Arc::new(SystemClock),
            pretty: true,
        }
    }

    /// Uses `clock` for `generated_at`.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Sets whether the document is pretty-printed.
    pub fn with_pretty(mut self, pretty: bool) -> Self {
        self.pretty = pretty;
        self
    }

    /// The metadata block, stamped with the current time.
    ///
    /// `generated_at` never precedes the run's start, even when the clock
    /// stepped backwards during the run.
    pub fn metadata<'a>(&self, report: &'a FreshnessReport) -> ReportMetadata<'a> {
        let now = self.clock.now();
        let generated_at = match report.started_at {
            Some(started) if started > now => started,
            _ => now,
        };
        ReportMetadata {
            dbt_schema_version: SCHEMA_VERSION,
            dbt_version: &report.tool_version,
            generated_at: timestamp::format_zulu(&generated_at),
            invocation_id: &report.invocation_id,
            env: &report.env,
        }
    }

    /// Renders the report document.
    pub fn render(&self, report: &FreshnessReport) -> Result<String> {
        let document = ReportDocument {
            metadata: self.metadata(report),
            results: &report.results,
            elapsed_time: report.elapsed_time,
        };
        let rendered = if self.pretty {
            serde_json::to_string_pretty(&document)
        } else {
            serde_json::to_string(&document)
        };
        rendered.map_err(|e| {
            FreshnessError::Serialization(format!("Failed to serialize freshness report: {e}"))
        })
    }

    /// Writes the report to `path`, creating parent directories as needed.
    #[instrument(
        skip(self, report, path),
        fields(path = %path.as_ref().display(), results = report.results.len())
    )]
    pub fn write(&self, report: &FreshnessReport, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let document = self.render(report)?;

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        std::fs::write(path, document)
            .with_context(|| format!("Failed to write report to {}", path.display()))?;

        info!(status = %report.status(), "Wrote freshness report");
        Ok(())
    }
}
