//! Report formatting for the console and for machines.
//!
//! [`HumanFormatter`] renders the end-of-run summary printed by the CLI;
//! [`JsonFormatter`] renders the same document [`ReportWriter`] writes to disk.
//!
//! # Examples
//!
//! ```rust
//! use std::collections::BTreeMap;
//! use term_freshness::formatters::{HumanFormatter, ReportFormatter};
//! use term_freshness::report::FreshnessReport;
//!
//! let report = FreshnessReport::build(Vec::new(), "inv", "0.0.1", BTreeMap::new(), 0.0);
//! let summary = HumanFormatter::new().format(&report).unwrap();
//! assert!(summary.contains("TOTAL=0"));
//! ```

use std::fmt::Write;

use crate::criteria::FreshnessThreshold;
use crate::error::{FreshnessError, Result};
use crate::evaluator::FreshnessStatus;
use crate::report::{FreshnessReport, ReportWriter};
use crate::result::FreshnessResult;

/// Configuration options for formatting reports.
#[derive(Debug, Clone)]
pub struct FormatterConfig {
    /// Whether to list every node, not only the failing ones
    pub include_results: bool,
    /// Whether to show each node's phase timings
    pub include_timing: bool,
    /// Maximum number of failures to describe (-1 for all)
    pub max_failures: i32,
    /// Whether to use colorized output (for human formatter)
    pub use_colors: bool,
}

impl Default for FormatterConfig {
    fn default() -> Self {
        Self {
            include_results: true,
            include_timing: false,
            max_failures: -1,
            use_colors: true,
        }
    }
}

impl FormatterConfig {
    /// Creates a minimal configuration showing only the totals line.
    pub fn minimal() -> Self {
        Self {
            include_results: false,
            include_timing: false,
            max_failures: 0,
            use_colors: false,
        }
    }

    /// Creates a configuration suitable for CI logs.
    pub fn ci() -> Self {
        Self {
            include_results: true,
            include_timing: true,
            max_failures: 50,
            use_colors: false,
        }
    }

    pub fn with_results(mut self, include: bool) -> Self {
        self.include_results = include;
        self
    }

    pub fn with_timing(mut self, include: bool) -> Self {
        self.include_timing = include;
        self
    }

    pub fn with_max_failures(mut self, max: i32) -> Self {
        self.max_failures = max;
        self
    }

    /// Sets whether to use colorized output.
    pub fn with_colors(mut self, use_colors: bool) -> Self {
        self.use_colors = use_colors;
        self
    }
}

/// Converts a report into a textual representation.
pub trait ReportFormatter {
    fn format(&self, report: &FreshnessReport) -> Result<String>;
}

/// Renders the report document as JSON.
#[derive(Debug, Clone, Default)]
pub struct JsonFormatter {
    writer: ReportWriter,
}

impl JsonFormatter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_writer(writer: ReportWriter) -> Self {
        Self { writer }
    }
}

impl ReportFormatter for JsonFormatter {
    fn format(&self, report: &FreshnessReport) -> Result<String> {
        self.writer.render(report)
    }
}

/// Formats a report as a console summary.
///
/// ```text
/// Finished running 3 source freshness checks in 1.42s.
///
///   PASS           source.shop.raw.orders (2h 3m ago)
///   WARN           source.shop.raw.customers (12h 0m ago)
///   RUNTIME ERROR  source.shop.raw.events
///
/// Completed with 1 error and 1 warning:
///
///   RUNTIME ERROR  source.shop.raw.events: no rows with a non-null loaded_at found in events
///
/// Done. PASS=1 WARN=1 ERROR=0 RUNTIME ERROR=1 TOTAL=3
/// ```
#[derive(Debug, Clone, Default)]
pub struct HumanFormatter {
    config: FormatterConfig,
}

impl HumanFormatter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: FormatterConfig) -> Self {
        Self { config }
    }

    fn render(&self, report: &FreshnessReport, out: &mut String) -> std::fmt::Result {
        let total = report.results().len();
        writeln!(
            out,
            "Finished running {} source freshness {} in {:.2}s.",
            total,
            if total == 1 { "check" } else { "checks" },
            report.elapsed_time()
        )?;

        if self.config.include_results && total > 0 {
            writeln!(out)?;
            for result in report.results() {
                self.render_line(result, out)?;
            }
        }

        let failures: Vec<&FreshnessResult> = report
            .results()
            .iter()
            .filter(|r| r.status != FreshnessStatus::Pass)
            .collect();
        if !failures.is_empty() && self.config.max_failures != 0 {
            let errors = failures.iter().filter(|r| r.status.is_failure()).count();
            let warnings = failures.len() - errors;
            writeln!(out)?;
            writeln!(
                out,
                "Completed with {} and {}:",
                plural(errors, "error"),
                plural(warnings, "warning")
            )?;
            writeln!(out)?;

            let shown = if self.config.max_failures < 0 {
                failures.len()
            } else {
                failures.len().min(self.config.max_failures as usize)
            };
            for result in &failures[..shown] {
                write!(out, "  {}  {}", self.label(result.status), result.unique_id)?;
                match (&result.error, result.max_loaded_at_time_ago_in_s) {
                    (Some(error), _) => writeln!(out, ": {error}")?,
                    (None, Some(age)) => writeln!(
                        out,
                        ": last loaded {} ago, thresholds {}",
                        format_age(age),
                        describe_thresholds(result)
                    )?,
                    (None, None) => writeln!(out)?,
                }
            }
            if shown < failures.len() {
                writeln!(out, "  ... and {} more", failures.len() - shown)?;
            }
        }

        let counts = report.status_counts();
        let count = |status: FreshnessStatus| counts.get(&status).copied().unwrap_or(0);
        writeln!(out)?;
        writeln!(
            out,
            "Done. PASS={} WARN={} ERROR={} RUNTIME ERROR={} TOTAL={}",
            count(FreshnessStatus::Pass),
            count(FreshnessStatus::Warn),
            count(FreshnessStatus::Error),
            count(FreshnessStatus::RuntimeError),
            total
        )
    }

    fn render_line(&self, result: &FreshnessResult, out: &mut String) -> std::fmt::Result {
        write!(out, "  {}  {}", self.label(result.status), result.unique_id)?;
        if let Some(age) = result.max_loaded_at_time_ago_in_s {
            write!(out, " ({} ago)", format_age(age))?;
        }
        if self.config.include_timing {
            for phase in &result.timing {
                let ms = (phase.completed_at - phase.started_at).num_milliseconds();
                write!(out, " [{} {}ms]", phase.name, ms)?;
            }
        }
        writeln!(out)
    }

    fn label(&self, status: FreshnessStatus) -> String {
        let text = format!("{:<13}", status.as_str().to_uppercase());
        if !self.config.use_colors {
            return text;
        }
        let color = match status {
            FreshnessStatus::Pass => "32",
            FreshnessStatus::Warn => "33",
            FreshnessStatus::Error | FreshnessStatus::RuntimeError => "31",
        };
        format!("\x1b[{color}m{text}\x1b[0m")
    }
}

impl ReportFormatter for HumanFormatter {
    fn format(&self, report: &FreshnessReport) -> Result<String> {
        let mut output = String::new();
        self.render(report, &mut output)
            .map_err(|e| FreshnessError::Internal(format!("Failed to format report: {e}")))?;
        Ok(output)
    }
}

fn plural(n: usize, word: &str) -> String {
    if n == 1 {
        format!("{n} {word}")
    } else {
        format!("{n} {word}s")
    }
}

fn describe_thresholds(result: &FreshnessResult) -> String {
    let describe = |t: &Option<FreshnessThreshold>| match t {
        Some(t) => format!("{t}"),
        None => "none".to_string(),
    };
    format!(
        "warn after {}, error after {}",
        describe(&result.criteria.warn_after),
        describe(&result.criteria.error_after)
    )
}

/// `45s`, `12m 5s`, `3h 20m`, `2d 4h`. Negative ages are prefixed with `-`.
fn format_age(seconds: f64) -> String {
    let sign = if seconds < 0.0 { "-" } else { "" };
    let total = seconds.abs().round() as u64;
    let (days, hours, minutes, secs) = (
        total / 86_400,
        total % 86_400 / 3_600,
        total % 3_600 / 60,
        total % 60,
    );
    if days > 0 {
        format!("{sign}{days}d {hours}h")
    } else if hours > 0 {
        format!("{sign}{hours}h {minutes}m")
    } else if minutes > 0 {
        format!("{sign}{minutes}m {secs}s")
    } else {
        format!("{sign}{secs}s")
    }
}
