//! Prelude for commonly used types and traits in term-freshness.

pub use crate::clock::{Clock, SystemClock};
pub use crate::config::FreshnessConfig;
pub use crate::criteria::{FreshnessCriteria, FreshnessThreshold, Period, ThresholdError};
pub use crate::error::{ErrorContext, FreshnessError, Result};
pub use crate::evaluator::FreshnessStatus;
pub use crate::executor::{DataFusionExecutor, FreshnessExecutor};
pub use crate::formatters::{FormatterConfig, HumanFormatter, ReportFormatter};
pub use crate::logging::LogConfig;
pub use crate::node::FreshnessNode;
pub use crate::project::{FreshnessPlan, SourcesProject};
pub use crate::report::{FreshnessReport, ReportWriter};
pub use crate::result::FreshnessResult;
pub use crate::runner::{FreshnessRunner, RunOutput};
pub use crate::selector::NodeSelector;
