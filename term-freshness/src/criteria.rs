//! Freshness criteria and the source/table override merge.
//!
//! Criteria can be declared on a source (the default for every table in it)
//! and on an individual table. Table-level fields replace the source-level
//! field one at a time, so a table that only sets `filter` still inherits both
//! thresholds. A table can also switch freshness off entirely.
//!
//! ```text
//! source:  warn_after 6h   error_after 24h   filter -
//! table:   (unset)         null              (unset)
//! ------------------------------------------------------
//! result:  warn_after 6h   error_after -     filter -
//! ```
//!
//! # Examples
//!
//! ```rust
//! use term_freshness::criteria::{
//!     resolve, FreshnessCriteria, FreshnessOverride, FreshnessThreshold, Period,
//!     ResolvedFreshness, TableFreshness,
//! };
//!
//! let source = FreshnessCriteria::new()
//!     .with_warn_after(FreshnessThreshold::new(6, Period::Hour).unwrap())
//!     .with_error_after(FreshnessThreshold::new(24, Period::Hour).unwrap());
//! let table = TableFreshness::Override(FreshnessOverride::new().clear_error_after());
//!
//! match resolve(Some(&source), Some(&table)) {
//!     ResolvedFreshness::Enabled(criteria) => assert!(criteria.error_after.is_none()),
//!     ResolvedFreshness::Disabled => unreachable!(),
//! }
//! ```

use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// A threshold that cannot be built from the given values.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ThresholdError {
    #[error("threshold count must be a positive integer, got {0}")]
    NonPositiveCount(i64),

    #[error("unknown period '{0}', expected one of minute, hour, day")]
    UnknownPeriod(String),
}

/// Unit of a freshness threshold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Period {
    Minute,
    Hour,
    Day,
}

impl Period {
    /// Number of seconds in one unit of this period.
    pub fn seconds(&self) -> i64 {
        match self {
            Period::Minute => 60,
            Period::Hour => 3_600,
            Period::Day => 86_400,
        }
    }

    /// Returns the string representation of the period.
    pub fn as_str(&self) -> &'static str {
        match self {
            Period::Minute => "minute",
            Period::Hour => "hour",
            Period::Day => "day",
        }
    }
}

impl fmt::Display for Period {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Period {
    type Err = ThresholdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "minute" => Ok(Period::Minute),
            "hour" => Ok(Period::Hour),
            "day" => Ok(Period::Day),
            other => Err(ThresholdError::UnknownPeriod(other.to_string())),
        }
    }
}

/// Maximum allowed age of the most recent load.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct FreshnessThreshold {
    count: u32,
    period: Period,
}

impl FreshnessThreshold {
    /// Creates a threshold, rejecting a zero count.
    pub fn new(count: u32, period: Period) -> Result<Self, ThresholdError> {
        if count == 0 {
            return Err(ThresholdError::NonPositiveCount(0));
        }
        Ok(Self { count, period })
    }

    /// Creates a threshold from unvalidated configuration values.
    ///
    /// Negative or zero counts and unknown period names are rejected.
    pub fn parse(count: i64, period: &str) -> Result<Self, ThresholdError> {
        let period = Period::from_str(period)?;
        let count = u32::try_from(count).map_err(|_| ThresholdError::NonPositiveCount(count))?;
        Self::new(count, period)
    }

    pub fn count(&self) -> u32 {
        self.count
    }

    pub fn period(&self) -> Period {
        self.period
    }

    /// The threshold expressed in seconds.
    pub fn to_seconds(&self) -> i64 {
        i64::from(self.count) * self.period.seconds()
    }
}

impl fmt::Display for FreshnessThreshold {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.count == 1 {
            write!(f, "1 {}", self.period)
        } else {
            write!(f, "{} {}s", self.count, self.period)
        }
    }
}

/// Effective freshness criteria for one table.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct FreshnessCriteria {
    /// Predicate passed through to the query collaborator
    pub filter: Option<String>,
    /// Age above which the table is reported as `warn`
    pub warn_after: Option<FreshnessThreshold>,
    /// Age above which the table is reported as `error`
    pub error_after: Option<FreshnessThreshold>,
}

impl FreshnessCriteria {
    /// Creates empty criteria (both thresholds unset).
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_warn_after(mut self, threshold: FreshnessThreshold) -> Self {
        self.warn_after = Some(threshold);
        self
    }

    pub fn with_error_after(mut self, threshold: FreshnessThreshold) -> Self {
        self.error_after = Some(threshold);
        self
    }

    pub fn with_filter(mut self, filter: impl Into<String>) -> Self {
        self.filter = Some(filter.into());
        self
    }

    /// Freshness is only checked when at least one threshold is present.
    pub fn is_enabled(&self) -> bool {
        self.warn_after.is_some() || self.error_after.is_some()
    }
}

/// A configuration field that distinguishes "not configured" from an
/// explicit `null`.
///
/// Deserialize with `#[serde(default)]`: a missing key stays `Unset`, a JSON
/// `null` becomes `Null`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Setting<T> {
    Unset,
    Null,
    Value(T),
}

impl<T> Default for Setting<T> {
    fn default() -> Self {
        Setting::Unset
    }
}

impl<T> Setting<T> {
    pub fn is_unset(&self) -> bool {
        matches!(self, Setting::Unset)
    }

    /// Applies a fallible conversion to the contained value.
    pub fn try_map<U, E, F>(self, f: F) -> Result<Setting<U>, E>
    where
        F: FnOnce(T) -> Result<U, E>,
    {
        Ok(match self {
            Setting::Unset => Setting::Unset,
            Setting::Null => Setting::Null,
            Setting::Value(v) => Setting::Value(f(v)?),
        })
    }

    /// Resolves the field against an inherited value.
    pub fn or_inherit(self, inherited: Option<T>) -> Option<T> {
        match self {
            Setting::Unset => inherited,
            Setting::Null => None,
            Setting::Value(v) => Some(v),
        }
    }
}

impl<'de, T> Deserialize<'de> for Setting<T>
where
    T: Deserialize<'de>,
{
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        Ok(match Option::<T>::deserialize(deserializer)? {
            Some(value) => Setting::Value(value),
            None => Setting::Null,
        })
    }
}

/// Table-level criteria where each field may be left unset, cleared, or
/// replaced.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FreshnessOverride {
    pub warn_after: Setting<FreshnessThreshold>,
    pub error_after: Setting<FreshnessThreshold>,
    pub filter: Setting<String>,
}

impl FreshnessOverride {
    /// Creates an override that changes nothing.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn warn_after(mut self, threshold: FreshnessThreshold) -> Self {
        self.warn_after = Setting::Value(threshold);
        self
    }

    pub fn clear_warn_after(mut self) -> Self {
        self.warn_after = Setting::Null;
        self
    }

    pub fn error_after(mut self, threshold: FreshnessThreshold) -> Self {
        self.error_after = Setting::Value(threshold);
        self
    }

    pub fn clear_error_after(mut self) -> Self {
        self.error_after = Setting::Null;
        self
    }

    pub fn filter(mut self, filter: impl Into<String>) -> Self {
        self.filter = Setting::Value(filter.into());
        self
    }
}

/// Freshness configuration attached to a single table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TableFreshness {
    /// Freshness checking is switched off for this table.
    Disabled,
    /// Per-field overrides on top of the source default.
    Override(FreshnessOverride),
}

/// Outcome of merging source and table criteria.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolvedFreshness {
    Enabled(FreshnessCriteria),
    Disabled,
}

impl ResolvedFreshness {
    pub fn is_disabled(&self) -> bool {
        matches!(self, ResolvedFreshness::Disabled)
    }

    pub fn into_criteria(self) -> Option<FreshnessCriteria> {
        match self {
            ResolvedFreshness::Enabled(criteria) => Some(criteria),
            ResolvedFreshness::Disabled => None,
        }
    }
}

/// Merges a source-level default with a table-level override.
///
/// An explicit table disable wins over any source default. Otherwise every
/// field is taken from the table when it is set there (including an explicit
/// null), and from the source default when it is not. Criteria without any
/// threshold resolve to [`ResolvedFreshness::Disabled`].
pub fn resolve(
    source_default: Option<&FreshnessCriteria>,
    table: Option<&TableFreshness>,
) -> ResolvedFreshness {
    let table_override = match table {
        Some(TableFreshness::Disabled) => return ResolvedFreshness::Disabled,
        Some(TableFreshness::Override(o)) => o.clone(),
        None => FreshnessOverride::new(),
    };

    let criteria = FreshnessCriteria {
        warn_after: table_override
            .warn_after
            .or_inherit(source_default.and_then(|s| s.warn_after)),
        error_after: table_override
            .error_after
            .or_inherit(source_default.and_then(|s| s.error_after)),
        filter: table_override
            .filter
            .or_inherit(source_default.and_then(|s| s.filter.clone())),
    };

    if criteria.is_enabled() {
        ResolvedFreshness::Enabled(criteria)
    } else {
        ResolvedFreshness::Disabled
    }
}
