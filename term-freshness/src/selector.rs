//! Node selection.
//!
//! Selection arguments name sources and tables:
//!
//! | Argument                 | Selects                               |
//! |--------------------------|---------------------------------------|
//! | `source:raw`             | every table of source `raw`           |
//! | `source:raw.orders`      | table `orders` of source `raw`        |
//! | `source:raw.ord*`        | tables of `raw` matching the wildcard |
//! | `raw.orders`             | same as `source:raw.orders`           |
//!
//! Wildcards follow [`glob::Pattern`] syntax. Several arguments may be given in
//! one string separated by whitespace; a node is selected when any include
//! matches and no exclude does. Graph operators (`+`, `@`) and other selector
//! methods are not supported.

use glob::Pattern;
use std::fmt;
use std::str::FromStr;

use crate::error::{FreshnessError, Result};

const SOURCE_METHOD: &str = "source:";

/// One parsed selection argument.
#[derive(Debug, Clone)]
pub struct SelectionSpec {
    raw: String,
    source: Pattern,
    table: Option<Pattern>,
}

impl SelectionSpec {
    pub fn parse(raw: &str) -> Result<Self> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(FreshnessError::Selection(
                "selection argument is empty".to_string(),
            ));
        }
        if raw.starts_with('+') || raw.ends_with('+') || raw.starts_with('@') {
            return Err(FreshnessError::NotSupported(format!(
                "graph operators are not supported in '{raw}'"
            )));
        }
        if raw.contains(',') {
            return Err(FreshnessError::NotSupported(format!(
                "intersections are not supported in '{raw}'"
            )));
        }

        let name = match raw.strip_prefix(SOURCE_METHOD) {
            Some(name) => name,
            None if raw.contains(':') => {
                return Err(FreshnessError::NotSupported(format!(
                    "only the 'source:' selector method is supported, got '{raw}'"
                )))
            }
            None => raw,
        };

        let mut parts = name.split('.');
        let source = parts.next().unwrap_or_default();
        let table = parts.next();
        if parts.next().is_some() || source.is_empty() || table.is_some_and(str::is_empty) {
            return Err(FreshnessError::Selection(format!(
                "expected <source> or <source>.<table>, got '{raw}'"
            )));
        }

        Ok(Self {
            raw: raw.to_string(),
            source: pattern(source, raw)?,
            table: table.map(|t| pattern(t, raw)).transpose()?,
        })
    }

    pub fn matches(&self, source: &str, table: &str) -> bool {
        self.source.matches(source) && self.table.as_ref().map_or(true, |t| t.matches(table))
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }
}

impl FromStr for SelectionSpec {
    type Err = FreshnessError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl fmt::Display for SelectionSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

fn pattern(text: &str, raw: &str) -> Result<Pattern> {
    Pattern::new(text).map_err(|e| {
        FreshnessError::Selection(format!("invalid wildcard in '{raw}': {}", e.msg))
    })
}

/// Include and exclude rules for one invocation.
///
/// ```rust
/// use term_freshness::selector::NodeSelector;
///
/// let selector = NodeSelector::new(&["source:raw".into()], &["raw.audit_*".into()]).unwrap();
/// assert!(selector.matches("raw", "orders"));
/// assert!(!selector.matches("raw", "audit_log"));
/// assert!(!selector.matches("staging", "orders"));
/// ```
#[derive(Debug, Clone, Default)]
pub struct NodeSelector {
    include: Vec<SelectionSpec>,
    exclude: Vec<SelectionSpec>,
}

impl NodeSelector {
    /// A selector that matches every node.
    pub fn all() -> Self {
        Self::default()
    }

    /// Parses include and exclude arguments. Each argument may hold several
    /// whitespace-separated selections.
    pub fn new(select: &[String], exclude: &[String]) -> Result<Self> {
        Ok(Self {
            include: parse_all(select)?,
            exclude: parse_all(exclude)?,
        })
    }

    pub fn matches(&self, source: &str, table: &str) -> bool {
        let included =
            self.include.is_empty() || self.include.iter().any(|s| s.matches(source, table));
        included && !self.exclude.iter().any(|s| s.matches(source, table))
    }

    /// `true` when no include or exclude rule was given.
    pub fn is_unrestricted(&self) -> bool {
        self.include.is_empty() && self.exclude.is_empty()
    }

    pub fn includes(&self) -> &[SelectionSpec] {
        &self.include
    }

    pub fn excludes(&self) -> &[SelectionSpec] {
        &self.exclude
    }
}

fn parse_all(args: &[String]) -> Result<Vec<SelectionSpec>> {
    args.iter()
        .flat_map(|arg| arg.split_whitespace())
        .map(SelectionSpec::parse)
        .collect()
}
