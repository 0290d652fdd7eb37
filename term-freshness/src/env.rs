//! Pass-through environment variables recorded in report metadata.
//!
//! Only variables named with the custom-env prefix are copied, with the prefix
//! removed. Windows treats variable names case-insensitively, so on that
//! platform both the prefix match and the resulting keys are upper-cased.

use std::collections::BTreeMap;

/// Prefix that marks an environment variable for inclusion in reports.
pub const DEFAULT_ENV_PREFIX: &str = "DBT_ENV_CUSTOM_ENV_";

/// Source of environment variables.
pub trait EnvironmentReader: Send + Sync {
    fn vars(&self) -> Vec<(String, String)>;

    /// Whether variable names compare without regard to case.
    fn is_case_insensitive(&self) -> bool {
        false
    }
}

/// Reads the current process environment.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessEnvironment;

impl EnvironmentReader for ProcessEnvironment {
    fn vars(&self) -> Vec<(String, String)> {
        std::env::vars_os()
            .filter_map(|(k, v)| Some((k.into_string().ok()?, v.into_string().ok()?)))
            .collect()
    }

    fn is_case_insensitive(&self) -> bool {
        cfg!(windows)
    }
}

/// A fixed set of variables.
#[derive(Debug, Clone, Default)]
pub struct MapEnvironment {
    vars: BTreeMap<String, String>,
    case_insensitive: bool,
}

impl MapEnvironment {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_var(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.vars.insert(key.into(), value.into());
        self
    }

    /// Behave like a platform with case-insensitive variable names.
    pub fn case_insensitive(mut self, enabled: bool) -> Self {
        self.case_insensitive = enabled;
        self
    }
}

impl EnvironmentReader for MapEnvironment {
    fn vars(&self) -> Vec<(String, String)> {
        self.vars
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    fn is_case_insensitive(&self) -> bool {
        self.case_insensitive
    }
}

/// Collects the pass-through variables from `reader`, stripped of `prefix`.
pub fn custom_env(reader: &dyn EnvironmentReader, prefix: &str) -> BTreeMap<String, String> {
    let case_insensitive = reader.is_case_insensitive();
    let prefix = if case_insensitive {
        prefix.to_uppercase()
    } else {
        prefix.to_string()
    };

    reader
        .vars()
        .into_iter()
        .filter_map(|(name, value)| {
            let name = if case_insensitive {
                name.to_uppercase()
            } else {
                name
            };
            let key = name.strip_prefix(prefix.as_str())?;
            (!key.is_empty()).then(|| (key.to_string(), value))
        })
        .collect()
}
