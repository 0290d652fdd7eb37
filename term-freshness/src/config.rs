//! Invocation settings.

use std::path::{Path, PathBuf};

use crate::env::DEFAULT_ENV_PREFIX;
use crate::error::{FreshnessError, Result};

/// Number of nodes evaluated at once unless overridden.
pub const DEFAULT_THREADS: usize = 4;

/// Where the report is written unless overridden.
pub const DEFAULT_OUTPUT_PATH: &str = "target/sources.json";

/// Settings for one freshness invocation.
///
/// # Examples
///
/// ```rust
/// use term_freshness::config::FreshnessConfig;
///
/// let config = FreshnessConfig::new()
///     .with_threads(8)
///     .with_output_path("target/freshness.json");
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone)]
pub struct FreshnessConfig {
    threads: usize,
    env_prefix: String,
    output_path: PathBuf,
    pretty: bool,
}

impl Default for FreshnessConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl FreshnessConfig {
    pub fn new() -> Self {
        Self {
            threads: DEFAULT_THREADS,
            env_prefix: DEFAULT_ENV_PREFIX.to_string(),
            output_path: PathBuf::from(DEFAULT_OUTPUT_PATH),
            pretty: true,
        }
    }

    /// Set the maximum number of nodes evaluated concurrently.
    pub fn with_threads(mut self, threads: usize) -> Self {
        self.threads = threads;
        self
    }

    /// Set the prefix that marks pass-through environment variables.
    pub fn with_env_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.env_prefix = prefix.into();
        self
    }

    /// Set the report location.
    pub fn with_output_path(mut self, path: impl AsRef<Path>) -> Self {
        self.output_path = path.as_ref().to_path_buf();
        self
    }

    /// Set whether the report is pretty-printed.
    pub fn with_pretty(mut self, pretty: bool) -> Self {
        self.pretty = pretty;
        self
    }

    pub fn threads(&self) -> usize {
        self.threads
    }

    pub fn env_prefix(&self) -> &str {
        &self.env_prefix
    }

    pub fn output_path(&self) -> &Path {
        &self.output_path
    }

    pub fn pretty(&self) -> bool {
        self.pretty
    }

    /// Rejects settings that cannot produce a run.
    pub fn validate(&self) -> Result<()> {
        if self.threads == 0 {
            return Err(FreshnessError::Configuration(
                "threads must be at least 1".to_string(),
            ));
        }
        if self.env_prefix.is_empty() {
            return Err(FreshnessError::Configuration(
                "env prefix must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}
