//! Logging utilities and configuration for freshness runs.
//!
//! Runtime diagnostics go through `tracing`. [`LogConfig`] controls how chatty
//! the runner is about individual nodes; [`setup`] installs a subscriber for
//! binaries.

/// Logging configuration for the freshness runner.
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Whether to log every node's start and verdict
    pub log_node_details: bool,
    /// Whether to log the compiled query text
    pub log_query_text: bool,
    /// Maximum length for logged field values (to prevent huge logs)
    pub max_field_length: usize,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            log_node_details: true,
            log_query_text: false,
            max_field_length: 256,
        }
    }
}

impl LogConfig {
    /// Creates a verbose configuration suitable for debugging.
    pub fn verbose() -> Self {
        Self {
            log_node_details: true,
            log_query_text: true,
            max_field_length: 1024,
        }
    }

    /// Creates a minimal configuration for production with lowest overhead.
    pub fn production() -> Self {
        Self {
            log_node_details: false,
            log_query_text: false,
            max_field_length: 128,
        }
    }
}

/// Logs node progress when `log_node_details` is enabled.
#[macro_export]
macro_rules! log_node {
    ($config:expr, $($arg:tt)*) => {
        if $config.log_node_details {
            tracing::info!($($arg)*);
        }
    };
}

/// Logs query text when `log_query_text` is enabled.
#[macro_export]
macro_rules! log_query {
    ($config:expr, $($arg:tt)*) => {
        if $config.log_query_text {
            tracing::debug!($($arg)*);
        }
    };
}

/// Truncates a string to the maximum field length if needed.
pub fn truncate_field(value: &str, max_length: usize) -> String {
    if value.len() <= max_length {
        return value.to_string();
    }
    let mut end = max_length;
    while !value.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...(truncated)", &value[..end])
}

/// Subscriber setup for binaries.
pub mod setup {
    use tracing::Level;

    /// Configuration for the process-wide subscriber.
    #[derive(Debug, Clone)]
    pub struct LoggingConfig {
        /// Log level for the application
        pub level: Level,
        /// Log level for freshness components specifically
        pub freshness_level: Level,
        /// Whether to use JSON output format
        pub json_format: bool,
        /// Environment filter override
        pub env_filter: Option<String>,
    }

    impl Default for LoggingConfig {
        fn default() -> Self {
            Self {
                level: Level::WARN,
                freshness_level: Level::INFO,
                json_format: false,
                env_filter: None,
            }
        }
    }

    impl LoggingConfig {
        /// Creates a configuration for machine-readable logs.
        pub fn structured() -> Self {
            Self {
                level: Level::INFO,
                freshness_level: Level::INFO,
                json_format: true,
                env_filter: None,
            }
        }

        pub fn with_level(mut self, level: Level) -> Self {
            self.level = level;
            self
        }

        pub fn with_freshness_level(mut self, level: Level) -> Self {
            self.freshness_level = level;
            self
        }

        pub fn with_json_format(mut self, enabled: bool) -> Self {
            self.json_format = enabled;
            self
        }

        pub fn with_env_filter(mut self, filter: impl Into<String>) -> Self {
            self.env_filter = Some(filter.into());
            self
        }

        /// Builds the environment filter string.
        pub fn env_filter(&self) -> String {
            if let Some(ref filter) = self.env_filter {
                filter.clone()
            } else {
                format!(
                    "{},term_freshness={}",
                    self.level.as_str().to_lowercase(),
                    self.freshness_level.as_str().to_lowercase()
                )
            }
        }
    }

    /// Installs the global subscriber. `RUST_LOG` takes precedence over the
    /// configured filter.
    ///
    /// ```rust,no_run
    /// use term_freshness::logging::setup::{init_logging, LoggingConfig};
    ///
    /// init_logging(LoggingConfig::default().with_json_format(true)).unwrap();
    /// ```
    pub fn init_logging(config: LoggingConfig) -> Result<(), Box<dyn std::error::Error>> {
        use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

        let env_filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(config.env_filter()));

        let fmt_layer = if config.json_format {
            tracing_subscriber::fmt::layer()
                .json()
                .with_writer(std::io::stderr)
                .boxed()
        } else {
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .boxed()
        };

        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt_layer)
            .try_init()?;

        Ok(())
    }
}
