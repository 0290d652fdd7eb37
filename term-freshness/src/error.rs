//! Error types for the Term freshness engine.
//!
//! Per-node failures (a query that errors, a table with no qualifying rows) are
//! never surfaced through this type: the runner folds them into a
//! `"runtime error"` result. `FreshnessError` is reserved for configuration
//! problems and for failures that make a whole run impossible.

use thiserror::Error;

/// The main error type for the freshness engine.
#[derive(Error, Debug)]
pub enum FreshnessError {
    /// Freshness criteria for a node are malformed.
    #[error("Invalid freshness criteria for '{node}': {message}")]
    InvalidCriteria {
        /// Unique id of the node whose criteria were rejected
        node: String,
        /// Detailed error message
        message: String,
    },

    /// The query collaborator failed for a node.
    #[error("Query failed for '{node}': {message}")]
    Query {
        /// Unique id of the node being queried
        node: String,
        /// Detailed error message
        message: String,
        /// Optional underlying error
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Error from DataFusion operations.
    #[error("DataFusion error: {0}")]
    DataFusion(#[from] datafusion::error::DataFusionError),

    /// Error from Arrow operations.
    #[error("Arrow error: {0}")]
    Arrow(#[from] datafusion::arrow::error::ArrowError),

    /// Error from I/O operations.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Error related to configuration.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Error from serialization/deserialization operations.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Node selection could not be resolved.
    #[error("Selection error: {0}")]
    Selection(String),

    /// Error when an operation is not supported.
    #[error("Operation not supported: {0}")]
    NotSupported(String),

    /// The run was stopped before every node was evaluated.
    #[error("Freshness run cancelled after {completed} of {total} nodes")]
    Cancelled { completed: usize, total: usize },

    /// Generic internal error for unexpected conditions.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// A type alias for `Result<T, FreshnessError>`.
pub type Result<T> = std::result::Result<T, FreshnessError>;

impl FreshnessError {
    /// Creates a new invalid criteria error for the given node.
    pub fn invalid_criteria(node: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidCriteria {
            node: node.into(),
            message: message.into(),
        }
    }

    /// Creates a new query error.
    pub fn query(node: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Query {
            node: node.into(),
            message: message.into(),
            source: None,
        }
    }

    /// Creates a new query error with a source error.
    pub fn query_with_source(
        node: impl Into<String>,
        message: impl Into<String>,
        source: Box<dyn std::error::Error + Send + Sync>,
    ) -> Self {
        Self::Query {
            node: node.into(),
            message: message.into(),
            source: Some(source),
        }
    }

    /// Returns true if this error ended a run early rather than failing it.
    pub fn is_cancellation(&self) -> bool {
        matches!(self, Self::Cancelled { .. })
    }
}

impl From<serde_json::Error> for FreshnessError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

/// Extension trait for adding context to errors.
pub trait ErrorContext<T> {
    /// Adds context to an error.
    fn context(self, msg: &str) -> Result<T>;

    /// Adds context with a lazy message.
    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String;
}

impl<T, E> ErrorContext<T> for std::result::Result<T, E>
where
    E: Into<FreshnessError>,
{
    fn context(self, msg: &str) -> Result<T> {
        self.map_err(|e| match e.into() {
            FreshnessError::Internal(inner) => FreshnessError::Internal(format!("{msg}: {inner}")),
            other => FreshnessError::Internal(format!("{msg}: {other}")),
        })
    }

    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| {
            let msg = f();
            match e.into() {
                FreshnessError::Internal(inner) => {
                    FreshnessError::Internal(format!("{msg}: {inner}"))
                }
                other => FreshnessError::Internal(format!("{msg}: {other}")),
            }
        })
    }
}
