//! The seam between the freshness engine and the warehouse.
//!
//! A [`FreshnessExecutor`] answers one question per node: when was this table
//! last loaded? The work is split in two phases so the runner can time them
//! separately. `compile` renders the query text; `execute` runs it.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};

use crate::error::Result;
use crate::node::FreshnessNode;

pub mod datafusion_executor;

pub use datafusion_executor::DataFusionExecutor;

/// Query text produced by the compile phase.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompiledQuery {
    pub sql: String,
}

impl CompiledQuery {
    pub fn new(sql: impl Into<String>) -> Self {
        Self { sql: sql.into() }
    }
}

/// What the warehouse reported for one node.
#[derive(Debug, Clone, PartialEq)]
pub struct FreshnessObservation {
    /// Latest load timestamp; `None` when no qualifying rows exist
    pub max_loaded_at: Option<DateTime<Utc>>,
    /// When the warehouse took the measurement
    pub snapshotted_at: DateTime<Utc>,
    /// Adapter-specific response metadata, passed through untouched
    pub adapter_response: Map<String, Value>,
}

impl FreshnessObservation {
    pub fn new(max_loaded_at: Option<DateTime<Utc>>, snapshotted_at: DateTime<Utc>) -> Self {
        Self {
            max_loaded_at,
            snapshotted_at,
            adapter_response: Map::new(),
        }
    }

    pub fn with_adapter_response(mut self, response: Map<String, Value>) -> Self {
        self.adapter_response = response;
        self
    }
}

/// Runs freshness queries against a warehouse.
///
/// Both phases may fail; the runner records the failure on the node and moves
/// on, so implementations should return errors rather than panic.
#[async_trait]
pub trait FreshnessExecutor: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &str;

    /// Renders the query that finds the latest load of `node`.
    async fn compile(&self, node: &FreshnessNode) -> Result<CompiledQuery>;

    /// Runs a compiled query.
    async fn execute(
        &self,
        node: &FreshnessNode,
        query: &CompiledQuery,
    ) -> Result<FreshnessObservation>;
}

/// The standard freshness query: the maximum loaded-at value, restricted by the
/// node's filter when one is configured.
///
/// The relation is quoted, so its case is kept. The loaded-at field and the
/// filter are SQL expressions and go in as written.
pub fn freshness_sql(node: &FreshnessNode) -> String {
    let mut sql = format!(
        "SELECT MAX(CAST({} AS TIMESTAMP)) AS max_loaded_at FROM {}",
        node.loaded_at_field(),
        quote_relation(node.relation())
    );
    if let Some(filter) = &node.criteria().filter {
        sql.push_str(&format!(" WHERE ({filter})"));
    }
    sql
}

/// Quotes each dot-separated part of a relation name: `raw.Orders` becomes
/// `"raw"."Orders"`.
pub fn quote_relation(relation: &str) -> String {
    relation
        .split('.')
        .map(|part| format!("\"{}\"", part.replace('"', "\"\"")))
        .collect::<Vec<_>>()
        .join(".")
}
