//! DataFusion-backed freshness executor.
//!
//! Runs the freshness query against tables registered in a DataFusion
//! [`SessionContext`]. Any table provider works: in-memory batches, CSV or
//! Parquet files, or a remote table provider.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use datafusion::arrow::array::{Array, TimestampMicrosecondArray};
use datafusion::arrow::compute::cast;
use datafusion::arrow::datatypes::{DataType, TimeUnit};
use datafusion::arrow::record_batch::RecordBatch;
use datafusion::prelude::SessionContext;
use serde_json::{Map, Value};
use std::sync::Arc;
use tracing::{debug, instrument};

use super::{freshness_sql, CompiledQuery, FreshnessExecutor, FreshnessObservation};
use crate::clock::{Clock, SystemClock};
use crate::error::{FreshnessError, Result};
use crate::node::FreshnessNode;

/// Executes freshness queries with DataFusion.
///
/// # Example
///
/// ```rust,ignore
/// use datafusion::prelude::*;
/// use term_freshness::executor::DataFusionExecutor;
///
/// let ctx = SessionContext::new();
/// ctx.register_csv("orders", "data/orders.csv", CsvReadOptions::new()).await?;
/// let executor = DataFusionExecutor::new(ctx);
/// ```
#[derive(Clone)]
pub struct DataFusionExecutor {
    ctx: SessionContext,
    clock: Arc<dyn Clock>,
}

impl DataFusionExecutor {
    pub fn new(ctx: SessionContext) -> Self {
        Self {
            ctx,
            clock: Arc::new(SystemClock),
        }
    }

    /// Uses `clock` to stamp `snapshotted_at`.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn context(&self) -> &SessionContext {
        &self.ctx
    }
}

impl std::fmt::Debug for DataFusionExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DataFusionExecutor")
            .field("clock", &self.clock)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl FreshnessExecutor for DataFusionExecutor {
    fn name(&self) -> &str {
        "datafusion"
    }

    async fn compile(&self, node: &FreshnessNode) -> Result<CompiledQuery> {
        Ok(CompiledQuery::new(freshness_sql(node)))
    }

    #[instrument(skip(self, query), fields(node.unique_id = %node.unique_id()))]
    async fn execute(
        &self,
        node: &FreshnessNode,
        query: &CompiledQuery,
    ) -> Result<FreshnessObservation> {
        let df = self.ctx.sql(&query.sql).await.map_err(|e| {
            FreshnessError::query_with_source(
                node.unique_id(),
                format!("failed to plan freshness query: {e}"),
                Box::new(e),
            )
        })?;
        let batches = df.collect().await.map_err(|e| {
            FreshnessError::query_with_source(
                node.unique_id(),
                format!("failed to run freshness query: {e}"),
                Box::new(e),
            )
        })?;
        let snapshotted_at = self.clock.now();

        let max_loaded_at = max_loaded_at(&batches)?;
        debug!(max_loaded_at = ?max_loaded_at, "Freshness query returned");

        Ok(FreshnessObservation::new(max_loaded_at, snapshotted_at)
            .with_adapter_response(adapter_response(&batches)))
    }
}

/// `_message`, `code` and `rows_affected`, the fields warehouse adapters
/// commonly report for a query.
fn adapter_response(batches: &[RecordBatch]) -> Map<String, Value> {
    let rows: usize = batches.iter().map(RecordBatch::num_rows).sum();
    let mut response = Map::new();
    response.insert("_message".to_string(), Value::from(format!("SELECT {rows}")));
    response.insert("code".to_string(), Value::from("SELECT"));
    response.insert("rows_affected".to_string(), Value::from(rows));
    response
}

/// Reads the single timestamp produced by the freshness query.
fn max_loaded_at(batches: &[RecordBatch]) -> Result<Option<DateTime<Utc>>> {
    let Some(batch) = batches.iter().find(|b| b.num_rows() > 0) else {
        return Ok(None);
    };
    if batch.num_columns() == 0 {
        return Err(FreshnessError::Internal(
            "freshness query returned no columns".to_string(),
        ));
    }

    let column = cast(
        batch.column(0),
        &DataType::Timestamp(TimeUnit::Microsecond, None),
    )?;
    let values = column
        .as_any()
        .downcast_ref::<TimestampMicrosecondArray>()
        .ok_or_else(|| {
            FreshnessError::Internal("max_loaded_at is not a timestamp column".to_string())
        })?;

    if values.is_null(0) {
        return Ok(None);
    }
    DateTime::from_timestamp_micros(values.value(0))
        .map(Some)
        .ok_or_else(|| {
            FreshnessError::Internal(format!(
                "max_loaded_at {} is out of range",
                values.value(0)
            ))
        })
}
