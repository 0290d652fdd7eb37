//! Shared helpers for integration tests.

#![allow(dead_code)]

use arrow::array::{Int64Array, TimestampMicrosecondArray};
use arrow::datatypes::{DataType, Field, Schema, TimeUnit};
use arrow::record_batch::RecordBatch;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use datafusion::common::TableReference;
use datafusion::prelude::SessionContext;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use term_freshness::clock::{Clock, SystemClock};
use term_freshness::criteria::{FreshnessCriteria, FreshnessThreshold, Period};
use term_freshness::error::{FreshnessError, Result};
use term_freshness::executor::{CompiledQuery, FreshnessExecutor, FreshnessObservation};
use term_freshness::node::FreshnessNode;

/// Row ids handed out by [`SourceTable::insert`]. Shared by every table in the
/// test binary, like a warehouse sequence.
static NEXT_ROW_ID: AtomicI64 = AtomicI64::new(101);

pub fn threshold(count: u32, period: Period) -> FreshnessThreshold {
    FreshnessThreshold::new(count, period).unwrap()
}

pub fn hours(count: u32) -> FreshnessThreshold {
    threshold(count, Period::Hour)
}

pub fn criteria(
    warn: Option<FreshnessThreshold>,
    error: Option<FreshnessThreshold>,
) -> FreshnessCriteria {
    let mut criteria = FreshnessCriteria::new();
    if let Some(warn) = warn {
        criteria = criteria.with_warn_after(warn);
    }
    if let Some(error) = error {
        criteria = criteria.with_error_after(error);
    }
    criteria
}

pub fn node(table: &str, criteria: FreshnessCriteria) -> FreshnessNode {
    FreshnessNode::new(format!("source.test.test_source.{table}"), "test_source", table, criteria)
        .with_loaded_at_field("updated_at")
}

/// An in-memory source table with an `id` and an `updated_at` column.
pub struct SourceTable {
    name: String,
    rows: Vec<(i64, DateTime<Utc>)>,
}

impl SourceTable {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            rows: Vec::new(),
        }
    }

    /// Appends a row loaded at `loaded_at` and returns its id.
    pub fn insert(&mut self, loaded_at: DateTime<Utc>) -> i64 {
        let id = NEXT_ROW_ID.fetch_add(1, Ordering::SeqCst);
        // Stored at microsecond precision, like the column.
        let loaded_at = DateTime::from_timestamp_micros(loaded_at.timestamp_micros()).unwrap();
        self.rows.push((id, loaded_at));
        id
    }

    /// The most recent load time inserted so far.
    pub fn last_inserted(&self) -> Option<DateTime<Utc>> {
        self.rows.iter().map(|(_, ts)| *ts).max()
    }

    /// Registers the current rows with `ctx`, replacing any earlier version.
    pub fn register(&self, ctx: &SessionContext) {
        let schema = Arc::new(Schema::new(vec![
            Field::new("id", DataType::Int64, false),
            Field::new(
                "updated_at",
                DataType::Timestamp(TimeUnit::Microsecond, None),
                false,
            ),
        ]));
        let ids = Int64Array::from(self.rows.iter().map(|(id, _)| *id).collect::<Vec<_>>());
        let loaded = TimestampMicrosecondArray::from(
            self.rows
                .iter()
                .map(|(_, ts)| ts.timestamp_micros())
                .collect::<Vec<_>>(),
        );
        let batch = RecordBatch::try_new(schema, vec![Arc::new(ids), Arc::new(loaded)]).unwrap();

        let _ = ctx.deregister_table(TableReference::bare(self.name.as_str()));
        ctx.register_batch(self.name.as_str(), batch).unwrap();
    }
}

/// What [`MockExecutor`] reports for a node.
#[derive(Debug, Clone)]
pub enum Outcome {
    Loaded(Option<DateTime<Utc>>),
    Fail(String),
    Panic(String),
}

/// Canned executor keyed by unique id. Tracks how many nodes run at once.
pub struct MockExecutor {
    clock: Arc<dyn Clock>,
    outcomes: HashMap<String, Outcome>,
    responses: HashMap<String, Map<String, Value>>,
    delays: HashMap<String, Duration>,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
    started: Mutex<Vec<String>>,
}

impl Default for MockExecutor {
    fn default() -> Self {
        Self {
            clock: Arc::new(SystemClock),
            outcomes: HashMap::new(),
            responses: HashMap::new(),
            delays: HashMap::new(),
            in_flight: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
            started: Mutex::new(Vec::new()),
        }
    }
}

impl MockExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stamps `snapshotted_at` from `clock`.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_response(mut self, unique_id: &str, response: Map<String, Value>) -> Self {
        self.responses.insert(unique_id.to_string(), response);
        self
    }

    pub fn with_outcome(mut self, unique_id: &str, outcome: Outcome) -> Self {
        self.outcomes.insert(unique_id.to_string(), outcome);
        self
    }

    pub fn with_delay(mut self, unique_id: &str, delay: Duration) -> Self {
        self.delays.insert(unique_id.to_string(), delay);
        self
    }

    /// Highest number of concurrent `execute` calls seen.
    pub fn peak_concurrency(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    /// Unique ids in the order their execution started.
    pub fn started(&self) -> Vec<String> {
        self.started.lock().unwrap().clone()
    }
}

#[async_trait]
impl FreshnessExecutor for MockExecutor {
    fn name(&self) -> &str {
        "mock"
    }

    async fn compile(&self, node: &FreshnessNode) -> Result<CompiledQuery> {
        Ok(CompiledQuery::new(format!(
            "select max({}) from {}",
            node.loaded_at_field(),
            node.relation()
        )))
    }

    async fn execute(
        &self,
        node: &FreshnessNode,
        _query: &CompiledQuery,
    ) -> Result<FreshnessObservation> {
        self.started.lock().unwrap().push(node.unique_id().to_string());
        let running = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(running, Ordering::SeqCst);

        if let Some(delay) = self.delays.get(node.unique_id()) {
            tokio::time::sleep(*delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        let now = self.clock.now();
        let observation = match self.outcomes.get(node.unique_id()) {
            Some(Outcome::Loaded(loaded_at)) => FreshnessObservation::new(*loaded_at, now),
            Some(Outcome::Fail(message)) => {
                return Err(FreshnessError::query(node.unique_id(), message))
            }
            Some(Outcome::Panic(message)) => panic!("{message}"),
            None => FreshnessObservation::new(Some(now), now),
        };
        let response = self.responses.get(node.unique_id()).cloned().unwrap_or_default();
        Ok(observation.with_adapter_response(response))
    }
}
