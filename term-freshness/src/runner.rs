//! Concurrent evaluation of freshness nodes.
//!
//! The runner starts a fixed pool of workers, each named `Thread-<n>`. Workers
//! pull nodes from a shared queue, run the compile and execute phases against
//! the executor, evaluate the observation and send the result to a single
//! collector. Results are returned in input order no matter which worker
//! finished first.
//!
//! ```text
//!            ┌────────────┐
//! nodes ───▶ │ NodeQueue  │ ──▶ Thread-1 ─┐
//!            │ (VecDeque) │ ──▶ Thread-2 ─┼──▶ mpsc ──▶ collector ──▶ RunOutput
//!            └────────────┘ ──▶ Thread-n ─┘
//! ```
//!
//! A shutdown signal stops workers from taking new nodes. Nodes already in
//! flight finish, the partial results are dropped and the run fails with
//! [`FreshnessError::Cancelled`].

use chrono::{DateTime, Utc};
use futures::FutureExt;
use serde_json::Map;
use std::any::Any;
use std::collections::{HashSet, VecDeque};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinSet;
use tracing::{debug, info, instrument, warn};

use crate::clock::{Clock, SystemClock};
use crate::config::{FreshnessConfig, DEFAULT_THREADS};
use crate::error::{FreshnessError, Result};
use crate::evaluator::{evaluate, FreshnessStatus};
use crate::executor::{FreshnessExecutor, FreshnessObservation};
use crate::logging::{truncate_field, LogConfig};
use crate::node::FreshnessNode;
use crate::{log_node, log_query};

pub use crate::result::{FreshnessResult, TimingInfo};

/// Everything a finished run produced.
#[derive(Debug, Clone)]
pub struct RunOutput {
    /// One result per input node, in input order
    pub results: Vec<FreshnessResult>,
    /// When the runner started
    pub started_at: DateTime<Utc>,
    /// Seconds from start until the last result was collected
    pub elapsed_time: f64,
}

/// Evaluates freshness nodes with a bounded worker pool.
///
/// # Example
///
/// ```rust,ignore
/// use std::sync::Arc;
/// use term_freshness::executor::DataFusionExecutor;
/// use term_freshness::runner::FreshnessRunner;
///
/// let runner = FreshnessRunner::new(Arc::new(DataFusionExecutor::new(ctx))).with_threads(8);
/// let output = runner.run(plan.nodes).await?;
/// println!("{} nodes in {:.2}s", output.results.len(), output.elapsed_time);
/// ```
#[derive(Clone)]
pub struct FreshnessRunner {
    executor: Arc<dyn FreshnessExecutor>,
    clock: Arc<dyn Clock>,
    threads: usize,
    log_config: LogConfig,
    shutdown: Option<watch::Receiver<bool>>,
}

impl FreshnessRunner {
    pub fn new(executor: Arc<dyn FreshnessExecutor>) -> Self {
        Self {
            executor,
            clock: Arc::new(SystemClock),
            threads: DEFAULT_THREADS,
            log_config: LogConfig::default(),
            shutdown: None,
        }
    }

    /// Creates a runner using the thread count from `config`.
    pub fn from_config(
        executor: Arc<dyn FreshnessExecutor>,
        config: &FreshnessConfig,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self::new(executor).with_threads(config.threads()))
    }

    /// Set the maximum number of nodes evaluated at once.
    pub fn with_threads(mut self, threads: usize) -> Self {
        self.threads = threads;
        self
    }

    /// Set the clock used for timing and evaluation.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_log_config(mut self, log_config: LogConfig) -> Self {
        self.log_config = log_config;
        self
    }

    /// Stop taking new nodes once `shutdown` becomes `true`.
    pub fn with_shutdown(mut self, shutdown: watch::Receiver<bool>) -> Self {
        self.shutdown = Some(shutdown);
        self
    }

    pub fn threads(&self) -> usize {
        self.threads
    }

    /// Evaluates every node and returns the results in input order.
    ///
    /// Per-node failures, including an executor that panics, become
    /// `runtime error` results. The run itself only fails on invalid
    /// settings, duplicate node ids, cancellation, or a worker that died.
    #[instrument(
        skip(self, nodes),
        fields(node_count = nodes.len(), threads = self.threads, executor = self.executor.name())
    )]
    pub async fn run(&self, nodes: Vec<FreshnessNode>) -> Result<RunOutput> {
        if self.threads == 0 {
            return Err(FreshnessError::Configuration(
                "threads must be at least 1".to_string(),
            ));
        }
        ensure_unique_ids(&nodes)?;

        let started_at = self.clock.now();
        let start = Instant::now();
        let total = nodes.len();

        if total == 0 {
            info!("No freshness nodes selected");
            return Ok(RunOutput {
                results: Vec::new(),
                started_at,
                elapsed_time: start.elapsed().as_secs_f64(),
            });
        }

        let worker_count = self.threads.min(total);
        info!(
            "Running freshness checks on {} sources with {} threads",
            total, worker_count
        );

        let queue = NodeQueue::new(nodes);
        let (results_tx, mut results_rx) = mpsc::unbounded_channel();
        let mut workers = JoinSet::new();

        for n in 1..=worker_count {
            let worker = Worker {
                thread_id: format!("Thread-{n}"),
                queue: queue.clone(),
                executor: Arc::clone(&self.executor),
                clock: Arc::clone(&self.clock),
                log_config: self.log_config.clone(),
                shutdown: self.shutdown.clone(),
                results: results_tx.clone(),
                total,
            };
            workers.spawn(worker.run());
        }
        drop(results_tx);

        let mut slots: Vec<Option<FreshnessResult>> = (0..total).map(|_| None).collect();
        let mut completed = 0;
        while let Some((index, result)) = results_rx.recv().await {
            slots[index] = Some(result);
            completed += 1;
        }
        let elapsed_time = start.elapsed().as_secs_f64();

        while let Some(joined) = workers.join_next().await {
            joined.map_err(|e| FreshnessError::Internal(format!("freshness worker failed: {e}")))?;
        }

        if completed < total {
            if self.shutdown_requested() {
                warn!(completed, total, "Freshness run cancelled, discarding partial results");
                return Err(FreshnessError::Cancelled { completed, total });
            }
            return Err(FreshnessError::Internal(format!(
                "only {completed} of {total} freshness nodes reported a result"
            )));
        }

        info!(
            "Finished running {} freshness checks in {:.2}s",
            total, elapsed_time
        );

        Ok(RunOutput {
            results: slots.into_iter().flatten().collect(),
            started_at,
            elapsed_time,
        })
    }

    fn shutdown_requested(&self) -> bool {
        self.shutdown.as_ref().is_some_and(|rx| *rx.borrow())
    }
}

impl std::fmt::Debug for FreshnessRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FreshnessRunner")
            .field("executor", &self.executor.name())
            .field("threads", &self.threads)
            .field("log_config", &self.log_config)
            .finish_non_exhaustive()
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("unknown panic")
}

fn ensure_unique_ids(nodes: &[FreshnessNode]) -> Result<()> {
    let mut seen = HashSet::with_capacity(nodes.len());
    for node in nodes {
        if !seen.insert(node.unique_id()) {
            return Err(FreshnessError::Configuration(format!(
                "node '{}' was selected more than once",
                node.unique_id()
            )));
        }
    }
    Ok(())
}

/// Pending nodes, tagged with their input position.
#[derive(Clone)]
struct NodeQueue {
    entries: Arc<Mutex<VecDeque<(usize, FreshnessNode)>>>,
}

impl NodeQueue {
    fn new(nodes: Vec<FreshnessNode>) -> Self {
        Self {
            entries: Arc::new(Mutex::new(nodes.into_iter().enumerate().collect())),
        }
    }

    async fn pop(&self) -> Option<(usize, FreshnessNode)> {
        self.entries.lock().await.pop_front()
    }
}

struct Worker {
    thread_id: String,
    queue: NodeQueue,
    executor: Arc<dyn FreshnessExecutor>,
    clock: Arc<dyn Clock>,
    log_config: LogConfig,
    shutdown: Option<watch::Receiver<bool>>,
    results: mpsc::UnboundedSender<(usize, FreshnessResult)>,
    total: usize,
}

impl Worker {
    async fn run(self) {
        debug!(thread.id = %self.thread_id, "Freshness worker started");

        loop {
            if self.shutdown.as_ref().is_some_and(|rx| *rx.borrow()) {
                debug!(thread.id = %self.thread_id, "Shutdown requested, worker stopping");
                break;
            }
            let Some((index, node)) = self.queue.pop().await else {
                break;
            };

            log_node!(
                self.log_config,
                thread.id = %self.thread_id,
                node.unique_id = %node.unique_id(),
                "{} of {} START freshness of {}",
                index + 1,
                self.total,
                node.display_name()
            );

            let result = self.evaluate_node(&node).await;

            log_node!(
                self.log_config,
                thread.id = %self.thread_id,
                node.unique_id = %node.unique_id(),
                node.status = %result.status,
                "{} of {} {} freshness of {} in {:.2}s",
                index + 1,
                self.total,
                result.status.as_str().to_uppercase(),
                node.display_name(),
                result.execution_time
            );

            if self.results.send((index, result)).is_err() {
                break;
            }
        }
    }

    async fn evaluate_node(&self, node: &FreshnessNode) -> FreshnessResult {
        let start = Instant::now();
        let mut timing = Vec::with_capacity(2);

        let observed = AssertUnwindSafe(self.observe(node, &mut timing))
            .catch_unwind()
            .await
            .unwrap_or_else(|panic| {
                Err(FreshnessError::query(
                    node.unique_id(),
                    format!("freshness query panicked: {}", panic_message(&*panic)),
                ))
            });

        let (status, observation, age, error) = match observed {
            Ok(observation) => {
                let evaluation =
                    evaluate(node.criteria(), &observation, observation.snapshotted_at);
                let error = observation.max_loaded_at.is_none().then(|| {
                    format!(
                        "no rows with a non-null {} found in {}",
                        node.loaded_at_field(),
                        node.relation()
                    )
                });
                (evaluation.status, Some(observation), evaluation.age_seconds, error)
            }
            Err(e) => {
                warn!(
                    thread.id = %self.thread_id,
                    node.unique_id = %node.unique_id(),
                    error = %e,
                    "Freshness query failed"
                );
                (FreshnessStatus::RuntimeError, None, None, Some(e.to_string()))
            }
        };

        let (max_loaded_at, snapshotted_at, adapter_response) = match observation {
            Some(o) => (o.max_loaded_at, Some(o.snapshotted_at), o.adapter_response),
            None => (None, None, Map::new()),
        };

        FreshnessResult {
            unique_id: node.unique_id().to_string(),
            max_loaded_at,
            snapshotted_at,
            max_loaded_at_time_ago_in_s: age,
            status,
            criteria: node.criteria().clone(),
            adapter_response,
            thread_id: self.thread_id.clone(),
            execution_time: start.elapsed().as_secs_f64(),
            timing,
            error,
        }
    }

    /// Runs both executor phases, recording a timing entry for each phase
    /// that was started.
    async fn observe(
        &self,
        node: &FreshnessNode,
        timing: &mut Vec<TimingInfo>,
    ) -> Result<FreshnessObservation> {
        let compile_started = self.clock.now();
        let compiled = self.executor.compile(node).await;
        timing.push(TimingInfo::new("compile", compile_started, self.clock.now()));
        let compiled = compiled?;

        log_query!(
            self.log_config,
            node.unique_id = %node.unique_id(),
            sql = %truncate_field(&compiled.sql, self.log_config.max_field_length),
            "Compiled freshness query"
        );

        let execute_started = self.clock.now();
        let observation = self.executor.execute(node, &compiled).await;
        timing.push(TimingInfo::new("execute", execute_started, self.clock.now()));
        observation
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;
    use crate::criteria::{FreshnessCriteria, FreshnessThreshold, Period};
    use crate::executor::CompiledQuery;
    use async_trait::async_trait;
    use chrono::{Duration, TimeZone};
    use std::collections::HashMap;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap()
    }

    fn criteria() -> FreshnessCriteria {
        FreshnessCriteria::new()
            .with_warn_after(FreshnessThreshold::new(10, Period::Hour).unwrap())
            .with_error_after(FreshnessThreshold::new(18, Period::Hour).unwrap())
    }

    fn node(table: &str) -> FreshnessNode {
        FreshnessNode::new(
            format!("source.test.raw.{table}"),
            "raw",
            table,
            criteria(),
        )
    }

    /// Answers from a table of canned load times; tables it does not know fail.
    struct CannedExecutor {
        loads: HashMap<String, Option<DateTime<Utc>>>,
        fail_compile: HashSet<String>,
    }

    impl CannedExecutor {
        fn new() -> Self {
            Self {
                loads: HashMap::new(),
                fail_compile: HashSet::new(),
            }
        }

        fn loaded(mut self, table: &str, ago: Option<Duration>) -> Self {
            self.loads.insert(table.to_string(), ago.map(|d| now() - d));
            self
        }

        fn broken_template(mut self, table: &str) -> Self {
            self.fail_compile.insert(table.to_string());
            self
        }
    }

    #[async_trait]
    impl FreshnessExecutor for CannedExecutor {
        fn name(&self) -> &str {
            "canned"
        }

        async fn compile(&self, node: &FreshnessNode) -> Result<CompiledQuery> {
            if self.fail_compile.contains(node.table_name()) {
                return Err(FreshnessError::query(node.unique_id(), "bad template"));
            }
            Ok(CompiledQuery::new(format!("select * from {}", node.relation())))
        }

        async fn execute(
            &self,
            node: &FreshnessNode,
            _query: &CompiledQuery,
        ) -> Result<FreshnessObservation> {
            match self.loads.get(node.table_name()) {
                Some(loaded) => Ok(FreshnessObservation::new(*loaded, now())),
                None => Err(FreshnessError::query(
                    node.unique_id(),
                    "relation does not exist",
                )),
            }
        }
    }

    fn runner(executor: CannedExecutor) -> FreshnessRunner {
        FreshnessRunner::new(Arc::new(executor)).with_clock(Arc::new(FixedClock::new(now())))
    }

    #[tokio::test]
    async fn test_statuses_per_node() {
        let executor = CannedExecutor::new()
            .loaded("fresh", Some(Duration::hours(2)))
            .loaded("stale", Some(Duration::hours(12)))
            .loaded("ancient", Some(Duration::days(30)))
            .loaded("empty", None);

        let output = runner(executor)
            .run(vec![node("fresh"), node("stale"), node("ancient"), node("empty")])
            .await
            .unwrap();

        let statuses: Vec<_> = output.results.iter().map(|r| r.status).collect();
        assert_eq!(
            statuses,
            vec![
                FreshnessStatus::Pass,
                FreshnessStatus::Warn,
                FreshnessStatus::Error,
                FreshnessStatus::RuntimeError
            ]
        );
        assert_eq!(output.results[0].max_loaded_at_time_ago_in_s, Some(7_200.0));
        assert!(output.results[3].error.as_deref().unwrap().contains("no rows"));
        assert!(output.results[3].snapshotted_at.is_some());
    }

    #[tokio::test]
    async fn test_query_failure_is_isolated() {
        let executor = CannedExecutor::new().loaded("fresh", Some(Duration::hours(1)));

        let output = runner(executor)
            .run(vec![node("missing"), node("fresh")])
            .await
            .unwrap();

        let failed = &output.results[0];
        assert_eq!(failed.status, FreshnessStatus::RuntimeError);
        assert_eq!(failed.max_loaded_at, None);
        assert_eq!(failed.snapshotted_at, None);
        assert!(failed.error.as_deref().unwrap().contains("relation does not exist"));
        let phases: Vec<_> = failed.timing.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(phases, vec!["compile", "execute"]);

        assert_eq!(output.results[1].status, FreshnessStatus::Pass);
    }

    #[tokio::test]
    async fn test_compile_failure_keeps_compile_timing_only() {
        let executor = CannedExecutor::new()
            .loaded("orders", Some(Duration::hours(1)))
            .broken_template("orders");

        let output = runner(executor).run(vec![node("orders")]).await.unwrap();
        let result = &output.results[0];
        assert_eq!(result.status, FreshnessStatus::RuntimeError);
        assert_eq!(result.timing.len(), 1);
        assert_eq!(result.timing[0].name, "compile");
    }

    #[tokio::test]
    async fn test_empty_selection() {
        let output = runner(CannedExecutor::new()).run(Vec::new()).await.unwrap();
        assert!(output.results.is_empty());
        assert!(output.elapsed_time >= 0.0);
    }

    #[tokio::test]
    async fn test_zero_threads_rejected() {
        let err = runner(CannedExecutor::new())
            .with_threads(0)
            .run(vec![node("orders")])
            .await
            .unwrap_err();
        assert!(matches!(err, FreshnessError::Configuration(_)));
    }

    #[tokio::test]
    async fn test_duplicate_nodes_rejected() {
        let err = runner(CannedExecutor::new())
            .run(vec![node("orders"), node("orders")])
            .await
            .unwrap_err();
        assert!(err.to_string().contains("more than once"));
    }

    #[tokio::test]
    async fn test_thread_ids_and_order() {
        let mut executor = CannedExecutor::new();
        let mut nodes = Vec::new();
        for i in 0..10 {
            let table = format!("t{i}");
            executor = executor.loaded(&table, Some(Duration::minutes(i)));
            nodes.push(node(&table));
        }

        let output = runner(executor).with_threads(3).run(nodes).await.unwrap();
        assert_eq!(output.results.len(), 10);
        for (i, result) in output.results.iter().enumerate() {
            assert_eq!(result.unique_id, format!("source.test.raw.t{i}"));
            assert!(result.thread_id.starts_with("Thread-"));
        }
        let threads: HashSet<_> = output.results.iter().map(|r| r.thread_id.as_str()).collect();
        assert!(threads.len() <= 3);
    }

    #[tokio::test]
    async fn test_shutdown_before_start_cancels() {
        let (tx, rx) = watch::channel(false);
        tx.send(true).unwrap();

        let executor = CannedExecutor::new().loaded("orders", Some(Duration::hours(1)));
        let err = runner(executor)
            .with_shutdown(rx)
            .run(vec![node("orders")])
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            FreshnessError::Cancelled {
                completed: 0,
                total: 1
            }
        ));
    }
}
