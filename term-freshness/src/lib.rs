//! # Term Freshness - Source Freshness Checks
//!
//! Term Freshness answers one question for every declared source table: how
//! long ago was it last loaded, and is that acceptable? Each table carries
//! `warn_after` and `error_after` thresholds; the most recent value of its
//! loaded-at column decides whether it is `pass`, `warn` or `error`. A table
//! whose query fails or finds no rows is a `runtime error`.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use datafusion::prelude::*;
//! use term_freshness::prelude::*;
//! use term_freshness::env::{custom_env, ProcessEnvironment, DEFAULT_ENV_PREFIX};
//!
//! # async fn example() -> std::result::Result<(), Box<dyn std::error::Error>> {
//! let project = SourcesProject::from_path("sources.json")?;
//! let plan = project.plan(&NodeSelector::all());
//!
//! let ctx = SessionContext::new();
//! project.register_tables(&ctx).await;
//!
//! let runner = FreshnessRunner::new(Arc::new(DataFusionExecutor::new(ctx))).with_threads(8);
//! let output = runner.run(plan.nodes).await?;
//!
//! let env = custom_env(&ProcessEnvironment, DEFAULT_ENV_PREFIX);
//! let report = FreshnessReport::from_run(output, "my-invocation", env);
//! ReportWriter::new().write(&report, "target/sources.json")?;
//!
//! println!("{}", report.status());
//! # Ok(())
//! # }
//! ```
//!
//! ## Criteria
//!
//! Criteria are declared on a source and inherited by its tables. A table may
//! override single fields, clear them with `null`, or switch freshness off.
//! See [`criteria::resolve`] for the merge rules.
//!
//! ## Architecture
//!
//! - **`criteria`**: thresholds, criteria and the source/table merge
//! - **`evaluator`**: turns a load timestamp and criteria into a status
//! - **`executor`**: the warehouse seam, with a DataFusion implementation
//! - **`runner`**: the concurrent worker pool
//! - **`report`**: aggregation and the versioned JSON report
//! - **`project`** and **`selector`**: the project file and node selection
//! - **`formatters`**: console output

pub mod clock;
pub mod config;
pub mod criteria;
pub mod env;
pub mod error;
pub mod evaluator;
pub mod executor;
pub mod formatters;
pub mod logging;
pub mod node;
pub mod prelude;
pub mod project;
pub mod report;
pub mod result;
pub mod runner;
pub mod selector;
