//! Term Freshness CLI
//!
//! Checks how recently the selected source tables were loaded, writes the
//! freshness report and prints a summary.
//!
//! Exit status is 0 when every table passed or only warned, 1 when any table
//! is stale or failed to evaluate, and 2 when the invocation itself could not
//! be completed.

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use datafusion::prelude::SessionContext;
use std::io::IsTerminal;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use term_freshness::config::{FreshnessConfig, DEFAULT_THREADS};
use term_freshness::env::{custom_env, ProcessEnvironment};
use term_freshness::executor::DataFusionExecutor;
use term_freshness::formatters::{FormatterConfig, HumanFormatter, ReportFormatter};
use term_freshness::logging::setup::{init_logging, LoggingConfig};
use term_freshness::logging::LogConfig;
use term_freshness::project::SourcesProject;
use term_freshness::report::{FreshnessReport, ReportWriter};
use term_freshness::runner::FreshnessRunner;
use term_freshness::selector::NodeSelector;
use tokio::sync::watch;
use tracing::{error, info, warn, Level};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Log at debug level, including compiled queries
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit logs as JSON
    #[arg(long, global = true)]
    log_json: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Commands that operate on sources
    Source {
        #[command(subcommand)]
        command: SourceCommand,
    },
}

#[derive(Subcommand, Debug)]
enum SourceCommand {
    /// Check how recently each selected source table was loaded
    Freshness(FreshnessArgs),

    /// Deprecated name for `source freshness`
    #[command(name = "snapshot-freshness", hide = true)]
    SnapshotFreshness(FreshnessArgs),
}

#[derive(Args, Debug)]
struct FreshnessArgs {
    /// Project file declaring sources and tables
    #[arg(long, default_value = "sources.json")]
    project: PathBuf,

    /// Where to write the report
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Number of tables checked at once
    #[arg(long, default_value_t = DEFAULT_THREADS)]
    threads: usize,

    /// Only check matching sources (`source:raw`, `source:raw.orders`, `raw.ord*`)
    #[arg(short, long, num_args = 1..)]
    select: Vec<String>,

    /// Skip matching sources
    #[arg(long, num_args = 1..)]
    exclude: Vec<String>,

    /// Write the report without indentation
    #[arg(long)]
    compact: bool,

    /// Disable colors in the summary
    #[arg(long)]
    no_color: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Err(e) = init_logging(logging_config(cli.verbose, cli.log_json)) {
        eprintln!("Failed to initialize logging: {e}");
    }

    match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            error!(error = %e, "Freshness run failed");
            eprintln!("Error: {e:#}");
            ExitCode::from(2)
        }
    }
}

fn logging_config(verbose: bool, json: bool) -> LoggingConfig {
    let config = if json {
        LoggingConfig::structured()
    } else {
        LoggingConfig::default()
    };
    if verbose {
        config
            .with_level(Level::INFO)
            .with_freshness_level(Level::DEBUG)
    } else {
        config
    }
}

/// 2 when some selected table is misconfigured, otherwise 1 when any table
/// is stale or failed to evaluate.
fn exit_code(misconfigured: bool, report: &FreshnessReport) -> u8 {
    if misconfigured {
        2
    } else if report.is_success() {
        0
    } else {
        1
    }
}

async fn run(cli: Cli) -> Result<ExitCode> {
    let Command::Source { command } = cli.command;
    let args = match command {
        SourceCommand::Freshness(args) => args,
        SourceCommand::SnapshotFreshness(args) => {
            warn!("`source snapshot-freshness` is deprecated, use `source freshness`");
            args
        }
    };

    let mut config = FreshnessConfig::new()
        .with_threads(args.threads)
        .with_pretty(!args.compact);
    if let Some(output) = &args.output {
        config = config.with_output_path(output);
    }
    config.validate()?;

    let selector = NodeSelector::new(&args.select, &args.exclude)?;
    let project = SourcesProject::from_path(&args.project)?;
    let plan = project.plan(&selector);
    let misconfigured = plan.has_errors();
    for problem in &plan.errors {
        error!(
            node.unique_id = %problem.unique_id,
            error = %problem.error,
            "Skipping misconfigured source"
        );
        eprintln!("Skipping {}: {}", problem.unique_id, problem.error);
    }

    let ctx = SessionContext::new();
    project.register_tables(&ctx).await;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, finishing in-flight checks");
            let _ = shutdown_tx.send(true);
        }
    });

    let log_config = if cli.verbose {
        LogConfig::verbose()
    } else {
        LogConfig::default()
    };
    let runner = FreshnessRunner::from_config(Arc::new(DataFusionExecutor::new(ctx)), &config)?
        .with_log_config(log_config)
        .with_shutdown(shutdown_rx);
    let output = runner.run(plan.nodes).await?;

    let env = custom_env(&ProcessEnvironment, config.env_prefix());
    let invocation_id = uuid::Uuid::new_v4().to_string();
    let report = FreshnessReport::from_run(output, invocation_id, env);

    ReportWriter::new()
        .with_pretty(config.pretty())
        .write(&report, config.output_path())
        .with_context(|| format!("writing {}", config.output_path().display()))?;
    info!(
        invocation_id = %report.invocation_id(),
        path = %config.output_path().display(),
        "Freshness report written"
    );

    let use_colors = !args.no_color && std::io::stdout().is_terminal();
    let summary = HumanFormatter::with_config(FormatterConfig::default().with_colors(use_colors))
        .format(&report)?;
    print!("{summary}");

    Ok(ExitCode::from(exit_code(misconfigured, &report)))
}
