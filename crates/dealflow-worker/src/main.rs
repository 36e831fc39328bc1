//! Dealflow Worker - hosts the deal-flow background job queues
//!
//! # Usage
//!
//! ```bash
//! # Keep the scoring, sync and report queues running until Ctrl-C
//! dealflow-worker serve
//!
//! # Score a few deals and print their final status
//! dealflow-worker score deal-1 deal-2 --batch
//! ```
//!
//! Sweep interval and retention come from `DEALFLOW_SWEEP_INTERVAL_SECS`
//! and `DEALFLOW_RETENTION_HOURS`.

use anyhow::Result;
use clap::{Parser, Subcommand};
use dealflow_queue::{JobId, JobStatusView, ManagerConfig, Queue, QueueManager, StandardQueues};
use serde_json::{json, Value};
use std::time::Duration;
use tracing::info;

mod jobs;

const POLL_INTERVAL: Duration = Duration::from_millis(50);

#[derive(Parser)]
#[command(
    name = "dealflow-worker",
    version,
    about = "Runs the deal-flow background job queues"
)]
struct Cli {
    /// Increase verbosity (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Simulated latency of each job body, in milliseconds
    #[arg(long, default_value_t = 200, global = true)]
    latency_ms: u64,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Keep the queues running until Ctrl-C
    Serve,
    /// Score deals and print their final job status
    Score {
        /// Deal ids to score
        #[arg(required = true)]
        deals: Vec<String>,
        /// Score all deals in one batch job instead of one job each
        #[arg(long)]
        batch: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    setup_logging(cli.verbose);

    let manager = QueueManager::new(ManagerConfig::from_env()?);
    let queues = StandardQueues::init(&manager)?;
    jobs::register(&queues, Duration::from_millis(cli.latency_ms));
    let _loggers = queues.spawn_event_loggers();
    let _sweeper = manager.start_sweeper();

    match cli.command {
        Commands::Serve => serve(&manager).await,
        Commands::Score { deals, batch } => score(&queues.scoring, deals, batch).await,
    }
}

async fn serve(manager: &QueueManager) -> Result<()> {
    info!("Worker running, press Ctrl-C to stop");
    tokio::signal::ctrl_c().await?;

    let stats = serde_json::to_string(&manager.stats())?;
    info!(stats = %stats, "Shutting down");
    Ok(())
}

async fn score(queue: &Queue<Value>, deals: Vec<String>, batch: bool) -> Result<()> {
    let ids: Vec<JobId> = if batch {
        vec![queue.add(jobs::BATCH_SCORE, json!({ "deal_ids": deals })).id]
    } else {
        deals
            .iter()
            .map(|deal_id| queue.add(jobs::SCORE_DEAL, json!({ "deal_id": deal_id })).id)
            .collect()
    };

    let mut statuses: Vec<JobStatusView> = Vec::with_capacity(ids.len());
    for id in &ids {
        statuses.push(wait_for_terminal(queue, id).await?);
    }

    println!("{}", serde_json::to_string_pretty(&statuses)?);
    println!("{}", serde_json::to_string_pretty(&queue.get_stats())?);
    Ok(())
}

async fn wait_for_terminal(queue: &Queue<Value>, id: &JobId) -> Result<JobStatusView> {
    loop {
        match queue.get_job_status(id) {
            Some(status) if status.status.is_terminal() => return Ok(status),
            Some(_) => tokio::time::sleep(POLL_INTERVAL).await,
            None => anyhow::bail!("job {id} disappeared before finishing"),
        }
    }
}

/// Filter used when `RUST_LOG` is unset
fn log_filter(verbosity: u8) -> &'static str {
    match verbosity {
        0 => "info",
        1 => "info,dealflow_queue=debug,dealflow_worker=debug",
        _ => "trace",
    }
}

/// Setup logging based on verbosity level
fn setup_logging(verbosity: u8) {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(log_filter(verbosity))),
        )
        .with(tracing_subscriber::fmt::layer().with_target(true))
        .init();
}
