//! market-news — binary entrypoint.
//! Parses the CLI, loads configuration and runs one pipeline command.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};

use market_news_pipeline::companies::{CompanyDirectory, CompanyId};
use market_news_pipeline::config::PipelineConfig;
use market_news_pipeline::ingest::FetchReport;
use market_news_pipeline::pipeline::{BatchReport, Pipeline};
use market_news_pipeline::reconcile::reconcile;
use market_news_pipeline::scheduler::{Scheduler, SchedulerSettings};
use market_news_pipeline::store::backup::DirSink;
use market_news_pipeline::telemetry::{self, LogFormat};

#[derive(Debug, Parser)]
#[command(name = "market-news", version, about = "Market news ingestion and classification pipeline")]
struct Cli {
    /// Config file (TOML or JSON); overrides PIPELINE_CONFIG_PATH.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[arg(long, global = true, env = "LOG_FORMAT", value_enum, default_value_t = LogFormat::Compact)]
    log_format: LogFormat,

    /// Serve Prometheus metrics on this address.
    #[arg(long, global = true, env = "METRICS_ADDR")]
    metrics_addr: Option<SocketAddr>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Start the scheduler and run until Ctrl-C.
    Run,
    /// One fetch + classify cycle in the configured mode.
    Cycle,
    /// Poll feeds and queue new items.
    Fetch,
    /// Classify one batch from the queue.
    Process {
        #[arg(long)]
        limit: Option<usize>,
    },
    /// Classify the whole queue with retries.
    Drain,
    /// Remove duplicate results (same normalized title and day).
    Dedup {
        /// Report only; write nothing.
        #[arg(long)]
        dry_run: bool,
    },
    /// Result store summary.
    Stats {
        #[arg(long)]
        company: Option<CompanyId>,
    },
    /// Discard everything in the work queue.
    PurgeQueue,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env in local/dev; no-op when absent.
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();
    telemetry::init_tracing(cli.log_format);
    if let Some(addr) = cli.metrics_addr {
        telemetry::install_exporter(addr)?;
    }

    let cfg = match &cli.config {
        Some(p) => PipelineConfig::load_from(p)?,
        None => PipelineConfig::load_default()?,
    };

    match cli.command {
        Command::Run => run_scheduler(&cfg).await,
        Command::Cycle => {
            let pipeline = Pipeline::from_config(&cfg)?;
            let report = pipeline.cycle(pipeline.mode()).await?;
            print_summary(&pipeline, Some(&report.fetch), Some(&report.batch))
        }
        Command::Fetch => {
            let pipeline = Pipeline::from_config(&cfg)?;
            let fetch = pipeline.fetch().await?;
            print_summary(&pipeline, Some(&fetch), None)
        }
        Command::Process { limit } => {
            let pipeline = Pipeline::from_config(&cfg)?;
            let batch = pipeline.process_batch(limit).await?;
            print_summary(&pipeline, None, Some(&batch))
        }
        Command::Drain => {
            let pipeline = Pipeline::from_config(&cfg)?;
            let batch = pipeline.drain_with_retry().await?;
            print_summary(&pipeline, None, Some(&batch))
        }
        Command::Dedup { dry_run } => {
            let mut store = market_news_pipeline::ResultStore::open(cfg.storage.results_path())?;
            let sink = DirSink::new(&cfg.storage.data_dir);
            let report = reconcile(&mut store, &sink, dry_run, Utc::now())?;
            println!("{}", serde_json::to_string_pretty(&report)?);
            Ok(())
        }
        Command::Stats { company } => print_stats(&cfg, company),
        Command::PurgeQueue => {
            let queue = market_news_pipeline::WorkQueue::new(cfg.storage.queue_path());
            let dropped = queue.drain_all()?;
            tracing::info!(discarded = dropped.len(), "queue purged");
            println!("discarded {} queued items", dropped.len());
            Ok(())
        }
    }
}

async fn run_scheduler(cfg: &PipelineConfig) -> Result<()> {
    let pipeline = Arc::new(Pipeline::from_config(cfg)?);
    let scheduler = Scheduler::new(pipeline.clone(), SchedulerSettings::from(&cfg.scheduler));
    scheduler.start();

    tokio::signal::ctrl_c()
        .await
        .context("waiting for ctrl-c")?;
    scheduler.stop();

    let st = scheduler.status();
    tracing::info!(
        cycles = st.totals.cycles,
        completed = st.completed,
        failed = st.failed,
        skipped = st.skipped,
        in_progress = st.in_progress,
        "scheduler shut down"
    );
    print_summary(&pipeline, Some(&st.totals.fetch), Some(&st.totals.batch))
}

fn print_summary(
    pipeline: &Pipeline,
    fetch: Option<&FetchReport>,
    batch: Option<&BatchReport>,
) -> Result<()> {
    let queue_len = pipeline.queue().len()?;
    let store_len = pipeline.open_results()?.len();
    let queued = fetch.map_or(0, |f| f.appended);
    let (classified, skipped) = batch.map_or((0, 0), |b| (b.processed, b.skipped));

    tracing::info!(queued, classified, skipped, queue_len, store_len, "run summary");
    println!("queued:     {queued}");
    if let Some(f) = fetch {
        println!(
            "  dropped:  {} duplicate, {} incomplete, {} failed feeds",
            f.duplicates, f.incomplete, f.failed_feeds
        );
    }
    println!("classified: {classified}");
    println!("skipped:    {skipped}");
    if let Some(b) = batch {
        println!(
            "  tones:    +{} / -{} / ={}",
            b.tones.positive, b.tones.negative, b.tones.neutral
        );
        println!("  rate:     {:.1} items/min", b.items_per_minute);
    }
    println!("queue:      {queue_len}");
    println!("results:    {store_len}");
    Ok(())
}

fn print_stats(cfg: &PipelineConfig, company: Option<CompanyId>) -> Result<()> {
    let store = market_news_pipeline::ResultStore::open(cfg.storage.results_path())?;
    let directory = CompanyDirectory::load_or_seed(&cfg.storage.companies_path())?;
    let ids: Vec<CompanyId> = match company {
        Some(id) => vec![id],
        None => CompanyId::ALL.to_vec(),
    };

    println!("results: {}", store.len());
    for id in ids {
        let st = store.company_stats(id);
        let name = directory.get(id).map(|c| c.name.as_str()).unwrap_or("?");
        println!(
            "{id:<5} {name:<14} total {:>4}  +{:<4} -{:<4} ={:<4} last {}",
            st.total,
            st.positive,
            st.negative,
            st.neutral,
            st.last_update
                .map(|t| t.to_rfc3339())
                .unwrap_or_else(|| "-".to_string()),
        );
    }
    Ok(())
}
