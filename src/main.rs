//! Linkscope main entry point
//!
//! This is the command-line interface for the Linkscope crawl engine.

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use linkscope::config::{load_config_with_hash, Config};
use linkscope::crawler::{CrawlEngine, HttpFetcher, ProgressWatch};
use linkscope::output::{load_statistics, print_job_report, print_job_table, print_statistics};
use linkscope::storage::{open_storage, JobId, JobQuery, JobStore, DEFAULT_PAGE_SIZE};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tracing_subscriber::EnvFilter;

/// How long a watcher waits for progress before re-checking the job status
const STATUS_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// How long an interrupted run waits for cancelled crawls to settle
const INTERRUPT_GRACE: Duration = Duration::from_secs(5);

/// Linkscope: a single-page crawl engine
///
/// Linkscope fetches each submitted page once, records its headings, login
/// form, HTML version and link health, and streams progress while it works.
#[derive(Parser, Debug)]
#[command(name = "linkscope")]
#[command(version)]
#[command(about = "A single-page crawl engine", long_about = None)]
struct Cli {
    /// Path to TOML configuration file
    #[arg(value_name = "CONFIG")]
    config: PathBuf,

    /// Increase logging verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, conflicts_with = "verbose", global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Submit URLs, stream their progress and print the results
    Crawl {
        #[arg(value_name = "URL", required = true)]
        urls: Vec<String>,

        /// Re-crawl URLs that already have a job
        #[arg(long)]
        force: bool,
    },

    /// Re-queue existing jobs and stream their progress
    Restart {
        #[arg(value_name = "ID", required = true)]
        ids: Vec<JobId>,
    },

    /// List jobs, newest first
    List {
        /// Only show jobs whose URL contains this text
        #[arg(long)]
        query: Option<String>,

        #[arg(long, default_value_t = 1)]
        page: u32,

        #[arg(long, default_value_t = DEFAULT_PAGE_SIZE)]
        size: u32,
    },

    /// Show one job with its links
    Show {
        #[arg(value_name = "ID")]
        id: JobId,
    },

    /// Delete jobs and their links
    Delete {
        #[arg(value_name = "ID", required = true)]
        ids: Vec<JobId>,
    },

    /// Show job counts per status
    Stats,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Setup logging based on verbosity
    setup_logging(cli.verbose, cli.quiet);

    tracing::info!("Loading configuration from: {}", cli.config.display());
    let (config, config_hash) = load_config_with_hash(&cli.config)
        .with_context(|| format!("failed to load {}", cli.config.display()))?;
    tracing::info!("Configuration loaded successfully (hash: {})", config_hash);

    match cli.command {
        Command::Crawl { urls, force } => handle_crawl(&config, &urls, force).await,
        Command::Restart { ids } => handle_restart(&config, &ids).await,
        Command::List { query, page, size } => handle_list(&config, query, page, size),
        Command::Show { id } => handle_show(&config, id),
        Command::Delete { ids } => handle_delete(&config, &ids),
        Command::Stats => handle_stats(&config),
    }
}

/// Sets up the logging/tracing subscriber based on verbosity level
fn setup_logging(verbose: u8, quiet: bool) {
    let filter = if quiet {
        // Only show errors
        EnvFilter::new("error")
    } else {
        match verbose {
            0 => EnvFilter::new("linkscope=info,warn"),
            1 => EnvFilter::new("linkscope=debug,info"),
            2 => EnvFilter::new("linkscope=trace,debug"),
            _ => EnvFilter::new("trace"),
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .init();
}

fn open_store(config: &Config) -> anyhow::Result<Arc<dyn JobStore>> {
    let path = Path::new(&config.storage.database_path);
    let storage = open_storage(path)
        .with_context(|| format!("failed to open database {}", path.display()))?;
    Ok(Arc::new(storage))
}

/// Opens storage, settles crawls cut short by a previous crash, and starts the pool
fn start_engine(config: &Config) -> anyhow::Result<CrawlEngine> {
    let store = open_store(config)?;

    let recovered = store.fail_interrupted_jobs()?;
    if recovered > 0 {
        tracing::warn!("Marked {} interrupted jobs as error", recovered);
    }

    let fetcher = HttpFetcher::new(&config.http).context("failed to build HTTP client")?;
    Ok(CrawlEngine::start(&config.engine, store, Arc::new(fetcher)))
}

/// Handles the crawl command: submits each URL and follows the resulting jobs
async fn handle_crawl(config: &Config, urls: &[String], force: bool) -> anyhow::Result<()> {
    let engine = start_engine(config)?;
    let mut job_ids = Vec::with_capacity(urls.len());

    for url in urls {
        let submission = match engine.submit(url).await {
            Ok(submission) => submission,
            Err(e) => {
                tracing::error!("Skipping {}: {}", url, e);
                continue;
            }
        };

        if !submission.enqueued {
            if force {
                engine.restart(&[submission.job_id]).await?;
            } else if engine.resume(submission.job_id).await? {
                println!("{} resumes queued job {}", url, submission.job_id);
            } else {
                println!(
                    "{} already has job {} (use --force to crawl it again)",
                    url, submission.job_id
                );
            }
        }
        job_ids.push(submission.job_id);
    }

    run_to_completion(engine, &job_ids).await
}

/// Handles the restart command
async fn handle_restart(config: &Config, ids: &[JobId]) -> anyhow::Result<()> {
    let engine = start_engine(config)?;

    let requeued = engine.restart(ids).await?;
    for id in ids.iter().filter(|id| !requeued.contains(id)) {
        println!("Job {} not found", id);
    }

    run_to_completion(engine, &requeued).await
}

/// Follows the jobs, shuts the engine down, and prints a report per job
async fn run_to_completion(engine: CrawlEngine, job_ids: &[JobId]) -> anyhow::Result<()> {
    if job_ids.is_empty() {
        engine.shutdown().await;
        return Ok(());
    }

    if !follow_jobs(&engine, job_ids).await? {
        println!("Interrupted; cancelled crawls are marked as error");
        return Ok(());
    }

    engine.shutdown().await;

    for &job_id in job_ids {
        let job = engine.store().load_job(job_id)?;
        let links = engine.store().get_links(job_id)?;
        println!();
        print_job_report(&job, &links);
    }

    Ok(())
}

/// Streams progress for every job until all finish
///
/// Returns false when interrupted by Ctrl-C, after cancelling every running crawl.
async fn follow_jobs(engine: &CrawlEngine, job_ids: &[JobId]) -> anyhow::Result<bool> {
    let mut watchers = JoinSet::new();

    for &job_id in job_ids {
        match engine.watch(job_id)? {
            ProgressWatch::Finished(status) => println!("Job {}: {}", job_id, status),
            ProgressWatch::Live(mut receiver, unsubscribe) => {
                let store = Arc::clone(engine.store());
                watchers.spawn(async move {
                    loop {
                        match tokio::time::timeout(STATUS_POLL_INTERVAL, receiver.recv()).await {
                            Ok(Some(pct)) => {
                                println!("Job {}: {}%", job_id, pct);
                                if pct == 100 {
                                    break;
                                }
                            }
                            Ok(None) => break,
                            // progress values can be dropped, so fall back to the stored status
                            Err(_) => {
                                if store.load_job(job_id).map_or(true, |j| j.status.is_terminal()) {
                                    break;
                                }
                            }
                        }
                    }
                    unsubscribe.unsubscribe();
                });
            }
        }
    }

    loop {
        tokio::select! {
            joined = watchers.join_next() => match joined {
                Some(Err(e)) => tracing::error!("Progress watcher failed: {}", e),
                Some(Ok(())) => {}
                None => return Ok(true),
            },
            signal = tokio::signal::ctrl_c() => {
                signal.context("failed to listen for Ctrl-C")?;
                tracing::warn!("Interrupt received, cancelling running crawls");
                settle_after_interrupt(engine).await;
                return Ok(false);
            }
        }
    }
}

/// Cancels crawls until none are running or the grace period ends
async fn settle_after_interrupt(engine: &CrawlEngine) {
    let deadline = tokio::time::Instant::now() + INTERRUPT_GRACE;

    while tokio::time::Instant::now() < deadline {
        engine.cancel_all();
        if engine.registry().is_empty() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    tracing::warn!(
        "{} crawls still running after interrupt; they will be marked as error on next start",
        engine.registry().len()
    );
}

/// Handles the list command
fn handle_list(
    config: &Config,
    search: Option<String>,
    page: u32,
    size: u32,
) -> anyhow::Result<()> {
    let store = open_store(config)?;
    let query = JobQuery { search, page, size }.normalized();

    let listing = store.list_jobs(&query)?;
    print_job_table(&listing, &query);
    Ok(())
}

/// Handles the show command
fn handle_show(config: &Config, id: JobId) -> anyhow::Result<()> {
    let store = open_store(config)?;

    let job = match store.load_job(id) {
        Ok(job) => job,
        Err(e) if e.is_not_found() => bail!("job {} not found", id),
        Err(e) => return Err(e.into()),
    };
    let links = store.get_links(id)?;

    print_job_report(&job, &links);
    Ok(())
}

/// Handles the delete command
fn handle_delete(config: &Config, ids: &[JobId]) -> anyhow::Result<()> {
    let store = open_store(config)?;

    let deleted = store.delete_jobs(ids)?;
    println!("Deleted {} of {} jobs", deleted, ids.len());
    Ok(())
}

/// Handles the stats command
fn handle_stats(config: &Config) -> anyhow::Result<()> {
    let store = open_store(config)?;

    println!("Database: {}\n", config.storage.database_path);
    let stats = load_statistics(store.as_ref())?;
    print_statistics(&stats);
    Ok(())
}
