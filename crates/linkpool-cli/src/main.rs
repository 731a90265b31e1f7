//! linkpool — check and exercise a connection pool against a live backend.
//!
//! # Usage
//!
//! ```text
//! linkpool check --config pool.toml
//! linkpool bench --config db.conf --workers 8 --rounds 200 --hold-ms 5
//! linkpool --json-logs check --config pool.toml
//! ```
//!
//! Both commands start a pool over [`TcpDriver`], print the final
//! [`PoolStats`](linkpool::PoolStats) as JSON on stdout, and shut the pool
//! down.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use linkpool::{ConnectionPool, PoolConfig, PoolError, TcpDriver};
use tokio::time::Instant;
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "linkpool", about = "Connection pool checker")]
struct Cli {
    /// Emit logs as JSON lines instead of human-readable text.
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Start a pool, borrow one connection, print stats, and shut down.
    Check {
        /// Pool configuration (`.toml`, or legacy `key=value` otherwise).
        #[arg(long)]
        config: PathBuf,
    },
    /// Run concurrent borrow/release cycles and print stats.
    Bench {
        /// Pool configuration (`.toml`, or legacy `key=value` otherwise).
        #[arg(long)]
        config: PathBuf,

        /// Concurrent borrowers.
        #[arg(long, default_value = "4")]
        workers: usize,

        /// Borrow/release cycles per borrower.
        #[arg(long, default_value = "100")]
        rounds: usize,

        /// How long each borrower holds a connection, in milliseconds.
        #[arg(long, default_value = "1")]
        hold_ms: u64,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.json_logs);

    match cli.command {
        Command::Check { config } => run_check(&config).await,
        Command::Bench {
            config,
            workers,
            rounds,
            hold_ms,
        } => run_bench(&config, workers, rounds, Duration::from_millis(hold_ms)).await,
    }
}

fn init_tracing(json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info,linkpool=debug"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

async fn start_pool(path: &Path) -> anyhow::Result<ConnectionPool> {
    let config = PoolConfig::from_file(path)
        .with_context(|| format!("loading pool config from {}", path.display()))?;
    info!(
        path = %path.display(),
        host = %config.host,
        port = config.port,
        tls = config.use_tls,
        "loaded pool config"
    );
    let driver = Arc::new(TcpDriver::from_config(&config));
    let pool = ConnectionPool::start(config, driver)
        .await
        .context("starting connection pool")?;
    Ok(pool)
}

async fn run_check(path: &Path) -> anyhow::Result<()> {
    let pool = start_pool(path).await?;

    let outcome = match pool.acquire().await {
        Ok(mut conn) => {
            let alive = conn.is_alive();
            info!(handle = conn.id(), alive, "borrowed connection");
            Ok(())
        }
        Err(e) => Err(e),
    };

    print_stats(&pool)?;
    pool.shutdown().await;
    outcome.context("borrowing a connection")
}

async fn run_bench(
    path: &Path,
    workers: usize,
    rounds: usize,
    hold: Duration,
) -> anyhow::Result<()> {
    let pool = Arc::new(start_pool(path).await?);
    let started = Instant::now();

    let mut tasks = Vec::with_capacity(workers);
    for worker in 0..workers {
        let pool = Arc::clone(&pool);
        tasks.push(tokio::spawn(async move {
            let mut timeouts = 0usize;
            for _ in 0..rounds {
                match pool.acquire().await {
                    Ok(conn) => {
                        tokio::time::sleep(hold).await;
                        drop(conn);
                    }
                    Err(PoolError::AcquireTimeout { .. }) => timeouts += 1,
                    Err(e) => {
                        warn!(worker, error = %e, "borrower stopped");
                        break;
                    }
                }
            }
            timeouts
        }));
    }

    let mut timeouts = 0;
    for task in tasks {
        timeouts += task.await.context("bench worker panicked")?;
    }

    let elapsed = started.elapsed();
    let cycles = workers * rounds;
    info!(
        workers,
        rounds,
        cycles,
        timeouts,
        elapsed_ms = whole_millis(elapsed),
        "bench finished"
    );
    pool.log_stats();
    print_stats(&pool)?;
    pool.shutdown().await;
    Ok(())
}

fn print_stats(pool: &ConnectionPool) -> anyhow::Result<()> {
    let json = serde_json::to_string_pretty(&pool.stats())?;
    println!("{json}");
    Ok(())
}

/// Milliseconds in `d`, saturating at `u64::MAX`.
fn whole_millis(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}
