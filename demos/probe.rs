//! Drive a pool registry against real TCP backends
//!
//! Spawns workers that repeatedly acquire a connection to each address,
//! hold it briefly and release it, then prints per-address pool statistics.
//!
//! ```bash
//! cargo run --example probe -- 127.0.0.1:6379 127.0.0.1:6380 --rounds 50
//! POOL_BACKENDS=127.0.0.1:6379 POOL_CAPACITY=2 cargo run --example probe
//! ```

use addrpool::{config, tcp, Pools};
use anyhow::{Context, Result};
use clap::Parser;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "probe")]
#[command(about = "Exercise per-address connection pools", long_about = None)]
struct Cli {
    /// Backend addresses (host:port); overrides the configured backends
    addrs: Vec<String>,

    /// Config file path (falls back to POOL_* environment variables)
    #[arg(long)]
    config: Option<String>,

    /// Override the per-address capacity
    #[arg(long)]
    capacity: Option<usize>,

    /// Acquire/release rounds per worker
    #[arg(long, default_value = "20")]
    rounds: usize,

    /// Concurrent workers per address
    #[arg(long, default_value = "4")]
    concurrency: usize,

    /// Milliseconds each worker holds a connection
    #[arg(long, default_value = "5")]
    hold_ms: u64,

    /// Print statistics as JSON
    #[arg(long)]
    json: bool,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| cli.log_level.clone().into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let mut config = config::load_config(cli.config.as_deref())?;
    if !cli.addrs.is_empty() {
        config.backends = cli.addrs.clone();
    }
    if let Some(capacity) = cli.capacity {
        config.pool.capacity = capacity;
    }
    config.validate().context("Invalid configuration")?;
    if config.backends.is_empty() {
        anyhow::bail!("No backend addresses given (pass them as arguments or set POOL_BACKENDS)");
    }

    info!(
        backends = config.backends.len(),
        capacity = config.pool.capacity,
        "Starting probe"
    );

    let pools: Arc<Pools<TcpStream>> = Arc::new(Pools::new(
        config.pool.clone(),
        tcp::connector(config.pool.connect_timeout()),
    ));

    let hold = Duration::from_millis(cli.hold_ms);
    let mut workers = Vec::new();
    for addr in &config.backends {
        for _ in 0..cli.concurrency {
            let pools = Arc::clone(&pools);
            let addr = addr.clone();
            let rounds = cli.rounds;
            workers.push(tokio::spawn(async move {
                let mut failures = 0usize;
                for _ in 0..rounds {
                    match pools.acquire(&addr).await {
                        Ok(mut conn) => {
                            tokio::time::sleep(hold).await;
                            let broken = conn
                                .get()
                                .map(|stream| stream.peer_addr().is_err())
                                .unwrap_or(true);
                            if broken {
                                conn.close();
                            }
                            pools.release(conn);
                        }
                        Err(e) => {
                            failures += 1;
                            warn!(addr = %addr, error = %e, "Acquire failed");
                        }
                    }
                }
                failures
            }));
        }
    }

    let mut failures = 0;
    for worker in workers {
        failures += worker.await.context("Worker panicked")?;
    }

    let mut stats: Vec<_> = pools.all_stats().into_iter().collect();
    stats.sort_by(|a, b| a.0.cmp(&b.0));

    if cli.json {
        let map: serde_json::Map<String, serde_json::Value> = stats
            .iter()
            .map(|(addr, s)| Ok((addr.clone(), serde_json::to_value(s)?)))
            .collect::<Result<_, serde_json::Error>>()?;
        println!("{}", serde_json::to_string_pretty(&map)?);
    } else {
        println!("\n=== POOL STATISTICS ===\n");
        for (addr, s) in &stats {
            println!("  Backend: {}", addr);
            println!("    Capacity: {}", s.capacity);
            println!("    In use: {}", s.in_use);
            println!("    Idle: {}", s.idle);
            println!("    Total created: {}", s.total_created);
            println!("    Total reused: {}", s.total_reused);
            println!("    Discarded: {}", s.total_discarded);
            println!("    Evicted: {}", s.total_evicted);
            println!("    Failed attempts: {}", s.failed_attempts);
            println!();
        }
        println!("Failed acquisitions: {}", failures);
    }

    pools.close();
    Ok(())
}
