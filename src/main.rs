//! `envelope` command line.
//!
//! - `check` validates a configuration and prints the resolved breakers
//! - `backoff` prints the wait schedule of a retry policy
//! - `simulate` drives one configured breaker with a scripted outcome pattern

use std::error::Error;
use std::io;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use serde_json::json;

use envelope::config::load_config;
use envelope::observability::{logging, metrics};
use envelope::resilience::{Breaker, BreakerError, RetryPolicy, StateChange};
use envelope::{BreakerConfig, EnvelopeConfig};

#[derive(Parser)]
#[command(name = "envelope")]
#[command(about = "Inspect and exercise circuit breaker and retry settings", long_about = None)]
struct Cli {
    /// Log filter; overrides the configured level. RUST_LOG wins over both.
    #[arg(long)]
    log_level: Option<String>,

    /// Expose Prometheus metrics on this address while the command runs.
    #[arg(long)]
    metrics_address: Option<SocketAddr>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate a configuration file and print the resolved breakers
    Check { config: PathBuf },
    /// Print the waits a retry policy produces
    Backoff {
        #[arg(long, default_value_t = 5)]
        max_attempts: u32,
        #[arg(long, default_value_t = 100)]
        initial_ms: u64,
        #[arg(long, default_value_t = 2.0)]
        coefficient: f64,
        /// 0 leaves the wait uncapped
        #[arg(long, default_value_t = 2000)]
        max_ms: u64,
    },
    /// Drive a breaker with a pattern of outcomes
    ///
    /// s = success, f = counted failure, i = ignored failure,
    /// w = wait out the open timeout
    Simulate {
        config: PathBuf,
        #[arg(long)]
        breaker: String,
        #[arg(long)]
        pattern: String,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    let cli = Cli::parse();

    let config = match &cli.command {
        Commands::Check { config } | Commands::Simulate { config, .. } => load_config(config)?,
        Commands::Backoff { .. } => EnvelopeConfig::default(),
    };

    let level = cli
        .log_level
        .as_deref()
        .unwrap_or(&config.observability.log_level);
    logging::init_logging(level);

    if let Some(addr) = cli.metrics_address {
        metrics::init_metrics(addr)?;
    }

    match cli.command {
        Commands::Check { .. } => check(&config)?,
        Commands::Backoff {
            max_attempts,
            initial_ms,
            coefficient,
            max_ms,
        } => {
            let policy = RetryPolicy {
                max_attempts,
                initial_interval: Duration::from_millis(initial_ms),
                backoff_coefficient: coefficient,
                max_interval: Duration::from_millis(max_ms),
                jitter: 0.0,
            };
            for (attempt, wait) in policy.schedule().enumerate() {
                println!("attempt {} -> wait {:?}", attempt + 1, wait);
            }
        }
        Commands::Simulate {
            breaker, pattern, ..
        } => {
            let breaker_config = config
                .breaker(&breaker)
                .ok_or_else(|| format!("no breaker named '{breaker}' in configuration"))?;
            simulate(breaker_config, &pattern).await?;
        }
    }

    Ok(())
}

fn check(config: &EnvelopeConfig) -> Result<(), Box<dyn Error>> {
    let breakers: Vec<_> = config
        .breakers
        .iter()
        .map(|b| {
            json!({
                "name": b.name,
                "kind": b.kind.as_str(),
                "enabled": b.enabled,
                "failure_threshold": b.failure_threshold(),
                "open_timeout_ms": b.open_timeout().as_millis() as u64,
                "half_open_quota": b.half_open_quota(),
                "window": if b.is_rolling() { "rolling" } else { "fixed" },
                "closed_window_interval_ms": b.closed_window_interval_ms,
                "bucket_period_ms": b.bucket_period_ms,
            })
        })
        .collect();

    let policy = RetryPolicy::from(&config.retry);
    let schedule: Vec<u64> = policy.schedule().map(|d| d.as_millis() as u64).collect();

    let report = json!({
        "breakers": breakers,
        "retry": {
            "max_attempts": policy.max_attempts,
            "schedule_ms": schedule,
            "jitter": policy.jitter,
        },
    });
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

async fn simulate(config: &BreakerConfig, pattern: &str) -> Result<(), Box<dyn Error>> {
    let breaker = Breaker::from_config(config).with_listener(Arc::new(|change: &StateChange| {
        println!("  {} -> {}", change.from, change.to);
    }));

    for (step, input) in pattern.chars().enumerate() {
        let outcome = match input {
            'w' => {
                tokio::time::sleep(config.open_timeout()).await;
                println!("{step:>3} wait  {:?}", config.open_timeout());
                continue;
            }
            's' => breaker.execute(|| async { Ok::<(), io::Error>(()) }).await,
            'f' => {
                breaker
                    .execute(|| async { Err(io::Error::from(io::ErrorKind::ConnectionRefused)) })
                    .await
            }
            'i' => {
                breaker
                    .execute(|| async { Err(io::Error::from(io::ErrorKind::PermissionDenied)) })
                    .await
            }
            other => return Err(format!("unknown pattern character '{other}'").into()),
        };

        let result = match outcome {
            Ok(()) => "ok".to_string(),
            Err(BreakerError::Operation(err)) => format!("error: {err}"),
            Err(rejected) => format!("rejected: {rejected}"),
        };
        println!("{step:>3} {input}     {result} [{}]", breaker.state());
    }

    Ok(())
}
