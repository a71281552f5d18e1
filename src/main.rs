use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand, ValueEnum};
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use floodgate::config::FloodgateConfig;
use floodgate::ratelimit::{Algorithm, PolicySet, RateLimitResult, RateLimiter};
use floodgate::store::{CounterStore, RedisCounterStore};

#[derive(Debug, Parser)]
#[command(name = "floodgate", version, about = "Distributed rate limiter")]
struct Cli {
    /// YAML configuration file; FLOODGATE__* environment variables override it
    #[arg(short, long, global = true)]
    config: Option<String>,

    /// Log output format
    #[arg(long, value_enum, default_value_t = LogFormat::Text, global = true)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run admission checks for an identity and print each result as JSON
    Check {
        /// Identity to limit, e.g. ip:1.2.3.4 or user:abc
        #[arg(short, long)]
        identity: String,
        /// Admissions allowed per window
        #[arg(short, long)]
        limit: u64,
        /// Window length in seconds
        #[arg(short, long)]
        window: u64,
        /// fixed or sliding; defaults to limiter.default_algorithm
        #[arg(short, long)]
        algorithm: Option<Algorithm>,
        #[command(flatten)]
        repeat: Repeat,
    },
    /// Run admission checks against a named policy
    Policy {
        /// Policy name from limiter.policies_path
        #[arg(short, long)]
        name: String,
        /// Identity to limit
        #[arg(short, long)]
        identity: String,
        #[command(flatten)]
        repeat: Repeat,
    },
    /// Verify the counter store is reachable
    Ping,
}

#[derive(Debug, Clone, Copy, clap::Args)]
struct Repeat {
    /// Number of checks to issue
    #[arg(long, default_value_t = 1)]
    count: u32,
    /// Pause between checks in milliseconds
    #[arg(long, default_value_t = 0)]
    interval_ms: u64,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_format);

    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let config = FloodgateConfig::load(cli.config.as_deref())?;
    info!(store = ?config.store, "Configuration loaded");

    let store = Arc::new(RedisCounterStore::connect(&config.store).await?);

    let outcome = run(cli.command, &config, store.clone()).await;

    match Arc::try_unwrap(store) {
        Ok(store) => store.shutdown().await,
        Err(_) => warn!("Counter store still in use at exit"),
    }

    outcome
}

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);

    match format {
        LogFormat::Text => builder.with_thread_ids(true).init(),
        LogFormat::Json => builder.json().init(),
    }
}

/// What a `check` or `policy` invocation limits.
#[derive(Debug, PartialEq, Eq)]
enum CheckTarget {
    Identity {
        identity: String,
        limit: u64,
        window: u64,
        algorithm: Option<Algorithm>,
    },
    Policy {
        name: String,
        identity: String,
    },
}

impl CheckTarget {
    /// Split a command into its check target and repetition, or `None` for
    /// commands that run no checks.
    fn from_command(command: Command) -> Option<(Self, Repeat)> {
        match command {
            Command::Check {
                identity,
                limit,
                window,
                algorithm,
                repeat,
            } => Some((
                CheckTarget::Identity {
                    identity,
                    limit,
                    window,
                    algorithm,
                },
                repeat,
            )),
            Command::Policy {
                name,
                identity,
                repeat,
            } => Some((CheckTarget::Policy { name, identity }, repeat)),
            Command::Ping => None,
        }
    }

    async fn check(
        &self,
        limiter: &RateLimiter<RedisCounterStore>,
    ) -> anyhow::Result<RateLimitResult> {
        let result = match self {
            CheckTarget::Identity {
                identity,
                limit,
                window,
                algorithm: Some(algorithm),
            } => limiter.check(identity, *limit, *window, *algorithm).await?,
            CheckTarget::Identity {
                identity,
                limit,
                window,
                algorithm: None,
            } => limiter.check_default(identity, *limit, *window).await?,
            CheckTarget::Policy { name, identity } => limiter.check_policy(name, identity).await?,
        };
        Ok(result)
    }
}

async fn run(
    command: Command,
    config: &FloodgateConfig,
    store: Arc<RedisCounterStore>,
) -> anyhow::Result<()> {
    let Some((target, repeat)) = CheckTarget::from_command(command) else {
        store.ping().await?;
        println!("PONG");
        return Ok(());
    };

    let mut limiter = RateLimiter::new(store, &config.limiter);
    if let Some(path) = &config.limiter.policies_path {
        limiter = limiter.with_policies(PolicySet::from_file(path)?);
    }

    let outcome = tokio::select! {
        outcome = run_checks(&limiter, &target, repeat) => outcome,
        _ = shutdown_signal() => Ok(()),
    };

    info!(stats = ?limiter.stats(), "Rate limiter stopped");
    outcome
}

async fn run_checks(
    limiter: &RateLimiter<RedisCounterStore>,
    target: &CheckTarget,
    repeat: Repeat,
) -> anyhow::Result<()> {
    for i in 0..repeat.count {
        if i > 0 && repeat.interval_ms > 0 {
            tokio::time::sleep(Duration::from_millis(repeat.interval_ms)).await;
        }
        let result = target.check(limiter).await?;
        print_result(&result)?;
    }
    Ok(())
}

fn print_result(result: &RateLimitResult) -> anyhow::Result<()> {
    let now = chrono::Utc::now().timestamp();
    let line = serde_json::json!({
        "result": result,
        "headers": result
            .headers(now)
            .into_iter()
            .map(|(name, value)| (name.to_string(), serde_json::Value::String(value)))
            .collect::<serde_json::Map<_, _>>(),
    });
    println!("{}", serde_json::to_string(&line)?);

    if !result.allowed {
        warn!(retry_after = result.retry_after_secs(now), "Rate limited");
    }
    Ok(())
}

/// Wait for a shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, stopping");
        }
        _ = terminate => {
            info!("Received SIGTERM, stopping");
        }
    }
}
