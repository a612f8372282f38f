//! shardscaled — the shardscale daemon.
//!
//! Loads the stream list from a TOML config, then on every refresh
//! interval votes on each stream's CloudWatch throughput and splits or
//! merges its Kinesis shards to match.
//!
//! # Usage
//!
//! ```text
//! shardscaled --config /etc/shardscale.toml run
//! shardscaled --config /etc/shardscale.toml run --once
//! shardscaled --config /etc/shardscale.toml check-config
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use tokio::sync::watch;
use tracing::{info, warn};

use shardscale_autoscale::{Autoscaler, PassOutcome};
use shardscale_aws::AwsClientFactory;
use shardscale_core::Config;

const DEFAULT_FILTER: &str = "info,shardscale=debug,shardscaled=debug";

#[derive(Parser, Debug)]
#[command(name = "shardscaled", about = "Kinesis shard autoscaler", version)]
struct Cli {
    /// Path to the TOML config file.
    #[arg(long, global = true, default_value = "shardscale.toml")]
    config: PathBuf,

    /// Log output format.
    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the control loop.
    Run {
        /// Run a single pass over every stream and exit.
        #[arg(long)]
        once: bool,

        /// Seed shard sampling for reproducible runs.
        #[arg(long)]
        seed: Option<u64>,
    },
    /// Load and validate the config, then exit.
    CheckConfig,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_format);

    let config = Config::from_file(&cli.config)
        .with_context(|| format!("loading {}", cli.config.display()))?;

    match cli.command {
        Command::CheckConfig => {
            info!(
                path = %cli.config.display(),
                streams = config.streams.len(),
                "config is valid"
            );
            Ok(())
        }
        Command::Run { once, seed } => run(config, once, seed).await,
    }
}

fn init_tracing(format: LogFormat) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(DEFAULT_FILTER));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    match format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}

async fn run(config: Config, once: bool, seed: Option<u64>) -> anyhow::Result<()> {
    info!(
        streams = config.streams.len(),
        refresh_interval_secs = config.refresh_interval_secs,
        max_concurrent_streams = config.max_concurrent_streams,
        "shardscale starting"
    );

    let notifier =
        shardscale_notify::from_config(&config.notifier).context("building notifier")?;
    let factory = Arc::new(AwsClientFactory::new(config.accounts.clone()));

    let mut autoscaler = Autoscaler::new(&config, factory, notifier);
    if let Some(seed) = seed {
        autoscaler = autoscaler.with_seed(seed);
    }

    if once {
        let outcomes = autoscaler.run_once().await;
        let failed: Vec<&str> = outcomes
            .iter()
            .filter(|(_, o)| matches!(o, PassOutcome::Failed(_)))
            .map(|(name, _)| name.as_str())
            .collect();
        if !failed.is_empty() {
            anyhow::bail!("scaling failed for: {}", failed.join(", "));
        }
        return Ok(());
    }

    // ── Shutdown signal ────────────────────────────────────────

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("shutdown signal received");
                let _ = shutdown_tx.send(true);
            }
            Err(e) => warn!(error = %e, "could not install Ctrl-C handler"),
        }
    });

    autoscaler
        .run(config.refresh_interval(), shutdown_rx)
        .await;

    info!("shardscale stopped");
    Ok(())
}
