//! Container Data Forwarder - Prometheus to CSV extracts
//!
//! This binary queries a Prometheus-compatible backend for container and
//! node data, reshapes it into the entity inventory, and writes the CSV
//! extracts consumed by the downstream analytics system.

use anyhow::{Context, Result};
use clap::Parser;
use forwarder_lib::collect::{container, node};
use forwarder_lib::{Aggregation, CollectionParams, Interval, PrometheusClient};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod config;

/// Collects container and node data from Prometheus and writes CSV
/// extracts. Flags override the FORWARDER_* environment and config file.
#[derive(Debug, Parser)]
#[command(name = "forwarder", version)]
struct Cli {
    /// Config file to merge under the environment
    #[arg(long, env = "FORWARDER_CONFIG_FILE")]
    config_file: Option<String>,

    /// Metrics backend scheme
    #[arg(long)]
    protocol: Option<String>,

    /// Metrics backend host
    #[arg(long)]
    address: Option<String>,

    /// Metrics backend port
    #[arg(long)]
    port: Option<u16>,

    /// Cluster name written into the extracts
    #[arg(long)]
    cluster_name: Option<String>,

    /// Collection interval unit: days, hours or minutes
    #[arg(long)]
    interval: Option<String>,

    /// Number of interval units per window
    #[arg(long)]
    interval_size: Option<u32>,

    /// Number of historical windows to backfill
    #[arg(long)]
    history: Option<u32>,

    /// Range-query resolution in seconds
    #[arg(long)]
    step_secs: Option<u32>,

    /// Aggregation for the container workload metrics: max, avg or min
    #[arg(long)]
    aggregator: Option<String>,

    /// Directory the CSV extracts are written under
    #[arg(long)]
    output_dir: Option<String>,

    /// Lower the log filter to debug
    #[arg(long)]
    debug: bool,
}

impl Cli {
    fn overlay(self, mut config: config::ForwarderConfig) -> config::ForwarderConfig {
        if let Some(protocol) = self.protocol {
            config.protocol = protocol;
        }
        if let Some(address) = self.address {
            config.address = address;
        }
        if let Some(port) = self.port {
            config.port = port;
        }
        if self.cluster_name.is_some() {
            config.cluster_name = self.cluster_name;
        }
        if let Some(interval) = self.interval {
            config.interval = interval;
        }
        if let Some(interval_size) = self.interval_size {
            config.interval_size = interval_size;
        }
        if let Some(history) = self.history {
            config.history = history;
        }
        if let Some(step_secs) = self.step_secs {
            config.step_secs = step_secs;
        }
        if let Some(aggregator) = self.aggregator {
            config.aggregator = aggregator;
        }
        if let Some(output_dir) = self.output_dir {
            config.output_dir = output_dir;
        }
        config.debug |= self.debug;
        config
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let file_config = config::ForwarderConfig::load(cli.config_file.as_deref())?;
    let config = cli.overlay(file_config);

    // Initialize tracing with JSON output and env filter
    let default_filter = if config.debug { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)))
        .with(fmt::layer().json())
        .init();

    info!(
        backend = %config.base_url(),
        interval = %config.interval,
        interval_size = config.interval_size,
        history = config.history,
        "Starting forwarder"
    );

    let interval: Interval = config
        .interval
        .parse()
        .context("Invalid interval setting")?;
    let aggregation: Aggregation = config
        .aggregator
        .parse()
        .context("Invalid aggregator setting")?;

    let client = PrometheusClient::new(
        &config.base_url(),
        Duration::from_secs(config.timeout_secs),
    )?;

    let params = CollectionParams {
        cluster_name: config.cluster_name.clone(),
        address: config.backend_address(),
        interval,
        interval_size: config.interval_size,
        history: config.history,
        current_time: chrono::Utc::now(),
        step: chrono::Duration::seconds(i64::from(config.step_secs)),
        aggregation,
        output_dir: PathBuf::from(&config.output_dir),
    };

    // Collection failures are logged, never fatal: partial extracts are
    // still worth sending downstream.
    if let Err(err) = container::collect(&client, &params).await {
        error!(entity_kind = "container", error = %err, "collection pass failed");
    }
    if let Err(err) = node::collect(&client, &params).await {
        error!(entity_kind = "node", error = %err, "collection pass failed");
    }

    info!("Forwarder run complete");
    Ok(())
}
