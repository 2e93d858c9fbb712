//! Forwarder configuration

use anyhow::Result;
use serde::Deserialize;

/// Forwarder configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ForwarderConfig {
    /// Scheme used to reach the metrics backend
    #[serde(default = "default_protocol")]
    pub protocol: String,

    /// Metrics backend host
    #[serde(default = "default_address")]
    pub address: String,

    /// Metrics backend port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Cluster name written into the extracts; backend address when unset
    #[serde(default)]
    pub cluster_name: Option<String>,

    /// Collection interval unit: days, hours or minutes
    #[serde(default = "default_interval")]
    pub interval: String,

    /// Number of interval units per window
    #[serde(default = "default_interval_size")]
    pub interval_size: u32,

    /// Number of historical windows to backfill
    #[serde(default = "default_history")]
    pub history: u32,

    /// Range-query resolution in seconds
    #[serde(default = "default_step_secs")]
    pub step_secs: u32,

    /// Aggregation for the container workload metrics: max, avg or min
    #[serde(default = "default_aggregator")]
    pub aggregator: String,

    /// HTTP timeout per query in seconds
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Directory the CSV extracts are written under
    #[serde(default = "default_output_dir")]
    pub output_dir: String,

    /// Lower the log filter to debug
    #[serde(default)]
    pub debug: bool,
}

fn default_protocol() -> String {
    "http".to_string()
}

fn default_address() -> String {
    "localhost".to_string()
}

fn default_port() -> u16 {
    9090
}

fn default_interval() -> String {
    "hours".to_string()
}

fn default_interval_size() -> u32 {
    1
}

fn default_history() -> u32 {
    1
}

fn default_step_secs() -> u32 {
    300
}

fn default_aggregator() -> String {
    "max".to_string()
}

fn default_timeout_secs() -> u64 {
    300
}

fn default_output_dir() -> String {
    "./data".to_string()
}

impl Default for ForwarderConfig {
    fn default() -> Self {
        Self {
            protocol: default_protocol(),
            address: default_address(),
            port: default_port(),
            cluster_name: None,
            interval: default_interval(),
            interval_size: default_interval_size(),
            history: default_history(),
            step_secs: default_step_secs(),
            aggregator: default_aggregator(),
            timeout_secs: default_timeout_secs(),
            output_dir: default_output_dir(),
            debug: false,
        }
    }
}

impl ForwarderConfig {
    /// Load configuration from the environment and an optional config file.
    pub fn load(file: Option<&str>) -> Result<Self> {
        let mut builder =
            config::Config::builder().add_source(config::Environment::with_prefix("FORWARDER"));
        if let Some(path) = file {
            builder = builder.add_source(config::File::with_name(path));
        }
        let config = builder.build()?;

        Ok(config.try_deserialize().unwrap_or_default())
    }

    /// The backend base URL, e.g. `http://prom:9090`.
    pub fn base_url(&self) -> String {
        format!("{}://{}:{}", self.protocol, self.address, self.port)
    }

    /// The backend address as written into log fields and the cluster
    /// fallback, without the scheme.
    pub fn backend_address(&self) -> String {
        format!("{}:{}", self.address, self.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_point_at_local_prometheus() {
        let config = ForwarderConfig::default();
        assert_eq!(config.base_url(), "http://localhost:9090");
        assert_eq!(config.backend_address(), "localhost:9090");
        assert_eq!(config.interval, "hours");
        assert_eq!(config.history, 1);
        assert_eq!(config.aggregator, "max");
        assert!(!config.debug);
    }
}
