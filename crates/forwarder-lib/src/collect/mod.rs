//! Collection orchestration
//!
//! One sequential pass per entity kind: discovery seeds the store, metric
//! and label queries fill it, the config/attribute extracts are written,
//! and finally each workload metric walks the historical windows. Every
//! query is best-effort: a failure is logged with the entity kind, query
//! label and backend address, then treated as an empty result so the rest
//! of the pass still runs.

pub mod container;
pub mod node;

use crate::prometheus::{Matrix, QueryRange, RangeQuerier};
use crate::windows::{window_range, Interval, Windows};
use chrono::{DateTime, Duration, Utc};
use std::path::PathBuf;
use std::str::FromStr;
use tracing::warn;

/// Outer aggregation applied to the container workload queries. The node
/// pass always collects both max and avg; containers use the configured
/// one, as the original run setting did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Aggregation {
    Max,
    Avg,
    Min,
}

impl Aggregation {
    /// The PromQL aggregation operator, also used as the file-name prefix.
    pub fn as_str(self) -> &'static str {
        match self {
            Aggregation::Max => "max",
            Aggregation::Avg => "avg",
            Aggregation::Min => "min",
        }
    }
}

impl FromStr for Aggregation {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "max" => Ok(Aggregation::Max),
            "avg" => Ok(Aggregation::Avg),
            "min" => Ok(Aggregation::Min),
            other => anyhow::bail!("unknown aggregation {other:?}"),
        }
    }
}

/// Settings shared by every collection pass in one run.
#[derive(Debug, Clone)]
pub struct CollectionParams {
    /// Cluster name for the `cluster` CSV column; falls back to the
    /// backend address when unset.
    pub cluster_name: Option<String>,
    /// Backend address, used for the cluster fallback and in log fields.
    pub address: String,
    pub interval: Interval,
    pub interval_size: u32,
    /// Number of historical windows each workload metric covers.
    pub history: u32,
    /// Base time; window offset 0 ends here.
    pub current_time: DateTime<Utc>,
    /// Range-query resolution.
    pub step: Duration,
    /// Aggregation for the container workload metrics.
    pub aggregation: Aggregation,
    pub output_dir: PathBuf,
}

impl CollectionParams {
    /// The value written into the `cluster` column.
    pub fn cluster(&self) -> &str {
        self.cluster_name
            .as_deref()
            .filter(|name| !name.is_empty())
            .unwrap_or(&self.address)
    }

    /// The current (offset 0) interval, used by every non-workload query.
    pub fn base_range(&self) -> QueryRange {
        self.range_for(0)
    }

    pub fn range_for(&self, offset: u32) -> QueryRange {
        let (start, end) = window_range(self.interval, self.interval_size, self.current_time, offset);
        QueryRange {
            start,
            end,
            step: self.step,
        }
    }

    /// The historical windows for workload collection, nearest-first.
    pub fn windows(&self) -> Windows {
        Windows::new(self.interval, self.interval_size, self.current_time, self.history)
    }
}

/// Issue one range query, degrading any failure to an empty matrix.
pub(crate) async fn run_query(
    querier: &dyn RangeQuerier,
    entity_kind: &str,
    query_label: &str,
    expression: &str,
    range: &QueryRange,
    address: &str,
) -> Matrix {
    match querier.range_query(expression, range).await {
        Ok(matrix) => matrix,
        Err(err) => {
            warn!(
                entity_kind,
                query = query_label,
                address,
                error = %err,
                "range query failed, continuing with empty result"
            );
            Matrix::default()
        }
    }
}
