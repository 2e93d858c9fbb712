//! Node collection pass
//!
//! Node discovery comes from the kube-state node-label metric, which also
//! carries the architecture, OS and hostname labels. Capacity and
//! allocatable prefer the grouped status metrics and fall back to the
//! older per-resource names when the grouped query returns nothing.
//! Workload metrics come from node-exporter, joined onto node names
//! through the exporter pod's IP; an empty network-speed result means the
//! exporter is absent, so the workload set is skipped for the whole run.

use super::{run_query, Aggregation, CollectionParams};
use crate::binder::NodeBinder;
use crate::export::{self, WorkloadWriter};
use crate::labels::LabelAggregator;
use crate::prometheus::{QueryRange, RangeQuerier};
use crate::store::{Node, NodeStore};
use anyhow::{Context, Result};
use std::fs;
use std::path::Path;
use tracing::{error, info, warn};

const KIND: &str = "node";

const NODE_KEY: &str = "node";

const DISCOVERY_QUERY: &str = "max(kube_node_labels) by (instance, label_beta_kubernetes_io_arch, label_beta_kubernetes_io_os, label_kubernetes_io_hostname, node)";

const NODE_LABELS_QUERY: &str = "kube_node_labels";

/// Joined through the exporter pod IP so series come back keyed by node
/// name. Also doubles as the node-exporter presence check.
const NET_SPEED_QUERY: &str = r#"max(max(label_replace(node_network_speed_bytes, "pod_ip", "$1", "instance", "(.*):.*")) by (pod_ip) * on (pod_ip) group_right kube_pod_info{pod=~".*node-exporter.*"}) by (node)"#;

const CAPACITY_QUERY: &str = "kube_node_status_capacity";
const ALLOCATABLE_QUERY: &str = "kube_node_status_allocatable";

/// Older backends only expose per-resource capacity metrics; these cover
/// the cpu/memory/pods subset the grouped metric folds together.
const CAPACITY_FALLBACK_QUERIES: &[(&str, &str, &str)] = &[
    ("capacity_cpu", "statusCapacityCpuCores", "kube_node_status_capacity_cpu_cores"),
    ("capacity_mem", "statusCapacityMemoryBytes", "kube_node_status_capacity_memory_bytes"),
    ("capacity_pod", "statusCapacityPods", "kube_node_status_capacity_pods"),
];

const ALLOCATABLE_FALLBACK_QUERIES: &[(&str, &str, &str)] = &[
    ("allocatable_cpu", "statusAllocatableCpuCores", "kube_node_status_allocatable_cpu_cores"),
    ("allocatable_mem", "statusAllocatableMemoryBytes", "kube_node_status_allocatable_memory_bytes"),
    ("allocatable_pod", "statusAllocatablePods", "kube_node_status_allocatable_pods"),
];

/// Node workload metrics: (file name, metric column header, inner
/// expression). Each is collected twice, once per outer aggregation, into
/// files prefixed with the aggregator name so the two cannot clobber each
/// other.
const WORKLOAD_QUERIES: &[(&str, &str, &str)] = &[
    ("disk_write_bytes", "Raw Disk Write Utilization", "node_disk_written_bytes_total"),
    ("disk_read_bytes", "Raw Disk Read Utilization", "node_disk_read_bytes_total"),
    (
        "disk_read_ops",
        "Disk Read Operations",
        "irate(node_disk_read_time_seconds_total[5m]) / irate(node_disk_io_time_seconds_total[5m])",
    ),
    (
        "disk_write_ops",
        "Disk Write Operations",
        "irate(node_disk_write_time_seconds_total[5m]) / irate(node_disk_io_time_seconds_total[5m])",
    ),
    ("memory_total_bytes", "Total Memory Bytes", "node_memory_MemTotal_bytes"),
    ("memory_active_bytes", "Active Memory Bytes", "node_memory_Active_bytes"),
    (
        "memory_raw_bytes",
        "Raw Memory Utilization",
        "node_memory_MemTotal_bytes - node_memory_MemFree_bytes",
    ),
    (
        "memory_actual_workload",
        "Actual Memory Utilization",
        "node_memory_MemTotal_bytes - (node_memory_MemFree_bytes + node_memory_Cached_bytes + node_memory_Buffers_bytes)",
    ),
    ("net_received_bytes", "Raw Net Received Utilization", "node_network_receive_bytes_total"),
    ("net_received_packets", "Network Packets Received", "node_network_receive_packets_total"),
    ("net_sent_bytes", "Raw Net Sent Utilization", "node_network_transmit_bytes_total"),
    ("net_sent_packets", "Network Packets Sent", "node_network_transmit_packets_total"),
    (
        "cpu_utilization",
        "CPU Utilization",
        r#"sum(rate(node_cpu_seconds_total{mode!="idle"}[5m])) by (pod, instance, cpu)*100"#,
    ),
];

/// Node workloads always carry both aggregations, regardless of the
/// configured container aggregation.
const AGGREGATORS: &[Aggregation] = &[Aggregation::Max, Aggregation::Avg];

/// Wrap a node-exporter expression with the exporter-pod join and the
/// outer aggregation by node.
fn node_workload_query(aggregator: &str, inner: &str) -> String {
    format!(
        "{aggregator}({aggregator}(label_replace({inner}, \"pod_ip\", \"$1\", \"instance\", \"(.*):.*\")) by (pod_ip) * on (pod_ip) group_right kube_pod_info{{pod=~\".*node-exporter.*\"}}) by (node)"
    )
}

/// Run the full node pass: discover, bind, aggregate, export.
pub async fn collect(querier: &dyn RangeQuerier, params: &CollectionParams) -> Result<()> {
    let dir = params.output_dir.join("node");
    fs::create_dir_all(&dir)
        .with_context(|| format!("Failed to create output directory {}", dir.display()))?;

    let range = params.base_range();

    let mut store = NodeStore::new();
    let discovered = run_query(
        querier,
        KIND,
        "nodeLabels",
        DISCOVERY_QUERY,
        &range,
        &params.address,
    )
    .await;
    for series in &discovered.series {
        let Some(name) = series.label(NODE_KEY) else {
            continue;
        };
        store.create_node(
            name,
            Node::new(
                series.label("label_beta_kubernetes_io_arch").unwrap_or(""),
                series.label("label_beta_kubernetes_io_os").unwrap_or(""),
                series.label("label_kubernetes_io_hostname").unwrap_or(""),
            ),
        );
    }
    if store.is_empty() {
        warn!(
            entity_kind = KIND,
            address = %params.address,
            "discovery returned no nodes, extracts will be empty"
        );
    } else {
        info!(entity_kind = KIND, series = discovered.len(), "discovery complete");
    }

    let labels = run_query(
        querier,
        KIND,
        "nodeLabels",
        NODE_LABELS_QUERY,
        &range,
        &params.address,
    )
    .await;
    LabelAggregator::new().aggregate_node(&mut store, &labels, NODE_KEY, "nodeLabel");

    let binder = NodeBinder::new();

    let net_speed = run_query(
        querier,
        KIND,
        "networkSpeedBytes",
        NET_SPEED_QUERY,
        &range,
        &params.address,
    )
    .await;
    let have_node_export = !net_speed.is_empty();
    binder.bind(&mut store, &net_speed, NODE_KEY, "netSpeedBytes");

    let capacity = run_query(
        querier,
        KIND,
        "statusCapacity",
        CAPACITY_QUERY,
        &range,
        &params.address,
    )
    .await;
    if capacity.is_empty() {
        for &(metric, label, expression) in CAPACITY_FALLBACK_QUERIES {
            let matrix = run_query(querier, KIND, label, expression, &range, &params.address).await;
            binder.bind(&mut store, &matrix, NODE_KEY, metric);
        }
    } else {
        binder.bind(&mut store, &capacity, NODE_KEY, "capacity");
    }

    let allocatable = run_query(
        querier,
        KIND,
        "statusAllocatable",
        ALLOCATABLE_QUERY,
        &range,
        &params.address,
    )
    .await;
    if allocatable.is_empty() {
        for &(metric, label, expression) in ALLOCATABLE_FALLBACK_QUERIES {
            let matrix = run_query(querier, KIND, label, expression, &range, &params.address).await;
            binder.bind(&mut store, &matrix, NODE_KEY, metric);
        }
    } else {
        binder.bind(&mut store, &allocatable, NODE_KEY, "allocatable");
    }

    if let Err(err) = export::write_node_config(&dir, &store, params.cluster()) {
        error!(entity_kind = KIND, error = %err, "failed to write config extract");
    }
    if let Err(err) = export::write_node_attributes(&dir, &store, params.cluster()) {
        error!(entity_kind = KIND, error = %err, "failed to write attributes extract");
    }

    if !have_node_export {
        error!(
            entity_kind = KIND,
            address = %params.address,
            "node-exporter metrics not found, skipping node workload collection"
        );
        return Ok(());
    }

    for &(file_name, metric_name, inner) in WORKLOAD_QUERIES {
        for aggregation in AGGREGATORS {
            let aggregator = aggregation.as_str();
            let file = format!("{aggregator}_{file_name}");
            let expression = node_workload_query(aggregator, inner);
            write_workload(querier, params, &dir, &store, &file, metric_name, &expression).await;
        }
    }

    Ok(())
}

async fn write_workload(
    querier: &dyn RangeQuerier,
    params: &CollectionParams,
    dir: &Path,
    store: &NodeStore,
    file_name: &str,
    metric_name: &str,
    expression: &str,
) {
    let mut writer = match WorkloadWriter::create_node(dir, file_name, metric_name) {
        Ok(writer) => writer,
        Err(err) => {
            error!(
                entity_kind = KIND,
                file = file_name,
                error = %err,
                "failed to create workload file, skipping metric"
            );
            return;
        }
    };

    for window in params.windows() {
        let range = QueryRange {
            start: window.start,
            end: window.end,
            step: params.step,
        };
        let matrix = run_query(querier, KIND, file_name, expression, &range, &params.address).await;
        if let Err(err) = writer.append_node_window(store, &matrix, NODE_KEY, params.cluster()) {
            error!(
                entity_kind = KIND,
                file = file_name,
                offset = window.offset,
                error = %err,
                "failed to append workload rows, skipping metric"
            );
            return;
        }
    }
}
