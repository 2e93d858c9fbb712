//! Container collection pass
//!
//! Discovery runs first and is the only step that creates entities, so a
//! failed discovery degrades the whole pass to headered, empty extracts.
//! The metric and label query lists are data; the binder and aggregator
//! dispatch on the metric-name tags, so adding a query here is a one-line
//! change when the tag already has a destination field.

use super::{run_query, CollectionParams};
use crate::binder::{ContainerBinder, ContainerKeys, NamespaceLimitBinder, PodBinder, PodKeys};
use crate::export::{self, WorkloadWriter};
use crate::labels::LabelAggregator;
use crate::prometheus::{QueryRange, RangeQuerier};
use crate::store::ClusterStore;
use anyhow::{Context, Result};
use std::fs;
use std::path::Path;
use tracing::{error, info, warn};

const KIND: &str = "container";

const DISCOVERY_QUERY: &str = "max(kube_pod_container_info) by (namespace,pod,container)";

/// Container-level metric queries: (metric tag, query label, expression).
/// CPU figures are scaled to millicores and memory to MiB at the backend.
const CONTAINER_METRIC_QUERIES: &[(&str, &str, &str)] = &[
    (
        "cpuLimit",
        "cpuLimit",
        "sum(kube_pod_container_resource_limits_cpu_cores) by (namespace,pod,container)*1000",
    ),
    (
        "cpuRequest",
        "cpuRequest",
        "sum(kube_pod_container_resource_requests_cpu_cores) by (namespace,pod,container)*1000",
    ),
    (
        "memLimit",
        "memLimit",
        "sum(kube_pod_container_resource_limits_memory_bytes) by (namespace,pod,container)/1024/1024",
    ),
    (
        "memRequest",
        "memRequest",
        "sum(kube_pod_container_resource_requests_memory_bytes) by (namespace,pod,container)/1024/1024",
    ),
    (
        "restarts",
        "restarts",
        "max(kube_pod_container_status_restarts_total) by (namespace,pod,container)",
    ),
    (
        "powerState",
        "powerState",
        "max(kube_pod_container_status_terminated) by (namespace,pod,container)",
    ),
];

/// Pod-level metric queries. `currentSize` comes from the owning
/// controller's replica spec, joined onto pods through `kube_pod_owner`.
const POD_METRIC_QUERIES: &[(&str, &str, &str)] = &[
    (
        "creationTime",
        "podCreationTime",
        "max(kube_pod_created) by (namespace,pod)",
    ),
    (
        "currentSize",
        "replicaSetSize",
        r#"max(kube_replicaset_spec_replicas * on (namespace,replicaset) group_right label_replace(kube_pod_owner{owner_kind="ReplicaSet"}, "replicaset", "$1", "owner_name", "(.*)")) by (namespace,pod)"#,
    ),
    (
        "currentSize",
        "replicationControllerSize",
        r#"max(kube_replicationcontroller_spec_replicas * on (namespace,replicationcontroller) group_right label_replace(kube_pod_owner{owner_kind="ReplicationController"}, "replicationcontroller", "$1", "owner_name", "(.*)")) by (namespace,pod)"#,
    ),
    (
        "currentSize",
        "daemonSetSize",
        r#"max(kube_daemonset_status_number_available * on (namespace,daemonset) group_right label_replace(kube_pod_owner{owner_kind="DaemonSet"}, "daemonset", "$1", "owner_name", "(.*)")) by (namespace,pod)"#,
    ),
];

const NAMESPACE_LIMITS_QUERY: &str = "kube_limitrange";

/// Descriptive label queries routed through the aggregator. The cadvisor
/// spec metric carries the `instance` label that feeds the container's
/// node-membership list during the conLabel pass.
const CONTAINER_LABEL_QUERIES: &[(&str, &str, &str)] = &[
    ("conInfo", "conInfo", "kube_pod_container_info"),
    (
        "conLabel",
        "conLabel",
        r#"container_spec_cpu_shares{container!="POD",container!=""}"#,
    ),
];

const POD_LABEL_QUERIES: &[(&str, &str, &str)] = &[
    ("podInfo", "podInfo", "kube_pod_info"),
    ("podLabel", "podLabel", "kube_pod_labels"),
    ("controllerLabel", "controllerLabel", "kube_pod_owner"),
];

const NAMESPACE_LABEL_QUERY: (&str, &str, &str) =
    ("namespaceLabel", "namespaceLabels", "kube_namespace_labels");

/// Workload metrics walked over the historical windows: (file name,
/// metric column header, inner expression). The configured aggregation
/// wraps each and prefixes the file name, so runs with different
/// aggregations cannot clobber each other's extracts.
const WORKLOAD_QUERIES: &[(&str, &str, &str)] = &[
    (
        "cpu_mcores_workload",
        "CPU Utilization in mCores",
        r#"round(irate(container_cpu_usage_seconds_total{container!="POD",container!=""}[5m])*1000,1)"#,
    ),
    (
        "mem_workload",
        "Raw Mem Utilization",
        r#"container_memory_usage_bytes{container!="POD",container!=""}"#,
    ),
    (
        "rss_workload",
        "Actual Memory Utilization",
        r#"container_memory_rss{container!="POD",container!=""}"#,
    ),
    (
        "disk_workload",
        "Raw Disk Utilization",
        r#"container_fs_usage_bytes{container!="POD",container!=""}"#,
    ),
    (
        "net_sent_bytes_workload",
        "Raw Net Sent Utilization",
        "irate(container_network_transmit_bytes_total[5m])",
    ),
    (
        "net_received_bytes_workload",
        "Raw Net Received Utilization",
        "irate(container_network_receive_bytes_total[5m])",
    ),
];

/// Wrap a container expression with the configured outer aggregation,
/// grouped by the identity labels.
fn container_workload_query(aggregator: &str, inner: &str) -> String {
    format!("{aggregator}({inner}) by (namespace,pod,container)")
}

/// Run the full container pass: discover, bind, aggregate, export.
pub async fn collect(querier: &dyn RangeQuerier, params: &CollectionParams) -> Result<()> {
    let dir = params.output_dir.join("container");
    fs::create_dir_all(&dir)
        .with_context(|| format!("Failed to create output directory {}", dir.display()))?;

    let keys = ContainerKeys::default();
    let pod_keys = PodKeys::default();
    let range = params.base_range();

    let mut store = ClusterStore::new();
    let discovered = run_query(
        querier,
        KIND,
        "containerInfo",
        DISCOVERY_QUERY,
        &range,
        &params.address,
    )
    .await;
    for series in &discovered.series {
        let (Some(namespace), Some(pod), Some(container)) = (
            series.label(keys.namespace),
            series.label(keys.pod),
            series.label(keys.container),
        ) else {
            continue;
        };
        store.create_container(namespace, pod, container);
    }
    if store.is_empty() {
        warn!(
            entity_kind = KIND,
            address = %params.address,
            "discovery returned no containers, extracts will be empty"
        );
    } else {
        info!(entity_kind = KIND, series = discovered.len(), "discovery complete");
    }

    let binder = ContainerBinder::new();
    for &(metric, label, expression) in CONTAINER_METRIC_QUERIES {
        let matrix = run_query(querier, KIND, label, expression, &range, &params.address).await;
        binder.bind(&mut store, &matrix, &keys, metric);
    }

    let pod_binder = PodBinder::new();
    for &(metric, label, expression) in POD_METRIC_QUERIES {
        let matrix = run_query(querier, KIND, label, expression, &range, &params.address).await;
        pod_binder.bind(&mut store, &matrix, &pod_keys, metric);
    }

    let limits = run_query(
        querier,
        KIND,
        "namespaceLimits",
        NAMESPACE_LIMITS_QUERY,
        &range,
        &params.address,
    )
    .await;
    NamespaceLimitBinder::new().bind(&mut store, &limits, "namespace");

    let aggregator = LabelAggregator::new();
    for &(metric, label, expression) in CONTAINER_LABEL_QUERIES {
        let matrix = run_query(querier, KIND, label, expression, &range, &params.address).await;
        aggregator.aggregate_container(&mut store, &matrix, &keys, metric);
    }
    for &(metric, label, expression) in POD_LABEL_QUERIES {
        let matrix = run_query(querier, KIND, label, expression, &range, &params.address).await;
        aggregator.aggregate_pod(&mut store, &matrix, &pod_keys, metric);
    }
    {
        let (metric, label, expression) = NAMESPACE_LABEL_QUERY;
        let matrix = run_query(querier, KIND, label, expression, &range, &params.address).await;
        aggregator.aggregate_namespace(&mut store, &matrix, "namespace", metric);
    }

    if let Err(err) = export::write_container_config(&dir, &store, params.cluster()) {
        error!(entity_kind = KIND, error = %err, "failed to write config extract");
    }
    if let Err(err) = export::write_container_attributes(&dir, &store, params.cluster()) {
        error!(entity_kind = KIND, error = %err, "failed to write attributes extract");
    }

    let aggregator = params.aggregation.as_str();
    for &(file_name, metric_name, inner) in WORKLOAD_QUERIES {
        let file = format!("{aggregator}_{file_name}");
        let expression = container_workload_query(aggregator, inner);
        write_workload(querier, params, &dir, &store, &keys, &file, metric_name, &expression)
            .await;
    }

    Ok(())
}

/// Open one workload file and walk the window loop, nearest window first.
/// A failed window contributes no rows but never aborts the loop.
#[allow(clippy::too_many_arguments)]
async fn write_workload(
    querier: &dyn RangeQuerier,
    params: &CollectionParams,
    dir: &Path,
    store: &ClusterStore,
    keys: &ContainerKeys<'_>,
    file_name: &str,
    metric_name: &str,
    expression: &str,
) {
    let mut writer = match WorkloadWriter::create_container(dir, file_name, metric_name) {
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
        if let Err(err) = writer.append_container_window(store, &matrix, keys, params.cluster()) {
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
