//! CSV extracts for the downstream analytics system
//!
//! Two file families per entity kind: workload files (one row per known
//! entity per historical window, appended incrementally as the window
//! loop progresses) and config/attribute files (one row per entity,
//! written once after all ingestion completes). Every file gets its fixed
//! header immediately on creation, so a run that ingests nothing still
//! leaves well-formed, header-only extracts behind.
//!
//! Numeric cells are plain decimal integers. String attribute cells are
//! the `|`-delimited `key : value` blobs from the label aggregator, whose
//! commas were already replaced by semicolons, so no cell ever collides
//! with the CSV delimiter.

use crate::binder::ContainerKeys;
use crate::prometheus::Matrix;
use crate::store::{ClusterStore, NodeStore};
use chrono::DateTime;
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;

fn format_datetime(timestamp: i64) -> String {
    DateTime::from_timestamp(timestamp, 0)
        .map(|dt| dt.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_default()
}

/// An open workload CSV file, held only for the duration of one metric's
/// window loop.
pub struct WorkloadWriter {
    writer: BufWriter<File>,
}

impl WorkloadWriter {
    /// Create a container/pod workload file and write its header.
    pub fn create_container(dir: &Path, file_name: &str, metric_name: &str) -> io::Result<Self> {
        let file = File::create(dir.join(format!("{file_name}.csv")))?;
        let mut writer = BufWriter::new(file);
        writeln!(writer, "cluster,namespace,pod,container,Datetime,{metric_name}")?;
        Ok(Self { writer })
    }

    /// Create a node workload file and write its header.
    pub fn create_node(dir: &Path, file_name: &str, metric_name: &str) -> io::Result<Self> {
        let file = File::create(dir.join(format!("{file_name}.csv")))?;
        let mut writer = BufWriter::new(file);
        writeln!(writer, "cluster,node,Datetime,{metric_name}")?;
        Ok(Self { writer })
    }

    /// Append one window's rows for container series. Series that do not
    /// resolve to a discovered container, or that carry no samples in the
    /// window, contribute nothing.
    pub fn append_container_window(
        &mut self,
        store: &ClusterStore,
        matrix: &Matrix,
        keys: &ContainerKeys<'_>,
        cluster: &str,
    ) -> io::Result<()> {
        for series in &matrix.series {
            let (Some(namespace), Some(pod), Some(container)) = (
                series.label(keys.namespace),
                series.label(keys.pod),
                series.label(keys.container),
            ) else {
                continue;
            };
            if store.container(namespace, pod, container).is_none() {
                continue;
            }
            let Some(sample) = series.samples.last() else {
                continue;
            };
            writeln!(
                self.writer,
                "{cluster},{namespace},{pod},{container},{},{}",
                format_datetime(sample.timestamp),
                sample.value as i64
            )?;
        }
        self.writer.flush()
    }

    /// Append one window's rows for node series.
    pub fn append_node_window(
        &mut self,
        store: &NodeStore,
        matrix: &Matrix,
        node_key: &str,
        cluster: &str,
    ) -> io::Result<()> {
        for series in &matrix.series {
            let Some(node) = series.label(node_key) else {
                continue;
            };
            if store.node(node).is_none() {
                continue;
            }
            let Some(sample) = series.samples.last() else {
                continue;
            };
            writeln!(
                self.writer,
                "{cluster},{node},{},{}",
                format_datetime(sample.timestamp),
                sample.value as i64
            )?;
        }
        self.writer.flush()
    }
}

const CONTAINER_CONFIG_HEADER: &str =
    "cluster,namespace,pod,container,CpuLimit,CpuRequest,MemLimit,MemRequest";

const CONTAINER_ATTRIBUTES_HEADER: &str = "cluster,namespace,pod,container,ContainerLabels,\
ContainerInfo,PodInfo,PodLabels,ControllerLabels,NamespaceLabels,CurrentNodes,PodName,\
PowerState,Restarts,CurrentSize,CreationTime,NamespaceCpuLimit,NamespaceCpuRequest,\
NamespaceMemLimit,NamespaceMemRequest";

const NODE_CONFIG_HEADER: &str = "cluster,node,Arch,Os,Hostname,NetSpeedBytes,CpuCapacity,\
MemCapacity,EphemeralStorageCapacity,PodsCapacity,HugePages2MiCapacity";

const NODE_ATTRIBUTES_HEADER: &str = "cluster,node,NodeLabels,NetSpeedBytes,CpuAllocatable,\
MemAllocatable,EphemeralStorageAllocatable,PodsAllocatable,HugePages2MiAllocatable";

/// Write the container config extract: identity plus resource settings.
pub fn write_container_config(dir: &Path, store: &ClusterStore, cluster: &str) -> io::Result<()> {
    let file = File::create(dir.join("config.csv"))?;
    let mut writer = BufWriter::new(file);
    writeln!(writer, "{CONTAINER_CONFIG_HEADER}")?;

    for (namespace, ns) in store.namespaces() {
        for (pod, p) in ns.pods() {
            for (container, c) in p.containers() {
                writeln!(
                    writer,
                    "{cluster},{namespace},{pod},{container},{},{},{},{}",
                    c.cpu_limit, c.cpu_request, c.mem_limit, c.mem_request
                )?;
            }
        }
    }
    writer.flush()
}

/// Write the container attribute extract: aggregated label blobs plus the
/// pod- and namespace-level fields each container inherits.
pub fn write_container_attributes(
    dir: &Path,
    store: &ClusterStore,
    cluster: &str,
) -> io::Result<()> {
    let file = File::create(dir.join("attributes.csv"))?;
    let mut writer = BufWriter::new(file);
    writeln!(writer, "{CONTAINER_ATTRIBUTES_HEADER}")?;

    for (namespace, ns) in store.namespaces() {
        for (pod, p) in ns.pods() {
            for (container, c) in p.containers() {
                let current_nodes = c.current_nodes.strip_suffix('|').unwrap_or(&c.current_nodes);
                writeln!(
                    writer,
                    "{cluster},{namespace},{pod},{container},{},{},{},{},{},{},{},{},{},{},{},{},{},{},{},{}",
                    c.con_label,
                    c.con_info,
                    p.pod_info,
                    p.pod_label,
                    p.controller_label,
                    ns.namespace_label,
                    current_nodes,
                    c.pod_name,
                    c.power_state,
                    c.restarts,
                    p.current_size,
                    p.creation_time,
                    ns.cpu_limit,
                    ns.cpu_request,
                    ns.mem_limit,
                    ns.mem_request
                )?;
            }
        }
    }
    writer.flush()
}

/// Write the node config extract: discovery labels plus capacity figures.
pub fn write_node_config(dir: &Path, store: &NodeStore, cluster: &str) -> io::Result<()> {
    let file = File::create(dir.join("config.csv"))?;
    let mut writer = BufWriter::new(file);
    writeln!(writer, "{NODE_CONFIG_HEADER}")?;

    for (name, node) in store.nodes() {
        writeln!(
            writer,
            "{cluster},{name},{},{},{},{},{},{},{},{},{}",
            node.arch,
            node.os,
            node.hostname,
            node.net_speed_bytes,
            node.cpu_capacity,
            node.mem_capacity,
            node.ephemeral_storage_capacity,
            node.pods_capacity,
            node.hugepages_2mi_capacity
        )?;
    }
    writer.flush()
}

/// Write the node attribute extract: label blob plus allocatable figures.
pub fn write_node_attributes(dir: &Path, store: &NodeStore, cluster: &str) -> io::Result<()> {
    let file = File::create(dir.join("attributes.csv"))?;
    let mut writer = BufWriter::new(file);
    writeln!(writer, "{NODE_ATTRIBUTES_HEADER}")?;

    for (name, node) in store.nodes() {
        writeln!(
            writer,
            "{cluster},{name},{},{},{},{},{},{},{}",
            node.node_label,
            node.net_speed_bytes,
            node.cpu_allocatable,
            node.mem_allocatable,
            node.ephemeral_storage_allocatable,
            node.pods_allocatable,
            node.hugepages_2mi_allocatable
        )?;
    }
    writer.flush()
}
