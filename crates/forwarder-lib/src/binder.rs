//! Metric binder: one scalar per entity per metric name
//!
//! Each binder owns a dispatch table built once at construction, mapping a
//! metric-name tag to the field setter it selects. Unknown names are a
//! no-op lookup miss, so callers can add queries before every binder knows
//! about them. Identity labels are resolved through narrowing store
//! lookups; a series missing a label or naming an unknown entity is
//! skipped without touching the store.
//!
//! The bound value is always the last sample in the window truncated
//! toward zero, or 0 when the series matched but carried no samples.

use crate::prometheus::{Matrix, Series};
use crate::store::{ClusterStore, Container, Namespace, Node, NodeStore, Pod};
use std::collections::HashMap;

/// Names of the identity labels used to join container series onto the store.
#[derive(Debug, Clone, Copy)]
pub struct ContainerKeys<'a> {
    pub namespace: &'a str,
    pub pod: &'a str,
    pub container: &'a str,
}

impl Default for ContainerKeys<'_> {
    fn default() -> Self {
        Self {
            namespace: "namespace",
            pod: "pod",
            container: "container",
        }
    }
}

/// Names of the identity labels used to join pod series onto the store.
#[derive(Debug, Clone, Copy)]
pub struct PodKeys<'a> {
    pub namespace: &'a str,
    pub pod: &'a str,
}

impl Default for PodKeys<'_> {
    fn default() -> Self {
        Self {
            namespace: "namespace",
            pod: "pod",
        }
    }
}

type ContainerSetter = fn(&mut Container, i64);
type PodSetter = fn(&mut Pod, i64);
type NamespaceSetter = fn(&mut Namespace, i64);
type NodeSetter = fn(&mut Node, i64);

/// Binds container-level scalar metrics.
pub struct ContainerBinder {
    setters: HashMap<&'static str, ContainerSetter>,
}

impl Default for ContainerBinder {
    fn default() -> Self {
        Self::new()
    }
}

impl ContainerBinder {
    pub fn new() -> Self {
        let mut setters: HashMap<&'static str, ContainerSetter> = HashMap::new();
        setters.insert("cpuLimit", |c, v| c.cpu_limit = v);
        setters.insert("cpuRequest", |c, v| c.cpu_request = v);
        setters.insert("memLimit", |c, v| c.mem_limit = v);
        setters.insert("memRequest", |c, v| c.mem_request = v);
        setters.insert("restarts", |c, v| c.restarts = v);
        setters.insert("powerState", |c, v| c.power_state = v);
        Self { setters }
    }

    pub fn bind(
        &self,
        store: &mut ClusterStore,
        matrix: &Matrix,
        keys: &ContainerKeys<'_>,
        metric: &str,
    ) {
        let Some(setter) = self.setters.get(metric) else {
            return;
        };

        for series in &matrix.series {
            let Some(container) = resolve_container(store, series, keys) else {
                continue;
            };
            setter(container, series.last_value(0));
        }
    }
}

/// Binds pod-level scalar metrics.
pub struct PodBinder {
    setters: HashMap<&'static str, PodSetter>,
}

impl Default for PodBinder {
    fn default() -> Self {
        Self::new()
    }
}

impl PodBinder {
    pub fn new() -> Self {
        let mut setters: HashMap<&'static str, PodSetter> = HashMap::new();
        setters.insert("currentSize", |p, v| p.current_size = v);
        setters.insert("creationTime", |p, v| p.creation_time = v);
        Self { setters }
    }

    pub fn bind(&self, store: &mut ClusterStore, matrix: &Matrix, keys: &PodKeys<'_>, metric: &str) {
        let Some(setter) = self.setters.get(metric) else {
            return;
        };

        for series in &matrix.series {
            let Some(pod) = resolve_pod(store, series, keys) else {
                continue;
            };
            setter(pod, series.last_value(0));
        }
    }
}

/// Binds the cluster-default namespace limits.
///
/// One limit-range query encodes four destinations; the series' own
/// `constraint` and `resource` labels pick the field. This nested dispatch
/// is the same table-lookup pattern, keyed twice.
pub struct NamespaceLimitBinder {
    setters: HashMap<&'static str, HashMap<&'static str, NamespaceSetter>>,
}

impl Default for NamespaceLimitBinder {
    fn default() -> Self {
        Self::new()
    }
}

impl NamespaceLimitBinder {
    pub fn new() -> Self {
        let mut default: HashMap<&'static str, NamespaceSetter> = HashMap::new();
        default.insert("cpu", |n, v| n.cpu_limit = v);
        default.insert("memory", |n, v| n.mem_limit = v);

        let mut default_request: HashMap<&'static str, NamespaceSetter> = HashMap::new();
        default_request.insert("cpu", |n, v| n.cpu_request = v);
        default_request.insert("memory", |n, v| n.mem_request = v);

        let mut setters = HashMap::new();
        setters.insert("default", default);
        setters.insert("defaultRequest", default_request);
        Self { setters }
    }

    pub fn bind(&self, store: &mut ClusterStore, matrix: &Matrix, namespace_key: &str) {
        for series in &matrix.series {
            let Some(name) = series.label(namespace_key) else {
                continue;
            };
            let Some(namespace) = store.namespace_mut(name) else {
                continue;
            };
            let Some(constraint) = series.label("constraint") else {
                continue;
            };
            let Some(resource) = series.label("resource") else {
                continue;
            };
            let Some(setter) = self
                .setters
                .get(constraint)
                .and_then(|by_resource| by_resource.get(resource))
            else {
                continue;
            };
            setter(namespace, series.last_value(0));
        }
    }
}

/// Binds node-level scalar metrics.
///
/// Flat metric names select a field directly. The `capacity` and
/// `allocatable` tags instead sub-dispatch on the series' `resource`
/// label, because newer backends fold all capacity figures into one
/// grouped metric. The flat `capacity_*`/`allocatable_*` names remain for
/// the older per-resource metrics.
pub struct NodeBinder {
    flat: HashMap<&'static str, NodeSetter>,
    by_resource: HashMap<&'static str, HashMap<&'static str, NodeSetter>>,
}

impl Default for NodeBinder {
    fn default() -> Self {
        Self::new()
    }
}

impl NodeBinder {
    pub fn new() -> Self {
        let mut flat: HashMap<&'static str, NodeSetter> = HashMap::new();
        flat.insert("netSpeedBytes", |n, v| n.net_speed_bytes = v);
        flat.insert("capacity_cpu", |n, v| n.cpu_capacity = v);
        flat.insert("capacity_mem", |n, v| n.mem_capacity = v);
        flat.insert("capacity_pod", |n, v| n.pods_capacity = v);
        flat.insert("allocatable_cpu", |n, v| n.cpu_allocatable = v);
        flat.insert("allocatable_mem", |n, v| n.mem_allocatable = v);
        flat.insert("allocatable_pod", |n, v| n.pods_allocatable = v);

        let mut capacity: HashMap<&'static str, NodeSetter> = HashMap::new();
        capacity.insert("cpu", |n, v| n.cpu_capacity = v);
        capacity.insert("memory", |n, v| n.mem_capacity = v);
        capacity.insert("pods", |n, v| n.pods_capacity = v);
        capacity.insert("ephemeral_storage", |n, v| n.ephemeral_storage_capacity = v);
        capacity.insert("hugepages_2Mi", |n, v| n.hugepages_2mi_capacity = v);

        let mut allocatable: HashMap<&'static str, NodeSetter> = HashMap::new();
        allocatable.insert("cpu", |n, v| n.cpu_allocatable = v);
        allocatable.insert("memory", |n, v| n.mem_allocatable = v);
        allocatable.insert("pods", |n, v| n.pods_allocatable = v);
        allocatable.insert("ephemeral_storage", |n, v| {
            n.ephemeral_storage_allocatable = v
        });
        allocatable.insert("hugepages_2Mi", |n, v| n.hugepages_2mi_allocatable = v);

        let mut by_resource = HashMap::new();
        by_resource.insert("capacity", capacity);
        by_resource.insert("allocatable", allocatable);

        Self { flat, by_resource }
    }

    pub fn bind(&self, store: &mut NodeStore, matrix: &Matrix, node_key: &str, metric: &str) {
        let resource_table = self.by_resource.get(metric);
        let flat_setter = self.flat.get(metric);
        if resource_table.is_none() && flat_setter.is_none() {
            return;
        }

        for series in &matrix.series {
            let Some(name) = series.label(node_key) else {
                continue;
            };
            let Some(node) = store.node_mut(name) else {
                continue;
            };
            let value = series.last_value(0);

            if let Some(table) = resource_table {
                let Some(setter) = series.label("resource").and_then(|r| table.get(r)) else {
                    continue;
                };
                setter(node, value);
            } else if let Some(setter) = flat_setter {
                setter(node, value);
            }
        }
    }
}

fn resolve_container<'s>(
    store: &'s mut ClusterStore,
    series: &Series,
    keys: &ContainerKeys<'_>,
) -> Option<&'s mut Container> {
    let namespace = series.label(keys.namespace)?;
    let namespace = store.namespace_mut(namespace)?;
    let pod = series.label(keys.pod)?;
    let pod = namespace.pod_mut(pod)?;
    let container = series.label(keys.container)?;
    pod.container_mut(container)
}

fn resolve_pod<'s>(
    store: &'s mut ClusterStore,
    series: &Series,
    keys: &PodKeys<'_>,
) -> Option<&'s mut Pod> {
    let namespace = series.label(keys.namespace)?;
    let namespace = store.namespace_mut(namespace)?;
    let pod = series.label(keys.pod)?;
    namespace.pod_mut(pod)
}
