//! In-memory inventory of infrastructure entities
//!
//! Two registries, both owned by the collection run and passed by
//! reference: [`ClusterStore`] holds the namespace → pod → container
//! hierarchy and [`NodeStore`] the flat node list. Discovery creates
//! entities; every later ingestion pass only looks them up, so series for
//! identities discovery never saw are dropped instead of fabricating
//! entries.
//!
//! Numeric fields carry an "unset" sentinel at creation: 0 for
//! container/pod/namespace metrics, -1 for node capacity, allocatable and
//! network-speed fields. The sentinel distinguishes "never observed" from
//! "observed as zero".

use std::collections::BTreeMap;

/// A container entity, keyed by (namespace, pod, container).
#[derive(Debug, Clone, Default)]
pub struct Container {
    pub cpu_limit: i64,
    pub cpu_request: i64,
    pub mem_limit: i64,
    pub mem_request: i64,
    pub restarts: i64,
    pub power_state: i64,

    /// Aggregated `key : value|` attribute blob from the info query.
    pub con_info: String,
    /// Aggregated `key : value|` attribute blob from the label query.
    pub con_label: String,
    /// Pipe-delimited node membership built from the reserved `instance`
    /// label during the conLabel pass. Carries a trailing `|` until export.
    pub current_nodes: String,
    /// Overwritten from the reserved `pod` label during the conInfo pass.
    pub pod_name: String,
}

/// A pod entity, keyed by (namespace, pod). Owns its containers.
#[derive(Debug, Clone, Default)]
pub struct Pod {
    pub current_size: i64,
    /// Epoch seconds; 0 until observed.
    pub creation_time: i64,

    pub pod_info: String,
    pub pod_label: String,
    pub controller_label: String,

    containers: BTreeMap<String, Container>,
}

impl Pod {
    pub fn create_container(&mut self, name: &str) -> &mut Container {
        self.containers.entry(name.to_string()).or_default()
    }

    pub fn container(&self, name: &str) -> Option<&Container> {
        self.containers.get(name)
    }

    pub fn container_mut(&mut self, name: &str) -> Option<&mut Container> {
        self.containers.get_mut(name)
    }

    pub fn containers(&self) -> impl Iterator<Item = (&String, &Container)> {
        self.containers.iter()
    }
}

/// A namespace entity. Besides owning pods it carries the cluster-default
/// resource limits bound from the limit-range query.
#[derive(Debug, Clone, Default)]
pub struct Namespace {
    pub cpu_limit: i64,
    pub cpu_request: i64,
    pub mem_limit: i64,
    pub mem_request: i64,

    pub namespace_label: String,

    pods: BTreeMap<String, Pod>,
}

impl Namespace {
    pub fn create_pod(&mut self, name: &str) -> &mut Pod {
        self.pods.entry(name.to_string()).or_default()
    }

    pub fn pod(&self, name: &str) -> Option<&Pod> {
        self.pods.get(name)
    }

    pub fn pod_mut(&mut self, name: &str) -> Option<&mut Pod> {
        self.pods.get_mut(name)
    }

    pub fn pods(&self) -> impl Iterator<Item = (&String, &Pod)> {
        self.pods.iter()
    }
}

/// Hierarchical registry for one cluster: namespaces → pods → containers.
#[derive(Debug, Clone, Default)]
pub struct ClusterStore {
    namespaces: BTreeMap<String, Namespace>,
}

impl ClusterStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Discovery-phase creation. Creates every missing level of the
    /// hierarchy; identities are immutable once created.
    pub fn create_container(&mut self, namespace: &str, pod: &str, container: &str) {
        self.create_namespace(namespace)
            .create_pod(pod)
            .create_container(container);
    }

    pub fn create_namespace(&mut self, name: &str) -> &mut Namespace {
        self.namespaces.entry(name.to_string()).or_default()
    }

    pub fn namespace(&self, name: &str) -> Option<&Namespace> {
        self.namespaces.get(name)
    }

    pub fn namespace_mut(&mut self, name: &str) -> Option<&mut Namespace> {
        self.namespaces.get_mut(name)
    }

    pub fn pod(&self, namespace: &str, pod: &str) -> Option<&Pod> {
        self.namespaces.get(namespace)?.pod(pod)
    }

    /// Narrowing lookup: namespace → pod → container, `None` at the first
    /// missing level.
    pub fn container(&self, namespace: &str, pod: &str, container: &str) -> Option<&Container> {
        self.namespaces.get(namespace)?.pod(pod)?.container(container)
    }

    pub fn container_mut(
        &mut self,
        namespace: &str,
        pod: &str,
        container: &str,
    ) -> Option<&mut Container> {
        self.namespaces
            .get_mut(namespace)?
            .pod_mut(pod)?
            .container_mut(container)
    }

    pub fn namespaces(&self) -> impl Iterator<Item = (&String, &Namespace)> {
        self.namespaces.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.namespaces.is_empty()
    }
}

/// A node entity. Capacity, allocatable and network-speed fields default
/// to -1 so an export can tell "no data" from a genuine zero.
#[derive(Debug, Clone)]
pub struct Node {
    pub arch: String,
    pub os: String,
    pub hostname: String,

    pub node_label: String,

    pub net_speed_bytes: i64,

    pub cpu_capacity: i64,
    pub mem_capacity: i64,
    pub ephemeral_storage_capacity: i64,
    pub pods_capacity: i64,
    pub hugepages_2mi_capacity: i64,

    pub cpu_allocatable: i64,
    pub mem_allocatable: i64,
    pub ephemeral_storage_allocatable: i64,
    pub pods_allocatable: i64,
    pub hugepages_2mi_allocatable: i64,
}

impl Node {
    pub fn new(arch: &str, os: &str, hostname: &str) -> Self {
        Self {
            arch: arch.to_string(),
            os: os.to_string(),
            hostname: hostname.to_string(),
            node_label: String::new(),
            net_speed_bytes: -1,
            cpu_capacity: -1,
            mem_capacity: -1,
            ephemeral_storage_capacity: -1,
            pods_capacity: -1,
            hugepages_2mi_capacity: -1,
            cpu_allocatable: -1,
            mem_allocatable: -1,
            ephemeral_storage_allocatable: -1,
            pods_allocatable: -1,
            hugepages_2mi_allocatable: -1,
        }
    }
}

/// Flat registry of nodes, keyed by node name.
#[derive(Debug, Clone, Default)]
pub struct NodeStore {
    nodes: BTreeMap<String, Node>,
}

impl NodeStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create_node(&mut self, name: &str, node: Node) {
        self.nodes.insert(name.to_string(), node);
    }

    pub fn node(&self, name: &str) -> Option<&Node> {
        self.nodes.get(name)
    }

    pub fn node_mut(&mut self, name: &str) -> Option<&mut Node> {
        self.nodes.get_mut(name)
    }

    pub fn nodes(&self) -> impl Iterator<Item = (&String, &Node)> {
        self.nodes.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn discovery_creates_the_full_hierarchy() {
        let mut store = ClusterStore::new();
        store.create_container("ns1", "p1", "c1");

        assert!(store.namespace("ns1").is_some());
        assert!(store.pod("ns1", "p1").is_some());
        assert!(store.container("ns1", "p1", "c1").is_some());
    }

    #[test]
    fn lookup_short_circuits_at_first_missing_level() {
        let mut store = ClusterStore::new();
        store.create_container("ns1", "p1", "c1");

        assert!(store.container_mut("ns2", "p1", "c1").is_none());
        assert!(store.container_mut("ns1", "p2", "c1").is_none());
        assert!(store.container_mut("ns1", "p1", "c2").is_none());
    }

    #[test]
    fn container_fields_default_to_zero_sentinel() {
        let mut store = ClusterStore::new();
        store.create_container("ns1", "p1", "c1");

        let container = store.container("ns1", "p1", "c1").unwrap();
        assert_eq!(container.cpu_limit, 0);
        assert_eq!(container.power_state, 0);
        assert!(container.con_info.is_empty());
    }

    #[test]
    fn create_is_idempotent_and_keeps_existing_data() {
        let mut store = ClusterStore::new();
        store.create_container("ns1", "p1", "c1");
        store.container_mut("ns1", "p1", "c1").unwrap().cpu_limit = 500;

        // A second discovery pass over the same identity must not reset it.
        store.create_container("ns1", "p1", "c1");
        assert_eq!(store.container("ns1", "p1", "c1").unwrap().cpu_limit, 500);
    }

    #[test]
    fn node_fields_default_to_negative_one_sentinel() {
        let node = Node::new("amd64", "linux", "worker-0");
        assert_eq!(node.net_speed_bytes, -1);
        assert_eq!(node.cpu_capacity, -1);
        assert_eq!(node.hugepages_2mi_allocatable, -1);
        assert_eq!(node.arch, "amd64");
    }

    #[test]
    fn node_store_lookup() {
        let mut store = NodeStore::new();
        store.create_node("worker-0", Node::new("amd64", "linux", "worker-0"));

        assert!(store.node("worker-0").is_some());
        assert!(store.node("worker-1").is_none());
    }
}
