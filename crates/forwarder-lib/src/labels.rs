//! Label aggregator: many series collapsed into one attribute string
//!
//! Descriptive queries return one series per underlying replica of a
//! logical entity, but the destination format has a single attribute
//! string per entity. This module merges every label key/value pair per
//! entity into one delimited, length-bounded blob.
//!
//! Merging rules, in order:
//! 1. values have `,` replaced by `;` up front (the destination is
//!    comma-delimited CSV);
//! 2. the first value for a key is stored as-is; later values are appended
//!    after `;` only when they are not already a substring of the
//!    accumulated string. Substring containment, not set membership, is
//!    the dedup rule: a value textually contained in the accumulation is
//!    dropped even if its pairing differs elsewhere;
//! 3. rendering emits `key : value|` segments: keys of 250+ characters
//!    are dropped whole, and a value is cut to `256 - 3 - len(key)`
//!    characters when the segment would otherwise reach 256. Only each
//!    segment is bounded; the concatenated string is not.

use crate::binder::{ContainerKeys, PodKeys};
use crate::prometheus::Matrix;
use crate::store::{ClusterStore, Container, Namespace, NodeStore, Pod};
use std::collections::{btree_map::Entry, BTreeMap, HashMap};

/// Per-segment budget for `key + " : " + value`.
pub const SEGMENT_BUDGET: usize = 256;
/// Keys at or above this length never appear in the rendered string.
pub const MAX_KEY_CHARS: usize = 250;

/// Accumulates label values for one entity, keyed by label name.
#[derive(Debug, Clone, Default)]
pub struct LabelAccumulator {
    values: BTreeMap<String, String>,
}

impl LabelAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one label observation, applying sanitization and the
    /// substring dedup rule.
    pub fn observe(&mut self, key: &str, value: &str) {
        let sanitized = value.replace(',', ";");
        match self.values.entry(key.to_string()) {
            Entry::Vacant(slot) => {
                slot.insert(sanitized);
            }
            Entry::Occupied(mut slot) => {
                if !slot.get().contains(&sanitized) {
                    let accumulated = slot.get_mut();
                    accumulated.push(';');
                    accumulated.push_str(&sanitized);
                }
            }
        }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &String)> {
        self.values.iter()
    }

    /// Render the accumulated labels as `key : value|...` with the
    /// trailing separator stripped.
    pub fn render(&self) -> String {
        let mut out = String::new();
        for (key, value) in &self.values {
            push_segment(&mut out, key, value);
        }
        strip_trailing_pipe(&mut out);
        out
    }
}

/// Append one bounded `key : value|` segment, or nothing when the key is
/// too long. Lengths are counted in characters so truncation cannot split
/// a code point.
fn push_segment(out: &mut String, key: &str, value: &str) {
    let key_len = key.chars().count();
    if key_len >= MAX_KEY_CHARS {
        return;
    }

    out.push_str(key);
    out.push_str(" : ");

    let value_len = value.chars().count();
    if key_len + 3 + value_len < SEGMENT_BUDGET {
        out.push_str(value);
    } else {
        let keep = SEGMENT_BUDGET - 3 - key_len;
        out.extend(value.chars().take(keep));
    }
    out.push('|');
}

fn strip_trailing_pipe(out: &mut String) {
    if out.ends_with('|') {
        out.pop();
    }
}

type ContainerField = fn(&mut Container, String);
type PodField = fn(&mut Pod, String);
type NamespaceField = fn(&mut Namespace, String);
type NodeField = fn(&mut crate::store::Node, String);

/// Routes rendered attribute strings into the store, one destination field
/// per metric-name tag. Unknown tags are dropped after accumulation, the
/// same lookup-miss behavior the metric binder has.
pub struct LabelAggregator {
    container_fields: HashMap<&'static str, ContainerField>,
    pod_fields: HashMap<&'static str, PodField>,
    namespace_fields: HashMap<&'static str, NamespaceField>,
    node_fields: HashMap<&'static str, NodeField>,
}

impl Default for LabelAggregator {
    fn default() -> Self {
        Self::new()
    }
}

impl LabelAggregator {
    pub fn new() -> Self {
        let mut container_fields: HashMap<&'static str, ContainerField> = HashMap::new();
        container_fields.insert("conInfo", |c, s| c.con_info = s);
        container_fields.insert("conLabel", |c, s| c.con_label = s);

        let mut pod_fields: HashMap<&'static str, PodField> = HashMap::new();
        pod_fields.insert("podInfo", |p, s| p.pod_info = s);
        pod_fields.insert("podLabel", |p, s| p.pod_label = s);
        pod_fields.insert("controllerLabel", |p, s| p.controller_label = s);

        let mut namespace_fields: HashMap<&'static str, NamespaceField> = HashMap::new();
        namespace_fields.insert("namespaceLabel", |n, s| n.namespace_label = s);

        let mut node_fields: HashMap<&'static str, NodeField> = HashMap::new();
        node_fields.insert("nodeLabel", |n, s| n.node_label = s);

        Self {
            container_fields,
            pod_fields,
            namespace_fields,
            node_fields,
        }
    }

    /// Merge a descriptive-label matrix into the container entities it
    /// resolves to.
    ///
    /// Two reserved keys take effect during the render loop: `instance`
    /// extends the container's node-membership list when the metric is
    /// `conLabel`, and `pod` overwrites the dedicated pod-name field when
    /// the metric is `conInfo`.
    pub fn aggregate_container(
        &self,
        store: &mut ClusterStore,
        matrix: &Matrix,
        keys: &ContainerKeys<'_>,
        metric: &str,
    ) {
        let mut temp: BTreeMap<(String, String, String), LabelAccumulator> = BTreeMap::new();

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
            let acc = temp
                .entry((namespace.into(), pod.into(), container.into()))
                .or_default();
            for (key, value) in &series.labels {
                acc.observe(key, value);
            }
        }

        for ((namespace, pod, container), acc) in &temp {
            let Some(entity) = store.container_mut(namespace, pod, container) else {
                continue;
            };

            let mut rendered = String::new();
            for (key, value) in acc.iter() {
                push_segment(&mut rendered, key, value);

                if metric == "conLabel" && key == "instance" {
                    entity.current_nodes.push_str(&value.replace(';', "|"));
                    entity.current_nodes.push('|');
                } else if metric == "conInfo" && key == "pod" {
                    entity.pod_name = value.clone();
                }
            }
            strip_trailing_pipe(&mut rendered);

            if let Some(field) = self.container_fields.get(metric) {
                field(entity, rendered);
            }
        }
    }

    /// Merge a descriptive-label matrix into pod entities.
    pub fn aggregate_pod(
        &self,
        store: &mut ClusterStore,
        matrix: &Matrix,
        keys: &PodKeys<'_>,
        metric: &str,
    ) {
        let Some(field) = self.pod_fields.get(metric) else {
            return;
        };
        let mut temp: BTreeMap<(String, String), LabelAccumulator> = BTreeMap::new();

        for series in &matrix.series {
            let (Some(namespace), Some(pod)) =
                (series.label(keys.namespace), series.label(keys.pod))
            else {
                continue;
            };
            if store.pod(namespace, pod).is_none() {
                continue;
            }
            let acc = temp.entry((namespace.into(), pod.into())).or_default();
            for (key, value) in &series.labels {
                acc.observe(key, value);
            }
        }

        for ((namespace, pod), acc) in &temp {
            if let Some(entity) = store
                .namespace_mut(namespace)
                .and_then(|ns| ns.pod_mut(pod))
            {
                field(entity, acc.render());
            }
        }
    }

    /// Merge a descriptive-label matrix into namespace entities.
    pub fn aggregate_namespace(
        &self,
        store: &mut ClusterStore,
        matrix: &Matrix,
        namespace_key: &str,
        metric: &str,
    ) {
        let Some(field) = self.namespace_fields.get(metric) else {
            return;
        };
        let mut temp: BTreeMap<String, LabelAccumulator> = BTreeMap::new();

        for series in &matrix.series {
            let Some(namespace) = series.label(namespace_key) else {
                continue;
            };
            if store.namespace(namespace).is_none() {
                continue;
            }
            let acc = temp.entry(namespace.to_string()).or_default();
            for (key, value) in &series.labels {
                acc.observe(key, value);
            }
        }

        for (namespace, acc) in &temp {
            if let Some(entity) = store.namespace_mut(namespace) {
                field(entity, acc.render());
            }
        }
    }

    /// Merge a descriptive-label matrix into node entities.
    pub fn aggregate_node(
        &self,
        store: &mut NodeStore,
        matrix: &Matrix,
        node_key: &str,
        metric: &str,
    ) {
        let Some(field) = self.node_fields.get(metric) else {
            return;
        };
        let mut temp: BTreeMap<String, LabelAccumulator> = BTreeMap::new();

        for series in &matrix.series {
            let Some(node) = series.label(node_key) else {
                continue;
            };
            if store.node(node).is_none() {
                continue;
            }
            let acc = temp.entry(node.to_string()).or_default();
            for (key, value) in &series.labels {
                acc.observe(key, value);
            }
        }

        for (node, acc) in &temp {
            if let Some(entity) = store.node_mut(node) {
                field(entity, acc.render());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::prometheus::Series;

    fn label_series(labels: &[(&str, &str)]) -> Series {
        Series {
            labels: labels
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            samples: vec![],
        }
    }

    #[test]
    fn commas_become_semicolons() {
        let mut acc = LabelAccumulator::new();
        acc.observe("app", "web,frontend");
        assert_eq!(acc.get("app"), Some("web;frontend"));
    }

    #[test]
    fn distinct_values_join_with_semicolon() {
        let mut acc = LabelAccumulator::new();
        acc.observe("instance", "10.0.0.1:9100");
        acc.observe("instance", "10.0.0.2:9100");
        assert_eq!(acc.get("instance"), Some("10.0.0.1:9100;10.0.0.2:9100"));
    }

    #[test]
    fn substring_values_are_dropped() {
        let mut acc = LabelAccumulator::new();
        acc.observe("version", "v1.2.3-rc1");
        // Already a substring of the accumulation, so it is dropped even
        // though it is a different value.
        acc.observe("version", "v1.2.3");
        assert_eq!(acc.get("version"), Some("v1.2.3-rc1"));

        // Exact repeats are dropped the same way.
        acc.observe("version", "v1.2.3-rc1");
        assert_eq!(acc.get("version"), Some("v1.2.3-rc1"));
    }

    #[test]
    fn rendered_segment_never_exceeds_budget() {
        let key = "k".repeat(40);
        let value = "v".repeat(400);
        let mut acc = LabelAccumulator::new();
        acc.observe(&key, &value);

        let rendered = acc.render();
        assert_eq!(rendered.chars().count(), SEGMENT_BUDGET);
        assert_eq!(
            rendered.chars().filter(|&c| c == 'v').count(),
            SEGMENT_BUDGET - 3 - key.len()
        );
    }

    #[test]
    fn short_segments_are_untouched() {
        let mut acc = LabelAccumulator::new();
        acc.observe("app", "web");
        assert_eq!(acc.render(), "app : web");
    }

    #[test]
    fn exact_budget_boundary_keeps_full_value() {
        // key 10 + 3 + value 242 = 255 < 256: untruncated.
        let key = "k".repeat(10);
        let value = "v".repeat(242);
        let mut acc = LabelAccumulator::new();
        acc.observe(&key, &value);
        assert!(acc.render().ends_with(&value));

        // key 10 + 3 + value 243 = 256: truncated to 243 chars, a no-op cut.
        let value = "v".repeat(243);
        let mut acc = LabelAccumulator::new();
        acc.observe(&key, &value);
        assert_eq!(acc.render().chars().count(), 256);
    }

    #[test]
    fn long_keys_are_excluded_entirely() {
        let long_key = "k".repeat(250);
        let mut acc = LabelAccumulator::new();
        acc.observe(&long_key, "value");
        acc.observe("app", "web");

        let rendered = acc.render();
        assert_eq!(rendered, "app : web");
        assert!(!rendered.contains(&long_key));
    }

    #[test]
    fn render_joins_segments_and_strips_trailing_pipe() {
        let mut acc = LabelAccumulator::new();
        acc.observe("app", "web");
        acc.observe("zone", "east");
        assert_eq!(acc.render(), "app : web|zone : east");
    }

    #[test]
    fn render_of_empty_accumulator_is_empty() {
        assert_eq!(LabelAccumulator::new().render(), "");
    }

    #[test]
    fn truncation_counts_characters_not_bytes() {
        let key = "k".repeat(100);
        let value = "é".repeat(300);
        let mut acc = LabelAccumulator::new();
        acc.observe(&key, &value);

        let rendered = acc.render();
        assert_eq!(rendered.chars().count(), SEGMENT_BUDGET);
    }

    #[test]
    fn container_pass_merges_replicas_and_tracks_nodes() {
        let mut store = ClusterStore::new();
        store.create_container("ns1", "p1", "c1");

        let matrix = Matrix {
            series: vec![
                label_series(&[
                    ("namespace", "ns1"),
                    ("pod", "p1"),
                    ("container", "c1"),
                    ("instance", "10.0.0.1:9100"),
                ]),
                label_series(&[
                    ("namespace", "ns1"),
                    ("pod", "p1"),
                    ("container", "c1"),
                    ("instance", "10.0.0.2:9100"),
                ]),
            ],
        };

        LabelAggregator::new().aggregate_container(
            &mut store,
            &matrix,
            &ContainerKeys::default(),
            "conLabel",
        );

        let container = store.container("ns1", "p1", "c1").unwrap();
        assert!(container
            .con_label
            .contains("instance : 10.0.0.1:9100;10.0.0.2:9100"));
        assert_eq!(container.current_nodes, "10.0.0.1:9100|10.0.0.2:9100|");
    }

    #[test]
    fn con_info_pass_overwrites_pod_name() {
        let mut store = ClusterStore::new();
        store.create_container("ns1", "p1", "c1");

        let matrix = Matrix {
            series: vec![label_series(&[
                ("namespace", "ns1"),
                ("pod", "p1"),
                ("container", "c1"),
                ("image", "registry/app:1.0"),
            ])],
        };

        LabelAggregator::new().aggregate_container(
            &mut store,
            &matrix,
            &ContainerKeys::default(),
            "conInfo",
        );

        let container = store.container("ns1", "p1", "c1").unwrap();
        assert_eq!(container.pod_name, "p1");
        assert!(container.con_info.contains("image : registry/app:1.0"));
        // Reserved handling is metric-scoped: conInfo never grows the
        // node-membership list.
        assert!(container.current_nodes.is_empty());
    }

    #[test]
    fn rebuilt_attribute_replaces_previous_value() {
        let mut store = ClusterStore::new();
        store.create_container("ns1", "p1", "c1");
        let aggregator = LabelAggregator::new();

        let first = Matrix {
            series: vec![label_series(&[
                ("namespace", "ns1"),
                ("pod", "p1"),
                ("container", "c1"),
                ("app", "old"),
            ])],
        };
        aggregator.aggregate_container(&mut store, &first, &ContainerKeys::default(), "conInfo");

        let second = Matrix {
            series: vec![label_series(&[
                ("namespace", "ns1"),
                ("pod", "p1"),
                ("container", "c1"),
                ("app", "new"),
            ])],
        };
        aggregator.aggregate_container(&mut store, &second, &ContainerKeys::default(), "conInfo");

        let container = store.container("ns1", "p1", "c1").unwrap();
        assert!(container.con_info.contains("app : new"));
        assert!(!container.con_info.contains("old"));
    }

    #[test]
    fn unknown_entities_do_not_accumulate() {
        let mut store = ClusterStore::new();
        store.create_container("ns1", "p1", "c1");

        let matrix = Matrix {
            series: vec![label_series(&[
                ("namespace", "ns1"),
                ("pod", "stray"),
                ("container", "c1"),
                ("app", "web"),
            ])],
        };

        LabelAggregator::new().aggregate_container(
            &mut store,
            &matrix,
            &ContainerKeys::default(),
            "conLabel",
        );
        assert!(store.container("ns1", "p1", "c1").unwrap().con_label.is_empty());
    }

    #[test]
    fn pod_and_namespace_destinations() {
        let mut store = ClusterStore::new();
        store.create_container("ns1", "p1", "c1");
        let aggregator = LabelAggregator::new();

        let pod_matrix = Matrix {
            series: vec![label_series(&[
                ("namespace", "ns1"),
                ("pod", "p1"),
                ("owner_kind", "ReplicaSet"),
            ])],
        };
        aggregator.aggregate_pod(&mut store, &pod_matrix, &PodKeys::default(), "podInfo");
        assert!(store
            .pod("ns1", "p1")
            .unwrap()
            .pod_info
            .contains("owner_kind : ReplicaSet"));

        let ns_matrix = Matrix {
            series: vec![label_series(&[("namespace", "ns1"), ("team", "infra")])],
        };
        aggregator.aggregate_namespace(&mut store, &ns_matrix, "namespace", "namespaceLabel");
        assert!(store
            .namespace("ns1")
            .unwrap()
            .namespace_label
            .contains("team : infra"));
    }

    #[test]
    fn unknown_metric_tag_writes_nothing() {
        let mut store = ClusterStore::new();
        store.create_container("ns1", "p1", "c1");

        let matrix = Matrix {
            series: vec![label_series(&[
                ("namespace", "ns1"),
                ("pod", "p1"),
                ("container", "c1"),
                ("app", "web"),
            ])],
        };

        LabelAggregator::new().aggregate_container(
            &mut store,
            &matrix,
            &ContainerKeys::default(),
            "someFutureTag",
        );
        let container = store.container("ns1", "p1", "c1").unwrap();
        assert!(container.con_info.is_empty());
        assert!(container.con_label.is_empty());
    }
}
