//! Read-only access to the pods known to the node.
//!
//! The reconciler never mutates pods; it only asks whether a pod still
//! exists when deciding which switch records are residual.

use std::collections::{BTreeMap, HashMap};

use parking_lot::RwLock;

use ovs_vsctl::OvsResult;

/// Equality-based label selector. An empty selector matches every pod.
pub type LabelSelector = BTreeMap<String, String>;

/// The subset of pod metadata the QoS manager uses.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PodMeta {
    pub name: String,
    pub namespace: String,
    pub labels: BTreeMap<String, String>,
    pub annotations: BTreeMap<String, String>,
}

impl PodMeta {
    pub fn new(name: impl Into<String>, namespace: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            namespace: namespace.into(),
            ..Default::default()
        }
    }

    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }

    pub fn with_annotation(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.annotations.insert(key.into(), value.into());
        self
    }

    /// True when every selector entry is present in the labels.
    pub fn matches(&self, selector: &LabelSelector) -> bool {
        selector
            .iter()
            .all(|(k, v)| self.labels.get(k) == Some(v))
    }
}

/// Accessor over a local pod cache.
pub trait PodLister: Send + Sync {
    /// Pods whose labels match `selector`.
    fn list(&self, selector: &LabelSelector) -> OvsResult<Vec<PodMeta>>;

    /// One pod, or `None` when it is not in the cache.
    fn get(&self, namespace: &str, name: &str) -> OvsResult<Option<PodMeta>>;
}

/// In-process pod cache fed by whoever watches the API server.
#[derive(Debug, Default)]
pub struct CachedPodLister {
    pods: RwLock<HashMap<(String, String), PodMeta>>,
}

impl CachedPodLister {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a cache holding `pods`.
    pub fn from_pods(pods: impl IntoIterator<Item = PodMeta>) -> Self {
        let lister = Self::new();
        for pod in pods {
            lister.upsert(pod);
        }
        lister
    }

    pub fn upsert(&self, pod: PodMeta) {
        self.pods
            .write()
            .insert((pod.namespace.clone(), pod.name.clone()), pod);
    }

    pub fn remove(&self, namespace: &str, name: &str) -> Option<PodMeta> {
        self.pods
            .write()
            .remove(&(namespace.to_string(), name.to_string()))
    }

    pub fn len(&self) -> usize {
        self.pods.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.pods.read().is_empty()
    }
}

impl PodLister for CachedPodLister {
    fn list(&self, selector: &LabelSelector) -> OvsResult<Vec<PodMeta>> {
        let mut pods: Vec<PodMeta> = self
            .pods
            .read()
            .values()
            .filter(|pod| pod.matches(selector))
            .cloned()
            .collect();
        pods.sort_by(|a, b| (&a.namespace, &a.name).cmp(&(&b.namespace, &b.name)));
        Ok(pods)
    }

    fn get(&self, namespace: &str, name: &str) -> OvsResult<Option<PodMeta>> {
        Ok(self
            .pods
            .read()
            .get(&(namespace.to_string(), name.to_string()))
            .cloned())
    }
}
