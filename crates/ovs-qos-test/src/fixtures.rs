//! Test fixtures for pod interfaces on the integration bridge
//!
//! Provides builders for seeding [`crate::FakeVswitchd`] with the ports and
//! interfaces the CNI plugin would have created.

use std::collections::BTreeMap;

/// Name of the integration bridge used by the fixtures.
pub const TEST_BRIDGE: &str = "br-int";

/// Vendor tag used by the fixtures.
pub const TEST_VENDOR: &str = "ovs-qos";

/// Describes one port with a single interface of the same name.
#[derive(Debug, Clone, Default)]
pub struct PortSpec {
    /// Port and interface name
    pub name: String,
    /// Interface type, e.g. `internal`
    pub iface_type: Option<String>,
    /// OpenFlow port number, -1 when the datapath failed to attach it
    pub ofport: Option<i64>,
    /// Interface error string
    pub error: Option<String>,
    /// Interface external_ids
    pub external_ids: BTreeMap<String, String>,
    /// Port external_ids
    pub port_external_ids: BTreeMap<String, String>,
}

impl PortSpec {
    /// Create a plain system port
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// Create an internal port
    pub fn internal(name: impl Into<String>) -> Self {
        Self::new(name).with_type("internal")
    }

    pub fn with_type(mut self, iface_type: impl Into<String>) -> Self {
        self.iface_type = Some(iface_type.into());
        self
    }

    pub fn with_ofport(mut self, ofport: i64) -> Self {
        self.ofport = Some(ofport);
        self
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }

    /// Add an interface external_id
    pub fn with_external_id(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.external_ids.insert(key.into(), value.into());
        self
    }

    pub fn with_iface_id(self, iface_id: impl Into<String>) -> Self {
        self.with_external_id("iface-id", iface_id)
    }

    /// Tag the interface with the owning pod
    pub fn with_pod(self, namespace: impl Into<String>, name: impl Into<String>) -> Self {
        self.with_external_id("pod_namespace", namespace)
            .with_external_id("pod_name", name)
    }

    pub fn with_netns(self, netns: impl Into<String>) -> Self {
        self.with_external_id("pod_netns", netns)
    }

    /// Tag the port with a vendor
    pub fn with_vendor(mut self, vendor: impl Into<String>) -> Self {
        self.port_external_ids
            .insert("vendor".to_string(), vendor.into());
        self
    }
}

/// A pod whose veth end is attached to the integration bridge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PodFixture {
    pub name: String,
    pub namespace: String,
}

impl PodFixture {
    pub fn new(name: impl Into<String>, namespace: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            namespace: namespace.into(),
        }
    }

    /// The logical switch port id, `<name>.<namespace>`.
    pub fn iface_id(&self) -> String {
        format!("{}.{}", self.name, self.namespace)
    }

    /// Host side veth name.
    pub fn port_name(&self) -> String {
        format!("{}_h", self.name)
    }

    pub fn netns(&self) -> String {
        format!("/var/run/netns/cni-{}", self.name)
    }

    /// A healthy attached port for this pod.
    pub fn port_spec(&self) -> PortSpec {
        PortSpec::new(self.port_name())
            .with_iface_id(self.iface_id())
            .with_pod(&self.namespace, &self.name)
            .with_netns(self.netns())
            .with_ofport(1)
            .with_vendor(TEST_VENDOR)
    }
}

/// `count` pods named `web-<i>` in the `default` namespace.
pub fn web_pods(count: usize) -> Vec<PodFixture> {
    (0..count)
        .map(|i| PodFixture::new(format!("web-{}", i), "default"))
        .collect()
}
