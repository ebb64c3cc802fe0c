//! Column names and well-known values of the switch tables.
//!
//! These match the Open vSwitch database schema.

/// QoS type for hierarchical token bucket shaping.
pub const HTB_QOS: &str = "linux-htb";

/// QoS type for network emulation.
pub const NETEM_QOS: &str = "linux-netem";

/// Interface type of bridge-internal ports.
pub const INTERNAL_IFACE_TYPE: &str = "internal";

/// Datapath type of a userspace (DPDK) bridge.
pub const NETDEV_DATAPATH: &str = "netdev";

/// Substring of the interface error when the kernel device is gone.
pub const NO_SUCH_DEVICE: &str = "No such device";

/// Column names.
pub mod columns {
    pub const UUID: &str = "_uuid";
    pub const NAME: &str = "name";
    pub const TYPE: &str = "type";
    pub const QOS: &str = "qos";
    pub const QUEUES: &str = "queues";
    pub const TAG: &str = "tag";
    pub const OFPORT: &str = "ofport";
    pub const ERROR: &str = "error";
    pub const EXTERNAL_IDS: &str = "external_ids";
    pub const OTHER_CONFIG: &str = "other_config";
    pub const DATAPATH_TYPE: &str = "datapath_type";
    pub const INGRESS_POLICING_RATE: &str = "ingress_policing_rate";
    pub const INGRESS_POLICING_BURST: &str = "ingress_policing_burst";
    pub const SELECT_SRC_PORT: &str = "select_src_port";
    pub const SELECT_DST_PORT: &str = "select_dst_port";
}

/// Keys of the `external_ids` map.
pub mod external_ids {
    /// Logical switch port the interface belongs to.
    pub const IFACE_ID: &str = "iface-id";

    /// `<namespace>/<name>` of the owning pod, set on QoS and queue records.
    pub const POD: &str = "pod";

    /// Pod name, set on interfaces by the CNI plugin.
    pub const POD_NAME: &str = "pod_name";

    /// Pod namespace, set on interfaces by the CNI plugin.
    pub const POD_NAMESPACE: &str = "pod_namespace";

    /// Network namespace path of the pod.
    pub const POD_NETNS: &str = "pod_netns";

    pub const VENDOR: &str = "vendor";
}

/// Keys of the `other_config` map.
pub mod other_config {
    /// Netem latency in microseconds.
    pub const LATENCY: &str = "latency";

    /// Netem jitter in microseconds.
    pub const JITTER: &str = "jitter";

    /// Netem queue limit in packets.
    pub const LIMIT: &str = "limit";

    /// Netem loss percentage.
    pub const LOSS: &str = "loss";

    /// HTB queue ceiling in bits per second.
    pub const MAX_RATE: &str = "max-rate";

    /// HTB queue guarantee in bits per second.
    pub const MIN_RATE: &str = "min-rate";

    /// HTB queue burst in bits.
    pub const BURST: &str = "burst";
}
