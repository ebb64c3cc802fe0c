//! ovs-qosmgr - per-interface QoS manager for the Open vSwitch integration bridge.
//!
//! Keeps the bandwidth and network-emulation state of pod interfaces
//! consistent with the switch daemon:
//!
//! - ingress policing and HTB egress queues ([`QosMgr::set_interface_bandwidth`])
//! - netem latency, jitter, limit and loss ([`QosMgr::set_netem_qos`])
//! - cleanup of lost, duplicate and orphaned records
//!
//! All switch access goes through the rate-limited [`ovs_vsctl::Vsctl`].

mod bandwidth;
pub mod config;
mod housekeeping;
mod htb;
mod inventory;
pub mod lister;
mod netem;
mod qos_mgr;
pub mod tables;
pub mod types;

pub use bandwidth::{policing_burst_kb, policing_rate_kbps};
pub use config::{QosMgrConfig, SwitchConfig, VsctlConfig, DEFAULT_CONFIG_PATH};
pub use htb::next_queue_id;
pub use inventory::MAX_VLAN_TAG;
pub use lister::{CachedPodLister, LabelSelector, PodLister, PodMeta};
pub use qos_mgr::QosMgr;
pub use types::{HtbQueueParams, NetemConfig, NetemParams, PodRef, QosKind, QueueIfaceMap};
