//! Test infrastructure for the OVS QoS manager
//!
//! Provides:
//! - An in-memory switch daemon that speaks the `ovs-vsctl` command line
//! - Fixtures for pod ports on the integration bridge
//! - Switch state verification helpers

mod fake_switch;
pub mod fixtures;
mod verification;

pub use fake_switch::{Datum, FakeVswitchd, Row};
pub use fixtures::*;
pub use verification::*;
