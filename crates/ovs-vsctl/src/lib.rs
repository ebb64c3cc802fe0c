//! Rate-limited access to the Open vSwitch configuration tool.
//!
//! This crate is the lower half of the QoS manager:
//!
//! - [`runner`]: the process boundary ([`CommandRunner`], [`ProcessRunner`])
//! - [`limiter`]: the global concurrency limit on in-flight commands
//! - [`exec`]: [`Vsctl`], the only component allowed to run commands
//! - [`parse`]: parsers for the tool's list, map and set output
//! - [`field`]: typed tables, columns, values and `find` conditions
//! - [`crud`]: generic create/set/add/remove/clear/destroy/find/get
//! - [`error`]: [`OvsError`] and [`OvsResult`]
//!
//! # Example
//!
//! ```ignore
//! use std::num::NonZeroUsize;
//! use ovs_vsctl::{Column, Condition, ProcessRunner, Table, Vsctl};
//!
//! let vsctl = Vsctl::system(ProcessRunner::default(), NonZeroUsize::new(100).unwrap());
//! let qos = vsctl
//!     .find(Table::Qos, "_uuid", &[Condition::eq(Column::key("external_ids", "iface-id"), "web-0.default")])
//!     .await?;
//! ```

pub mod crud;
pub mod error;
pub mod exec;
pub mod field;
pub mod limiter;
pub mod parse;
pub mod runner;

#[cfg(test)]
mod testing;

// Re-export commonly used items at crate root
pub use crud::Lookup;
pub use error::{OvsError, OvsResult};
pub use exec::{Vsctl, DEFAULT_CONCURRENCY, DEFAULT_SLOW_COMMAND};
pub use field::{Atom, Column, Condition, Field, Op, Table};
pub use limiter::{CommandLimiter, CommandPermit};
pub use parse::{is_empty_datum, parse_map, parse_records, parse_rows, parse_set, unquote};
pub use runner::{CommandRunner, ExecResult, ProcessRunner, DEFAULT_TIMEOUT_SECS, OVS_VSCTL_CMD};
