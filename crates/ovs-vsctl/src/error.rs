//! Error types for ovs-vsctl operations.
//!
//! Every failure of the executor, the CRUD layer and the QoS reconciler is
//! reported through [`OvsError`]. All errors implement `std::error::Error`
//! via `thiserror`.

use std::io;
use thiserror::Error;

/// Result type alias for ovs-vsctl operations.
pub type OvsResult<T> = Result<T, OvsError>;

/// Errors that can occur while driving the switch daemon.
#[derive(Debug, Error)]
pub enum OvsError {
    /// The tool could not be spawned at all.
    #[error("Failed to execute '{command}': {source}")]
    Exec {
        /// The command line that failed to start.
        command: String,
        /// The underlying IO error.
        #[source]
        source: io::Error,
    },

    /// The tool ran and exited non-zero.
    #[error("Command failed: '{command}' (exit code {exit_code}): {output}")]
    CommandFailed {
        /// The command line.
        command: String,
        /// The exit code, -1 when killed by a signal.
        exit_code: i32,
        /// Combined stdout/stderr output.
        output: String,
    },

    /// A single record was required but the daemon does not have it.
    #[error("Record not found: {table} {record}")]
    NotFound {
        /// The table name.
        table: String,
        /// The record selector (handle or name).
        record: String,
    },

    /// The daemon accepted the command but its output has an unexpected shape.
    #[error("Malformed output from '{command}': {reason}: {output:?}")]
    MalformedOutput {
        /// The command line.
        command: String,
        /// The raw output.
        output: String,
        /// What was expected.
        reason: String,
    },

    /// The QoS discipline bound to an interface is not the requested one.
    #[error("Inconsistent QoS state for {iface}: expected {expected}, found {actual}")]
    InconsistentState {
        /// The iface-id or port name.
        iface: String,
        /// The discipline the operation needs.
        expected: String,
        /// The discipline found on the daemon.
        actual: String,
    },

    /// A queue handle that the caller's queue map does not know for the interface.
    #[error("Queue '{queue}' is not known for interface '{iface}'")]
    UnknownQueue {
        /// The iface-id.
        iface: String,
        /// The rejected queue handle.
        queue: String,
    },

    /// Invalid configuration or argument.
    #[error("Invalid configuration for {field}: {message}")]
    InvalidConfig {
        /// The field that failed validation.
        field: String,
        /// Error message.
        message: String,
    },
}

impl OvsError {
    /// Creates a not-found error.
    pub fn not_found(table: impl Into<String>, record: impl Into<String>) -> Self {
        Self::NotFound {
            table: table.into(),
            record: record.into(),
        }
    }

    /// Creates a malformed output error.
    pub fn malformed(
        command: impl Into<String>,
        output: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self::MalformedOutput {
            command: command.into(),
            output: output.into(),
            reason: reason.into(),
        }
    }

    /// Creates an inconsistent state error.
    pub fn inconsistent(
        iface: impl Into<String>,
        expected: impl Into<String>,
        actual: impl Into<String>,
    ) -> Self {
        Self::InconsistentState {
            iface: iface.into(),
            expected: expected.into(),
            actual: actual.into(),
        }
    }

    /// Creates an invalid configuration error.
    pub fn invalid_config(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidConfig {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Returns true if the command may succeed when the caller tries again.
    ///
    /// Nothing in this workspace retries; the classification is for callers.
    pub fn is_retryable(&self) -> bool {
        matches!(self, OvsError::CommandFailed { .. } | OvsError::Exec { .. })
    }

    /// Returns true if the error means the record is absent.
    pub fn is_not_found(&self) -> bool {
        matches!(self, OvsError::NotFound { .. })
    }
}
