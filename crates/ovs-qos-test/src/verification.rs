//! Verification helpers for testing the QoS manager
//!
//! Provides assertion helpers over the state held by a [`FakeVswitchd`].

use std::collections::HashSet;

use thiserror::Error;

use crate::fake_switch::{FakeVswitchd, Row};

/// Verification error types
#[derive(Error, Debug)]
pub enum VerificationError {
    #[error("Expected row '{record}' not found in table {table}")]
    RowNotFound { table: String, record: String },

    #[error("Value mismatch for {table} {record} {column}: expected '{expected}', got '{actual}'")]
    ValueMismatch {
        table: String,
        record: String,
        column: String,
        expected: String,
        actual: String,
    },

    #[error("Expected {expected} rows in table {table}, found {actual}")]
    CountMismatch {
        table: String,
        expected: usize,
        actual: usize,
    },

    #[error("Row {uuid} in table {table} is not referenced by anything")]
    Orphaned { table: String, uuid: String },
}

/// Result type for verification operations
pub type VerifyResult<T> = Result<T, VerificationError>;

/// Switch state verification helper
pub struct SwitchVerifier<'a> {
    switch: &'a FakeVswitchd,
}

impl<'a> SwitchVerifier<'a> {
    pub fn new(switch: &'a FakeVswitchd) -> Self {
        Self { switch }
    }

    fn require(&self, table: &str, record: &str) -> VerifyResult<Row> {
        self.switch
            .row(table, record)
            .ok_or_else(|| VerificationError::RowNotFound {
                table: table.to_string(),
                record: record.to_string(),
            })
    }

    /// Verify the number of rows in a table
    pub fn assert_row_count(&self, table: &str, expected: usize) -> VerifyResult<()> {
        let actual = self.switch.count(table);
        if actual != expected {
            return Err(VerificationError::CountMismatch {
                table: table.to_string(),
                expected,
                actual,
            });
        }
        Ok(())
    }

    /// Returns the QoS row a port points at, if any.
    pub fn port_qos(&self, port: &str) -> VerifyResult<Option<Row>> {
        let row = self.require("port", port)?;
        match row.atom("qos") {
            Some(qos) => self.require("qos", qos).map(Some),
            None => Ok(None),
        }
    }

    /// Verify that a port is bound to a QoS record of the given type
    pub fn assert_port_qos_type(&self, port: &str, expected: &str) -> VerifyResult<Row> {
        let mismatch = |actual: &str| VerificationError::ValueMismatch {
            table: "port".to_string(),
            record: port.to_string(),
            column: "qos:type".to_string(),
            expected: expected.to_string(),
            actual: actual.to_string(),
        };
        let qos = self.port_qos(port)?.ok_or_else(|| mismatch("[]"))?;
        let actual = qos.atom("type").unwrap_or_default();
        if actual != expected {
            return Err(mismatch(actual));
        }
        Ok(qos)
    }

    /// Verify that a port has no QoS binding
    pub fn assert_port_qos_cleared(&self, port: &str) -> VerifyResult<()> {
        let row = self.require("port", port)?;
        if let Some(qos) = row.atom("qos") {
            return Err(VerificationError::ValueMismatch {
                table: "port".to_string(),
                record: port.to_string(),
                column: "qos".to_string(),
                expected: "[]".to_string(),
                actual: qos.to_string(),
            });
        }
        Ok(())
    }

    /// Verify a scalar column of a row
    pub fn assert_atom(
        &self,
        table: &str,
        record: &str,
        column: &str,
        expected: &str,
    ) -> VerifyResult<()> {
        let row = self.require(table, record)?;
        let actual = row.atom(column).unwrap_or("[]");
        if actual != expected {
            return Err(VerificationError::ValueMismatch {
                table: table.to_string(),
                record: record.to_string(),
                column: column.to_string(),
                expected: expected.to_string(),
                actual: actual.to_string(),
            });
        }
        Ok(())
    }

    /// Verify one key of a map column
    pub fn assert_map_value(
        &self,
        table: &str,
        record: &str,
        column: &str,
        key: &str,
        expected: &str,
    ) -> VerifyResult<()> {
        let row = self.require(table, record)?;
        let actual = row.map_value(column, key).unwrap_or("[]");
        if actual != expected {
            return Err(VerificationError::ValueMismatch {
                table: table.to_string(),
                record: record.to_string(),
                column: format!("{}:{}", column, key),
                expected: expected.to_string(),
                actual: actual.to_string(),
            });
        }
        Ok(())
    }

    /// Verify that every QoS row is bound to a port and every queue to a QoS row
    pub fn assert_no_orphans(&self) -> VerifyResult<()> {
        let bound_qos: HashSet<String> = self
            .switch
            .rows("port")
            .iter()
            .filter_map(|p| p.atom("qos").map(str::to_string))
            .collect();
        let qos_rows = self.switch.rows("qos");
        if let Some(orphan) = qos_rows.iter().find(|q| !bound_qos.contains(&q.uuid)) {
            return Err(VerificationError::Orphaned {
                table: "qos".to_string(),
                uuid: orphan.uuid.clone(),
            });
        }

        let bound_queues: HashSet<String> = qos_rows
            .iter()
            .flat_map(|q| q.map("queues").into_values())
            .collect();
        if let Some(orphan) = self
            .switch
            .rows("queue")
            .iter()
            .find(|q| !bound_queues.contains(&q.uuid))
        {
            return Err(VerificationError::Orphaned {
                table: "queue".to_string(),
                uuid: orphan.uuid.clone(),
            });
        }
        Ok(())
    }
}
