//! Generic table primitives over the executor.
//!
//! Set-valued and map-valued columns take [`Vsctl::add`] /
//! [`Vsctl::remove`]; scalar columns and single map keys take
//! [`Vsctl::set`]. The daemon rejects a mismatch, and the error is passed
//! through unchanged.

use tracing::debug;
use uuid::Uuid;

use crate::error::{OvsError, OvsResult};
use crate::exec::Vsctl;
use crate::field::{Atom, Column, Condition, Field, Table};
use crate::parse::{parse_records, parse_rows, unquote};

/// Outcome of a point lookup that can legitimately find nothing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Lookup<T> {
    Found(T),
    NotFound,
}

impl<T> Lookup<T> {
    pub fn is_found(&self) -> bool {
        matches!(self, Lookup::Found(_))
    }

    /// Converts to an `Option`, dropping the distinction from errors.
    pub fn found(self) -> Option<T> {
        match self {
            Lookup::Found(v) => Some(v),
            Lookup::NotFound => None,
        }
    }

    /// Turns `NotFound` into [`OvsError::NotFound`] for callers that need the record.
    pub fn required(self, table: Table, record: &str) -> OvsResult<T> {
        match self {
            Lookup::Found(v) => Ok(v),
            Lookup::NotFound => Err(OvsError::not_found(table.as_str(), record)),
        }
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Lookup<U> {
        match self {
            Lookup::Found(v) => Lookup::Found(f(v)),
            Lookup::NotFound => Lookup::NotFound,
        }
    }
}

fn render<T: ToString>(items: &[T]) -> impl Iterator<Item = String> + '_ {
    items.iter().map(ToString::to_string)
}

impl Vsctl {
    /// Creates a record and returns its handle.
    pub async fn create(&self, table: Table, fields: &[Field]) -> OvsResult<String> {
        let mut args = vec!["create".to_string(), table.to_string()];
        args.extend(render(fields));
        let command = args.join(" ");

        let output = self.exec(args).await?;
        let handle = output.trim();
        if handle.is_empty() {
            return Err(OvsError::malformed(command, output, "no record handle"));
        }
        if Uuid::parse_str(handle).is_err() {
            return Err(OvsError::malformed(
                command,
                handle,
                "record handle is not a UUID",
            ));
        }
        debug!(table = %table, handle = %handle, "Created record");
        Ok(handle.to_string())
    }

    /// Overwrites columns (or single map keys) of a record.
    pub async fn set(&self, table: Table, record: &str, fields: &[Field]) -> OvsResult<()> {
        if fields.is_empty() {
            return Ok(());
        }
        let mut args = vec!["set".to_string(), table.to_string(), record.to_string()];
        args.extend(render(fields));
        self.exec(args).await.map(|_| ())
    }

    /// Appends values to a set column, or `key=value` pairs to a map column.
    pub async fn add(
        &self,
        table: Table,
        record: &str,
        column: &str,
        values: &[String],
    ) -> OvsResult<()> {
        let mut args = vec![
            "add".to_string(),
            table.to_string(),
            record.to_string(),
            column.to_string(),
        ];
        args.extend(values.iter().cloned());
        self.exec(args).await.map(|_| ())
    }

    /// Removes set elements, or map entries by key, from a column.
    pub async fn remove(
        &self,
        table: Table,
        record: &str,
        column: &str,
        values: &[String],
    ) -> OvsResult<()> {
        if values.is_empty() {
            return Ok(());
        }
        let mut args = vec![
            "--if-exists".to_string(),
            "remove".to_string(),
            table.to_string(),
            record.to_string(),
            column.to_string(),
        ];
        args.extend(values.iter().cloned());
        self.exec(args).await.map(|_| ())
    }

    /// Empties columns without deleting the record. Absent records are ignored.
    pub async fn clear(&self, table: Table, record: &str, columns: &[&str]) -> OvsResult<()> {
        let mut args = vec![
            "--if-exists".to_string(),
            "clear".to_string(),
            table.to_string(),
            record.to_string(),
        ];
        args.extend(columns.iter().map(|c| c.to_string()));
        self.exec(args).await.map(|_| ())
    }

    /// Deletes a record. Destroying an absent record is success.
    pub async fn destroy(&self, table: Table, record: &str) -> OvsResult<()> {
        self.exec(["--if-exists", "destroy", table.as_str(), record])
            .await?;
        debug!(table = %table, record = %record, "Destroyed record");
        Ok(())
    }

    /// Returns the unquoted values of `column` for every matching record.
    ///
    /// No match is an empty vector, not an error. Records whose value is an
    /// empty string are skipped.
    pub async fn find(
        &self,
        table: Table,
        column: &str,
        conditions: &[Condition],
    ) -> OvsResult<Vec<String>> {
        let output = self.find_raw(table, &[column], conditions).await?;
        Ok(parse_rows(&output)
            .iter()
            .map(|row| unquote(row))
            .filter(|v| !v.is_empty())
            .collect())
    }

    /// Returns the raw column values of every matching record, one vector
    /// per record in `columns` order.
    pub async fn find_columns(
        &self,
        table: Table,
        columns: &[&str],
        conditions: &[Condition],
    ) -> OvsResult<Vec<Vec<String>>> {
        let output = self.find_raw(table, columns, conditions).await?;
        let command = format!("find {} --columns={}", table, columns.join(","));

        parse_records(&output)
            .into_iter()
            .map(|record| {
                if record.len() == columns.len() {
                    Ok(record)
                } else {
                    Err(OvsError::malformed(
                        command.clone(),
                        record.join("\n"),
                        format!("expected {} columns", columns.len()),
                    ))
                }
            })
            .collect()
    }

    async fn find_raw(
        &self,
        table: Table,
        columns: &[&str],
        conditions: &[Condition],
    ) -> OvsResult<String> {
        let mut args = vec![
            "--no-heading".to_string(),
            format!("--columns={}", columns.join(",")),
            "find".to_string(),
            table.to_string(),
        ];
        args.extend(render(conditions));
        self.exec(args).await
    }

    /// Reads one column (or map key) of a record.
    ///
    /// An absent record or map key is `NotFound`; the value is returned as
    /// printed by the tool, with string quoting removed.
    pub async fn get(&self, table: Table, record: &str, column: &Column) -> OvsResult<Lookup<String>> {
        let output = self
            .exec([
                "--if-exists".to_string(),
                "get".to_string(),
                table.to_string(),
                record.to_string(),
                column.to_string(),
            ])
            .await?;

        if output.trim().is_empty() {
            Ok(Lookup::NotFound)
        } else {
            Ok(Lookup::Found(unquote(&output)))
        }
    }

    /// Deletes a port and its interfaces from a bridge. `port` may also name
    /// an interface or an interface handle.
    pub async fn del_port(&self, bridge: Option<&str>, port: &str) -> OvsResult<()> {
        let mut args = vec![
            "--if-exists".to_string(),
            "--with-iface".to_string(),
            "del-port".to_string(),
        ];
        if let Some(bridge) = bridge {
            args.push(bridge.to_string());
        }
        args.push(port.to_string());
        self.exec(args).await?;
        debug!(port = %port, "Deleted port");
        Ok(())
    }

    /// Convenience for `set` with a single field.
    pub async fn set_field(&self, table: Table, record: &str, field: Field) -> OvsResult<()> {
        self.set(table, record, std::slice::from_ref(&field)).await
    }

    /// Convenience for pointing a reference column at a handle.
    pub async fn set_ref(&self, table: Table, record: &str, column: &str, handle: &str) -> OvsResult<()> {
        self.set_field(table, record, Field::new(column, Atom::uuid(handle)))
            .await
    }
}
