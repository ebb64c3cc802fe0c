//! Typed addressing of switch table columns.
//!
//! Internally columns and values are tagged types; they are rendered to the
//! `ovs-vsctl` argument syntax only when a command line is built:
//!
//! | Type | Wire form |
//! |------|-----------|
//! | [`Column::Scalar`] | `qos` |
//! | [`Column::Key`] | `external_ids:iface-id` |
//! | [`Field`] | `other_config:latency=1000` |
//! | [`Condition`] | `external_ids:iface-id="eth0"`, `name!=eth1` |

use std::fmt;

use once_cell::sync::Lazy;
use regex::Regex;

/// Strings made only of these characters are passed bare; anything else is
/// quoted so that `/`, `:`, `=`, `,` and whitespace survive the tool's parser.
static BARE_ATOM_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9_.\-]+$").expect("Invalid regex pattern"));

/// Switch tables touched by this workspace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Table {
    Bridge,
    Port,
    Interface,
    Qos,
    Queue,
    Mirror,
}

impl Table {
    /// Returns the table name as the tool expects it.
    pub fn as_str(&self) -> &'static str {
        match self {
            Table::Bridge => "bridge",
            Table::Port => "port",
            Table::Interface => "interface",
            Table::Qos => "qos",
            Table::Queue => "queue",
            Table::Mirror => "mirror",
        }
    }
}

impl fmt::Display for Table {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A column, or one key of a map-valued column.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Column {
    Scalar(String),
    Key(String, String),
}

impl Column {
    /// A whole column.
    pub fn new(name: impl Into<String>) -> Self {
        Column::Scalar(name.into())
    }

    /// One key of a map column, e.g. `external_ids:iface-id`.
    pub fn key(name: impl Into<String>, key: impl Into<String>) -> Self {
        Column::Key(name.into(), key.into())
    }

    /// Returns the column name without the key.
    pub fn name(&self) -> &str {
        match self {
            Column::Scalar(name) | Column::Key(name, _) => name,
        }
    }
}

impl fmt::Display for Column {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Column::Scalar(name) => f.write_str(name),
            Column::Key(name, key) => write!(f, "{}:{}", name, key),
        }
    }
}

impl From<&str> for Column {
    fn from(name: &str) -> Self {
        Column::new(name)
    }
}

/// A single value in the tool's data syntax.
#[derive(Debug, Clone, PartialEq)]
pub enum Atom {
    Str(String),
    Int(i64),
    Real(f64),
    /// A record handle, always passed bare.
    Uuid(String),
    /// The empty set, `[]`.
    Empty,
}

impl Atom {
    pub fn str(value: impl Into<String>) -> Self {
        Atom::Str(value.into())
    }

    pub fn uuid(value: impl Into<String>) -> Self {
        Atom::Uuid(value.into())
    }
}

impl fmt::Display for Atom {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Atom::Str(s) if BARE_ATOM_RE.is_match(s) => f.write_str(s),
            Atom::Str(s) => f.write_str(&quote(s)),
            Atom::Int(n) => write!(f, "{}", n),
            Atom::Real(x) => write!(f, "{}", x),
            Atom::Uuid(u) => f.write_str(u),
            Atom::Empty => f.write_str("[]"),
        }
    }
}

impl From<&str> for Atom {
    fn from(value: &str) -> Self {
        Atom::Str(value.to_string())
    }
}

impl From<String> for Atom {
    fn from(value: String) -> Self {
        Atom::Str(value)
    }
}

impl From<i64> for Atom {
    fn from(value: i64) -> Self {
        Atom::Int(value)
    }
}

/// OVSDB integers are signed 64-bit: values above `i64::MAX` saturate.
impl From<u64> for Atom {
    fn from(value: u64) -> Self {
        Atom::Int(i64::try_from(value).unwrap_or(i64::MAX))
    }
}

impl From<u32> for Atom {
    fn from(value: u32) -> Self {
        Atom::Int(i64::from(value))
    }
}

impl From<f64> for Atom {
    fn from(value: f64) -> Self {
        Atom::Real(value)
    }
}

/// Quotes a string with JSON escaping, which is what `ovs-vsctl` parses.
pub fn quote(s: &str) -> String {
    serde_json::Value::String(s.to_string()).to_string()
}

/// `column[:key]=value`, used by `create` and `set`.
#[derive(Debug, Clone, PartialEq)]
pub struct Field {
    pub column: Column,
    pub value: Atom,
}

impl Field {
    /// Sets a whole column.
    pub fn new(column: impl Into<String>, value: impl Into<Atom>) -> Self {
        Self {
            column: Column::new(column),
            value: value.into(),
        }
    }

    /// Sets one key of a map column.
    pub fn map_entry(
        column: impl Into<String>,
        key: impl Into<String>,
        value: impl Into<Atom>,
    ) -> Self {
        Self {
            column: Column::key(column, key),
            value: value.into(),
        }
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={}", self.column, self.value)
    }
}

/// Comparison used by `find`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    Eq,
    Ne,
}

impl Op {
    pub fn as_str(&self) -> &'static str {
        match self {
            Op::Eq => "=",
            Op::Ne => "!=",
        }
    }
}

/// `column[:key](=|!=)value`, used by `find`.
#[derive(Debug, Clone, PartialEq)]
pub struct Condition {
    pub column: Column,
    pub op: Op,
    pub value: Atom,
}

impl Condition {
    pub fn eq(column: impl Into<Column>, value: impl Into<Atom>) -> Self {
        Self {
            column: column.into(),
            op: Op::Eq,
            value: value.into(),
        }
    }

    pub fn ne(column: impl Into<Column>, value: impl Into<Atom>) -> Self {
        Self {
            column: column.into(),
            op: Op::Ne,
            value: value.into(),
        }
    }

    /// Matches records where the column (or map key) holds any value.
    pub fn present(column: impl Into<Column>) -> Self {
        Self::ne(column, Atom::Empty)
    }
}

impl fmt::Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}{}", self.column, self.op.as_str(), self.value)
    }
}
