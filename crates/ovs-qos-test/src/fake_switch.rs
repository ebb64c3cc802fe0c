//! In-memory switch daemon driven through the `ovs-vsctl` command line.
//!
//! [`FakeVswitchd`] implements [`CommandRunner`], so it can be handed to a
//! [`ovs_vsctl::Vsctl`] in place of the real tool. It interprets the subset
//! of commands the QoS manager emits (`create`, `set`, `add`, `remove`,
//! `clear`, `destroy`, `get`, `find`, `del-port`) against a small table
//! store, prints results in the tool's list format and enforces the
//! referential integrity rules the real database enforces:
//!
//! - a reference column may only point at an existing row
//! - a row that is still referenced cannot be destroyed
//!
//! Each command runs against a scratch copy of the store and is committed
//! only on success, so a failed command leaves no partial changes.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::debug;
use uuid::Uuid;

use ovs_vsctl::{parse_map, parse_set, unquote, Atom, CommandRunner, ExecResult, OvsResult};

use crate::fixtures::PortSpec;

/// A stored column value.
#[derive(Debug, Clone, PartialEq)]
pub enum Datum {
    Atom(String),
    Set(Vec<String>),
    Map(BTreeMap<String, String>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Kind {
    Atom,
    Set,
    Map,
}

fn column_kind(column: &str) -> Kind {
    match column {
        "external_ids" | "other_config" | "queues" | "options" | "status" | "statistics" => {
            Kind::Map
        }
        "interfaces" | "ports" | "mirrors" | "select_src_port" | "select_dst_port" | "trunks" => {
            Kind::Set
        }
        _ => Kind::Atom,
    }
}

/// Reference columns and the table they point into.
fn reference_target(table: &str, column: &str) -> Option<&'static str> {
    match (table, column) {
        ("bridge", "ports") => Some("port"),
        ("bridge", "mirrors") => Some("mirror"),
        ("port", "interfaces") => Some("interface"),
        ("port", "qos") => Some("qos"),
        ("qos", "queues") => Some("queue"),
        ("mirror", "select_src_port") | ("mirror", "select_dst_port") => Some("port"),
        _ => None,
    }
}

fn normalize_table(table: &str) -> String {
    table.to_ascii_lowercase()
}

fn normalize_column(column: &str) -> String {
    column.replace('-', "_")
}

fn format_atom(value: &str) -> String {
    Atom::str(value).to_string()
}

/// One record of a table.
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    pub uuid: String,
    pub columns: BTreeMap<String, Datum>,
}

impl Row {
    fn new() -> Self {
        Self {
            uuid: Uuid::new_v4().to_string(),
            columns: BTreeMap::new(),
        }
    }

    /// Returns a scalar column.
    pub fn atom(&self, column: &str) -> Option<&str> {
        match self.columns.get(column) {
            Some(Datum::Atom(v)) => Some(v),
            _ => None,
        }
    }

    /// Returns the `name` column.
    pub fn name(&self) -> Option<&str> {
        self.atom("name")
    }

    /// Returns a set column, empty when unset.
    pub fn set(&self, column: &str) -> Vec<String> {
        match self.columns.get(column) {
            Some(Datum::Set(items)) => items.clone(),
            _ => Vec::new(),
        }
    }

    /// Returns a map column, empty when unset.
    pub fn map(&self, column: &str) -> BTreeMap<String, String> {
        match self.columns.get(column) {
            Some(Datum::Map(map)) => map.clone(),
            _ => BTreeMap::new(),
        }
    }

    /// Returns one key of a map column.
    pub fn map_value(&self, column: &str, key: &str) -> Option<&str> {
        match self.columns.get(column) {
            Some(Datum::Map(map)) => map.get(key).map(String::as_str),
            _ => None,
        }
    }

    fn references(&self, column: &str) -> Vec<String> {
        match self.columns.get(column) {
            Some(Datum::Atom(v)) => vec![v.clone()],
            Some(Datum::Set(items)) => items.clone(),
            Some(Datum::Map(map)) => map.values().cloned().collect(),
            None => Vec::new(),
        }
    }

    fn render(&self, column: &str) -> String {
        if column == "_uuid" {
            return self.uuid.clone();
        }
        match self.columns.get(column) {
            Some(Datum::Atom(v)) => format_atom(v),
            Some(Datum::Set(items)) => format!(
                "[{}]",
                items.iter().map(|i| format_atom(i)).collect::<Vec<_>>().join(", ")
            ),
            Some(Datum::Map(map)) => format!(
                "{{{}}}",
                map.iter()
                    .map(|(k, v)| format!("{}={}", format_atom(k), format_atom(v)))
                    .collect::<Vec<_>>()
                    .join(", ")
            ),
            None if column_kind(column) == Kind::Map => "{}".to_string(),
            None => "[]".to_string(),
        }
    }

    fn values_of(&self, column: &str, key: Option<&str>) -> Vec<String> {
        if column == "_uuid" {
            return vec![self.uuid.clone()];
        }
        match (self.columns.get(column), key) {
            (Some(Datum::Map(map)), Some(key)) => map.get(key).cloned().into_iter().collect(),
            (Some(Datum::Map(map)), None) => {
                map.iter().map(|(k, v)| format!("{}={}", k, v)).collect()
            }
            (Some(Datum::Atom(v)), None) => vec![v.clone()],
            (Some(Datum::Set(items)), None) => items.clone(),
            _ => Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Default)]
struct Database {
    tables: BTreeMap<String, Vec<Row>>,
}

impl Database {
    fn rows(&self, table: &str) -> &[Row] {
        self.tables.get(table).map(Vec::as_slice).unwrap_or(&[])
    }

    fn position(&self, table: &str, record: &str) -> Option<usize> {
        self.rows(table)
            .iter()
            .position(|row| row.uuid == record || row.name() == Some(record))
    }

    fn row_mut(&mut self, table: &str, index: usize) -> &mut Row {
        &mut self.tables.entry(table.to_string()).or_default()[index]
    }

    fn require(&self, table: &str, record: &str) -> Result<usize, String> {
        self.position(table, record)
            .ok_or_else(|| format!("no row \"{}\" in table {}", record, table))
    }

    fn insert(&mut self, table: &str, row: Row) -> String {
        let uuid = row.uuid.clone();
        self.tables.entry(table.to_string()).or_default().push(row);
        uuid
    }

    fn referrers(&self, table: &str, uuid: &str) -> usize {
        let mut count = 0;
        for (source, rows) in &self.tables {
            for row in rows {
                for column in row.columns.keys() {
                    if reference_target(source, column) == Some(table) {
                        count += row.references(column).iter().filter(|r| *r == uuid).count();
                    }
                }
            }
        }
        count
    }

    fn validate_refs(&self, table: &str, column: &str, values: &[String]) -> Result<(), String> {
        if let Some(target) = reference_target(table, column) {
            for value in values {
                if !self.rows(target).iter().any(|row| &row.uuid == value) {
                    return Err(format!("no row \"{}\" in table {}", value, target));
                }
            }
        }
        Ok(())
    }

    /// Applies `column[:key]=value` to one row.
    fn assign(&mut self, table: &str, index: usize, assignment: &str) -> Result<(), String> {
        let eq = assignment
            .find('=')
            .ok_or_else(|| format!("{}: argument does not end in \"=\" followed by a value", assignment))?;
        let (lhs, raw) = (&assignment[..eq], &assignment[eq + 1..]);
        let (column, key) = match lhs.split_once(':') {
            Some((c, k)) => (normalize_column(c), Some(unquote(k))),
            None => (normalize_column(lhs), None),
        };
        let raw = raw.trim();

        let datum = match (column_kind(&column), key) {
            (Kind::Map, Some(key)) => {
                let value = unquote(raw);
                self.validate_refs(table, &column, std::slice::from_ref(&value))?;
                let mut map = self.rows(table)[index].map(&column);
                map.insert(key, value);
                Some(Datum::Map(map))
            }
            (Kind::Map, None) => {
                let map = if raw == "[]" {
                    BTreeMap::new()
                } else {
                    parse_map(raw).ok_or_else(|| format!("{}: not a map value", raw))?
                };
                let values: Vec<String> = map.values().cloned().collect();
                self.validate_refs(table, &column, &values)?;
                Some(Datum::Map(map))
            }
            (_, Some(_)) => return Err(format!("cannot specify key to set for non-map column {}", column)),
            (Kind::Set, None) => {
                let items = parse_set(raw);
                self.validate_refs(table, &column, &items)?;
                Some(Datum::Set(items))
            }
            (Kind::Atom, None) if raw == "[]" => None,
            (Kind::Atom, None) => {
                let value = unquote(raw);
                self.validate_refs(table, &column, std::slice::from_ref(&value))?;
                Some(Datum::Atom(value))
            }
        };

        let row = self.row_mut(table, index);
        match datum {
            Some(datum) => {
                row.columns.insert(column, datum);
            }
            None => {
                row.columns.remove(&column);
            }
        }
        Ok(())
    }
}

#[derive(Debug, Default)]
struct Options {
    if_exists: bool,
    with_iface: bool,
    columns: Option<Vec<String>>,
}

#[derive(Debug)]
struct Condition {
    column: String,
    key: Option<String>,
    negated: bool,
    expected: Vec<String>,
}

impl Condition {
    fn parse(arg: &str) -> Result<Self, String> {
        let eq = arg
            .find('=')
            .ok_or_else(|| format!("{}: missing comparison operator", arg))?;
        let (lhs, negated) = match arg[..eq].strip_suffix('!') {
            Some(lhs) => (lhs, true),
            None => (&arg[..eq], false),
        };
        let (column, key) = match lhs.split_once(':') {
            Some((c, k)) => (normalize_column(c), Some(unquote(k))),
            None => (normalize_column(lhs), None),
        };
        let raw = arg[eq + 1..].trim();
        let mut expected = if raw.starts_with('[') {
            parse_set(raw)
        } else {
            vec![unquote(raw)]
        };
        expected.sort();
        Ok(Self {
            column,
            key,
            negated,
            expected,
        })
    }

    fn matches(&self, row: &Row) -> bool {
        let mut actual = row.values_of(&self.column, self.key.as_deref());
        actual.sort();
        (actual == self.expected) != self.negated
    }
}

type CommandResult = Result<String, String>;

/// In-memory `ovs-vswitchd` for tests.
#[derive(Debug, Default)]
pub struct FakeVswitchd {
    db: Mutex<Database>,
    calls: Mutex<Vec<Vec<String>>>,
    failures: Mutex<Vec<(String, usize)>>,
    latency: Mutex<Option<Duration>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl FakeVswitchd {
    /// Creates an empty switch.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Creates a switch with an integration bridge named `bridge`.
    pub fn with_bridge(bridge: &str) -> Arc<Self> {
        let switch = Self::new();
        switch.add_bridge(bridge);
        switch
    }

    /// Adds a bridge and returns its handle.
    pub fn add_bridge(&self, name: &str) -> String {
        let mut row = Row::new();
        row.columns
            .insert("name".to_string(), Datum::Atom(name.to_string()));
        self.db.lock().insert("bridge", row)
    }

    /// Adds a port with one interface to `bridge`, creating the bridge if
    /// needed, and returns the port handle.
    pub fn add_port(&self, bridge: &str, spec: &PortSpec) -> String {
        if self.row("bridge", bridge).is_none() {
            self.add_bridge(bridge);
        }
        let mut db = self.db.lock();

        let mut iface = Row::new();
        iface
            .columns
            .insert("name".to_string(), Datum::Atom(spec.name.clone()));
        if let Some(kind) = &spec.iface_type {
            iface.columns.insert("type".to_string(), Datum::Atom(kind.clone()));
        }
        if let Some(ofport) = spec.ofport {
            iface
                .columns
                .insert("ofport".to_string(), Datum::Atom(ofport.to_string()));
        }
        if let Some(error) = &spec.error {
            iface.columns.insert("error".to_string(), Datum::Atom(error.clone()));
        }
        if !spec.external_ids.is_empty() {
            iface.columns.insert(
                "external_ids".to_string(),
                Datum::Map(spec.external_ids.clone()),
            );
        }
        let iface_uuid = db.insert("interface", iface);

        let mut port = Row::new();
        port.columns
            .insert("name".to_string(), Datum::Atom(spec.name.clone()));
        port.columns
            .insert("interfaces".to_string(), Datum::Set(vec![iface_uuid]));
        if !spec.port_external_ids.is_empty() {
            port.columns.insert(
                "external_ids".to_string(),
                Datum::Map(spec.port_external_ids.clone()),
            );
        }
        let port_uuid = db.insert("port", port);

        if let Some(index) = db.position("bridge", bridge) {
            let row = db.row_mut("bridge", index);
            let mut ports = row.set("ports");
            ports.push(port_uuid.clone());
            row.columns.insert("ports".to_string(), Datum::Set(ports));
        }
        port_uuid
    }

    /// Adds a mirror named `name` to `bridge` and returns its handle.
    pub fn add_mirror(&self, bridge: &str, name: &str) -> String {
        let mut db = self.db.lock();
        let mut row = Row::new();
        row.columns
            .insert("name".to_string(), Datum::Atom(name.to_string()));
        let uuid = db.insert("mirror", row);
        if let Some(index) = db.position("bridge", bridge) {
            let row = db.row_mut("bridge", index);
            let mut mirrors = row.set("mirrors");
            mirrors.push(uuid.clone());
            row.columns.insert("mirrors".to_string(), Datum::Set(mirrors));
        }
        uuid
    }

    /// Runs a command without recording it, for seeding state.
    pub fn apply(&self, args: &[&str]) -> CommandResult {
        let args: Vec<String> = args.iter().map(|a| a.to_string()).collect();
        self.dispatch(&args)
    }

    /// Returns a snapshot of every row of `table`.
    pub fn rows(&self, table: &str) -> Vec<Row> {
        self.db.lock().rows(&normalize_table(table)).to_vec()
    }

    /// Returns a row by handle or name.
    pub fn row(&self, table: &str, record: &str) -> Option<Row> {
        let table = normalize_table(table);
        let db = self.db.lock();
        db.position(&table, record).map(|i| db.rows(&table)[i].clone())
    }

    /// Returns the number of rows in `table`.
    pub fn count(&self, table: &str) -> usize {
        self.db.lock().rows(&normalize_table(table)).len()
    }

    /// Returns every command received so far.
    pub fn calls(&self) -> Vec<Vec<String>> {
        self.calls.lock().clone()
    }

    /// Counts received commands whose verb is `command`.
    pub fn count_calls(&self, command: &str) -> usize {
        self.calls
            .lock()
            .iter()
            .filter(|args| verb(args) == Some(command))
            .count()
    }

    pub fn clear_calls(&self) {
        self.calls.lock().clear();
    }

    /// Makes the next `times` commands with verb `command` fail.
    pub fn fail_command(&self, command: &str, times: usize) {
        self.failures.lock().push((command.to_string(), times));
    }

    /// Delays every command by `latency`.
    pub fn set_latency(&self, latency: Duration) {
        *self.latency.lock() = Some(latency);
    }

    /// Highest number of commands observed running at once.
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    fn take_failure(&self, args: &[String]) -> bool {
        let Some(command) = verb(args) else {
            return false;
        };
        let mut failures = self.failures.lock();
        for (name, remaining) in failures.iter_mut() {
            if name == command && *remaining > 0 {
                *remaining -= 1;
                return true;
            }
        }
        false
    }

    fn execute(&self, args: &[String]) -> ExecResult {
        self.calls.lock().push(args.to_vec());
        if self.take_failure(args) {
            return ExecResult::failed(1, "ovs-vsctl: transaction error: injected failure");
        }
        match self.dispatch(args) {
            Ok(stdout) => ExecResult::ok(stdout),
            Err(message) => {
                debug!(command = %args.join(" "), error = %message, "Fake switch rejected command");
                ExecResult::failed(1, format!("ovs-vsctl: {}", message))
            }
        }
    }

    fn dispatch(&self, args: &[String]) -> CommandResult {
        let mut opts = Options::default();
        let mut rest = args;
        while let Some((first, tail)) = rest.split_first() {
            if !first.starts_with("--") {
                break;
            }
            match first.as_str() {
                "--if-exists" => opts.if_exists = true,
                "--with-iface" => opts.with_iface = true,
                "--no-heading" => {}
                flag if flag.starts_with("--timeout=") => {}
                flag if flag.starts_with("--columns=") => {
                    let list = &flag["--columns=".len()..];
                    opts.columns = Some(list.split(',').map(normalize_column).collect());
                }
                flag => return Err(format!("unrecognized option '{}'", flag)),
            }
            rest = tail;
        }
        let (command, rest) = rest
            .split_first()
            .ok_or_else(|| "missing command name".to_string())?;

        let mut db = self.db.lock();
        let mut scratch = db.clone();
        let output = match command.as_str() {
            "create" => cmd_create(&mut scratch, rest),
            "set" => cmd_set(&mut scratch, &opts, rest),
            "add" => cmd_add(&mut scratch, &opts, rest),
            "remove" => cmd_remove(&mut scratch, &opts, rest),
            "clear" => cmd_clear(&mut scratch, &opts, rest),
            "destroy" => cmd_destroy(&mut scratch, &opts, rest),
            "get" => cmd_get(&scratch, &opts, rest),
            "find" => cmd_find(&scratch, &opts, rest),
            "del-port" => cmd_del_port(&mut scratch, &opts, rest),
            other => Err(format!("unknown command '{}'", other)),
        }?;
        *db = scratch;
        Ok(output)
    }
}

fn verb(args: &[String]) -> Option<&str> {
    args.iter()
        .map(String::as_str)
        .find(|arg| !arg.starts_with("--"))
}

fn table_arg(args: &[String]) -> Result<String, String> {
    args.first()
        .map(|t| normalize_table(t))
        .ok_or_else(|| "missing table name".to_string())
}

fn cmd_create(db: &mut Database, args: &[String]) -> CommandResult {
    let table = table_arg(args)?;
    let uuid = db.insert(&table, Row::new());
    let index = db.rows(&table).len() - 1;
    for assignment in &args[1..] {
        db.assign(&table, index, assignment)?;
    }
    Ok(uuid)
}

fn cmd_set(db: &mut Database, opts: &Options, args: &[String]) -> CommandResult {
    let table = table_arg(args)?;
    let record = args.get(1).ok_or("missing record")?;
    let index = match db.position(&table, record) {
        Some(index) => index,
        None if opts.if_exists => return Ok(String::new()),
        None => return Err(format!("no row \"{}\" in table {}", record, table)),
    };
    for assignment in &args[2..] {
        db.assign(&table, index, assignment)?;
    }
    Ok(String::new())
}

fn cmd_add(db: &mut Database, opts: &Options, args: &[String]) -> CommandResult {
    let table = table_arg(args)?;
    let record = args.get(1).ok_or("missing record")?;
    let column = normalize_column(args.get(2).ok_or("missing column")?);
    let index = match db.position(&table, record) {
        Some(index) => index,
        None if opts.if_exists => return Ok(String::new()),
        None => return Err(format!("no row \"{}\" in table {}", record, table)),
    };
    let values = &args[3..];

    let datum = match column_kind(&column) {
        Kind::Map => {
            let mut map = db.rows(&table)[index].map(&column);
            for value in values {
                let (k, v) = value
                    .split_once('=')
                    .ok_or_else(|| format!("{}: map value must be key=value", value))?;
                let v = unquote(v);
                db.validate_refs(&table, &column, std::slice::from_ref(&v))?;
                map.entry(unquote(k)).or_insert(v);
            }
            Datum::Map(map)
        }
        Kind::Set => {
            let mut items = db.rows(&table)[index].set(&column);
            for value in values {
                let v = unquote(value);
                db.validate_refs(&table, &column, std::slice::from_ref(&v))?;
                if !items.contains(&v) {
                    items.push(v);
                }
            }
            Datum::Set(items)
        }
        Kind::Atom => {
            let [value] = values else {
                return Err(format!("\"{}\" column {} can hold only one value", table, column));
            };
            let v = unquote(value);
            match db.rows(&table)[index].atom(&column) {
                Some(current) if current != v => {
                    return Err(format!("\"{}\" column {} already has a value", table, column))
                }
                _ => {}
            }
            db.validate_refs(&table, &column, std::slice::from_ref(&v))?;
            Datum::Atom(v)
        }
    };
    db.row_mut(&table, index).columns.insert(column, datum);
    Ok(String::new())
}

fn cmd_remove(db: &mut Database, opts: &Options, args: &[String]) -> CommandResult {
    let table = table_arg(args)?;
    let record = args.get(1).ok_or("missing record")?;
    let column = normalize_column(args.get(2).ok_or("missing column")?);
    let index = match db.position(&table, record) {
        Some(index) => index,
        None if opts.if_exists => return Ok(String::new()),
        None => return Err(format!("no row \"{}\" in table {}", record, table)),
    };
    let values = &args[3..];
    let row = db.row_mut(&table, index);

    match column_kind(&column) {
        Kind::Map => {
            let mut map = row.map(&column);
            for value in values {
                match value.split_once('=') {
                    Some((k, v)) => {
                        let k = unquote(k);
                        if map.get(&k) == Some(&unquote(v)) {
                            map.remove(&k);
                        }
                    }
                    None => {
                        map.remove(&unquote(value));
                    }
                }
            }
            row.columns.insert(column, Datum::Map(map));
        }
        Kind::Set => {
            let mut items = row.set(&column);
            for value in values {
                let v = unquote(value);
                items.retain(|item| *item != v);
            }
            row.columns.insert(column, Datum::Set(items));
        }
        Kind::Atom => {
            if values
                .iter()
                .any(|v| row.atom(&column) == Some(unquote(v).as_str()))
            {
                row.columns.remove(&column);
            }
        }
    }
    Ok(String::new())
}

fn cmd_clear(db: &mut Database, opts: &Options, args: &[String]) -> CommandResult {
    let table = table_arg(args)?;
    let record = args.get(1).ok_or("missing record")?;
    let index = match db.position(&table, record) {
        Some(index) => index,
        None if opts.if_exists => return Ok(String::new()),
        None => return Err(format!("no row \"{}\" in table {}", record, table)),
    };
    let row = db.row_mut(&table, index);
    for column in &args[2..] {
        row.columns.remove(&normalize_column(column));
    }
    Ok(String::new())
}

fn cmd_destroy(db: &mut Database, opts: &Options, args: &[String]) -> CommandResult {
    let table = table_arg(args)?;
    for record in &args[1..] {
        let index = match db.position(&table, record) {
            Some(index) => index,
            None if opts.if_exists => continue,
            None => return Err(format!("no row \"{}\" in table {}", record, table)),
        };
        let uuid = db.rows(&table)[index].uuid.clone();
        let refs = db.referrers(&table, &uuid);
        if refs > 0 {
            return Err(format!(
                "transaction error: referential integrity violation: cannot delete {} row {} because of {} remaining reference(s)",
                table, uuid, refs
            ));
        }
        db.tables.entry(table.clone()).or_default().remove(index);
    }
    Ok(String::new())
}

fn cmd_get(db: &Database, opts: &Options, args: &[String]) -> CommandResult {
    let table = table_arg(args)?;
    let record = args.get(1).ok_or("missing record")?;
    let index = match db.position(&table, record) {
        Some(index) => index,
        None if opts.if_exists => return Ok(String::new()),
        None => return Err(format!("no row \"{}\" in table {}", record, table)),
    };
    let row = &db.rows(&table)[index];

    let mut lines = Vec::new();
    for spec in &args[2..] {
        match spec.split_once(':') {
            Some((column, key)) => {
                let column = normalize_column(column);
                let key = unquote(key);
                match row.map_value(&column, &key) {
                    Some(value) => lines.push(format_atom(value)),
                    None if opts.if_exists => {}
                    None => {
                        return Err(format!(
                            "no key \"{}\" in {} record \"{}\" column {}",
                            key, table, record, column
                        ))
                    }
                }
            }
            None => lines.push(row.render(&normalize_column(spec))),
        }
    }
    Ok(lines.join("\n"))
}

fn cmd_find(db: &Database, opts: &Options, args: &[String]) -> CommandResult {
    let table = table_arg(args)?;
    let conditions = args[1..]
        .iter()
        .map(|arg| Condition::parse(arg))
        .collect::<Result<Vec<_>, _>>()?;
    let columns = opts
        .columns
        .clone()
        .unwrap_or_else(|| vec!["_uuid".to_string()]);

    let records: Vec<String> = db
        .rows(&table)
        .iter()
        .filter(|row| conditions.iter().all(|c| c.matches(row)))
        .map(|row| {
            columns
                .iter()
                .map(|c| row.render(c))
                .collect::<Vec<_>>()
                .join("\n")
        })
        .collect();
    Ok(records.join("\n\n"))
}

fn cmd_del_port(db: &mut Database, opts: &Options, args: &[String]) -> CommandResult {
    let (bridge, target) = match args {
        [port] => (None, port),
        [bridge, port] => (Some(bridge), port),
        _ => return Err("del-port requires 1 or 2 arguments".to_string()),
    };

    let mut index = db.position("port", target);
    if index.is_none() && opts.with_iface {
        if let Some(iface) = db.position("interface", target) {
            let iface_uuid = db.rows("interface")[iface].uuid.clone();
            index = db
                .rows("port")
                .iter()
                .position(|p| p.set("interfaces").contains(&iface_uuid));
        }
    }
    let Some(index) = index else {
        return if opts.if_exists {
            Ok(String::new())
        } else {
            Err(format!("no port named {}", target))
        };
    };
    let port_uuid = db.rows("port")[index].uuid.clone();

    if let Some(bridge) = bridge {
        let owner = db.require("bridge", bridge)?;
        if !db.rows("bridge")[owner].set("ports").contains(&port_uuid) {
            return Err(format!("bridge {} does not have a port {}", bridge, target));
        }
    }

    let port = db.tables.entry("port".to_string()).or_default().remove(index);
    for iface in port.set("interfaces") {
        db.tables
            .entry("interface".to_string())
            .or_default()
            .retain(|row| row.uuid != iface);
    }
    for (table, column) in [
        ("bridge", "ports"),
        ("mirror", "select_src_port"),
        ("mirror", "select_dst_port"),
    ] {
        for row in db.tables.entry(table.to_string()).or_default().iter_mut() {
            if let Some(Datum::Set(items)) = row.columns.get_mut(column) {
                items.retain(|item| *item != port_uuid);
            }
        }
    }
    Ok(String::new())
}

#[async_trait]
impl CommandRunner for FakeVswitchd {
    async fn run(&self, args: &[String]) -> OvsResult<ExecResult> {
        let running = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(running, Ordering::SeqCst);

        let latency = *self.latency.lock();
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
        let result = self.execute(args);

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        Ok(result)
    }
}
