//! Parsers for `ovs-vsctl` output.
//!
//! `find --no-heading --columns=a,b` prints one line per column and
//! separates records with a blank line. Values use the tool's data syntax:
//! strings are quoted only when needed, maps print as `{k=v, k2="x/y"}`
//! and sets as `[a, b]`.

use std::collections::BTreeMap;

/// Splits output into non-blank, trimmed lines, preserving order.
pub fn parse_rows(text: &str) -> Vec<String> {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect()
}

/// Splits blank-line separated records into their column lines.
pub fn parse_records(text: &str) -> Vec<Vec<String>> {
    let mut records = Vec::new();
    let mut current = Vec::new();

    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() {
            if !current.is_empty() {
                records.push(std::mem::take(&mut current));
            }
        } else {
            current.push(line.to_string());
        }
    }
    if !current.is_empty() {
        records.push(current);
    }
    records
}

/// Removes the tool's string quoting, leaving bare values untouched.
pub fn unquote(value: &str) -> String {
    let value = value.trim();
    if value.len() >= 2 && value.starts_with('"') && value.ends_with('"') {
        if let Ok(s) = serde_json::from_str::<String>(value) {
            return s;
        }
    }
    value.to_string()
}

/// Returns true for the representations of "no value".
pub fn is_empty_datum(value: &str) -> bool {
    matches!(value.trim(), "" | "[]" | "{}" | "\"\"")
}

/// Splits `a, "b, c", d` on top-level commas, honouring quotes.
fn split_elements(inner: &str) -> Vec<String> {
    let mut parts = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    let mut escaped = false;

    for c in inner.chars() {
        if escaped {
            current.push(c);
            escaped = false;
            continue;
        }
        match c {
            '\\' if in_quotes => {
                current.push(c);
                escaped = true;
            }
            '"' => {
                current.push(c);
                in_quotes = !in_quotes;
            }
            ',' if !in_quotes => {
                parts.push(current.trim().to_string());
                current.clear();
            }
            _ => current.push(c),
        }
    }
    if !current.trim().is_empty() {
        parts.push(current.trim().to_string());
    }
    parts.retain(|p| !p.is_empty());
    parts
}

/// Splits `key=value` at the first `=` outside quotes.
fn split_pair(element: &str) -> Option<(&str, &str)> {
    let mut in_quotes = false;
    let mut escaped = false;
    for (i, c) in element.char_indices() {
        if escaped {
            escaped = false;
            continue;
        }
        match c {
            '\\' if in_quotes => escaped = true,
            '"' => in_quotes = !in_quotes,
            '=' if !in_quotes => return Some((&element[..i], &element[i + 1..])),
            _ => {}
        }
    }
    None
}

/// Parses a map datum such as `{latency="1000", loss="1"}`.
///
/// Returns `None` when the text is not a map.
pub fn parse_map(value: &str) -> Option<BTreeMap<String, String>> {
    let inner = value.trim().strip_prefix('{')?.strip_suffix('}')?;
    let mut map = BTreeMap::new();
    for element in split_elements(inner) {
        let (k, v) = split_pair(&element)?;
        map.insert(unquote(k), unquote(v));
    }
    Some(map)
}

/// Parses a set datum. A bare atom is a one-element set.
pub fn parse_set(value: &str) -> Vec<String> {
    let value = value.trim();
    match value.strip_prefix('[').and_then(|v| v.strip_suffix(']')) {
        Some(inner) => split_elements(inner).iter().map(|e| unquote(e)).collect(),
        None if is_empty_datum(value) => Vec::new(),
        None => vec![unquote(value)],
    }
}
