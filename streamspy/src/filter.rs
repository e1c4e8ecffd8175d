use std::collections::BTreeMap;
use std::fmt;

use serde_json::Value;

/// Path-addressed constraints selecting matching events.
///
/// Two constraint kinds:
/// - equality: the value at `path` must render to the expected string;
/// - contains: the value at `path` must be an array containing an element
///   that renders to the expected string.
///
/// All entries must hold for an event to match (AND semantics). Paths use
/// dot addressing; numeric segments index arrays and a trailing `#`
/// yields the array length:
///
/// ```rust
/// use streamspy::FilterSet;
///
/// let filters = FilterSet::new()
///     .equals("payload.type", "ORDER_CREATED")
///     .equals("payload.items.0.sku", "A-17")
///     .equals("payload.items.#", "2")
///     .contains("payload.tags", "express");
/// ```
///
/// An empty filter set matches every event with a non-empty payload; an
/// empty payload matches only an empty filter set; a payload that does
/// not parse as JSON never matches a non-empty filter set.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FilterSet {
    equals: BTreeMap<String, String>,
    contains: BTreeMap<String, String>,
}

impl FilterSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Require the value at `path` to equal `expected` in string form.
    pub fn equals(mut self, path: impl Into<String>, expected: impl ToString) -> Self {
        self.equals.insert(path.into(), expected.to_string());
        self
    }

    /// Require the array at `path` to contain an element equal to
    /// `expected` in string form.
    pub fn contains(mut self, path: impl Into<String>, expected: impl ToString) -> Self {
        self.contains.insert(path.into(), expected.to_string());
        self
    }

    /// True if no constraints have been added.
    pub fn is_empty(&self) -> bool {
        self.equals.is_empty() && self.contains.is_empty()
    }

    /// Evaluate this filter set against a raw payload.
    pub fn matches(&self, payload: &[u8]) -> bool {
        if payload.is_empty() {
            return self.is_empty();
        }
        if self.is_empty() {
            return true;
        }

        let Ok(root) = serde_json::from_slice::<Value>(payload) else {
            return false;
        };

        for (path, expected) in &self.equals {
            let Some(resolved) = lookup(&root, path) else {
                return false;
            };
            if !equals_matches(&resolved, expected) {
                return false;
            }
        }

        for (path, expected) in &self.contains {
            let Some(Resolved::Value(value)) = lookup(&root, path) else {
                return false;
            };
            let Value::Array(items) = value else {
                return false;
            };
            if !items.iter().any(|item| value_to_string(item) == *expected) {
                return false;
            }
        }

        true
    }
}

impl fmt::Display for FilterSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{")?;
        let mut first = true;
        for (path, expected) in &self.equals {
            if !first {
                write!(f, ", ")?;
            }
            write!(f, "{path}={expected}")?;
            first = false;
        }
        for (path, expected) in &self.contains {
            if !first {
                write!(f, ", ")?;
            }
            write!(f, "{path} contains {expected}")?;
            first = false;
        }
        write!(f, "}}")
    }
}

enum Resolved<'a> {
    Value(&'a Value),
    Count(usize),
}

/// Resolve a dot path against a JSON value. Numeric segments index
/// arrays; a trailing `#` segment yields the array length.
fn lookup<'a>(root: &'a Value, path: &str) -> Option<Resolved<'a>> {
    let mut current = root;
    let mut segments = path.split('.').peekable();

    while let Some(segment) = segments.next() {
        if segment == "#" && segments.peek().is_none() {
            return match current {
                Value::Array(items) => Some(Resolved::Count(items.len())),
                _ => None,
            };
        }
        current = match current {
            Value::Object(map) => map.get(segment)?,
            Value::Array(items) => {
                let index: usize = segment.parse().ok()?;
                items.get(index)?
            }
            _ => return None,
        };
    }

    Some(Resolved::Value(current))
}

fn equals_matches(resolved: &Resolved<'_>, expected: &str) -> bool {
    match resolved {
        Resolved::Count(count) => count.to_string() == expected,
        Resolved::Value(Value::Array(items)) => arrays_equal_as_multiset(items, expected),
        Resolved::Value(value) => value_to_string(value) == expected,
    }
}

/// When a filter addresses an array, the expected value must be a JSON
/// array literal and the two compare as equal multisets (order ignored,
/// multiplicity respected).
fn arrays_equal_as_multiset(actual: &[Value], expected_json: &str) -> bool {
    let Ok(Value::Array(expected)) = serde_json::from_str::<Value>(expected_json) else {
        return false;
    };
    if actual.len() != expected.len() {
        return false;
    }

    let mut counts: BTreeMap<String, i64> = BTreeMap::new();
    for item in &expected {
        *counts.entry(value_to_string(item)).or_default() += 1;
    }
    for item in actual {
        *counts.entry(value_to_string(item)).or_default() -= 1;
    }
    counts.values().all(|&n| n == 0)
}

/// Resolve a path and render the result in filter string form. `None`
/// when the path does not resolve.
pub(crate) fn lookup_string(root: &Value, path: &str) -> Option<String> {
    match lookup(root, path)? {
        Resolved::Count(count) => Some(count.to_string()),
        Resolved::Value(value) => Some(value_to_string(value)),
    }
}

/// Render a JSON value the way filter expectations are written: strings
/// without quotes, null as the empty string, everything else in compact
/// JSON form.
pub(crate) fn value_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}
