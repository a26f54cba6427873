//! Rouse filter evaluator: declarative path+operator+literal predicates
//! applied to event payloads.
//!
//! A filter expression has the shape `<dotted.path><op><literal>`, e.g.
//! `metadata.name==my-resource`. Filters are ANDed: a payload passes only if
//! every filter resolves to an existing value satisfying its comparison.

#![forbid(unsafe_code)]

use rouse_core::{Error, Result};
use serde_json::Value;
use smallvec::SmallVec;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    Eq,
    Ne,
}

/// One parsed predicate over a dotted path into a payload tree.
#[derive(Debug, Clone)]
pub struct Filter {
    path: Vec<String>,
    op: Op,
    literal: Value,
}

impl Filter {
    /// Parse a single `<dotted.path><op><literal>` expression.
    pub fn parse(expr: &str) -> Result<Filter> {
        let (idx, op) = match (expr.find("=="), expr.find("!=")) {
            (Some(e), Some(n)) if n < e => (n, Op::Ne),
            (Some(e), _) => (e, Op::Eq),
            (None, Some(n)) => (n, Op::Ne),
            (None, None) => {
                return Err(Error::Filter(format!("missing operator in filter {expr:?}")));
            }
        };
        let (raw_path, rest) = expr.split_at(idx);
        let raw_literal = rest[2..].trim();
        let raw_path = raw_path.trim();
        if raw_path.is_empty() {
            return Err(Error::Filter(format!("empty path in filter {expr:?}")));
        }
        if raw_literal.is_empty() {
            return Err(Error::Filter(format!("empty literal in filter {expr:?}")));
        }
        let path: Vec<String> = raw_path.split('.').map(str::to_string).collect();
        if path.iter().any(String::is_empty) {
            return Err(Error::Filter(format!("empty path segment in filter {expr:?}")));
        }
        // Literals that parse as JSON scalars compare typed; anything else is
        // taken as a bare string.
        let literal = match serde_json::from_str::<Value>(raw_literal) {
            Ok(v) if !v.is_object() => v,
            _ => Value::String(raw_literal.to_string()),
        };
        Ok(Filter { path, op, literal })
    }

    /// Whether some value addressed by the filter's path exists in `payload`
    /// and satisfies the comparison. Arrays along the path are searched
    /// element-wise without consuming a path segment.
    pub fn matches(&self, payload: &Value) -> bool {
        walk(payload, &self.path, self.op, &self.literal)
    }
}

fn walk(value: &Value, path: &[String], op: Op, literal: &Value) -> bool {
    if path.is_empty() {
        return match op {
            Op::Eq => scalar_eq(value, literal),
            Op::Ne => !scalar_eq(value, literal),
        };
    }
    match value {
        Value::Object(map) => map
            .get(&path[0])
            .is_some_and(|v| walk(v, &path[1..], op, literal)),
        Value::Array(items) => items.iter().any(|v| walk(v, path, op, literal)),
        _ => false,
    }
}

fn scalar_eq(value: &Value, literal: &Value) -> bool {
    if value == literal {
        return true;
    }
    // A bare literal like `3` parses as a number but may address a string
    // field (or vice versa); fall back to rendered comparison.
    match (value, literal) {
        (Value::String(s), l) if !l.is_string() => *s == l.to_string(),
        (v, Value::String(s)) if !v.is_string() => v.to_string() == *s,
        _ => false,
    }
}

/// Evaluate a payload against an ordered set of filter expressions.
///
/// Empty set always passes. All expressions are parsed up front so a
/// malformed filter is reported regardless of where evaluation would have
/// stopped; evaluation itself short-circuits on the first non-match and
/// returns `Ok(false)` (a non-match, not a fault). Pure over its arguments.
pub fn evaluate(payload: &Value, filters: &[String]) -> Result<bool> {
    let parsed: SmallVec<[Filter; 4]> = filters
        .iter()
        .map(|f| Filter::parse(f))
        .collect::<Result<_>>()?;
    for filter in &parsed {
        if !filter.matches(payload) {
            return Ok(false);
        }
    }
    Ok(true)
}
