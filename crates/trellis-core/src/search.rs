//! Search parameters: predicates, identity filters, ordering and the page
//! window, shared by list and count execution.

use std::collections::BTreeSet;
use std::fmt;

use serde::Serialize;

use crate::error::{OgmError, Result};
use crate::fields::FieldList;
use crate::types::NodeId;
use crate::value::Value;

pub const DEFAULT_LIMIT: usize = 10;

// ── Predicates ────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "op", content = "value", rename_all = "snake_case")]
pub enum FilterOp {
    Equals(Value),
    NotEquals(Value),
    GreaterThan(Value),
    LessThan(Value),
    StartsWith(String),
    EndsWith(String),
    Contains(String),
}

impl FilterOp {
    /// Evaluate against a stored property; a missing property only matches
    /// `NotEquals`.
    pub fn matches(&self, actual: Option<&Value>) -> bool {
        use std::cmp::Ordering;

        let Some(actual) = actual else {
            return matches!(self, Self::NotEquals(_));
        };
        match self {
            Self::Equals(expected) => actual.compare(expected) == Some(Ordering::Equal) || actual == expected,
            Self::NotEquals(expected) => !(actual.compare(expected) == Some(Ordering::Equal) || actual == expected),
            Self::GreaterThan(bound) => actual.compare(bound) == Some(Ordering::Greater),
            Self::LessThan(bound) => actual.compare(bound) == Some(Ordering::Less),
            Self::StartsWith(prefix) => actual.as_str().is_some_and(|s| s.starts_with(prefix.as_str())),
            Self::EndsWith(suffix) => actual.as_str().is_some_and(|s| s.ends_with(suffix.as_str())),
            Self::Contains(needle) => actual.as_str().is_some_and(|s| s.contains(needle.as_str())),
        }
    }

    fn symbol(&self) -> &'static str {
        match self {
            Self::Equals(_) => "=",
            Self::NotEquals(_) => "!=",
            Self::GreaterThan(_) => ">",
            Self::LessThan(_) => "<",
            Self::StartsWith(_) => "^=",
            Self::EndsWith(_) => "$=",
            Self::Contains(_) => "*=",
        }
    }
}

/// A predicate on a field path. Paths have at most one relationship hop:
/// `name` or `children.name`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Filter {
    pub path: String,
    #[serde(flatten)]
    pub op: FilterOp,
}

const OPERATORS: [&str; 7] = ["!=", "^=", "$=", "*=", "=", ">", "<"];

impl Filter {
    pub fn new(path: impl Into<String>, op: FilterOp) -> Self {
        Self {
            path: path.into(),
            op,
        }
    }

    pub fn equals(path: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::new(path, FilterOp::Equals(value.into()))
    }

    /// Parse `path<op>value`, where op is one of `=`, `!=`, `>`, `<`, `^=`
    /// (starts with), `$=` (ends with) or `*=` (contains). Values may be
    /// double-quoted; unquoted values are read as bool, int or float before
    /// falling back to a string.
    pub fn parse(input: &str) -> Result<Self> {
        let split = input
            .char_indices()
            .find(|(_, c)| "!=<>^$*".contains(*c))
            .map(|(i, _)| i)
            .ok_or_else(|| OgmError::query_parse(input, "missing operator"))?;

        let path = input[..split].trim();
        let rest = &input[split..];
        let op = OPERATORS
            .iter()
            .find(|op| rest.starts_with(*op))
            .ok_or_else(|| OgmError::query_parse(input, "unknown operator"))?;
        let raw = rest[op.len()..].trim();

        if path.is_empty() || !path.split('.').all(is_segment) || path.split('.').count() > 2 {
            return Err(OgmError::query_parse(input, format!("illegal field path \"{path}\"")));
        }
        if raw.is_empty() {
            return Err(OgmError::query_parse(input, "missing value"));
        }
        let value = parse_value(input, raw)?;

        let op = match *op {
            "=" => FilterOp::Equals(value),
            "!=" => FilterOp::NotEquals(value),
            ">" => FilterOp::GreaterThan(value),
            "<" => FilterOp::LessThan(value),
            text_op => {
                let text = value.to_string();
                match text_op {
                    "^=" => FilterOp::StartsWith(text),
                    "$=" => FilterOp::EndsWith(text),
                    _ => FilterOp::Contains(text),
                }
            }
        };
        Ok(Self::new(path, op))
    }

    /// Split into relationship hop and scalar, e.g. `("children", "name")`.
    pub fn hop(&self) -> Option<(&str, &str)> {
        self.path.split_once('.')
    }
}

impl fmt::Display for Filter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let value = match &self.op {
            FilterOp::Equals(v) | FilterOp::NotEquals(v) | FilterOp::GreaterThan(v) | FilterOp::LessThan(v) => {
                match v {
                    Value::String(s) => format!("\"{s}\""),
                    other => other.to_string(),
                }
            }
            FilterOp::StartsWith(s) | FilterOp::EndsWith(s) | FilterOp::Contains(s) => format!("\"{s}\""),
        };
        write!(f, "{}{}{}", self.path, self.op.symbol(), value)
    }
}

fn is_segment(s: &str) -> bool {
    let mut chars = s.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn parse_value(input: &str, raw: &str) -> Result<Value> {
    if let Some(quoted) = raw.strip_prefix('"') {
        return quoted
            .strip_suffix('"')
            .map(Value::from)
            .ok_or_else(|| OgmError::query_parse(input, "unterminated string"));
    }
    if let Ok(b) = raw.parse::<bool>() {
        return Ok(Value::Bool(b));
    }
    if let Ok(i) = raw.parse::<i64>() {
        return Ok(Value::Int(i));
    }
    if let Ok(f) = raw.parse::<f64>() {
        return Ok(Value::Float(f));
    }
    Ok(Value::from(raw))
}

// ── Ordering ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    #[default]
    Asc,
    Desc,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OrderBy {
    pub field: String,
    pub order: SortOrder,
}

// ── Parameters ────────────────────────────────────────────────────

/// Filter state of one search. `Clone` is a deep copy, so a clone can change
/// its window without affecting the original.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchParameter {
    pub filters: Vec<Filter>,
    pub ids: BTreeSet<NodeId>,
    pub uuids: BTreeSet<String>,
    pub order_by: Vec<OrderBy>,
    /// 1-based page number.
    pub page: usize,
    pub limit: usize,
    /// Explicit offset; overrides the page when set.
    pub start: Option<usize>,
    pub count: bool,
    pub fields: Option<FieldList>,
}

impl Default for SearchParameter {
    fn default() -> Self {
        Self::with_limit(DEFAULT_LIMIT)
    }
}

impl SearchParameter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_limit(limit: usize) -> Self {
        Self {
            filters: Vec::new(),
            ids: BTreeSet::new(),
            uuids: BTreeSet::new(),
            order_by: Vec::new(),
            page: 1,
            limit,
            start: None,
            count: false,
            fields: None,
        }
    }

    /// Offset of the first result in the window.
    pub fn offset(&self) -> usize {
        self.start
            .unwrap_or_else(|| self.page.saturating_sub(1).saturating_mul(self.limit))
    }

    pub fn has_identity_filter(&self) -> bool {
        !self.ids.is_empty() || !self.uuids.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn parse_filters() {
        assert_eq!(Filter::parse("name=Rick Sanchez").unwrap(), Filter::equals("name", "Rick Sanchez"));
        assert_eq!(Filter::parse("children.name = \"Morty\"").unwrap(), Filter::equals("children.name", "Morty"));
        assert_eq!(
            Filter::parse("age>13").unwrap().op,
            FilterOp::GreaterThan(Value::Int(13))
        );
        assert_eq!(
            Filter::parse("name^=Sm").unwrap().op,
            FilterOp::StartsWith("Sm".into())
        );
        assert_eq!(Filter::parse("name!=Jerry").unwrap().to_string(), "name!=\"Jerry\"");
        assert_eq!(Filter::parse("children.name=Morty").unwrap().hop(), Some(("children", "name")));
    }

    #[test]
    fn malformed_filters() {
        for input in ["name=", "name", "=Rick", "a.b.c=1", "name=\"Rick", "na me=1"] {
            assert_eq!(Filter::parse(input).unwrap_err().kind(), ErrorKind::QueryParse, "{input}");
        }
    }

    #[test]
    fn ops_match_stored_values() {
        let rick = Value::from("Rick Sanchez");
        assert!(FilterOp::Equals(Value::from("Rick Sanchez")).matches(Some(&rick)));
        assert!(!FilterOp::Equals(Value::from("rick sanchez")).matches(Some(&rick)));
        assert!(FilterOp::EndsWith("Sanchez".into()).matches(Some(&rick)));
        assert!(FilterOp::Contains("ck S".into()).matches(Some(&rick)));
        assert!(FilterOp::NotEquals(Value::from("Jerry")).matches(None));
        assert!(!FilterOp::GreaterThan(Value::Int(3)).matches(None));
        assert!(FilterOp::LessThan(Value::Float(14.5)).matches(Some(&Value::Int(14))));
        assert!(FilterOp::Equals(Value::Int(70)).matches(Some(&Value::Float(70.0))));
    }

    #[test]
    fn window_offsets() {
        let mut params = SearchParameter::new();
        assert_eq!((params.page, params.limit, params.offset()), (1, DEFAULT_LIMIT, 0));
        params.page = 3;
        params.limit = 5;
        assert_eq!(params.offset(), 10);
        params.start = Some(2);
        assert_eq!(params.offset(), 2);
        params.page = 0;
        params.start = None;
        assert_eq!(params.offset(), 0);
    }

    #[test]
    fn clone_is_independent() {
        let mut original = SearchParameter::new();
        original.filters.push(Filter::equals("name", "Beth"));
        let mut copy = original.clone();
        copy.page = 4;
        copy.filters.push(Filter::equals("age", 34));
        assert_eq!(original.page, 1);
        assert_eq!(original.filters.len(), 1);
    }
}
