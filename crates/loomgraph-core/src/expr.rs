//! # Property-Path Expressions
//!
//! Boolean expression trees evaluated against an entity's JSON data.
//!
//! ```text
//! Expr ::= Compare { path, operator, value }
//!        | And [Expr] | Or [Expr] | Not Expr
//! path ::= ['$'] key ('.' key | '[' index ']')*
//! ```
//!
//! ## Evaluation Rules
//!
//! - A missing path never matches, except `NotExists`.
//! - Numeric operators need both sides numeric (numbers or numeric strings).
//! - `Equals` compares numerically when both sides are numeric, otherwise by
//!   string-coerced scalars or structural JSON equality.
//! - `Contains` on an array tests element membership.
//! - `In` and `NotIn` need an array on the right.
//!
//! Expressions serialize as externally tagged JSON:
//!
//! ```text
//! {"and": [
//!   {"compare": {"path": "address.city", "operator": "equals", "value": "Oslo"}},
//!   {"not": {"compare": {"path": "scores[0]", "operator": "less_than", "value": 10}}}
//! ]}
//! ```

use crate::types::LoomError;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::borrow::Cow;
use std::cmp::Ordering;
use std::fmt;

// =============================================================================
// PROPERTY PATHS
// =============================================================================

/// One step of a [`PropertyPath`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathSegment {
    Key(String),
    Index(usize),
}

/// A parsed path into a JSON document, e.g. `a.b[0].c`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct PropertyPath {
    segments: Vec<PathSegment>,
}

impl PropertyPath {
    /// Parse a dotted path. A leading `$` addresses the document root.
    pub fn parse(text: &str) -> Result<Self, LoomError> {
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return Err(LoomError::bad_request("property path is empty"));
        }
        let malformed = || LoomError::bad_request(format!("malformed property path: {trimmed}"));

        let (rooted, mut rest) = match trimmed.strip_prefix('$') {
            Some(after_root) => (true, after_root),
            None => (false, trimmed),
        };
        let mut needs_dot = rooted;
        let mut segments = Vec::new();

        while !rest.is_empty() {
            if let Some(after) = rest.strip_prefix('[') {
                let close = after.find(']').ok_or_else(malformed)?;
                let index = after[..close]
                    .trim()
                    .parse::<usize>()
                    .map_err(|_| malformed())?;
                segments.push(PathSegment::Index(index));
                rest = &after[close + 1..];
            } else {
                let body = if needs_dot {
                    rest.strip_prefix('.').ok_or_else(malformed)?
                } else {
                    rest
                };
                let end = body.find(['.', '[']).unwrap_or(body.len());
                let key = &body[..end];
                if key.is_empty() || key.contains(']') {
                    return Err(malformed());
                }
                segments.push(PathSegment::Key(key.to_string()));
                rest = &body[end..];
            }
            needs_dot = true;
        }

        Ok(Self { segments })
    }

    #[must_use]
    pub fn segments(&self) -> &[PathSegment] {
        &self.segments
    }

    /// Walk the path; `None` when any step is absent.
    #[must_use]
    pub fn resolve<'v>(&self, root: &'v Value) -> Option<&'v Value> {
        self.segments
            .iter()
            .try_fold(root, |current, segment| match segment {
                PathSegment::Key(key) => current.as_object()?.get(key),
                PathSegment::Index(index) => current.as_array()?.get(*index),
            })
    }
}

impl fmt::Display for PropertyPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.segments.is_empty() {
            return f.write_str("$");
        }
        for (i, segment) in self.segments.iter().enumerate() {
            match segment {
                PathSegment::Key(key) if i == 0 => write!(f, "{key}")?,
                PathSegment::Key(key) => write!(f, ".{key}")?,
                PathSegment::Index(index) => write!(f, "[{index}]")?,
            }
        }
        Ok(())
    }
}

impl TryFrom<String> for PropertyPath {
    type Error = LoomError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<PropertyPath> for String {
    fn from(path: PropertyPath) -> Self {
        path.to_string()
    }
}

// =============================================================================
// OPERATORS
// =============================================================================

/// Comparison operators of an expression leaf.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operator {
    Equals,
    NotEquals,
    GreaterThan,
    GreaterThanOrEqualTo,
    LessThan,
    LessThanOrEqualTo,
    Contains,
    ContainsNot,
    StartsWith,
    EndsWith,
    In,
    NotIn,
    Exists,
    NotExists,
    IsNull,
    IsNotNull,
}

// =============================================================================
// EXPRESSIONS
// =============================================================================

/// A boolean expression over an entity's JSON data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Expr {
    Compare {
        path: PropertyPath,
        operator: Operator,
        #[serde(default)]
        value: Value,
    },
    And(Vec<Expr>),
    Or(Vec<Expr>),
    Not(Box<Expr>),
}

impl Expr {
    /// Build a comparison leaf, parsing `path`.
    pub fn compare(path: &str, operator: Operator, value: impl Into<Value>) -> Result<Self, LoomError> {
        let expr = Self::Compare {
            path: PropertyPath::parse(path)?,
            operator,
            value: value.into(),
        };
        expr.validate()?;
        Ok(expr)
    }

    /// Parse an expression document.
    pub fn from_json(text: &str) -> Result<Self, LoomError> {
        let expr: Self = serde_json::from_str(text)
            .map_err(|e| LoomError::bad_request(format!("malformed expression: {e}")))?;
        expr.validate()?;
        Ok(expr)
    }

    #[must_use]
    pub fn and(self, other: Self) -> Self {
        match self {
            Self::And(mut children) => {
                children.push(other);
                Self::And(children)
            }
            first => Self::And(vec![first, other]),
        }
    }

    #[must_use]
    pub fn or(self, other: Self) -> Self {
        match self {
            Self::Or(mut children) => {
                children.push(other);
                Self::Or(children)
            }
            first => Self::Or(vec![first, other]),
        }
    }

    #[must_use]
    pub fn negate(self) -> Self {
        Self::Not(Box::new(self))
    }

    /// Structural checks that parsing alone cannot express.
    pub fn validate(&self) -> Result<(), LoomError> {
        match self {
            Self::Compare {
                path,
                operator: operator @ (Operator::In | Operator::NotIn),
                value,
            } if !value.is_array() => Err(LoomError::bad_request(format!(
                "{operator:?} on {path} needs an array value"
            ))),
            Self::Compare { .. } => Ok(()),
            Self::And(children) | Self::Or(children) => {
                children.iter().try_for_each(Self::validate)
            }
            Self::Not(child) => child.validate(),
        }
    }

    /// Evaluate against a data payload; absent data behaves like `{}`.
    #[must_use]
    pub fn evaluate(&self, data: Option<&Value>) -> bool {
        match self {
            Self::Compare {
                path,
                operator,
                value,
            } => {
                let found = data.and_then(|root| path.resolve(root));
                compare(found, *operator, value)
            }
            Self::And(children) => children.iter().all(|c| c.evaluate(data)),
            Self::Or(children) => children.iter().any(|c| c.evaluate(data)),
            Self::Not(child) => !child.evaluate(data),
        }
    }
}

// =============================================================================
// COMPARISON
// =============================================================================

fn compare(found: Option<&Value>, operator: Operator, expected: &Value) -> bool {
    let Some(actual) = found else {
        return operator == Operator::NotExists;
    };

    match operator {
        Operator::Exists => true,
        Operator::NotExists => false,
        Operator::IsNull => actual.is_null(),
        Operator::IsNotNull => !actual.is_null(),
        Operator::Equals => values_equal(actual, expected),
        Operator::NotEquals => !values_equal(actual, expected),
        Operator::GreaterThan => numeric_order(actual, expected) == Some(Ordering::Greater),
        Operator::GreaterThanOrEqualTo => matches!(
            numeric_order(actual, expected),
            Some(Ordering::Greater | Ordering::Equal)
        ),
        Operator::LessThan => numeric_order(actual, expected) == Some(Ordering::Less),
        Operator::LessThanOrEqualTo => matches!(
            numeric_order(actual, expected),
            Some(Ordering::Less | Ordering::Equal)
        ),
        Operator::Contains => contains(actual, expected),
        Operator::ContainsNot => !contains(actual, expected),
        Operator::StartsWith => match (as_text(actual), as_text(expected)) {
            (Some(a), Some(b)) => a.starts_with(b.as_ref()),
            _ => false,
        },
        Operator::EndsWith => match (as_text(actual), as_text(expected)) {
            (Some(a), Some(b)) => a.ends_with(b.as_ref()),
            _ => false,
        },
        Operator::In => expected
            .as_array()
            .is_some_and(|items| items.iter().any(|item| values_equal(actual, item))),
        Operator::NotIn => expected
            .as_array()
            .is_some_and(|items| !items.iter().any(|item| values_equal(actual, item))),
    }
}

fn as_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok().filter(|f| f.is_finite()),
        _ => None,
    }
}

fn as_text(value: &Value) -> Option<Cow<'_, str>> {
    match value {
        Value::String(s) => Some(Cow::Borrowed(s.as_str())),
        Value::Number(n) => Some(Cow::Owned(n.to_string())),
        Value::Bool(b) => Some(Cow::Owned(b.to_string())),
        Value::Null | Value::Array(_) | Value::Object(_) => None,
    }
}

fn numeric_order(actual: &Value, expected: &Value) -> Option<Ordering> {
    let (a, b) = (as_number(actual)?, as_number(expected)?);
    a.partial_cmp(&b)
}

fn values_equal(actual: &Value, expected: &Value) -> bool {
    if let (Some(a), Some(b)) = (as_number(actual), as_number(expected)) {
        return a == b;
    }
    match (as_text(actual), as_text(expected)) {
        (Some(a), Some(b)) => a == b,
        _ => actual == expected,
    }
}

fn contains(actual: &Value, expected: &Value) -> bool {
    match actual {
        Value::Array(items) => items.iter().any(|item| values_equal(item, expected)),
        _ => match (as_text(actual), as_text(expected)) {
            (Some(a), Some(b)) => a.contains(b.as_ref()),
            _ => false,
        },
    }
}

// =============================================================================
// TESTS
// =============================================================================
