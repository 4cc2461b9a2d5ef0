//! # Filter Engine
//!
//! A [`Filter`] is the single predicate used by every read path: cursors,
//! enumeration, adjacency lookups, route filters, ranking and vector search
//! pre-filters. All present criteria must match.

use crate::expr::Expr;
use crate::types::{
    Credential, Edge, Graph, Label, LoomError, Node, Tag, Tags, Tenant, User, VectorMetadata,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;

// =============================================================================
// FACETS
// =============================================================================

/// The parts of a record a filter can look at.
#[derive(Debug, Clone, Copy)]
pub struct Facets<'a> {
    pub name: Option<&'a str>,
    pub labels: &'a [String],
    pub tags: Option<&'a Tags>,
    pub data: Option<&'a Value>,
}

impl Facets<'_> {
    const EMPTY_LABELS: &'static [String] = &[];
}

/// Records that expose [`Facets`] to the filter engine.
pub trait Filterable {
    fn facets(&self) -> Facets<'_>;
}

// =============================================================================
// FILTER
// =============================================================================

/// Conjunctive predicate over name, labels, tags and JSON data.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Filter {
    /// Exact name match.
    pub name: Option<String>,
    /// Every listed label must be present (case-sensitive).
    pub labels: Vec<String>,
    /// Every listed key must be present with the listed value.
    pub tags: Tags,
    pub expr: Option<Expr>,
}

impl Filter {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    #[must_use]
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.labels.push(label.into());
        self
    }

    #[must_use]
    pub fn with_tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }

    #[must_use]
    pub fn with_expr(mut self, expr: Expr) -> Self {
        self.expr = Some(expr);
        self
    }

    /// True when the filter matches everything.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.name.is_none() && self.labels.is_empty() && self.tags.is_empty() && self.expr.is_none()
    }

    pub fn validate(&self) -> Result<(), LoomError> {
        if self.labels.iter().any(|l| l.trim().is_empty()) {
            return Err(LoomError::bad_request("filter labels must not be empty"));
        }
        if self.tags.keys().any(|k| k.trim().is_empty()) {
            return Err(LoomError::bad_request("filter tag keys must not be empty"));
        }
        match &self.expr {
            Some(expr) => expr.validate(),
            None => Ok(()),
        }
    }

    #[must_use]
    pub fn matches<F: Filterable + ?Sized>(&self, record: &F) -> bool {
        self.matches_facets(&record.facets())
    }

    #[must_use]
    pub fn matches_facets(&self, facets: &Facets<'_>) -> bool {
        if let Some(name) = &self.name
            && facets.name != Some(name.as_str())
        {
            return false;
        }
        if !self
            .labels
            .iter()
            .all(|wanted| facets.labels.iter().any(|have| have == wanted.trim()))
        {
            return false;
        }
        if !self.tags.is_empty() {
            let Some(tags) = facets.tags else {
                return false;
            };
            if !self
                .tags
                .iter()
                .all(|(key, value)| tags.get(key) == Some(value))
            {
                return false;
            }
        }
        match &self.expr {
            Some(expr) => expr.evaluate(facets.data),
            None => true,
        }
    }
}

// =============================================================================
// FILTERABLE RECORDS
// =============================================================================

impl Filterable for Tenant {
    fn facets(&self) -> Facets<'_> {
        Facets {
            name: Some(&self.name),
            labels: Facets::EMPTY_LABELS,
            tags: None,
            data: None,
        }
    }
}

impl Filterable for User {
    fn facets(&self) -> Facets<'_> {
        Facets {
            name: Some(&self.email),
            labels: Facets::EMPTY_LABELS,
            tags: None,
            data: None,
        }
    }
}

impl Filterable for Credential {
    fn facets(&self) -> Facets<'_> {
        Facets {
            name: Some(&self.name),
            labels: Facets::EMPTY_LABELS,
            tags: None,
            data: None,
        }
    }
}

impl Filterable for Graph {
    fn facets(&self) -> Facets<'_> {
        Facets {
            name: Some(&self.name),
            labels: &self.labels,
            tags: Some(&self.tags),
            data: self.data.as_ref(),
        }
    }
}

impl Filterable for Node {
    fn facets(&self) -> Facets<'_> {
        Facets {
            name: Some(&self.name),
            labels: &self.labels,
            tags: Some(&self.tags),
            data: self.data.as_ref(),
        }
    }
}

impl Filterable for Edge {
    fn facets(&self) -> Facets<'_> {
        Facets {
            name: Some(&self.name),
            labels: &self.labels,
            tags: Some(&self.tags),
            data: self.data.as_ref(),
        }
    }
}

impl Filterable for Label {
    fn facets(&self) -> Facets<'_> {
        Facets {
            name: Some(&self.label),
            labels: std::slice::from_ref(&self.label),
            tags: None,
            data: None,
        }
    }
}

impl Filterable for Tag {
    fn facets(&self) -> Facets<'_> {
        Facets {
            name: Some(&self.key),
            labels: Facets::EMPTY_LABELS,
            tags: None,
            data: None,
        }
    }
}

impl Filterable for VectorMetadata {
    fn facets(&self) -> Facets<'_> {
        Facets {
            name: Some(&self.model),
            labels: Facets::EMPTY_LABELS,
            tags: None,
            data: None,
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;
    use crate::expr::Operator;
    use serde_json::json;
    use uuid::Uuid;

    fn sample() -> Node {
        Node::new(Uuid::new_v4(), Uuid::new_v4(), "alpha")
            .with_label("person")
            .with_label("admin")
            .with_tag("team", "core")
            .with_data(json!({"age": 41}))
    }

    #[test]
    fn empty_filter_matches_everything() {
        assert!(Filter::new().is_empty());
        assert!(Filter::new().matches(&sample()));
    }

    #[test]
    fn labels_are_conjunctive() {
        let node = sample();
        assert!(Filter::new().with_label("person").matches(&node));
        assert!(
            Filter::new()
                .with_label("person")
                .with_label("admin")
                .matches(&node)
        );
        assert!(
            !Filter::new()
                .with_label("person")
                .with_label("guest")
                .matches(&node)
        );
        assert!(!Filter::new().with_label("Person").matches(&node));
    }

    #[test]
    fn tags_need_key_and_value() {
        let node = sample();
        assert!(Filter::new().with_tag("team", "core").matches(&node));
        assert!(!Filter::new().with_tag("team", "edge").matches(&node));
        assert!(!Filter::new().with_tag("site", "core").matches(&node));
    }

    #[test]
    fn categories_combine_with_and() {
        let node = sample();
        let older = Expr::compare("age", Operator::GreaterThan, 40).unwrap();
        let younger = Expr::compare("age", Operator::LessThan, 40).unwrap();
        let base = Filter::new().with_name("alpha").with_label("person");
        assert!(base.clone().with_expr(older).matches(&node));
        assert!(!base.with_expr(younger).matches(&node));
        assert!(!Filter::new().with_name("beta").matches(&node));
    }

    #[test]
    fn tag_filter_never_matches_untagged_records() {
        let tenant = Tenant::new("t");
        assert!(!Filter::new().with_tag("k", "v").matches(&tenant));
        assert!(Filter::new().with_name("t").matches(&tenant));
    }

    #[test]
    fn blank_labels_rejected() {
        let err = Filter::new().with_label("  ").validate().unwrap_err();
        assert!(matches!(err, LoomError::BadRequest(_)));
    }

    #[test]
    fn filters_deserialize_from_json() {
        let filter: Filter = serde_json::from_str(
            r#"{"labels": ["person"], "expr": {"compare": {"path": "age", "operator": "exists"}}}"#,
        )
        .unwrap();
        filter.validate().unwrap();
        assert!(filter.matches(&sample()));
    }
}
