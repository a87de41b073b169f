//! Structured search filters.
//!
//! A filter maps a document field to a required value or to a set of
//! accepted values. Matching is closed-world: a field the document does not
//! have (or an unknown field name) fails the filter.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::types::Document;

/// Accepted value(s) for one filter field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FilterValue {
    /// Field must equal this value.
    Equals(String),
    /// Field must equal one of these values.
    AnyOf(Vec<String>),
}

impl FilterValue {
    fn accepts(&self, candidate: &str) -> bool {
        match self {
            Self::Equals(v) => v == candidate,
            Self::AnyOf(vs) => vs.iter().any(|v| v == candidate),
        }
    }

    /// The accepted values as a slice-like list.
    pub fn values(&self) -> Vec<&str> {
        match self {
            Self::Equals(v) => vec![v.as_str()],
            Self::AnyOf(vs) => vs.iter().map(String::as_str).collect(),
        }
    }
}

/// Field filters applied to search results. Every entry must match.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Filters(BTreeMap<String, FilterValue>);

impl Filters {
    /// An empty filter set (matches everything).
    pub fn new() -> Self {
        Self::default()
    }

    /// Require `field == value`.
    pub fn with_equals(mut self, field: impl Into<String>, value: impl Into<String>) -> Self {
        self.0.insert(field.into(), FilterValue::Equals(value.into()));
        self
    }

    /// Require `field` to be one of `values`.
    pub fn with_any_of<I, S>(mut self, field: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.0.insert(
            field.into(),
            FilterValue::AnyOf(values.into_iter().map(Into::into).collect()),
        );
        self
    }

    /// Whether no filters are set.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterate over `(field, value)` pairs.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &FilterValue)> {
        self.0.iter()
    }

    /// Whether `doc` satisfies every filter.
    pub fn matches(&self, doc: &Document) -> bool {
        self.0.iter().all(|(field, expected)| {
            match field_values(doc, field) {
                Some(values) => values.iter().any(|v| expected.accepts(v)),
                None => false,
            }
        })
    }
}

/// Apply optional filters.
pub fn matches(filters: Option<&Filters>, doc: &Document) -> bool {
    filters.is_none_or(|f| f.matches(doc))
}

/// Values of a filterable document field; `None` when the field is absent.
fn field_values<'a>(doc: &'a Document, field: &str) -> Option<Vec<&'a str>> {
    let single = |s: &'a str| (!s.is_empty()).then(|| vec![s]);
    match field {
        "id" => single(&doc.id),
        "name" | "api_name" | "full_name" => single(&doc.name),
        "category" => single(&doc.category),
        "module" => single(&doc.module),
        "description" => single(&doc.description),
        "signature" => doc.signature.as_deref().and_then(single),
        "tags" | "tag" => {
            (!doc.tags.is_empty()).then(|| doc.tags.iter().map(String::as_str).collect())
        }
        _ => None,
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn doc() -> Document {
        Document::new("m1", "mesh.bevel")
            .with_category("mesh_operators")
            .with_module("bpy.ops.mesh")
            .with_tag("edges")
    }

    #[test]
    fn test_empty_filters_match_everything() {
        assert!(Filters::new().matches(&doc()));
        assert!(matches(None, &doc()));
    }

    #[test]
    fn test_equals_filter() {
        assert!(Filters::new().with_equals("category", "mesh_operators").matches(&doc()));
        assert!(!Filters::new().with_equals("category", "object").matches(&doc()));
    }

    #[test]
    fn test_any_of_filter() {
        let f = Filters::new().with_any_of("category", ["object", "mesh_operators"]);
        assert!(f.matches(&doc()));
        let f = Filters::new().with_any_of("category", ["object", "scene"]);
        assert!(!f.matches(&doc()));
    }

    #[test]
    fn test_tags_membership() {
        assert!(Filters::new().with_equals("tags", "edges").matches(&doc()));
        assert!(!Filters::new().with_equals("tags", "faces").matches(&doc()));
    }

    #[test]
    fn test_all_filters_must_match() {
        let f = Filters::new()
            .with_equals("category", "mesh_operators")
            .with_equals("module", "bpy.ops.object");
        assert!(!f.matches(&doc()));
    }

    #[test]
    fn test_absent_field_fails() {
        let bare = Document::new("x", "thing");
        assert!(!Filters::new().with_equals("category", "").matches(&bare));
        assert!(!Filters::new().with_equals("signature", "f()").matches(&bare));
    }

    #[test]
    fn test_unknown_field_fails() {
        assert!(!Filters::new().with_equals("color", "red").matches(&doc()));
    }

    #[test]
    fn test_filters_deserialize_untagged() {
        let json = r#"{"category": "mesh_operators", "tags": ["edges", "faces"]}"#;
        let f: Filters = serde_json::from_str(json).unwrap();
        assert!(f.matches(&doc()));
    }
}
