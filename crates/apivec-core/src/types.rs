//! Common types shared by every backend and the manager.
//!
//! These types never mention a concrete backend library; the local index and
//! the remote client both translate to and from them.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use crate::error::{Error, Result};

// ============================================================================
// Backend identity
// ============================================================================

/// Which of the two interchangeable backends a value refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// Embedded in-process ANN index (free, always available).
    Local,
    /// Remote vector database (metered).
    Remote,
}

impl BackendKind {
    /// The other backend.
    pub fn other(self) -> Self {
        match self {
            Self::Local => Self::Remote,
            Self::Remote => Self::Local,
        }
    }

    /// Lowercase name.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Local => "local",
            Self::Remote => "remote",
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Documents
// ============================================================================

/// One parameter of an API descriptor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Parameter {
    /// Parameter name.
    pub name: String,

    /// Declared type, e.g. `"float"` or `"enum"`.
    #[serde(rename = "type")]
    pub param_type: String,

    /// Default value rendered as a string.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<String>,

    /// Human description.
    #[serde(default)]
    pub description: String,

    /// Whether the parameter may be omitted.
    #[serde(default)]
    pub optional: bool,

    /// Allowed values for enum parameters.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enum_values: Option<Vec<String>>,
}

impl Parameter {
    /// Create a required parameter.
    pub fn new(name: impl Into<String>, param_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            param_type: param_type.into(),
            default: None,
            description: String::new(),
            optional: false,
            enum_values: None,
        }
    }

    /// Set the description.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Mark optional with a default value.
    pub fn with_default(mut self, default: impl Into<String>) -> Self {
        self.default = Some(default.into());
        self.optional = true;
        self
    }

    /// Set the allowed enum values.
    pub fn with_enum_values(mut self, values: Vec<String>) -> Self {
        self.enum_values = Some(values);
        self
    }
}

/// An API descriptor as supplied by the registry loader.
///
/// Re-adding a document with the same `id` replaces its previous content in
/// every backend (upsert).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    /// Unique identifier.
    pub id: String,

    /// Fully qualified API name, e.g. `mesh.bevel`.
    pub name: String,

    /// What the API does.
    #[serde(default)]
    pub description: String,

    /// Coarse grouping, e.g. `mesh_operators`.
    #[serde(default)]
    pub category: String,

    /// Owning module.
    #[serde(default)]
    pub module: String,

    /// Ordered parameter list.
    #[serde(default)]
    pub parameters: Vec<Parameter>,

    /// Free-form keywords.
    #[serde(default)]
    pub tags: BTreeSet<String>,

    /// Usage examples.
    #[serde(default)]
    pub examples: Vec<String>,

    /// Call signature, when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,
}

impl Document {
    /// Create a document with an id and a name.
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            description: String::new(),
            category: String::new(),
            module: String::new(),
            parameters: Vec::new(),
            tags: BTreeSet::new(),
            examples: Vec::new(),
            signature: None,
        }
    }

    /// Set the description.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Set the category.
    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = category.into();
        self
    }

    /// Set the module.
    pub fn with_module(mut self, module: impl Into<String>) -> Self {
        self.module = module.into();
        self
    }

    /// Add a tag.
    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.insert(tag.into());
        self
    }

    /// Append a parameter.
    pub fn with_parameter(mut self, parameter: Parameter) -> Self {
        self.parameters.push(parameter);
        self
    }

    /// Append an example.
    pub fn with_example(mut self, example: impl Into<String>) -> Self {
        self.examples.push(example.into());
        self
    }

    /// Set the signature.
    pub fn with_signature(mut self, signature: impl Into<String>) -> Self {
        self.signature = Some(signature.into());
        self
    }

    /// The single text that gets embedded for this document.
    pub fn embedding_text(&self) -> String {
        let mut parts: Vec<&str> = vec![&self.name, &self.description, &self.category];
        parts.extend(self.tags.iter().map(String::as_str));
        parts
            .into_iter()
            .filter(|p| !p.trim().is_empty())
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Reject documents missing required fields.
    pub fn validate(&self) -> Result<()> {
        if self.id.trim().is_empty() {
            return Err(Error::invalid_document(&self.id, "missing id"));
        }
        if self.name.trim().is_empty() {
            return Err(Error::invalid_document(&self.id, "missing name"));
        }
        Ok(())
    }

    /// Stable hash of the full content, used to detect divergence between
    /// backends.
    pub fn content_hash(&self) -> String {
        let bytes = serde_json::to_vec(self).unwrap_or_default();
        blake3::hash(&bytes).to_hex().to_string()
    }
}

/// Split a batch into valid documents and the errors for rejected ones.
pub fn partition_valid(docs: &[Document]) -> (Vec<&Document>, Vec<Error>) {
    let mut valid = Vec::with_capacity(docs.len());
    let mut rejected = Vec::new();
    for doc in docs {
        match doc.validate() {
            Ok(()) => valid.push(doc),
            Err(e) => {
                log::warn!("Rejecting document: {e}");
                rejected.push(e);
            }
        }
    }
    (valid, rejected)
}

// ============================================================================
// Search results
// ============================================================================

/// How a result was matched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchKind {
    /// Vector similarity only.
    Semantic,
    /// Fuzzy name similarity only.
    Fuzzy,
    /// Weighted blend of both.
    Hybrid,
    /// The query equals the document name.
    Exact,
}

impl MatchKind {
    /// Lowercase name.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Semantic => "semantic",
            Self::Fuzzy => "fuzzy",
            Self::Hybrid => "hybrid",
            Self::Exact => "exact",
        }
    }
}

/// A single ranked match.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResult {
    /// Document identifier.
    pub id: String,

    /// Normalized score in `[0, 1]`, 1.0 is the best possible match.
    pub score: f32,

    /// The API name.
    pub api_name: String,

    /// Document category.
    pub category: String,

    /// Document parameters.
    #[serde(default)]
    pub parameters: Vec<Parameter>,

    /// Display content (the description).
    pub content: String,

    /// Additional fields: `module`, `tags`, `match`, component scores.
    #[serde(default)]
    pub metadata: BTreeMap<String, serde_json::Value>,
}

impl SearchResult {
    /// Build a result from a document and a normalized score.
    pub fn from_document(doc: &Document, score: f32, kind: MatchKind) -> Self {
        let mut metadata = BTreeMap::new();
        metadata.insert("module".to_string(), serde_json::json!(doc.module));
        metadata.insert("tags".to_string(), serde_json::json!(doc.tags));
        metadata.insert("match".to_string(), serde_json::json!(kind.as_str()));
        Self {
            id: doc.id.clone(),
            score: score.clamp(0.0, 1.0),
            api_name: doc.name.clone(),
            category: doc.category.clone(),
            parameters: doc.parameters.clone(),
            content: doc.description.clone(),
            metadata,
        }
    }

    /// How this result was matched, if recorded.
    pub fn match_kind(&self) -> Option<MatchKind> {
        self.metadata
            .get("match")
            .and_then(|v| serde_json::from_value(v.clone()).ok())
    }

    /// Set a metadata entry.
    pub fn with_metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }
}

// ============================================================================
// Index statistics
// ============================================================================

/// Size statistics for one backend's index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexStats {
    /// Number of stored vectors.
    pub total_vectors: usize,

    /// Approximate index size in MiB.
    pub index_size_mb: f64,

    /// Which backend produced these stats.
    pub backend: BackendKind,

    /// Last write, RFC 3339.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_updated: Option<String>,
}

impl IndexStats {
    /// Estimate the raw size of `count` vectors of `dimension` f32 values.
    pub fn estimate_size_mb(count: usize, dimension: usize) -> f64 {
        (count * dimension * std::mem::size_of::<f32>()) as f64 / (1024.0 * 1024.0)
    }
}

// ============================================================================
// Tests
// ============================================================================
