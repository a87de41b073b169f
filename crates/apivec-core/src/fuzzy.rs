//! Fuzzy name matching.
//!
//! Scores a free-text query against document names and keywords with a
//! token-set similarity: both strings are split into lowercase word tokens,
//! the shared tokens are compared against each side's leftovers, and the
//! best pairing wins. A query whose tokens are all contained in the name
//! scores 1.0. Character-level similarity uses `strsim`.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::types::Document;

/// Matches scoring below this are discarded.
pub const DEFAULT_FUZZY_FLOOR: f32 = 0.6;

/// A fuzzy-matchable entry: a document's name plus its keywords.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NameEntry {
    /// Document id.
    pub id: String,
    /// Document name.
    pub name: String,
    /// Extra matchable keywords (tags).
    #[serde(default)]
    pub keywords: Vec<String>,
}

impl NameEntry {
    /// Build the entry for a document.
    pub fn from_document(doc: &Document) -> Self {
        Self {
            id: doc.id.clone(),
            name: doc.name.clone(),
            keywords: doc.tags.iter().cloned().collect(),
        }
    }
}

/// One fuzzy hit.
#[derive(Debug, Clone, PartialEq)]
pub struct FuzzyMatch {
    /// Document id.
    pub id: String,
    /// Similarity in `[0, 1]`.
    pub score: f32,
    /// Whether the query equals the name exactly (case-insensitive).
    pub exact: bool,
}

/// Lowercase word tokens; `.`, `_` and other punctuation separate words.
pub fn tokenize(text: &str) -> BTreeSet<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(str::to_lowercase)
        .collect()
}

/// Whether `query` names `name` exactly.
pub fn is_exact_name(query: &str, name: &str) -> bool {
    let q = query.trim();
    !q.is_empty() && q.eq_ignore_ascii_case(name.trim())
}

/// Character-level similarity of two strings in `[0, 1]`.
pub fn ratio(a: &str, b: &str) -> f64 {
    if a.is_empty() && b.is_empty() {
        return 1.0;
    }
    strsim::normalized_levenshtein(a, b)
}

/// Token-set similarity of two strings in `[0, 1]`.
pub fn token_set_ratio(a: &str, b: &str) -> f64 {
    let ta = tokenize(a);
    let tb = tokenize(b);
    if ta.is_empty() || tb.is_empty() {
        return 0.0;
    }

    let shared: Vec<&str> = ta.intersection(&tb).map(String::as_str).collect();
    let only_a: Vec<&str> = ta.difference(&tb).map(String::as_str).collect();
    let only_b: Vec<&str> = tb.difference(&ta).map(String::as_str).collect();

    // One side's tokens are a subset of the other's.
    if !shared.is_empty() && (only_a.is_empty() || only_b.is_empty()) {
        return 1.0;
    }

    let sect = shared.join(" ");
    let join = |rest: &[&str]| {
        let rest = rest.join(" ");
        if sect.is_empty() {
            rest
        } else {
            format!("{sect} {rest}")
        }
    };
    let combined_a = join(&only_a);
    let combined_b = join(&only_b);

    let mut best = ratio(&combined_a, &combined_b);
    if !sect.is_empty() {
        best = best
            .max(ratio(&sect, &combined_a))
            .max(ratio(&sect, &combined_b));
    }
    best
}

/// Score an entry: best of the name and each keyword.
pub fn score_entry(query: &str, entry: &NameEntry) -> f32 {
    let name_score = token_set_ratio(query, &entry.name);
    entry
        .keywords
        .iter()
        .map(|k| token_set_ratio(query, k))
        .fold(name_score, f64::max) as f32
}

/// Rank `entries` against `query`, keeping at most `limit` hits at or above
/// `floor`. Exact name matches sort ahead of equal-scoring hits.
pub fn fuzzy_match(query: &str, entries: &[NameEntry], limit: usize, floor: f32) -> Vec<FuzzyMatch> {
    if query.trim().is_empty() || limit == 0 {
        return Vec::new();
    }

    let mut hits: Vec<FuzzyMatch> = entries
        .iter()
        .filter_map(|entry| {
            let exact = is_exact_name(query, &entry.name);
            let score = if exact { 1.0 } else { score_entry(query, entry) };
            (score >= floor).then(|| FuzzyMatch {
                id: entry.id.clone(),
                score,
                exact,
            })
        })
        .collect();

    hits.sort_by(|a, b| {
        b.score
            .total_cmp(&a.score)
            .then_with(|| b.exact.cmp(&a.exact))
            .then_with(|| a.id.cmp(&b.id))
    });
    hits.truncate(limit);
    hits
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(id: &str, name: &str, keywords: &[&str]) -> NameEntry {
        NameEntry {
            id: id.to_string(),
            name: name.to_string(),
            keywords: keywords.iter().map(|k| k.to_string()).collect(),
        }
    }

    // ------------------------------------------------------------------------
    // token_set_ratio tests
    // ------------------------------------------------------------------------

    #[test]
    fn test_tokenize_splits_identifiers() {
        let tokens: Vec<_> = tokenize("bpy.ops.Mesh_bevel").into_iter().collect();
        assert_eq!(tokens, vec!["bevel", "bpy", "mesh", "ops"]);
    }

    #[test]
    fn test_token_set_ratio_identical() {
        assert_eq!(token_set_ratio("mesh.bevel", "mesh.bevel"), 1.0);
    }

    #[test]
    fn test_token_set_ratio_subset_is_perfect() {
        assert_eq!(token_set_ratio("bevel", "mesh.bevel"), 1.0);
        assert_eq!(token_set_ratio("mesh bevel edges", "mesh.bevel"), 1.0);
    }

    #[test]
    fn test_token_set_ratio_order_insensitive() {
        assert_eq!(
            token_set_ratio("bevel mesh", "mesh.bevel"),
            token_set_ratio("mesh bevel", "mesh.bevel")
        );
    }

    #[test]
    fn test_token_set_ratio_typo_scores_high() {
        let score = token_set_ratio("mesh.bevl", "mesh.bevel");
        assert!(score > 0.6, "score was {score}");
        assert!(score < 1.0);
    }

    #[test]
    fn test_token_set_ratio_unrelated_scores_low() {
        assert!(token_set_ratio("render image", "mesh.bevel") < 0.6);
    }

    #[test]
    fn test_token_set_ratio_empty() {
        assert_eq!(token_set_ratio("", "mesh.bevel"), 0.0);
        assert_eq!(token_set_ratio("...", "mesh.bevel"), 0.0);
    }

    // ------------------------------------------------------------------------
    // fuzzy_match tests
    // ------------------------------------------------------------------------

    #[test]
    fn test_fuzzy_match_floor() {
        let entries = vec![
            entry("m1", "mesh.bevel", &[]),
            entry("r1", "render.render", &[]),
        ];
        let hits = fuzzy_match("mesh.bevl", &entries, 10, DEFAULT_FUZZY_FLOOR);
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, "m1");
        assert!(!hits[0].exact);
    }

    #[test]
    fn test_fuzzy_match_keywords() {
        let entries = vec![entry("m1", "mesh.bevel", &["chamfer"])];
        let hits = fuzzy_match("chamfer", &entries, 10, DEFAULT_FUZZY_FLOOR);
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].score, 1.0);
    }

    #[test]
    fn test_fuzzy_match_exact_sorts_first_among_ties() {
        let entries = vec![
            entry("a", "mesh.bevel.extra", &[]),
            entry("b", "mesh.bevel", &[]),
        ];
        let hits = fuzzy_match("Mesh.Bevel", &entries, 1, DEFAULT_FUZZY_FLOOR);
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, "b");
        assert!(hits[0].exact);
    }

    #[test]
    fn test_fuzzy_match_limit_and_blank_query() {
        let entries = vec![entry("a", "x.one", &[]), entry("b", "x.two", &[])];
        assert_eq!(fuzzy_match("x", &entries, 1, 0.0).len(), 1);
        assert!(fuzzy_match("  ", &entries, 5, 0.0).is_empty());
    }
}
