//! Backend-agnostic score handling.
//!
//! Every backend reports scores on a common "higher is better" `[0, 1]`
//! scale. Hybrid search blends a semantic list and a fuzzy list, each first
//! normalized against its own best score.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::fuzzy::is_exact_name;
use crate::types::{MatchKind, SearchResult};

/// What a raw backend score measures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScoreKind {
    /// Larger is closer (inner product, cosine similarity).
    Similarity,
    /// Smaller is closer (cosine distance).
    Distance,
}

/// Map a raw backend score onto `[0, 1]`, 1.0 best.
pub fn normalize_score(raw: f32, kind: ScoreKind) -> f32 {
    if !raw.is_finite() {
        return 0.0;
    }
    let score = match kind {
        ScoreKind::Similarity => raw,
        ScoreKind::Distance => 1.0 - raw,
    };
    score.clamp(0.0, 1.0)
}

/// Sort results best-first; ties broken by id for stable output.
pub fn sort_results(results: &mut [SearchResult]) {
    results.sort_by(|a, b| b.score.total_cmp(&a.score).then_with(|| a.id.cmp(&b.id)));
}

/// Semantic/fuzzy blend weights.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HybridWeights {
    /// Weight of the vector similarity component.
    pub semantic: f32,
    /// Weight of the fuzzy name component.
    pub fuzzy: f32,
}

impl Default for HybridWeights {
    fn default() -> Self {
        Self {
            semantic: 0.7,
            fuzzy: 0.3,
        }
    }
}

impl HybridWeights {
    /// Create weights, clamping negatives to zero.
    pub fn new(semantic: f32, fuzzy: f32) -> Self {
        Self {
            semantic: semantic.max(0.0),
            fuzzy: fuzzy.max(0.0),
        }
    }
}

struct Blend {
    result: SearchResult,
    semantic: f32,
    fuzzy: f32,
}

fn list_max(results: &[SearchResult]) -> f32 {
    results.iter().map(|r| r.score).fold(0.0, f32::max)
}

/// Combine semantic and fuzzy result lists into one ranking.
///
/// Each list is divided by its own maximum so its best hit scores 1.0. Per
/// document, `semantic * w_s + fuzzy * w_f` is taken (a missing component
/// counts as zero), duplicates keep their best component scores, and the
/// blend is clamped to `[0, 1]`. A document whose name equals the query is
/// pinned to 1.0 and sorts ahead of other 1.0 scores.
pub fn combine_hybrid(
    query: &str,
    semantic: Vec<SearchResult>,
    fuzzy: Vec<SearchResult>,
    weights: HybridWeights,
    top_k: usize,
) -> Vec<SearchResult> {
    let sem_max = list_max(&semantic);
    let fz_max = list_max(&fuzzy);
    let weights = HybridWeights::new(weights.semantic, weights.fuzzy);

    let mut blended: HashMap<String, Blend> = HashMap::new();
    let mut absorb = |result: SearchResult, max: f32, is_semantic: bool| {
        let norm = if max > 0.0 { result.score / max } else { 0.0 };
        let entry = blended.entry(result.id.clone()).or_insert_with(|| Blend {
            result,
            semantic: 0.0,
            fuzzy: 0.0,
        });
        if is_semantic {
            entry.semantic = entry.semantic.max(norm);
        } else {
            entry.fuzzy = entry.fuzzy.max(norm);
        }
    };
    for r in semantic {
        absorb(r, sem_max, true);
    }
    for r in fuzzy {
        absorb(r, fz_max, false);
    }

    let mut ranked: Vec<(bool, SearchResult)> = blended
        .into_values()
        .filter_map(|b| {
            let exact = is_exact_name(query, &b.result.api_name);
            let combined = (weights.semantic * b.semantic + weights.fuzzy * b.fuzzy).clamp(0.0, 1.0);
            let (score, kind) = if exact {
                (1.0, MatchKind::Exact)
            } else if b.semantic > 0.0 && b.fuzzy > 0.0 {
                (combined, MatchKind::Hybrid)
            } else if b.fuzzy > 0.0 {
                (combined, MatchKind::Fuzzy)
            } else {
                (combined, MatchKind::Semantic)
            };
            if score <= 0.0 {
                return None;
            }
            let mut result = b
                .result
                .with_metadata("match", serde_json::json!(kind.as_str()))
                .with_metadata("semantic_score", serde_json::json!(b.semantic))
                .with_metadata("fuzzy_score", serde_json::json!(b.fuzzy));
            result.score = score;
            Some((exact, result))
        })
        .collect();

    ranked.sort_by(|(ea, a), (eb, b)| {
        b.score
            .total_cmp(&a.score)
            .then_with(|| eb.cmp(ea))
            .then_with(|| a.id.cmp(&b.id))
    });
    ranked.truncate(top_k);
    ranked.into_iter().map(|(_, r)| r).collect()
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::types::Document;
    use proptest::prelude::*;

    fn result(id: &str, name: &str, score: f32, kind: MatchKind) -> SearchResult {
        SearchResult::from_document(&Document::new(id, name), score, kind)
    }

    // ------------------------------------------------------------------------
    // normalize_score tests
    // ------------------------------------------------------------------------

    #[test]
    fn test_normalize_similarity_passthrough() {
        assert_eq!(normalize_score(0.42, ScoreKind::Similarity), 0.42);
        assert_eq!(normalize_score(-0.3, ScoreKind::Similarity), 0.0);
        assert_eq!(normalize_score(1.0001, ScoreKind::Similarity), 1.0);
    }

    #[test]
    fn test_normalize_distance_inverts() {
        assert!((normalize_score(0.25, ScoreKind::Distance) - 0.75).abs() < 1e-6);
        assert_eq!(normalize_score(1.8, ScoreKind::Distance), 0.0);
    }

    #[test]
    fn test_normalize_non_finite() {
        assert_eq!(normalize_score(f32::NAN, ScoreKind::Similarity), 0.0);
        assert_eq!(normalize_score(f32::INFINITY, ScoreKind::Distance), 0.0);
    }

    proptest! {
        #[test]
        fn prop_normalized_scores_in_unit_range(raw in -10.0f32..10.0, distance in any::<bool>()) {
            let kind = if distance { ScoreKind::Distance } else { ScoreKind::Similarity };
            let s = normalize_score(raw, kind);
            prop_assert!((0.0..=1.0).contains(&s));
        }

        #[test]
        fn prop_hybrid_scores_bounded_and_sorted(
            sem in proptest::collection::vec(0.0f32..1.0, 0..12),
            fz in proptest::collection::vec(0.6f32..1.0, 0..12),
            ws in 0.0f32..2.0,
            wf in 0.0f32..2.0,
        ) {
            let semantic: Vec<_> = sem.iter().enumerate()
                .map(|(i, s)| result(&format!("d{i}"), &format!("api.n{i}"), *s, MatchKind::Semantic))
                .collect();
            let fuzzy: Vec<_> = fz.iter().enumerate()
                .map(|(i, s)| result(&format!("d{}", i * 2), &format!("api.n{}", i * 2), *s, MatchKind::Fuzzy))
                .collect();
            let out = combine_hybrid("query", semantic, fuzzy, HybridWeights::new(ws, wf), 10);
            prop_assert!(out.len() <= 10);
            for r in &out {
                prop_assert!((0.0..=1.0).contains(&r.score));
            }
            for pair in out.windows(2) {
                prop_assert!(pair[0].score >= pair[1].score);
            }
        }
    }

    // ------------------------------------------------------------------------
    // combine_hybrid tests
    // ------------------------------------------------------------------------

    #[test]
    fn test_combine_single_semantic_hit() {
        let out = combine_hybrid(
            "bevl edges",
            vec![result("m1", "mesh.bevel", 0.31, MatchKind::Semantic)],
            vec![],
            HybridWeights::default(),
            1,
        );
        assert_eq!(out.len(), 1);
        assert!((out[0].score - 0.7).abs() < 1e-6);
        assert_eq!(out[0].match_kind(), Some(MatchKind::Semantic));
    }

    #[test]
    fn test_combine_sums_components_for_shared_id() {
        let out = combine_hybrid(
            "bevel",
            vec![result("m1", "mesh.bevel", 0.5, MatchKind::Semantic)],
            vec![result("m1", "mesh.bevel", 0.9, MatchKind::Fuzzy)],
            HybridWeights::default(),
            5,
        );
        assert_eq!(out.len(), 1);
        assert!((out[0].score - 1.0).abs() < 1e-6);
        assert_eq!(out[0].match_kind(), Some(MatchKind::Hybrid));
    }

    #[test]
    fn test_combine_normalizes_each_list_independently() {
        let out = combine_hybrid(
            "q",
            vec![
                result("a", "x.a", 0.4, MatchKind::Semantic),
                result("b", "x.b", 0.2, MatchKind::Semantic),
            ],
            vec![],
            HybridWeights::new(1.0, 0.0),
            5,
        );
        assert_eq!(out[0].id, "a");
        assert!((out[0].score - 1.0).abs() < 1e-6);
        assert!((out[1].score - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_combine_dedups_keeping_max() {
        let out = combine_hybrid(
            "q",
            vec![
                result("a", "x.a", 0.2, MatchKind::Semantic),
                result("a", "x.a", 0.8, MatchKind::Semantic),
            ],
            vec![],
            HybridWeights::new(1.0, 0.0),
            5,
        );
        assert_eq!(out.len(), 1);
        assert!((out[0].score - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_combine_exact_name_pinned_top() {
        let out = combine_hybrid(
            "object.delete",
            vec![
                result("o2", "object.duplicate", 0.95, MatchKind::Semantic),
                result("o1", "object.delete", 0.10, MatchKind::Semantic),
            ],
            vec![
                result("o2", "object.duplicate", 0.95, MatchKind::Fuzzy),
                result("o1", "object.delete", 1.0, MatchKind::Fuzzy),
            ],
            HybridWeights::default(),
            2,
        );
        assert_eq!(out[0].id, "o1");
        assert_eq!(out[0].score, 1.0);
        assert_eq!(out[0].match_kind(), Some(MatchKind::Exact));
    }

    #[test]
    fn test_combine_truncates() {
        let semantic = (0..5)
            .map(|i| result(&format!("d{i}"), "x", 0.1 * (i + 1) as f32, MatchKind::Semantic))
            .collect();
        let out = combine_hybrid("q", semantic, vec![], HybridWeights::default(), 3);
        assert_eq!(out.len(), 3);
        assert_eq!(out[0].id, "d4");
    }

    #[test]
    fn test_sort_results() {
        let mut results = vec![
            result("b", "x", 0.5, MatchKind::Semantic),
            result("a", "x", 0.5, MatchKind::Semantic),
            result("c", "x", 0.9, MatchKind::Semantic),
        ];
        sort_results(&mut results);
        let ids: Vec<_> = results.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["c", "a", "b"]);
    }
}
