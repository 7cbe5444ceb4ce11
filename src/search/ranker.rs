//! Merge per-source hit lists into one ranked list.
//!
//! ```text
//! final = w_sem · semantic + w_lex · lexical + w_q · quality + w_r · recency
//! ```
//!
//! - each source is deduplicated by entity, keeping its maximum score;
//! - an entity missing from a source scores 0 for that source;
//! - quality and recency are averaged over the sources that reported them;
//! - ties keep insertion order: lexical entities first, then vector-only.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::models::{Hit, RankedResult};

/// Blend weights. Non-negative; they need not sum to 1.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SearchWeights {
    #[serde(default = "default_semantic")]
    pub semantic: f64,
    #[serde(default = "default_lexical")]
    pub lexical: f64,
    #[serde(default = "default_minor")]
    pub quality: f64,
    #[serde(default = "default_minor")]
    pub recency: f64,
}

fn default_semantic() -> f64 {
    0.55
}
fn default_lexical() -> f64 {
    0.25
}
fn default_minor() -> f64 {
    0.10
}

impl Default for SearchWeights {
    fn default() -> Self {
        Self {
            semantic: default_semantic(),
            lexical: default_lexical(),
            quality: default_minor(),
            recency: default_minor(),
        }
    }
}

impl SearchWeights {
    pub fn validate(&self) -> Result<()> {
        for (name, w) in [
            ("semantic", self.semantic),
            ("lexical", self.lexical),
            ("quality", self.quality),
            ("recency", self.recency),
        ] {
            if !(w.is_finite() && w >= 0.0) {
                anyhow::bail!("search.weights.{} must be a non-negative number", name);
            }
        }
        Ok(())
    }
}

#[derive(Default)]
struct Signals {
    lexical: f64,
    semantic: f64,
    quality: Vec<f64>,
    recency: Vec<f64>,
    best_chunk_id: Option<String>,
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        0.0
    } else {
        values.iter().sum::<f64>() / values.len() as f64
    }
}

/// Keep the best hit per entity, in first-seen order.
fn dedupe_max<'a>(hits: impl Iterator<Item = &'a Hit>) -> Vec<&'a Hit> {
    let mut index: HashMap<&str, usize> = HashMap::new();
    let mut out: Vec<&Hit> = Vec::new();
    for hit in hits {
        match index.get(hit.entity_id.as_str()) {
            Some(&i) => {
                if hit.score > out[i].score {
                    out[i] = hit;
                }
            }
            None => {
                index.insert(&hit.entity_id, out.len());
                out.push(hit);
            }
        }
    }
    out
}

/// The list a hit arrives in decides its slot: everything in
/// `lexical_hits` (fallback hits included) is lexical evidence and
/// everything in `vector_hits` is semantic, whatever its `source` tag.
pub fn merge_and_score(
    lexical_hits: &[Hit],
    vector_hits: &[Hit],
    weights: &SearchWeights,
) -> Vec<RankedResult> {
    let lexical = dedupe_max(lexical_hits.iter());
    let vector = dedupe_max(vector_hits.iter());

    let mut order: Vec<&str> = Vec::new();
    let mut signals: HashMap<&str, Signals> = HashMap::new();

    let tagged = lexical
        .iter()
        .map(|hit| (false, *hit))
        .chain(vector.iter().map(|hit| (true, *hit)));
    for (semantic, hit) in tagged {
        let entry = signals.entry(hit.entity_id.as_str()).or_insert_with(|| {
            order.push(hit.entity_id.as_str());
            Signals::default()
        });
        if semantic {
            entry.semantic = hit.score;
            entry.best_chunk_id = hit.best_chunk_id.clone();
        } else {
            entry.lexical = hit.score;
        }
        entry.quality.extend(hit.quality);
        entry.recency.extend(hit.recency);
    }

    let mut results: Vec<RankedResult> = order
        .into_iter()
        .filter_map(|id| {
            let s = signals.remove(id)?;
            let quality = mean(&s.quality);
            let recency = mean(&s.recency);
            let score_final = weights.semantic * s.semantic
                + weights.lexical * s.lexical
                + weights.quality * quality
                + weights.recency * recency;
            Some(RankedResult {
                entity_id: id.to_string(),
                score_lexical: s.lexical,
                score_semantic: s.semantic,
                score_quality: quality,
                score_recency: recency,
                score_final,
                best_chunk_id: s.best_chunk_id,
            })
        })
        .collect();

    // Stable: ties keep insertion order.
    results.sort_by(|a, b| {
        b.score_final
            .partial_cmp(&a.score_final)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    results
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::HitSource;

    fn hit(id: &str, score: f64, source: HitSource) -> Hit {
        Hit {
            entity_id: id.to_string(),
            score,
            source,
            quality: None,
            recency: None,
            best_chunk_id: None,
        }
    }

    fn only(semantic: f64, lexical: f64) -> SearchWeights {
        SearchWeights {
            semantic,
            lexical,
            quality: 0.0,
            recency: 0.0,
        }
    }

    #[test]
    fn test_blend_of_both_sources() {
        let lex = vec![hit("X", 0.8, HitSource::Lexical)];
        let vec = vec![hit("X", 0.6, HitSource::Vector)];
        let results = merge_and_score(&lex, &vec, &only(0.5, 0.5));
        assert_eq!(results.len(), 1);
        assert!((results[0].score_final - 0.7).abs() < 1e-9);
        assert!((results[0].score_lexical - 0.8).abs() < 1e-9);
        assert!((results[0].score_semantic - 0.6).abs() < 1e-9);
    }

    #[test]
    fn test_union_and_missing_source_is_zero() {
        let lex = vec![hit("A", 1.0, HitSource::Lexical), hit("B", 0.5, HitSource::Lexical)];
        let vec = vec![hit("C", 1.0, HitSource::Vector)];
        let results = merge_and_score(&lex, &vec, &only(1.0, 1.0));
        let ids: Vec<&str> = results.iter().map(|r| r.entity_id.as_str()).collect();
        assert_eq!(ids, vec!["A", "C", "B"]);
        assert_eq!(results[1].score_lexical, 0.0);
    }

    #[test]
    fn test_duplicates_keep_max() {
        let lex = vec![hit("A", 0.2, HitSource::Lexical), hit("A", 0.9, HitSource::Lexical)];
        let results = merge_and_score(&lex, &[], &only(0.0, 1.0));
        assert_eq!(results.len(), 1);
        assert!((results[0].score_final - 0.9).abs() < 1e-9);
    }

    #[test]
    fn test_slot_follows_list_not_tag() {
        let lex = vec![hit("A", 0.7, HitSource::Vector)];
        let vec = vec![hit("B", 0.4, HitSource::Lexical)];
        let results = merge_and_score(&lex, &vec, &only(1.0, 1.0));
        assert_eq!(results.len(), 2);
        assert!((results[0].score_lexical - 0.7).abs() < 1e-9);
        assert_eq!(results[0].score_semantic, 0.0);
        assert!((results[1].score_semantic - 0.4).abs() < 1e-9);
        assert_eq!(results[1].score_lexical, 0.0);
    }

    #[test]
    fn test_fallback_counts_as_lexical() {
        let lex = vec![hit("A", 1.0, HitSource::Fallback)];
        let results = merge_and_score(&lex, &[], &only(0.0, 0.25));
        assert!((results[0].score_lexical - 1.0).abs() < 1e-9);
        assert!((results[0].score_final - 0.25).abs() < 1e-9);
    }

    #[test]
    fn test_quality_and_recency_averaged_over_reporting_sources() {
        let mut l = hit("A", 0.0, HitSource::Lexical);
        l.quality = Some(0.4);
        l.recency = Some(1.0);
        let mut v = hit("A", 0.0, HitSource::Vector);
        v.quality = Some(0.8);
        let weights = SearchWeights {
            semantic: 0.0,
            lexical: 0.0,
            quality: 1.0,
            recency: 1.0,
        };
        let results = merge_and_score(&[l], &[v], &weights);
        assert!((results[0].score_quality - 0.6).abs() < 1e-9);
        assert!((results[0].score_recency - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_ties_keep_insertion_order() {
        let lex = vec![hit("B", 0.5, HitSource::Lexical)];
        let vec = vec![hit("A", 0.5, HitSource::Vector)];
        let results = merge_and_score(&lex, &vec, &only(1.0, 1.0));
        assert_eq!(results[0].entity_id, "B");
        assert_eq!(results[1].entity_id, "A");
    }

    #[test]
    fn test_best_chunk_from_vector_hit() {
        let mut v = hit("A", 0.3, HitSource::Vector);
        v.best_chunk_id = Some("chunk-7".to_string());
        let results = merge_and_score(&[], &[v], &SearchWeights::default());
        assert_eq!(results[0].best_chunk_id.as_deref(), Some("chunk-7"));
    }

    #[test]
    fn test_weights_validation() {
        assert!(SearchWeights::default().validate().is_ok());
        assert!(only(-1.0, 0.0).validate().is_err());
        assert!(only(f64::NAN, 0.0).validate().is_err());
    }
}
