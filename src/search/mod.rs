//! Hybrid catalog search: backends, scoring, ranking, orchestration.
//!
//! ```text
//!              ┌──────────────────┐
//!  query ────▶ │  LexicalBackend  │──▶ hits (lexical) ──┐
//!        │     └──────────────────┘                     │   ┌────────┐
//!        │     ┌──────────┐   ┌────────────────┐        ├──▶│ ranker │──▶ results
//!        └───▶ │ Embedder │──▶│ VectorBackend  │──▶ hits ┘   └────────┘
//!              └──────────┘   └────────────────┘  (vector)
//! ```
//!
//! Every backend follows the same contract: retrieve an over-fetched
//! candidate set, apply attribute filters in process, min-max normalize the
//! raw scores over what survived, then truncate to `k`. Each [`Hit`] also
//! carries the entity's quality score and recency signal.
//!
//! | Backend | Kind | Raw score |
//! |---------|------|-----------|
//! | [`lexical::SimilarityBackend`] | lexical | max trigram similarity of name/summary/description |
//! | [`lexical::LikeBackend`] | lexical | matching fields / 3 |
//! | [`vector::NearestNeighborBackend`] | vector | `max(0, 1 - min cosine distance)` |
//! | [`lexical::NullLexicalBackend`], [`vector::NullVectorBackend`] | either | none (always empty) |

pub mod engine;
pub mod lexical;
pub mod ranker;
pub mod scoring;
pub mod vector;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::str::FromStr;

use crate::backends::Backends;
use crate::config::Config;
use crate::db;
use crate::models::{Entity, EntityType, Hit, HitSource};
use crate::repo;
use engine::{SearchEngine, SearchRequest};
use scoring::{has_overlap, normalize_minmax, recency_score};

/// Backends retrieve this many times `k` before filtering.
pub const OVERFETCH_FACTOR: usize = 4;

/// Search mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchMode {
    Keyword,
    Semantic,
    #[default]
    Hybrid,
}

impl FromStr for SearchMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "keyword" => Ok(SearchMode::Keyword),
            "semantic" => Ok(SearchMode::Semantic),
            "hybrid" => Ok(SearchMode::Hybrid),
            other => anyhow::bail!(
                "Unknown search mode: '{}'. Must be keyword, semantic, or hybrid.",
                other
            ),
        }
    }
}

/// Attribute filters applied after retrieval. Empty lists match anything.
#[derive(Debug, Clone, Default)]
pub struct SearchFilters {
    pub types: Vec<EntityType>,
    pub capabilities: Vec<String>,
    pub frameworks: Vec<String>,
    pub providers: Vec<String>,
}

impl SearchFilters {
    pub fn for_types(types: &[EntityType]) -> Self {
        Self {
            types: types.to_vec(),
            ..Self::default()
        }
    }

    pub fn matches(&self, entity: &Entity) -> bool {
        (self.types.is_empty() || self.types.contains(&entity.kind))
            && (self.capabilities.is_empty() || has_overlap(&self.capabilities, &entity.capabilities))
            && (self.frameworks.is_empty() || has_overlap(&self.frameworks, &entity.frameworks))
            && (self.providers.is_empty() || has_overlap(&self.providers, &entity.providers))
    }
}

/// Lexical retrieval over entity text fields.
#[async_trait]
pub trait LexicalBackend: Send + Sync {
    fn name(&self) -> &'static str;

    async fn search(&self, query: &str, filters: &SearchFilters, k: usize) -> Result<Vec<Hit>>;

    /// Refresh any index for `entities`. Relational backends read the
    /// entity table directly, so the default does nothing.
    async fn index(&self, _entities: &[Entity]) -> Result<usize> {
        Ok(0)
    }

    async fn delete(&self, _uids: &[String]) -> Result<usize> {
        Ok(0)
    }
}

/// Nearest-neighbor retrieval over stored chunk vectors.
#[async_trait]
pub trait VectorBackend: Send + Sync {
    fn name(&self) -> &'static str;

    async fn search(&self, query_vec: &[f32], filters: &SearchFilters, k: usize)
        -> Result<Vec<Hit>>;

    /// Vectors are written with their chunks and removed by cascade, so
    /// the default does nothing.
    async fn delete_vectors(&self, _uids: &[String]) -> Result<usize> {
        Ok(0)
    }
}

/// A retrieved entity with its backend-specific raw score.
#[derive(Debug, Clone)]
pub struct Candidate {
    pub entity: Entity,
    pub raw: f64,
    pub best_chunk_id: Option<String>,
}

/// Filter, normalize over the filtered set, then truncate to `k`.
/// `candidates` must already be ordered best-first.
pub fn finalize(
    candidates: Vec<Candidate>,
    filters: &SearchFilters,
    k: usize,
    source: HitSource,
    now: DateTime<Utc>,
    half_life_days: f64,
) -> Vec<Hit> {
    let kept: Vec<Candidate> = candidates
        .into_iter()
        .filter(|c| filters.matches(&c.entity))
        .collect();
    let raw: Vec<f64> = kept.iter().map(|c| c.raw).collect();
    let normalized = normalize_minmax(&raw);

    kept.into_iter()
        .zip(normalized)
        .take(k)
        .map(|(c, score)| Hit {
            score,
            source,
            quality: Some(c.entity.quality_score),
            recency: Some(recency_score(
                Some(c.entity.effective_ts()),
                now,
                half_life_days,
            )),
            entity_id: c.entity.uid,
            best_chunk_id: c.best_chunk_id,
        })
        .collect()
}

/// CLI entry point: runs `request` and prints ranked results to stdout.
pub async fn run_search(config: &Config, request: &SearchRequest) -> Result<()> {
    let pool = db::connect(config).await?;
    let backends = Backends::from_config(config, &pool).await?;
    let engine = SearchEngine::new(pool.clone(), &backends, &config.search);

    let results = engine.search(request).await?;
    if results.is_empty() {
        println!("No results.");
        pool.close().await;
        return Ok(());
    }

    let uids: Vec<String> = results.iter().map(|r| r.entity_id.clone()).collect();
    let mut conn = pool.acquire().await?;
    let entities = repo::get_entities(&mut conn, &uids).await?;
    drop(conn);

    for (i, result) in results.iter().enumerate() {
        let Some(entity) = entities.get(&result.entity_id) else {
            continue;
        };
        println!(
            "{}. [{:.3}] {} / {}",
            request.offset + i + 1,
            result.score_final,
            entity.kind,
            entity.name
        );
        if let Some(summary) = &entity.summary {
            println!("    summary: {}", summary.replace('\n', " ").trim());
        }
        println!(
            "    scores: lexical {:.2}, semantic {:.2}, quality {:.2}, recency {:.2}",
            result.score_lexical, result.score_semantic, result.score_quality, result.score_recency
        );
        if !entity.capabilities.is_empty() {
            println!("    capabilities: {}", entity.capabilities.join(", "));
        }
        println!("    uid: {}", entity.uid);
        println!();
    }

    pool.close().await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    pub(crate) fn entity(uid: &str, kind: EntityType, caps: &[&str]) -> Entity {
        let now = Utc::now();
        Entity {
            uid: uid.to_string(),
            kind,
            name: uid.to_string(),
            version: "1".to_string(),
            summary: None,
            description: None,
            license: None,
            homepage: None,
            source_url: None,
            capabilities: caps.iter().map(|c| c.to_string()).collect(),
            frameworks: Vec::new(),
            providers: Vec::new(),
            quality_score: 0.5,
            release_ts: None,
            created_at: now,
            updated_at: now,
            registered_at: None,
            registration_error: None,
            manifests: BTreeMap::new(),
            protocols: Vec::new(),
            mcp_registration: None,
        }
    }

    fn candidate(uid: &str, kind: EntityType, caps: &[&str], raw: f64) -> Candidate {
        Candidate {
            entity: entity(uid, kind, caps),
            raw,
            best_chunk_id: None,
        }
    }

    #[test]
    fn test_filter_then_normalize_then_truncate() {
        let candidates = vec![
            candidate("a", EntityType::Tool, &["pdf"], 0.9),
            candidate("b", EntityType::Agent, &["pdf"], 0.8),
            candidate("c", EntityType::Tool, &["pdf"], 0.5),
            candidate("d", EntityType::Tool, &["pdf"], 0.1),
        ];
        let filters = SearchFilters::for_types(&[EntityType::Tool]);
        let hits = finalize(candidates, &filters, 2, HitSource::Lexical, Utc::now(), 180.0);

        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].entity_id, "a");
        assert!((hits[0].score - 1.0).abs() < 1e-9);
        assert_eq!(hits[1].entity_id, "c");
        assert!((hits[1].score - 0.5).abs() < 1e-9);
        assert_eq!(hits[0].quality, Some(0.5));
        assert!((hits[0].recency.unwrap() - 1.0).abs() < 1e-3);
    }

    #[test]
    fn test_capability_overlap_filter() {
        let filters = SearchFilters {
            capabilities: vec!["ocr".to_string()],
            ..SearchFilters::default()
        };
        assert!(filters.matches(&entity("a", EntityType::Tool, &["pdf", "ocr"])));
        assert!(!filters.matches(&entity("b", EntityType::Tool, &["pdf"])));
    }

    #[test]
    fn test_single_candidate_normalizes_to_zero() {
        let hits = finalize(
            vec![candidate("a", EntityType::Tool, &[], 0.42)],
            &SearchFilters::default(),
            5,
            HitSource::Vector,
            Utc::now(),
            180.0,
        );
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].score, 0.0);
    }

    #[test]
    fn test_mode_parse() {
        assert_eq!("semantic".parse::<SearchMode>().unwrap(), SearchMode::Semantic);
        assert!("fuzzy".parse::<SearchMode>().is_err());
    }
}
