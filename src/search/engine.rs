//! Search orchestration: mode dispatch, visibility, uid fallback, paging.
//!
//! The engine owns nothing but handles: backends come from a
//! [`Backends`](crate::backends::Backends) container built once at start-up.
//!
//! Visibility: unless `include_pending` is set, only READY entities
//! (`registered_at` present and `registration_error` null) are returned.
//! Backend failures at query time are logged and treated as empty results;
//! only storage errors from the visibility check propagate.

use anyhow::Result;
use chrono::Utc;
use serde::Deserialize;
use sqlx::SqlitePool;
use std::sync::Arc;

use super::ranker::{merge_and_score, SearchWeights};
use super::scoring::recency_score;
use super::{LexicalBackend, SearchFilters, SearchMode, VectorBackend, OVERFETCH_FACTOR};
use crate::backends::Backends;
use crate::config::SearchConfig;
use crate::embedding::Embedder;
use crate::models::{looks_like_uid, Entity, EntityType, Hit, HitSource, RankedResult};
use crate::repo;

/// Uid-fragment fallback inspects at most this many candidates.
const FALLBACK_SCAN: i64 = 50;

/// A complete search call.
#[derive(Debug, Clone, Deserialize)]
pub struct SearchRequest {
    pub query: String,
    #[serde(default)]
    pub mode: SearchMode,
    #[serde(default)]
    pub types: Vec<EntityType>,
    #[serde(default)]
    pub capabilities: Vec<String>,
    #[serde(default)]
    pub frameworks: Vec<String>,
    #[serde(default)]
    pub providers: Vec<String>,
    /// `None` uses the configured default.
    #[serde(default)]
    pub include_pending: Option<bool>,
    #[serde(default = "default_limit")]
    pub limit: usize,
    #[serde(default)]
    pub offset: usize,
}

fn default_limit() -> usize {
    10
}

impl SearchRequest {
    pub fn new(query: &str) -> Self {
        Self {
            query: query.to_string(),
            mode: SearchMode::default(),
            types: Vec::new(),
            capabilities: Vec::new(),
            frameworks: Vec::new(),
            providers: Vec::new(),
            include_pending: None,
            limit: default_limit(),
            offset: 0,
        }
    }

    fn filters(&self) -> SearchFilters {
        SearchFilters {
            types: self.types.clone(),
            capabilities: self.capabilities.clone(),
            frameworks: self.frameworks.clone(),
            providers: self.providers.clone(),
        }
    }
}

pub struct SearchEngine {
    pool: SqlitePool,
    lexical: Arc<dyn LexicalBackend>,
    vector: Arc<dyn VectorBackend>,
    embedder: Arc<dyn Embedder>,
    weights: SearchWeights,
    include_pending: bool,
    half_life_days: f64,
}

impl SearchEngine {
    pub fn new(pool: SqlitePool, backends: &Backends, config: &SearchConfig) -> Self {
        Self {
            pool,
            lexical: backends.lexical.clone(),
            vector: backends.vector.clone(),
            embedder: backends.embedder.clone(),
            weights: config.weights,
            include_pending: config.include_pending,
            half_life_days: config.recency_half_life_days,
        }
    }

    pub fn with_weights(mut self, weights: SearchWeights) -> Self {
        self.weights = weights;
        self
    }

    pub fn weights(&self) -> &SearchWeights {
        &self.weights
    }

    /// Lexical search with uid fallback, visibility and paging.
    pub async fn run_keyword(
        &self,
        query: &str,
        types: &[EntityType],
        include_pending: bool,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<Hit>> {
        let filters = SearchFilters::for_types(types);
        let hits = self
            .keyword_hits(query, &filters, include_pending, offset + limit)
            .await?;
        Ok(page(hits, limit, offset))
    }

    /// Vector search over the embedded query, with visibility and paging.
    pub async fn run_semantic(
        &self,
        query: &str,
        types: &[EntityType],
        include_pending: bool,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<Hit>> {
        let filters = SearchFilters::for_types(types);
        let hits = self
            .semantic_hits(query, &filters, include_pending, offset + limit)
            .await?;
        Ok(page(hits, limit, offset))
    }

    /// Both paths independently, merged by the ranker, then paged.
    pub async fn run_hybrid(
        &self,
        query: &str,
        types: &[EntityType],
        include_pending: bool,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<RankedResult>> {
        let filters = SearchFilters::for_types(types);
        self.hybrid(query, &filters, include_pending, limit, offset)
            .await
    }

    /// Dispatch on `request.mode`. Every mode goes through the ranker so
    /// results carry the same score breakdown.
    pub async fn search(&self, request: &SearchRequest) -> Result<Vec<RankedResult>> {
        let filters = request.filters();
        let include_pending = request.include_pending.unwrap_or(self.include_pending);
        let k = request.offset + request.limit;

        let ranked = match request.mode {
            SearchMode::Hybrid => {
                return self
                    .hybrid(
                        &request.query,
                        &filters,
                        include_pending,
                        request.limit,
                        request.offset,
                    )
                    .await;
            }
            SearchMode::Keyword => {
                let hits = self
                    .keyword_hits(&request.query, &filters, include_pending, k)
                    .await?;
                merge_and_score(&hits, &[], &self.weights)
            }
            SearchMode::Semantic => {
                let hits = self
                    .semantic_hits(&request.query, &filters, include_pending, k)
                    .await?;
                merge_and_score(&[], &hits, &self.weights)
            }
        };
        Ok(page(ranked, request.limit, request.offset))
    }

    async fn hybrid(
        &self,
        query: &str,
        filters: &SearchFilters,
        include_pending: bool,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<RankedResult>> {
        let k = offset + limit;
        let lexical = self.keyword_hits(query, filters, include_pending, k).await?;
        let vector = self.semantic_hits(query, filters, include_pending, k).await?;
        tracing::debug!(
            lexical = lexical.len(),
            vector = vector.len(),
            "Merging hybrid hits"
        );
        Ok(page(
            merge_and_score(&lexical, &vector, &self.weights),
            limit,
            offset,
        ))
    }

    /// Pending entities can crowd out visible ones, so ask backends for
    /// more when visibility filtering applies.
    fn fetch_size(k: usize, include_pending: bool) -> usize {
        if include_pending {
            k
        } else {
            k.saturating_mul(OVERFETCH_FACTOR)
        }
    }

    async fn keyword_hits(
        &self,
        query: &str,
        filters: &SearchFilters,
        include_pending: bool,
        k: usize,
    ) -> Result<Vec<Hit>> {
        if k == 0 {
            return Ok(Vec::new());
        }
        let hits = match self
            .lexical
            .search(query, filters, Self::fetch_size(k, include_pending))
            .await
        {
            Ok(hits) => hits,
            Err(e) => {
                tracing::warn!(backend = self.lexical.name(), error = %e, "Lexical search failed");
                Vec::new()
            }
        };
        let mut hits = self.visible(hits, include_pending).await?;
        hits.truncate(k);

        if hits.is_empty() && !query.trim().is_empty() {
            if let Some(hit) = self.fallback(query.trim(), filters, include_pending).await? {
                tracing::debug!(uid = %hit.entity_id, "Lexical search fell back to uid match");
                hits.push(hit);
            }
        }
        Ok(hits)
    }

    async fn semantic_hits(
        &self,
        query: &str,
        filters: &SearchFilters,
        include_pending: bool,
        k: usize,
    ) -> Result<Vec<Hit>> {
        if k == 0 || query.trim().is_empty() || !self.embedder.is_enabled() {
            return Ok(Vec::new());
        }
        let query_vec = match self.embedder.encode(&[query.to_string()]).await {
            Ok(mut vectors) if !vectors.is_empty() => vectors.swap_remove(0),
            Ok(_) => return Ok(Vec::new()),
            Err(e) => {
                tracing::warn!(model = self.embedder.model_id(), error = %e, "Query embedding failed");
                return Ok(Vec::new());
            }
        };
        let hits = match self
            .vector
            .search(&query_vec, filters, Self::fetch_size(k, include_pending))
            .await
        {
            Ok(hits) => hits,
            Err(e) => {
                tracing::warn!(backend = self.vector.name(), error = %e, "Vector search failed");
                Vec::new()
            }
        };
        let mut hits = self.visible(hits, include_pending).await?;
        hits.truncate(k);
        Ok(hits)
    }

    async fn visible(&self, hits: Vec<Hit>, include_pending: bool) -> Result<Vec<Hit>> {
        if include_pending || hits.is_empty() {
            return Ok(hits);
        }
        let uids: Vec<String> = hits.iter().map(|h| h.entity_id.clone()).collect();
        let mut conn = self.pool.acquire().await?;
        let ready = repo::ready_subset(&mut conn, &uids).await?;
        Ok(hits
            .into_iter()
            .filter(|h| ready.contains(&h.entity_id))
            .collect())
    }

    /// Exact uid match for natural-key queries, otherwise the newest entity
    /// whose uid contains the query. At most one hit, scored 1.0.
    async fn fallback(
        &self,
        query: &str,
        filters: &SearchFilters,
        include_pending: bool,
    ) -> Result<Option<Hit>> {
        let mut conn = self.pool.acquire().await?;
        let candidates = if looks_like_uid(query) {
            repo::find_by_uid_ci(&mut conn, query)
                .await?
                .into_iter()
                .collect()
        } else {
            repo::find_by_uid_fragment(&mut conn, query, FALLBACK_SCAN).await?
        };

        let eligible = |e: &Entity| filters.matches(e) && (include_pending || e.is_ready());
        Ok(candidates
            .into_iter()
            .find(|e| eligible(e))
            .map(|entity| Hit {
                score: 1.0,
                source: HitSource::Fallback,
                quality: Some(entity.quality_score),
                recency: Some(recency_score(
                    Some(entity.effective_ts()),
                    Utc::now(),
                    self.half_life_days,
                )),
                entity_id: entity.uid,
                best_chunk_id: None,
            }))
    }
}

fn page<T>(items: Vec<T>, limit: usize, offset: usize) -> Vec<T> {
    items.into_iter().skip(offset).take(limit).collect()
}
