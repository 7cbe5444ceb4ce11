//! Vector backends over `embedding_chunk`.

use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use sqlx::{Row, SqlitePool};
use std::collections::HashMap;

use super::{finalize, Candidate, SearchFilters, VectorBackend, OVERFETCH_FACTOR};
use crate::embedding::{cosine_distance, VectorEncoding};
use crate::models::{Hit, HitSource};
use crate::repo::{get_entities, vector_from_row};

/// Always empty. Used when vector search is switched off.
pub struct NullVectorBackend;

#[async_trait]
impl VectorBackend for NullVectorBackend {
    fn name(&self) -> &'static str {
        "none"
    }

    async fn search(
        &self,
        _query_vec: &[f32],
        _filters: &SearchFilters,
        _k: usize,
    ) -> Result<Vec<Hit>> {
        Ok(Vec::new())
    }
}

/// Exact nearest-neighbor scan by cosine distance.
///
/// Each entity is scored by its closest chunk; `best_chunk_id` names that
/// chunk. Rows whose dimensionality differs from the query are skipped.
pub struct NearestNeighborBackend {
    pool: SqlitePool,
    encoding: VectorEncoding,
    half_life_days: f64,
}

impl NearestNeighborBackend {
    pub fn new(pool: SqlitePool, encoding: VectorEncoding, half_life_days: f64) -> Self {
        Self {
            pool,
            encoding,
            half_life_days,
        }
    }
}

struct Nearest {
    distance: f64,
    chunk_id: String,
}

#[async_trait]
impl VectorBackend for NearestNeighborBackend {
    fn name(&self) -> &'static str {
        "nearest"
    }

    async fn search(&self, query_vec: &[f32], filters: &SearchFilters, k: usize) -> Result<Vec<Hit>> {
        if query_vec.is_empty() || k == 0 {
            return Ok(Vec::new());
        }

        let rows = sqlx::query(
            "SELECT entity_uid, chunk_id, vector, dims FROM embedding_chunk WHERE dims = ?",
        )
        .bind(query_vec.len() as i64)
        .fetch_all(&self.pool)
        .await?;

        let mut nearest: HashMap<String, Nearest> = HashMap::new();
        for row in &rows {
            let vector = vector_from_row(row, self.encoding)?;
            if vector.len() != query_vec.len() {
                continue;
            }
            let distance = cosine_distance(query_vec, &vector);
            let entity_uid: String = row.try_get("entity_uid")?;
            let chunk_id: String = row.try_get("chunk_id")?;
            match nearest.get_mut(&entity_uid) {
                Some(best) if best.distance <= distance => {}
                Some(best) => {
                    best.distance = distance;
                    best.chunk_id = chunk_id;
                }
                None => {
                    nearest.insert(entity_uid, Nearest { distance, chunk_id });
                }
            }
        }

        let mut ranked: Vec<(String, Nearest)> = nearest.into_iter().collect();
        ranked.sort_by(|a, b| {
            a.1.distance
                .partial_cmp(&b.1.distance)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.0.cmp(&b.0))
        });
        ranked.truncate(k.saturating_mul(OVERFETCH_FACTOR));

        let uids: Vec<String> = ranked.iter().map(|(uid, _)| uid.clone()).collect();
        let mut conn = self.pool.acquire().await?;
        let mut entities = get_entities(&mut conn, &uids).await?;

        let candidates: Vec<Candidate> = ranked
            .into_iter()
            .filter_map(|(uid, best)| {
                let entity = entities.remove(&uid)?;
                Some(Candidate {
                    entity,
                    raw: (1.0 - best.distance).max(0.0),
                    best_chunk_id: Some(best.chunk_id),
                })
            })
            .collect();

        Ok(finalize(
            candidates,
            filters,
            k,
            HitSource::Vector,
            Utc::now(),
            self.half_life_days,
        ))
    }
}
