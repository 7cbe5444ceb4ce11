//! Lexical backends over the `entity` table.

use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use sqlx::SqlitePool;
use std::collections::HashSet;

use super::{finalize, Candidate, LexicalBackend, SearchFilters, OVERFETCH_FACTOR};
use crate::models::{Entity, Hit, HitSource};
use crate::repo::{entity_from_row, ENTITY_COLUMNS};

/// Always empty. Used when lexical search is switched off.
pub struct NullLexicalBackend;

#[async_trait]
impl LexicalBackend for NullLexicalBackend {
    fn name(&self) -> &'static str {
        "none"
    }

    async fn search(&self, _query: &str, _filters: &SearchFilters, _k: usize) -> Result<Vec<Hit>> {
        Ok(Vec::new())
    }
}

// ============ Trigram similarity ============

/// Trigrams of `text` the way `pg_trgm` builds them: each alphanumeric word
/// is lowercased and padded with two leading blanks and one trailing blank.
pub fn trigrams(text: &str) -> HashSet<[char; 3]> {
    let mut out = HashSet::new();
    for word in text
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
    {
        let padded: Vec<char> = "  "
            .chars()
            .chain(word.to_lowercase().chars())
            .chain(std::iter::once(' '))
            .collect();
        for w in padded.windows(3) {
            out.insert([w[0], w[1], w[2]]);
        }
    }
    out
}

/// Shared trigrams over all distinct trigrams, in `[0, 1]`.
pub fn trigram_similarity(a: &str, b: &str) -> f64 {
    let ta = trigrams(a);
    let tb = trigrams(b);
    if ta.is_empty() || tb.is_empty() {
        return 0.0;
    }
    let shared = ta.intersection(&tb).count();
    let union = ta.len() + tb.len() - shared;
    shared as f64 / union as f64
}

fn best_field_similarity(entity: &Entity, query: &str) -> f64 {
    [
        Some(entity.name.as_str()),
        entity.summary.as_deref(),
        entity.description.as_deref(),
    ]
    .into_iter()
    .flatten()
    .map(|field| trigram_similarity(field, query))
    .fold(0.0, f64::max)
}

/// Trigram similarity backend.
///
/// A case-insensitive substring match on name, summary or description
/// narrows the rows in SQL; similarity is then computed per field and the
/// best field wins.
pub struct SimilarityBackend {
    pool: SqlitePool,
    half_life_days: f64,
}

impl SimilarityBackend {
    pub fn new(pool: SqlitePool, half_life_days: f64) -> Self {
        Self {
            pool,
            half_life_days,
        }
    }
}

#[async_trait]
impl LexicalBackend for SimilarityBackend {
    fn name(&self) -> &'static str {
        "similarity"
    }

    async fn search(&self, query: &str, filters: &SearchFilters, k: usize) -> Result<Vec<Hit>> {
        let needle = query.trim().to_lowercase();
        let sql = format!(
            "SELECT {} FROM entity
             WHERE instr(lower(name), ?1) > 0
                OR instr(lower(COALESCE(summary, '')), ?1) > 0
                OR instr(lower(COALESCE(description, '')), ?1) > 0",
            ENTITY_COLUMNS
        );
        let rows = sqlx::query(&sql)
            .bind(&needle)
            .fetch_all(&self.pool)
            .await?;

        let mut candidates = rows
            .iter()
            .map(|row| {
                let entity = entity_from_row(row)?;
                let raw = best_field_similarity(&entity, &needle);
                Ok(Candidate {
                    entity,
                    raw,
                    best_chunk_id: None,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        candidates.sort_by(|a, b| {
            b.raw
                .partial_cmp(&a.raw)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.entity.uid.cmp(&b.entity.uid))
        });
        candidates.truncate(k.saturating_mul(OVERFETCH_FACTOR));

        Ok(finalize(
            candidates,
            filters,
            k,
            HitSource::Lexical,
            Utc::now(),
            self.half_life_days,
        ))
    }
}

// ============ Portable LIKE fallback ============

/// Substring matching that works on any store. Scores each row by the
/// share of name/summary/description fields containing the query.
pub struct LikeBackend {
    pool: SqlitePool,
    half_life_days: f64,
}

impl LikeBackend {
    pub fn new(pool: SqlitePool, half_life_days: f64) -> Self {
        Self {
            pool,
            half_life_days,
        }
    }
}

const LIKE_FIELDS: f64 = 3.0;

fn like_score(entity: &Entity, needle: &str) -> f64 {
    if needle.is_empty() {
        return 0.0;
    }
    let matched = [
        Some(entity.name.as_str()),
        entity.summary.as_deref(),
        entity.description.as_deref(),
    ]
    .into_iter()
    .flatten()
    .filter(|field| field.to_lowercase().contains(needle))
    .count();
    matched as f64 / LIKE_FIELDS
}

#[async_trait]
impl LexicalBackend for LikeBackend {
    fn name(&self) -> &'static str {
        "like"
    }

    async fn search(&self, query: &str, filters: &SearchFilters, k: usize) -> Result<Vec<Hit>> {
        let needle = query.trim().to_lowercase();
        let sql = format!(
            "SELECT {} FROM entity ORDER BY COALESCE(release_ts, created_at) DESC, uid ASC",
            ENTITY_COLUMNS
        );
        let rows = sqlx::query(&sql).fetch_all(&self.pool).await?;

        let mut candidates = Vec::new();
        for row in &rows {
            let entity = entity_from_row(row)?;
            let raw = like_score(&entity, &needle);
            // An empty query lists everything at score 0.
            if needle.is_empty() || raw > 0.0 {
                candidates.push(Candidate {
                    entity,
                    raw,
                    best_chunk_id: None,
                });
            }
        }

        candidates.sort_by(|a, b| {
            b.raw
                .partial_cmp(&a.raw)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        candidates.truncate(k.saturating_mul(OVERFETCH_FACTOR));

        Ok(finalize(
            candidates,
            filters,
            k,
            HitSource::Lexical,
            Utc::now(),
            self.half_life_days,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trigram_identical_and_disjoint() {
        assert!((trigram_similarity("pdf", "PDF") - 1.0).abs() < 1e-9);
        assert_eq!(trigram_similarity("abc", "xyz"), 0.0);
        assert_eq!(trigram_similarity("", "abc"), 0.0);
    }

    #[test]
    fn test_trigram_partial_overlap() {
        // "word" -> {"  w", " wo", "wor", "ord", "rd "}
        assert_eq!(trigrams("word").len(), 5);
        let close = trigram_similarity("summarizer", "summarize");
        let far = trigram_similarity("summarizer", "weather");
        assert!(close > 0.5, "close = {}", close);
        assert!(far < close);
    }

    #[test]
    fn test_trigrams_ignore_punctuation() {
        assert_eq!(trigrams("pdf-tools"), trigrams("pdf tools"));
    }
}
