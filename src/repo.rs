//! Entity repository: catalog record lifecycle in SQLite.
//!
//! Every function takes a `&mut SqliteConnection`, so callers decide the
//! transaction boundary. Ingestion runs them inside one transaction per
//! remote with a savepoint per manifest; search reads through a pooled
//! connection.
//!
//! # Coalesce semantics
//!
//! Re-ingesting an entity never erases data: an incoming `None`, empty
//! string, or empty list keeps the stored value. Protocol sub-manifests
//! merge key-wise (incoming wins per key) and protocol tags are a sorted
//! set union. `created_at` and registration state survive every upsert.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::sqlite::SqliteRow;
use sqlx::{QueryBuilder, Row, Sqlite, SqliteConnection};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

use crate::embedding::{blob_to_vec, EncodedVector, VectorEncoding};
use crate::manifest::Manifest;
use crate::models::{entity_uid, Chunk, Entity, EntityType, IndexedVector};

pub const ENTITY_COLUMNS: &str = "uid, type, name, version, summary, description, license, \
    homepage, source_url, capabilities, frameworks, providers, quality_score, release_ts, \
    created_at, updated_at, registered_at, registration_error, manifests, protocols, \
    mcp_registration";

/// Incoming values for an upsert.
#[derive(Debug, Clone)]
pub struct EntityDraft {
    pub kind: EntityType,
    pub id: String,
    pub version: String,
    pub name: Option<String>,
    pub summary: Option<String>,
    pub description: Option<String>,
    pub license: Option<String>,
    pub homepage: Option<String>,
    pub source_url: Option<String>,
    pub capabilities: Vec<String>,
    pub frameworks: Vec<String>,
    pub providers: Vec<String>,
    pub quality_score: Option<f64>,
    pub release_ts: Option<DateTime<Utc>>,
    pub manifests: BTreeMap<String, Value>,
    pub protocols: Vec<String>,
    pub mcp_registration: Option<Value>,
}

impl EntityDraft {
    pub fn new(kind: EntityType, id: &str, version: &str) -> Self {
        Self {
            kind,
            id: id.to_string(),
            version: version.to_string(),
            name: None,
            summary: None,
            description: None,
            license: None,
            homepage: None,
            source_url: None,
            capabilities: Vec::new(),
            frameworks: Vec::new(),
            providers: Vec::new(),
            quality_score: None,
            release_ts: None,
            manifests: BTreeMap::new(),
            protocols: Vec::new(),
            mcp_registration: None,
        }
    }

    /// Draft from a manifest; `fallback_source` is used when the manifest
    /// names no `source_url` of its own.
    pub fn from_manifest(manifest: &Manifest, fallback_source: Option<&str>) -> Self {
        Self {
            kind: manifest.kind,
            id: manifest.id.clone(),
            version: manifest.version.clone(),
            name: manifest.name.clone(),
            summary: manifest.summary.clone(),
            description: manifest.description.clone(),
            license: manifest.license.clone(),
            homepage: manifest.homepage.clone(),
            source_url: manifest
                .source_url
                .clone()
                .or_else(|| fallback_source.map(str::to_string)),
            capabilities: manifest.capabilities.clone(),
            frameworks: manifest.all_frameworks(),
            providers: manifest.all_providers(),
            quality_score: manifest.quality_score,
            release_ts: manifest.release_time(),
            manifests: manifest.manifests.clone(),
            protocols: manifest.protocol_tags(),
            mcp_registration: manifest.mcp_registration.clone(),
        }
    }

    pub fn uid(&self) -> String {
        entity_uid(self.kind, &self.id, &self.version)
    }
}

fn coalesce(new: Option<String>, old: Option<String>) -> Option<String> {
    match new {
        Some(v) if !v.trim().is_empty() => Some(v),
        _ => old,
    }
}

fn coalesce_list(new: Vec<String>, old: Vec<String>) -> Vec<String> {
    if new.is_empty() {
        old
    } else {
        new
    }
}

fn merge(existing: Option<Entity>, draft: EntityDraft, now: DateTime<Utc>) -> Entity {
    let uid = draft.uid();
    match existing {
        None => Entity {
            uid,
            kind: draft.kind,
            name: coalesce(draft.name, None).unwrap_or_else(|| draft.id.clone()),
            version: draft.version,
            summary: coalesce(draft.summary, None),
            description: coalesce(draft.description, None),
            license: coalesce(draft.license, None),
            homepage: coalesce(draft.homepage, None),
            source_url: coalesce(draft.source_url, None),
            capabilities: draft.capabilities,
            frameworks: draft.frameworks,
            providers: draft.providers,
            quality_score: draft.quality_score.unwrap_or(0.0),
            release_ts: draft.release_ts,
            created_at: now,
            updated_at: now,
            registered_at: None,
            registration_error: None,
            manifests: draft.manifests,
            protocols: draft
                .protocols
                .into_iter()
                .collect::<BTreeSet<_>>()
                .into_iter()
                .collect(),
            mcp_registration: draft.mcp_registration,
        },
        Some(old) => {
            let mut manifests = old.manifests;
            manifests.extend(draft.manifests);
            let protocols: BTreeSet<String> =
                old.protocols.into_iter().chain(draft.protocols).collect();

            Entity {
                uid,
                kind: old.kind,
                name: coalesce(draft.name, Some(old.name)).unwrap_or_default(),
                version: old.version,
                summary: coalesce(draft.summary, old.summary),
                description: coalesce(draft.description, old.description),
                license: coalesce(draft.license, old.license),
                homepage: coalesce(draft.homepage, old.homepage),
                source_url: coalesce(draft.source_url, old.source_url),
                capabilities: coalesce_list(draft.capabilities, old.capabilities),
                frameworks: coalesce_list(draft.frameworks, old.frameworks),
                providers: coalesce_list(draft.providers, old.providers),
                quality_score: draft.quality_score.unwrap_or(old.quality_score),
                release_ts: draft.release_ts.or(old.release_ts),
                created_at: old.created_at,
                updated_at: now,
                registered_at: old.registered_at,
                registration_error: old.registration_error,
                manifests,
                protocols: protocols.into_iter().collect(),
                mcp_registration: draft.mcp_registration.or(old.mcp_registration),
            }
        }
    }
}

/// Create or update an entity by natural key.
pub async fn upsert_entity(
    conn: &mut SqliteConnection,
    draft: EntityDraft,
    now: DateTime<Utc>,
) -> Result<Entity> {
    let uid = draft.uid();
    let existing = get_entity(&mut *conn, &uid).await?;
    let entity = merge(existing, draft, now);

    sqlx::query(
        r#"
        INSERT INTO entity (uid, type, name, version, summary, description, license, homepage,
            source_url, capabilities, frameworks, providers, quality_score, release_ts,
            created_at, updated_at, registered_at, registration_error, manifests, protocols,
            mcp_registration)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(uid) DO UPDATE SET
            name = excluded.name,
            summary = excluded.summary,
            description = excluded.description,
            license = excluded.license,
            homepage = excluded.homepage,
            source_url = excluded.source_url,
            capabilities = excluded.capabilities,
            frameworks = excluded.frameworks,
            providers = excluded.providers,
            quality_score = excluded.quality_score,
            release_ts = excluded.release_ts,
            updated_at = excluded.updated_at,
            manifests = excluded.manifests,
            protocols = excluded.protocols,
            mcp_registration = excluded.mcp_registration
        "#,
    )
    .bind(&entity.uid)
    .bind(entity.kind.as_str())
    .bind(&entity.name)
    .bind(&entity.version)
    .bind(&entity.summary)
    .bind(&entity.description)
    .bind(&entity.license)
    .bind(&entity.homepage)
    .bind(&entity.source_url)
    .bind(serde_json::to_string(&entity.capabilities)?)
    .bind(serde_json::to_string(&entity.frameworks)?)
    .bind(serde_json::to_string(&entity.providers)?)
    .bind(entity.quality_score)
    .bind(entity.release_ts.map(|t| t.timestamp()))
    .bind(entity.created_at.timestamp())
    .bind(entity.updated_at.timestamp())
    .bind(entity.registered_at.map(|t| t.timestamp()))
    .bind(&entity.registration_error)
    .bind(serde_json::to_string(&entity.manifests)?)
    .bind(serde_json::to_string(&entity.protocols)?)
    .bind(
        entity
            .mcp_registration
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?,
    )
    .execute(&mut *conn)
    .await
    .with_context(|| format!("Failed to upsert entity {}", entity.uid))?;

    Ok(entity)
}

fn ts(secs: Option<i64>) -> Option<DateTime<Utc>> {
    secs.and_then(|s| DateTime::from_timestamp(s, 0))
}

fn json_list(text: &str) -> Vec<String> {
    serde_json::from_str(text).unwrap_or_default()
}

/// Decode a row selected with [`ENTITY_COLUMNS`].
pub fn entity_from_row(row: &SqliteRow) -> Result<Entity> {
    let kind: String = row.try_get("type")?;
    let manifests: String = row.try_get("manifests")?;
    let mcp_registration: Option<String> = row.try_get("mcp_registration")?;
    let created_at: i64 = row.try_get("created_at")?;
    let updated_at: i64 = row.try_get("updated_at")?;

    Ok(Entity {
        uid: row.try_get("uid")?,
        kind: kind.parse()?,
        name: row.try_get("name")?,
        version: row.try_get("version")?,
        summary: row.try_get("summary")?,
        description: row.try_get("description")?,
        license: row.try_get("license")?,
        homepage: row.try_get("homepage")?,
        source_url: row.try_get("source_url")?,
        capabilities: json_list(&row.try_get::<String, _>("capabilities")?),
        frameworks: json_list(&row.try_get::<String, _>("frameworks")?),
        providers: json_list(&row.try_get::<String, _>("providers")?),
        quality_score: row.try_get("quality_score")?,
        release_ts: ts(row.try_get("release_ts")?),
        created_at: ts(Some(created_at)).unwrap_or_default(),
        updated_at: ts(Some(updated_at)).unwrap_or_default(),
        registered_at: ts(row.try_get("registered_at")?),
        registration_error: row.try_get("registration_error")?,
        manifests: serde_json::from_str(&manifests).unwrap_or_default(),
        protocols: json_list(&row.try_get::<String, _>("protocols")?),
        mcp_registration: mcp_registration.and_then(|s| serde_json::from_str(&s).ok()),
    })
}

pub async fn get_entity(conn: &mut SqliteConnection, uid: &str) -> Result<Option<Entity>> {
    let sql = format!("SELECT {} FROM entity WHERE uid = ?", ENTITY_COLUMNS);
    let row = sqlx::query(&sql).bind(uid).fetch_optional(&mut *conn).await?;
    row.as_ref().map(entity_from_row).transpose()
}

/// Load many entities at once, keyed by uid. Unknown uids are absent.
pub async fn get_entities(
    conn: &mut SqliteConnection,
    uids: &[String],
) -> Result<HashMap<String, Entity>> {
    if uids.is_empty() {
        return Ok(HashMap::new());
    }
    let mut builder: QueryBuilder<Sqlite> =
        QueryBuilder::new(format!("SELECT {} FROM entity WHERE uid IN (", ENTITY_COLUMNS));
    let mut separated = builder.separated(", ");
    for uid in uids {
        separated.push_bind(uid);
    }
    separated.push_unseparated(")");

    let rows = builder.build().fetch_all(&mut *conn).await?;
    rows.iter()
        .map(|row| entity_from_row(row).map(|e| (e.uid.clone(), e)))
        .collect()
}

/// Case-insensitive exact natural-key lookup.
pub async fn find_by_uid_ci(conn: &mut SqliteConnection, uid: &str) -> Result<Option<Entity>> {
    let sql = format!(
        "SELECT {} FROM entity WHERE lower(uid) = lower(?) LIMIT 1",
        ENTITY_COLUMNS
    );
    let row = sqlx::query(&sql).bind(uid).fetch_optional(&mut *conn).await?;
    row.as_ref().map(entity_from_row).transpose()
}

/// Entities whose uid contains `fragment` (case-insensitive), newest first.
pub async fn find_by_uid_fragment(
    conn: &mut SqliteConnection,
    fragment: &str,
    limit: i64,
) -> Result<Vec<Entity>> {
    let sql = format!(
        "SELECT {} FROM entity WHERE instr(lower(uid), lower(?)) > 0
         ORDER BY COALESCE(release_ts, created_at) DESC, uid ASC LIMIT ?",
        ENTITY_COLUMNS
    );
    let rows = sqlx::query(&sql)
        .bind(fragment)
        .bind(limit)
        .fetch_all(&mut *conn)
        .await?;
    rows.iter().map(entity_from_row).collect()
}

pub async fn count_entities(conn: &mut SqliteConnection) -> Result<i64> {
    Ok(sqlx::query_scalar("SELECT COUNT(*) FROM entity")
        .fetch_one(&mut *conn)
        .await?)
}

/// Administrative removal; chunks and vectors cascade.
pub async fn delete_entity(conn: &mut SqliteConnection, uid: &str) -> Result<bool> {
    let result = sqlx::query("DELETE FROM entity WHERE uid = ?")
        .bind(uid)
        .execute(&mut *conn)
        .await?;
    Ok(result.rows_affected() > 0)
}

/// Replace an entity's chunks and vectors wholesale.
pub async fn replace_chunks(
    conn: &mut SqliteConnection,
    entity_uid: &str,
    chunks: &[Chunk],
    vectors: &[IndexedVector],
    encoding: VectorEncoding,
    now: DateTime<Utc>,
) -> Result<()> {
    sqlx::query("DELETE FROM embedding_chunk WHERE entity_uid = ?")
        .bind(entity_uid)
        .execute(&mut *conn)
        .await?;
    sqlx::query("DELETE FROM chunk WHERE entity_uid = ?")
        .bind(entity_uid)
        .execute(&mut *conn)
        .await?;

    for chunk in chunks {
        sqlx::query(
            "INSERT INTO chunk (uid, entity_uid, ord, text, start_char, end_char, tokens_est, meta)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&chunk.uid)
        .bind(entity_uid)
        .bind(chunk.order)
        .bind(&chunk.text)
        .bind(chunk.start_char as i64)
        .bind(chunk.end_char as i64)
        .bind(chunk.tokens_est as i64)
        .bind(serde_json::to_string(&chunk.meta)?)
        .execute(&mut *conn)
        .await?;
    }

    for vector in vectors {
        let query = sqlx::query(
            r#"
            INSERT INTO embedding_chunk (entity_uid, chunk_id, vector, dims, caps_text,
                frameworks_text, providers_text, quality_score, embed_model, raw_ref, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&vector.entity_uid)
        .bind(&vector.chunk_id);
        let query = match encoding.encode(&vector.vector)? {
            EncodedVector::Blob(bytes) => query.bind(bytes),
            EncodedVector::Text(text) => query.bind(text),
        };
        query
            .bind(vector.vector.len() as i64)
            .bind(&vector.caps_text)
            .bind(&vector.frameworks_text)
            .bind(&vector.providers_text)
            .bind(vector.quality_score)
            .bind(&vector.embed_model)
            .bind(&vector.raw_ref)
            .bind(now.timestamp())
            .execute(&mut *conn)
            .await?;
    }

    Ok(())
}

pub async fn list_chunks(conn: &mut SqliteConnection, entity_uid: &str) -> Result<Vec<Chunk>> {
    let rows = sqlx::query(
        "SELECT uid, ord, text, start_char, end_char, tokens_est, meta
         FROM chunk WHERE entity_uid = ? ORDER BY ord",
    )
    .bind(entity_uid)
    .fetch_all(&mut *conn)
    .await?;

    rows.iter()
        .map(|row| {
            let meta: String = row.try_get("meta")?;
            Ok(Chunk {
                uid: row.try_get("uid")?,
                order: row.try_get("ord")?,
                text: row.try_get("text")?,
                start_char: row.try_get::<i64, _>("start_char")? as usize,
                end_char: row.try_get::<i64, _>("end_char")? as usize,
                tokens_est: row.try_get::<i64, _>("tokens_est")? as usize,
                meta: serde_json::from_str(&meta).unwrap_or_default(),
            })
        })
        .collect()
}

pub async fn count_vectors(conn: &mut SqliteConnection, entity_uid: &str) -> Result<i64> {
    Ok(
        sqlx::query_scalar("SELECT COUNT(*) FROM embedding_chunk WHERE entity_uid = ?")
            .bind(entity_uid)
            .fetch_one(&mut *conn)
            .await?,
    )
}

/// Decode the `vector` column of an `embedding_chunk` row.
pub fn vector_from_row(row: &SqliteRow, encoding: VectorEncoding) -> Result<Vec<f32>> {
    Ok(match encoding {
        VectorEncoding::F32Le => {
            let bytes: Vec<u8> = row.try_get_unchecked("vector")?;
            blob_to_vec(&bytes)
        }
        VectorEncoding::Json => {
            let text: String = row.try_get_unchecked("vector")?;
            serde_json::from_str(&text)?
        }
    })
}

/// Record the outcome of a registration attempt. Success marks the entity
/// READY; failure keeps any earlier `registered_at` but records the error.
pub async fn set_registration_status(
    conn: &mut SqliteConnection,
    uid: &str,
    outcome: Result<(), String>,
    now: DateTime<Utc>,
) -> Result<()> {
    match outcome {
        Ok(()) => {
            sqlx::query(
                "UPDATE entity SET registered_at = ?, registration_error = NULL WHERE uid = ?",
            )
            .bind(now.timestamp())
            .bind(uid)
            .execute(&mut *conn)
            .await?;
        }
        Err(message) => {
            sqlx::query("UPDATE entity SET registration_error = ? WHERE uid = ?")
                .bind(message)
                .bind(uid)
                .execute(&mut *conn)
                .await?;
        }
    }
    Ok(())
}

/// The subset of `uids` that are READY.
pub async fn ready_subset(conn: &mut SqliteConnection, uids: &[String]) -> Result<HashSet<String>> {
    if uids.is_empty() {
        return Ok(HashSet::new());
    }
    let mut builder: QueryBuilder<Sqlite> = QueryBuilder::new(
        "SELECT uid FROM entity WHERE registered_at IS NOT NULL AND registration_error IS NULL AND uid IN (",
    );
    let mut separated = builder.separated(", ");
    for uid in uids {
        separated.push_bind(uid);
    }
    separated.push_unseparated(")");

    let ready: Vec<String> = builder
        .build_query_scalar()
        .fetch_all(&mut *conn)
        .await?;
    Ok(ready.into_iter().collect())
}

/// Remote ingest bookkeeping row.
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteStatus {
    pub url: String,
    pub last_ingested_at: DateTime<Utc>,
    pub manifests_seen: i64,
    pub entities_upserted: i64,
    pub errors: i64,
    pub last_error: Option<String>,
}

pub async fn record_remote(conn: &mut SqliteConnection, status: &RemoteStatus) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO remote (url, last_ingested_at, manifests_seen, entities_upserted, errors, last_error)
        VALUES (?, ?, ?, ?, ?, ?)
        ON CONFLICT(url) DO UPDATE SET
            last_ingested_at = excluded.last_ingested_at,
            manifests_seen = excluded.manifests_seen,
            entities_upserted = excluded.entities_upserted,
            errors = excluded.errors,
            last_error = excluded.last_error
        "#,
    )
    .bind(&status.url)
    .bind(status.last_ingested_at.timestamp())
    .bind(status.manifests_seen)
    .bind(status.entities_upserted)
    .bind(status.errors)
    .bind(&status.last_error)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

pub async fn get_remote(conn: &mut SqliteConnection, url: &str) -> Result<Option<RemoteStatus>> {
    let row = sqlx::query(
        "SELECT url, last_ingested_at, manifests_seen, entities_upserted, errors, last_error
         FROM remote WHERE url = ?",
    )
    .bind(url)
    .fetch_optional(&mut *conn)
    .await?;

    row.map(|row| {
        Ok(RemoteStatus {
            url: row.try_get("url")?,
            last_ingested_at: ts(Some(row.try_get("last_ingested_at")?)).unwrap_or_default(),
            manifests_seen: row.try_get("manifests_seen")?,
            entities_upserted: row.try_get("entities_upserted")?,
            errors: row.try_get("errors")?,
            last_error: row.try_get("last_error")?,
        })
    })
    .transpose()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::migrate::apply_schema;
    use chrono::Duration;
    use sqlx::sqlite::SqlitePoolOptions;
    use sqlx::SqlitePool;

    async fn pool() -> SqlitePool {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        apply_schema(&pool, VectorEncoding::F32Le).await.unwrap();
        pool
    }

    fn draft() -> EntityDraft {
        let mut d = EntityDraft::new(EntityType::Tool, "hello", "0.1.0");
        d.name = Some("Hello".to_string());
        d.summary = Some("Says hello".to_string());
        d.capabilities = vec!["greet".to_string()];
        d
    }

    #[tokio::test]
    async fn test_coalesce_keeps_existing_values() {
        let pool = pool().await;
        let mut conn = pool.acquire().await.unwrap();
        let t0 = Utc::now() - Duration::days(1);

        let first = upsert_entity(&mut conn, draft(), t0).await.unwrap();
        assert_eq!(first.uid, "tool:hello@0.1.0");

        let mut sparse = EntityDraft::new(EntityType::Tool, "hello", "0.1.0");
        sparse.summary = Some(String::new());
        sparse.description = Some("Longer text".to_string());
        let second = upsert_entity(&mut conn, sparse, Utc::now()).await.unwrap();

        assert_eq!(second.name, "Hello");
        assert_eq!(second.summary.as_deref(), Some("Says hello"));
        assert_eq!(second.description.as_deref(), Some("Longer text"));
        assert_eq!(second.capabilities, vec!["greet"]);
        assert_eq!(second.created_at.timestamp(), t0.timestamp());

        let stored = get_entity(&mut conn, "tool:hello@0.1.0").await.unwrap().unwrap();
        assert_eq!(stored.summary.as_deref(), Some("Says hello"));
        assert_eq!(count_entities(&mut conn).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_protocol_manifests_merge() {
        let pool = pool().await;
        let mut conn = pool.acquire().await.unwrap();

        let mut a = EntityDraft::new(EntityType::Agent, "planner", "1.0");
        a.manifests.insert("a2a".into(), serde_json::json!({"version": "1.0"}));
        a.protocols = vec!["a2a@1.0".into()];
        upsert_entity(&mut conn, a, Utc::now()).await.unwrap();

        let mut b = EntityDraft::new(EntityType::Agent, "planner", "1.0");
        b.manifests.insert("acp".into(), serde_json::json!({}));
        b.protocols = vec!["acp".into(), "a2a@1.0".into()];
        let merged = upsert_entity(&mut conn, b, Utc::now()).await.unwrap();

        assert_eq!(merged.manifests.len(), 2);
        assert_eq!(merged.protocols, vec!["a2a@1.0", "acp"]);
    }

    #[tokio::test]
    async fn test_registration_status_and_ready_subset() {
        let pool = pool().await;
        let mut conn = pool.acquire().await.unwrap();
        upsert_entity(&mut conn, draft(), Utc::now()).await.unwrap();
        let uids = vec!["tool:hello@0.1.0".to_string()];

        assert!(ready_subset(&mut conn, &uids).await.unwrap().is_empty());

        set_registration_status(&mut conn, &uids[0], Ok(()), Utc::now()).await.unwrap();
        assert!(ready_subset(&mut conn, &uids).await.unwrap().contains(&uids[0]));

        set_registration_status(&mut conn, &uids[0], Err("boom".into()), Utc::now())
            .await
            .unwrap();
        assert!(ready_subset(&mut conn, &uids).await.unwrap().is_empty());
        let entity = get_entity(&mut conn, &uids[0]).await.unwrap().unwrap();
        assert!(entity.registered_at.is_some());
        assert_eq!(entity.registration_error.as_deref(), Some("boom"));
    }

    #[tokio::test]
    async fn test_delete_cascades_to_chunks_and_vectors() {
        let pool = pool().await;
        let mut conn = pool.acquire().await.unwrap();
        sqlx::query("PRAGMA foreign_keys = ON").execute(&mut *conn).await.unwrap();
        let entity = upsert_entity(&mut conn, draft(), Utc::now()).await.unwrap();

        let chunk = Chunk {
            uid: "c1".into(),
            order: 0,
            text: "Says hello".into(),
            start_char: 0,
            end_char: 10,
            tokens_est: 4,
            meta: BTreeMap::new(),
        };
        let vector = IndexedVector {
            entity_uid: entity.uid.clone(),
            chunk_id: "c1".into(),
            vector: vec![1.0, 0.0],
            caps_text: "greet".into(),
            frameworks_text: String::new(),
            providers_text: String::new(),
            quality_score: 0.0,
            embed_model: "hash-2".into(),
            raw_ref: None,
        };
        replace_chunks(&mut conn, &entity.uid, &[chunk], &[vector], VectorEncoding::F32Le, Utc::now())
            .await
            .unwrap();
        assert_eq!(list_chunks(&mut conn, &entity.uid).await.unwrap().len(), 1);
        assert_eq!(count_vectors(&mut conn, &entity.uid).await.unwrap(), 1);

        assert!(delete_entity(&mut conn, &entity.uid).await.unwrap());
        assert!(list_chunks(&mut conn, &entity.uid).await.unwrap().is_empty());
        assert_eq!(count_vectors(&mut conn, &entity.uid).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_uid_lookups() {
        let pool = pool().await;
        let mut conn = pool.acquire().await.unwrap();
        upsert_entity(&mut conn, draft(), Utc::now()).await.unwrap();

        assert!(find_by_uid_ci(&mut conn, "TOOL:Hello@0.1.0").await.unwrap().is_some());
        assert!(find_by_uid_ci(&mut conn, "tool:hello@9").await.unwrap().is_none());
        assert_eq!(find_by_uid_fragment(&mut conn, "HELLO", 5).await.unwrap().len(), 1);
    }
}
