//! Schema creation and schema metadata.
//!
//! All tables are created with `CREATE TABLE IF NOT EXISTS`, so running
//! migrations repeatedly is safe. The `schema_meta` table records the
//! schema version and the vector encoding chosen on first creation; both
//! are read once at start-up through [`load_schema_info`].

use anyhow::{Context, Result};
use sqlx::SqlitePool;

use crate::config::Config;
use crate::db;
use crate::embedding::VectorEncoding;

pub const SCHEMA_VERSION: i64 = 1;

/// What the opened database supports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchemaInfo {
    pub version: i64,
    pub vector_encoding: VectorEncoding,
}

pub async fn run_migrations(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    apply_schema(&pool, config.search.vector_encoding.into()).await?;
    pool.close().await;
    Ok(())
}

/// Create every table and index, and seed `schema_meta`. A vector encoding
/// already recorded in the database is never overwritten.
pub async fn apply_schema(pool: &SqlitePool, encoding: VectorEncoding) -> Result<()> {
    // Create entity table
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS entity (
            uid TEXT PRIMARY KEY,
            type TEXT NOT NULL CHECK (type IN ('agent', 'tool', 'protocol_server')),
            name TEXT NOT NULL,
            version TEXT NOT NULL,
            summary TEXT,
            description TEXT,
            license TEXT,
            homepage TEXT,
            source_url TEXT,
            capabilities TEXT NOT NULL DEFAULT '[]',
            frameworks TEXT NOT NULL DEFAULT '[]',
            providers TEXT NOT NULL DEFAULT '[]',
            quality_score REAL NOT NULL DEFAULT 0,
            release_ts INTEGER,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL,
            registered_at INTEGER,
            registration_error TEXT,
            manifests TEXT NOT NULL DEFAULT '{}',
            protocols TEXT NOT NULL DEFAULT '[]',
            mcp_registration TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Create chunk table
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS chunk (
            uid TEXT NOT NULL,
            entity_uid TEXT NOT NULL,
            ord INTEGER NOT NULL,
            text TEXT NOT NULL,
            start_char INTEGER NOT NULL,
            end_char INTEGER NOT NULL,
            tokens_est INTEGER NOT NULL,
            meta TEXT NOT NULL DEFAULT '{}',
            PRIMARY KEY (entity_uid, uid),
            FOREIGN KEY (entity_uid) REFERENCES entity(uid) ON DELETE CASCADE
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Vector column is untyped: BLOB or TEXT depending on schema_meta.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS embedding_chunk (
            entity_uid TEXT NOT NULL,
            chunk_id TEXT NOT NULL,
            vector,
            dims INTEGER NOT NULL,
            caps_text TEXT NOT NULL DEFAULT '',
            frameworks_text TEXT NOT NULL DEFAULT '',
            providers_text TEXT NOT NULL DEFAULT '',
            quality_score REAL NOT NULL DEFAULT 0,
            embed_model TEXT NOT NULL,
            raw_ref TEXT,
            updated_at INTEGER NOT NULL,
            PRIMARY KEY (entity_uid, chunk_id),
            FOREIGN KEY (entity_uid) REFERENCES entity(uid) ON DELETE CASCADE
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Per-remote ingest bookkeeping
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS remote (
            url TEXT PRIMARY KEY,
            last_ingested_at INTEGER NOT NULL,
            manifests_seen INTEGER NOT NULL DEFAULT 0,
            entities_upserted INTEGER NOT NULL DEFAULT 0,
            errors INTEGER NOT NULL DEFAULT 0,
            last_error TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS schema_meta (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Create indexes
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_entity_type ON entity(type)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_chunk_entity ON chunk(entity_uid, ord)")
        .execute(pool)
        .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_embedding_chunk_entity ON embedding_chunk(entity_uid)",
    )
    .execute(pool)
    .await?;

    // Seed meta; INSERT OR IGNORE keeps the first recorded encoding.
    sqlx::query("INSERT OR IGNORE INTO schema_meta (key, value) VALUES ('vector_encoding', ?)")
        .bind(encoding.as_str())
        .execute(pool)
        .await?;
    sqlx::query(
        "INSERT INTO schema_meta (key, value) VALUES ('schema_version', ?)
         ON CONFLICT(key) DO UPDATE SET value = excluded.value",
    )
    .bind(SCHEMA_VERSION.to_string())
    .execute(pool)
    .await?;

    Ok(())
}

/// Read schema version and vector encoding. Fails if migrations never ran.
pub async fn load_schema_info(pool: &SqlitePool) -> Result<SchemaInfo> {
    let rows: Vec<(String, String)> = sqlx::query_as("SELECT key, value FROM schema_meta")
        .fetch_all(pool)
        .await
        .context("Database is not initialized; run `hub init` first")?;

    let lookup = |name: &str| {
        rows.iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.clone())
            .ok_or_else(|| anyhow::anyhow!("schema_meta is missing '{}'", name))
    };

    let version: i64 = lookup("schema_version")?
        .parse()
        .context("schema_version is not an integer")?;
    if version > SCHEMA_VERSION {
        anyhow::bail!(
            "Database schema version {} is newer than supported version {}",
            version,
            SCHEMA_VERSION
        );
    }

    Ok(SchemaInfo {
        version,
        vector_encoding: VectorEncoding::parse(&lookup("vector_encoding")?)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::sqlite::SqlitePoolOptions;

    async fn memory_pool() -> SqlitePool {
        SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_apply_is_idempotent_and_keeps_encoding() {
        let pool = memory_pool().await;
        apply_schema(&pool, VectorEncoding::Json).await.unwrap();
        apply_schema(&pool, VectorEncoding::F32Le).await.unwrap();

        let info = load_schema_info(&pool).await.unwrap();
        assert_eq!(info.version, SCHEMA_VERSION);
        assert_eq!(info.vector_encoding, VectorEncoding::Json);
    }

    #[tokio::test]
    async fn test_uninitialized_database_is_reported() {
        let pool = memory_pool().await;
        assert!(load_schema_info(&pool).await.is_err());
    }
}
