//! The backend container.
//!
//! Every swappable capability (lexical index, vector index, embedder, blob
//! store, fetcher, registrar) is built once from configuration and shared
//! through `Arc`. Ingestion and search receive the container explicitly.

use anyhow::Result;
use sqlx::SqlitePool;
use std::sync::Arc;
use std::time::Duration;

use crate::blob::{create_blob_store, BlobStore};
use crate::config::{Config, LexicalKind, VectorKind};
use crate::embedding::{create_embedder, Embedder, VectorEncoding};
use crate::fetch::{Fetcher, HttpFetcher};
use crate::migrate::load_schema_info;
use crate::registration::{create_registrar, Registrar};
use crate::search::lexical::{LikeBackend, NullLexicalBackend, SimilarityBackend};
use crate::search::vector::{NearestNeighborBackend, NullVectorBackend};
use crate::search::{LexicalBackend, VectorBackend};

#[derive(Clone)]
pub struct Backends {
    pub lexical: Arc<dyn LexicalBackend>,
    pub vector: Arc<dyn VectorBackend>,
    pub embedder: Arc<dyn Embedder>,
    pub blobs: Arc<dyn BlobStore>,
    pub fetcher: Arc<dyn Fetcher>,
    pub registrar: Arc<dyn Registrar>,
    /// Storage format recorded in `schema_meta`.
    pub vector_encoding: VectorEncoding,
}

impl Backends {
    /// Build from configuration. The database must already be migrated:
    /// the vector encoding is read from `schema_meta`, not from config.
    pub async fn from_config(config: &Config, pool: &SqlitePool) -> Result<Self> {
        let schema = load_schema_info(pool).await?;
        let half_life = config.search.recency_half_life_days;

        let lexical: Arc<dyn LexicalBackend> = match config.search.lexical {
            LexicalKind::Similarity => Arc::new(SimilarityBackend::new(pool.clone(), half_life)),
            LexicalKind::Like => Arc::new(LikeBackend::new(pool.clone(), half_life)),
            LexicalKind::None => Arc::new(NullLexicalBackend),
        };
        let vector: Arc<dyn VectorBackend> = match config.search.vector {
            VectorKind::Nearest => Arc::new(NearestNeighborBackend::new(
                pool.clone(),
                schema.vector_encoding,
                half_life,
            )),
            VectorKind::None => Arc::new(NullVectorBackend),
        };

        let backends = Self {
            lexical,
            vector,
            embedder: create_embedder(&config.embedding)?,
            blobs: create_blob_store(&config.blobs),
            fetcher: Arc::new(HttpFetcher::new(Duration::from_secs(
                config.ingest.timeout_secs,
            ))?),
            registrar: create_registrar(&config.registration)?,
            vector_encoding: schema.vector_encoding,
        };

        tracing::debug!(
            lexical = backends.lexical.name(),
            vector = backends.vector.name(),
            embedder = backends.embedder.model_id(),
            encoding = backends.vector_encoding.as_str(),
            "Backends ready"
        );
        Ok(backends)
    }

    pub fn with_fetcher(mut self, fetcher: Arc<dyn Fetcher>) -> Self {
        self.fetcher = fetcher;
        self
    }

    pub fn with_registrar(mut self, registrar: Arc<dyn Registrar>) -> Self {
        self.registrar = registrar;
        self
    }

    pub fn with_blobs(mut self, blobs: Arc<dyn BlobStore>) -> Self {
        self.blobs = blobs;
        self
    }

    pub fn with_embedder(mut self, embedder: Arc<dyn Embedder>) -> Self {
        self.embedder = embedder;
        self
    }
}
