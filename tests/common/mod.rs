//! Shared helpers for the integration tests: on-disk config and database,
//! and in-memory doubles for the network-facing backends.

#![allow(dead_code)]

use anyhow::Result;
use async_trait::async_trait;
use catalog_hub::backends::Backends;
use catalog_hub::blob::MemoryBlobStore;
use catalog_hub::config::{self, Config};
use catalog_hub::db;
use catalog_hub::embedding::Embedder;
use catalog_hub::error::RegistrationError;
use catalog_hub::fetch::Fetcher;
use catalog_hub::migrate;
use catalog_hub::registration::{Registrar, ServerRegistration};
use sqlx::SqlitePool;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};
use tempfile::TempDir;

/// Config with a temp database and no blob directory. `extra` is appended
/// verbatim, so it may add whole sections.
pub fn test_config(tmp: &TempDir, extra: &str) -> Config {
    let content = format!(
        r#"
[db]
path = "{}"

[blobs]
backend = "none"

{}
"#,
        tmp.path().join("hub.sqlite").display(),
        extra
    );
    let cfg: Config = toml::from_str(&content).unwrap();
    config::validate(&cfg).unwrap();
    cfg
}

/// Migrated pool plus the backends built from `cfg`, with network-facing
/// pieces replaced by the given doubles.
pub async fn setup(
    cfg: &Config,
    fetcher: Arc<MemoryFetcher>,
    registrar: Arc<RecordingRegistrar>,
) -> (SqlitePool, Backends, Arc<MemoryBlobStore>) {
    migrate::run_migrations(cfg).await.unwrap();
    let pool = db::connect(cfg).await.unwrap();
    let blobs = Arc::new(MemoryBlobStore::new());
    let backends = Backends::from_config(cfg, &pool)
        .await
        .unwrap()
        .with_fetcher(fetcher)
        .with_registrar(registrar)
        .with_blobs(blobs.clone());
    (pool, backends, blobs)
}

// ─── Fetcher ────────────────────────────────────────────────────────

/// Serves documents from a map; unknown URLs fail like a 404.
#[derive(Default)]
pub struct MemoryFetcher {
    docs: RwLock<HashMap<String, String>>,
}

impl MemoryFetcher {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set(&self, url: &str, body: &str) {
        self.docs
            .write()
            .unwrap()
            .insert(url.to_string(), body.to_string());
    }
}

#[async_trait]
impl Fetcher for MemoryFetcher {
    async fn fetch_text(&self, url: &str) -> Result<String> {
        self.docs
            .read()
            .unwrap()
            .get(url)
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("GET {} returned 404 Not Found", url))
    }
}

// ─── Registrar ──────────────────────────────────────────────────────

/// Records every call. Registrations whose URL contains `broken` fail.
#[derive(Default)]
pub struct RecordingRegistrar {
    pub calls: Mutex<Vec<ServerRegistration>>,
}

impl RecordingRegistrar {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn calls(&self) -> Vec<ServerRegistration> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl Registrar for RecordingRegistrar {
    async fn register_server(
        &self,
        registration: &ServerRegistration,
    ) -> Result<(), RegistrationError> {
        self.calls.lock().unwrap().push(registration.clone());
        if registration.url.contains("broken") {
            return Err(RegistrationError::Exhausted {
                attempts: 4,
                last: "503: unavailable".to_string(),
            });
        }
        Ok(())
    }
}

// ─── Embedder ───────────────────────────────────────────────────────

/// Always fails, to exercise the non-fatal embedding path.
pub struct FailingEmbedder;

#[async_trait]
impl Embedder for FailingEmbedder {
    fn model_id(&self) -> &str {
        "failing"
    }

    fn dims(&self) -> usize {
        8
    }

    async fn encode(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>> {
        anyhow::bail!("embedding service unavailable")
    }
}
