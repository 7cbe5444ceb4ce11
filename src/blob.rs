//! Raw-text blob storage for chunk payloads.
//!
//! Every embedded chunk keeps a reference to its original text in a
//! [`BlobStore`], so vectors can be traced back to what produced them
//! without widening the vector table. Reads never fail: a missing key
//! yields an empty string.

use anyhow::{Context, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, RwLock};

use crate::config::{BlobBackend, BlobConfig};

#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Store `text` under `key` and return a reference to it.
    async fn put_text(&self, key: &str, text: &str) -> Result<String>;
    /// Text stored under `key`, or `""` when absent.
    async fn get_text(&self, key: &str) -> String;
}

pub fn create_blob_store(config: &BlobConfig) -> Arc<dyn BlobStore> {
    match config.backend {
        BlobBackend::Local => Arc::new(LocalBlobStore::new(config.dir.clone())),
        BlobBackend::None => Arc::new(NullBlobStore),
    }
}

/// Map a key onto a safe file name.
fn file_name(key: &str) -> String {
    let safe: String = key
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | '@') {
                c
            } else {
                '_'
            }
        })
        .collect();
    format!("{}.txt", safe)
}

/// One file per key under a base directory.
pub struct LocalBlobStore {
    dir: PathBuf,
}

impl LocalBlobStore {
    pub fn new(dir: PathBuf) -> Self {
        Self { dir }
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(file_name(key))
    }
}

#[async_trait]
impl BlobStore for LocalBlobStore {
    async fn put_text(&self, key: &str, text: &str) -> Result<String> {
        tokio::fs::create_dir_all(&self.dir)
            .await
            .with_context(|| format!("Failed to create blob dir: {}", self.dir.display()))?;
        let path = self.path_for(key);
        tokio::fs::write(&path, text)
            .await
            .with_context(|| format!("Failed to write blob: {}", path.display()))?;
        Ok(path.display().to_string())
    }

    async fn get_text(&self, key: &str) -> String {
        tokio::fs::read_to_string(self.path_for(key))
            .await
            .unwrap_or_default()
    }
}

/// Process-local store, used by tests.
#[derive(Default)]
pub struct MemoryBlobStore {
    blobs: RwLock<HashMap<String, String>>,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.blobs.read().map(|b| b.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn put_text(&self, key: &str, text: &str) -> Result<String> {
        let mut blobs = self
            .blobs
            .write()
            .map_err(|_| anyhow::anyhow!("blob store lock poisoned"))?;
        blobs.insert(key.to_string(), text.to_string());
        Ok(key.to_string())
    }

    async fn get_text(&self, key: &str) -> String {
        self.blobs
            .read()
            .ok()
            .and_then(|b| b.get(key).cloned())
            .unwrap_or_default()
    }
}

/// Discards writes; every read is empty.
pub struct NullBlobStore;

#[async_trait]
impl BlobStore for NullBlobStore {
    async fn put_text(&self, key: &str, _text: &str) -> Result<String> {
        Ok(key.to_string())
    }

    async fn get_text(&self, _key: &str) -> String {
        String::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_local_roundtrip_and_missing_key() {
        let tmp = TempDir::new().unwrap();
        let store = LocalBlobStore::new(tmp.path().join("blobs"));
        let key = "tool:hello@0.1.0#abc123";
        let reference = store.put_text(key, "chunk body").await.unwrap();
        assert!(reference.ends_with("tool_hello@0.1.0_abc123.txt"));
        assert_eq!(store.get_text(key).await, "chunk body");
        assert_eq!(store.get_text("missing").await, "");
    }

    #[tokio::test]
    async fn test_memory_and_null_stores() {
        let memory = MemoryBlobStore::new();
        memory.put_text("k", "v").await.unwrap();
        assert_eq!(memory.get_text("k").await, "v");
        assert_eq!(memory.get_text("other").await, "");
        assert_eq!(memory.len(), 1);

        let null = NullBlobStore;
        assert_eq!(null.put_text("k", "v").await.unwrap(), "k");
        assert_eq!(null.get_text("k").await, "");
    }
}
