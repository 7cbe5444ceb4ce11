//! Ingestion pipeline orchestration.
//!
//! Coordinates the flow for one remote: index → manifests → validation →
//! upsert → chunking → embedding → storage → registration.
//!
//! # Phases
//!
//! 1. **Network.** The index is fetched and its manifest URLs extracted.
//!    Manifests (and any `readme_url`) are fetched, parsed and validated
//!    concurrently, at most `ingest.workers` at a time. A failing manifest
//!    becomes a per-item outcome and never affects its siblings.
//! 2. **Registration.** Protocol servers with an endpoint are registered
//!    with the gateway, at most `ingest.registration_workers` calls in
//!    flight. No transaction is open while the gateway is called.
//! 3. **Storage.** Manifests are applied in completion order on a single
//!    transaction. Each manifest runs inside its own savepoint, so a
//!    storage error rolls back that manifest only. Registration outcomes
//!    are written for the manifests that were stored.
//! 4. **Commit.** Once per remote. A failed commit fails the remote.
//!
//! Embedding is non-fatal: when the embedder fails, chunks are stored
//! without vectors and a warning is logged.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use serde::Serialize;
use serde_json::Value;
use sqlx::{Acquire, SqliteConnection, SqlitePool};
use std::collections::HashSet;
use std::sync::Arc;
use url::Url;

use crate::backends::Backends;
use crate::chunk::{chunk_text, ChunkOptions};
use crate::config::{Config, IngestConfig};
use crate::db;
use crate::error::ManifestError;
use crate::manifest::{
    extract_manifest_urls, parse_document, parse_index, Manifest, ManifestValidator,
    SchemaValidator,
};
use crate::models::{Chunk, Entity, IndexedVector};
use crate::registration::ServerRegistration;
use crate::repo::{self, EntityDraft, RemoteStatus};

/// Counters for one remote, or aggregated over several.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct IngestStats {
    pub manifests_seen: usize,
    pub entities_upserted: usize,
    pub embeddings_upserted: usize,
    pub skipped: usize,
    pub errors: usize,
    pub registrations_attempted: usize,
    pub registrations_failed: usize,
}

impl IngestStats {
    pub fn absorb(&mut self, other: &IngestStats) {
        self.manifests_seen += other.manifests_seen;
        self.entities_upserted += other.entities_upserted;
        self.embeddings_upserted += other.embeddings_upserted;
        self.skipped += other.skipped;
        self.errors += other.errors;
        self.registrations_attempted += other.registrations_attempted;
        self.registrations_failed += other.registrations_failed;
    }
}

/// A manifest that survived the network phase.
struct Loaded {
    url: String,
    manifest: Manifest,
    readme: Option<String>,
}

/// What applying one manifest produced.
struct Applied {
    entities: usize,
    embeddings: usize,
}

/// Gateway outcome for one protocol server, keyed by entity uid.
type RegistrationOutcome = (String, Result<(), String>);

pub struct Ingestor {
    pool: SqlitePool,
    backends: Backends,
    validator: Option<Arc<dyn ManifestValidator>>,
    chunking: ChunkOptions,
    settings: IngestConfig,
}

impl Ingestor {
    pub fn new(pool: SqlitePool, backends: &Backends, config: &Config) -> Self {
        let validator: Option<Arc<dyn ManifestValidator>> = if config.ingest.validate {
            Some(Arc::new(SchemaValidator))
        } else {
            None
        };
        Self {
            pool,
            backends: backends.clone(),
            validator,
            chunking: ChunkOptions::from_config(&config.chunking),
            settings: config.ingest.clone(),
        }
    }

    pub fn with_validator(mut self, validator: Option<Arc<dyn ManifestValidator>>) -> Self {
        self.validator = validator;
        self
    }

    /// Ingest every configured remote.
    pub async fn ingest_all(&self) -> IngestStats {
        let remotes = self.settings.remotes.clone();
        self.ingest_remotes(&remotes).await
    }

    /// Ingest `remotes` in order. A remote that fails as a whole counts as
    /// one error and the next remote still runs. Each outcome is recorded
    /// in the `remote` table.
    pub async fn ingest_remotes(&self, remotes: &[String]) -> IngestStats {
        let mut total = IngestStats::default();
        for remote in remotes {
            let (stats, last_error) = match self.ingest_index(remote).await {
                Ok(stats) => (stats, None),
                Err(e) => {
                    tracing::error!(remote = %remote, error = %format!("{:#}", e), "Remote ingest failed");
                    let stats = IngestStats {
                        errors: 1,
                        ..IngestStats::default()
                    };
                    (stats, Some(format!("{:#}", e)))
                }
            };
            total.absorb(&stats);

            let status = RemoteStatus {
                url: remote.clone(),
                last_ingested_at: Utc::now(),
                manifests_seen: stats.manifests_seen as i64,
                entities_upserted: stats.entities_upserted as i64,
                errors: stats.errors as i64,
                last_error,
            };
            if let Err(e) = self.record_remote(&status).await {
                tracing::warn!(remote = %remote, error = %e, "Failed to record remote status");
            }
        }
        total
    }

    async fn record_remote(&self, status: &RemoteStatus) -> Result<()> {
        let mut conn = self.pool.acquire().await?;
        repo::record_remote(&mut conn, status).await
    }

    /// Ingest one remote index.
    pub async fn ingest_index(&self, remote: &str) -> Result<IngestStats> {
        let index_text = self
            .backends
            .fetcher
            .fetch_text(remote)
            .await
            .with_context(|| format!("Failed to fetch index {}", remote))?;
        let index =
            parse_index(&index_text).with_context(|| format!("Invalid index at {}", remote))?;
        let index_url = Url::parse(remote).ok();
        let urls = extract_manifest_urls(&index, index_url.as_ref());
        tracing::info!(remote = %remote, manifests = urls.len(), "Fetched index");

        let mut stats = IngestStats {
            manifests_seen: urls.len(),
            ..IngestStats::default()
        };

        let outcomes: Vec<(String, Result<Loaded, ManifestError>)> = stream::iter(urls)
            .map(|url| async move {
                let outcome = self.load(&url).await;
                (url, outcome)
            })
            .buffer_unordered(self.settings.workers.max(1))
            .collect()
            .await;

        let mut loaded = Vec::new();
        for (url, outcome) in outcomes {
            match outcome {
                Ok(item) => loaded.push(item),
                Err(e) if e.is_skip() => {
                    tracing::warn!(url = %url, reason = %e, "Skipping manifest");
                    stats.skipped += 1;
                }
                Err(e) => {
                    tracing::warn!(url = %url, error = %e, "Manifest fetch failed");
                    stats.errors += 1;
                }
            }
        }

        let registrations = self
            .register_all(loaded.iter().map(|item| &item.manifest), &mut stats)
            .await;

        let now = Utc::now();
        let mut tx = self.pool.begin().await?;
        let mut stored = HashSet::new();

        for item in &loaded {
            let mut savepoint = tx.begin().await?;
            match self
                .apply(
                    &mut savepoint,
                    &item.manifest,
                    item.readme.as_deref(),
                    Some(&item.url),
                    now,
                )
                .await
            {
                Ok(applied) => {
                    savepoint.commit().await?;
                    stats.entities_upserted += applied.entities;
                    stats.embeddings_upserted += applied.embeddings;
                    stored.insert(item.manifest.uid());
                }
                Err(e) => {
                    savepoint.rollback().await?;
                    tracing::warn!(
                        url = %item.url,
                        uid = %item.manifest.uid(),
                        error = %format!("{:#}", e),
                        "Failed to store manifest"
                    );
                    stats.errors += 1;
                }
            }
        }

        record_registrations(&mut tx, registrations, &stored, now).await?;

        tx.commit()
            .await
            .with_context(|| format!("Failed to commit ingest of {}", remote))?;

        tracing::info!(
            remote = %remote,
            seen = stats.manifests_seen,
            upserted = stats.entities_upserted,
            embeddings = stats.embeddings_upserted,
            skipped = stats.skipped,
            errors = stats.errors,
            "Remote ingested"
        );
        Ok(stats)
    }

    /// Ingest one already-parsed manifest in its own transaction and
    /// return the stored entity.
    pub async fn ingest_document(&self, doc: Value, source_url: Option<&str>) -> Result<Entity> {
        if let Some(validator) = &self.validator {
            validator.validate(&doc)?;
        }
        let manifest = Manifest::from_document(doc)?;
        let base = source_url.and_then(|u| Url::parse(u).ok());
        let readme = self.readme_for(&manifest, base.as_ref()).await;
        let uid = manifest.uid();
        let registrations = self
            .register_all(std::iter::once(&manifest), &mut IngestStats::default())
            .await;

        let now = Utc::now();
        let mut tx = self.pool.begin().await?;
        let applied = self
            .apply(&mut tx, &manifest, readme.as_deref(), source_url, now)
            .await?;
        record_registrations(&mut tx, registrations, &HashSet::from([uid.clone()]), now).await?;
        let entity = repo::get_entity(&mut tx, &uid)
            .await?
            .with_context(|| format!("Entity {} vanished during ingest", uid))?;
        tx.commit()
            .await
            .with_context(|| format!("Failed to commit ingest of {}", uid))?;

        tracing::info!(uid = %uid, embeddings = applied.embeddings, "Document ingested");
        Ok(entity)
    }

    /// Network phase for one manifest.
    async fn load(&self, url: &str) -> Result<Loaded, ManifestError> {
        let text = self
            .backends
            .fetcher
            .fetch_text(url)
            .await
            .map_err(|e| ManifestError::Fetch {
                url: url.to_string(),
                message: format!("{:#}", e),
            })?;
        let doc = parse_document(&text)?;
        if let Some(validator) = &self.validator {
            validator.validate(&doc)?;
        }
        let manifest = Manifest::from_document(doc)?;
        let base = Url::parse(url).ok();
        let readme = self.readme_for(&manifest, base.as_ref()).await;

        Ok(Loaded {
            url: url.to_string(),
            manifest,
            readme,
        })
    }

    /// Inline `readme`, else the document behind `readme_url`. A missing
    /// readme is not an error.
    async fn readme_for(&self, manifest: &Manifest, base: Option<&Url>) -> Option<String> {
        if let Some(readme) = manifest.readme.as_ref().filter(|r| !r.trim().is_empty()) {
            return Some(readme.clone());
        }
        let location = manifest.readme_url.as_deref()?.trim();
        let resolved = match Url::parse(location) {
            Ok(url) => url,
            Err(_) => base?.join(location).ok()?,
        };
        match self.backends.fetcher.fetch_text(resolved.as_str()).await {
            Ok(text) => Some(text),
            Err(e) => {
                tracing::warn!(uid = %manifest.uid(), url = %resolved, error = %e, "README fetch failed");
                None
            }
        }
    }

    /// Storage phase for one manifest.
    async fn apply(
        &self,
        conn: &mut SqliteConnection,
        manifest: &Manifest,
        readme: Option<&str>,
        source_url: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<Applied> {
        let draft = EntityDraft::from_manifest(manifest, source_url);
        let entity = repo::upsert_entity(&mut *conn, draft, now).await?;
        let mut applied = Applied {
            entities: 1,
            embeddings: self
                .index_entity(&mut *conn, &entity, readme, &manifest.examples, now)
                .await?,
        };

        if self.settings.derive_tools {
            if let Some(tool) = manifest.derived_tool() {
                let derived =
                    repo::upsert_entity(&mut *conn, EntityDraft::from_manifest(&tool, source_url), now)
                        .await?;
                applied.embeddings += self
                    .index_entity(&mut *conn, &derived, None, &[], now)
                    .await?;
                applied.entities += 1;
                tracing::debug!(uid = %derived.uid, server = %entity.uid, "Derived tool entity");
            }
        }
        Ok(applied)
    }

    /// Rebuild the entity's chunks and vectors. Returns the number of
    /// vectors written.
    async fn index_entity(
        &self,
        conn: &mut SqliteConnection,
        entity: &Entity,
        readme: Option<&str>,
        examples: &[String],
        now: DateTime<Utc>,
    ) -> Result<usize> {
        let corpus = build_corpus(entity, readme, examples);
        let options = self.chunking.clone().with_meta("entity_uid", &entity.uid);
        let chunks = chunk_text(&entity.uid, &corpus, &options);

        let vectors = if self.settings.embed && self.backends.embedder.is_enabled() {
            match self.embed_chunks(entity, &chunks).await {
                Ok(vectors) => vectors,
                Err(e) => {
                    tracing::warn!(
                        uid = %entity.uid,
                        chunks = chunks.len(),
                        error = %format!("{:#}", e),
                        "Embedding failed; storing chunks without vectors"
                    );
                    Vec::new()
                }
            }
        } else {
            Vec::new()
        };

        repo::replace_chunks(
            conn,
            &entity.uid,
            &chunks,
            &vectors,
            self.backends.vector_encoding,
            now,
        )
        .await?;
        Ok(vectors.len())
    }

    async fn embed_chunks(&self, entity: &Entity, chunks: &[Chunk]) -> Result<Vec<IndexedVector>> {
        if chunks.is_empty() {
            return Ok(Vec::new());
        }
        let embedder = &self.backends.embedder;
        let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
        let vectors = embedder.encode(&texts).await?;
        if vectors.len() != chunks.len() {
            anyhow::bail!(
                "Embedder returned {} vectors for {} chunks",
                vectors.len(),
                chunks.len()
            );
        }

        let mut out = Vec::with_capacity(chunks.len());
        for (chunk, vector) in chunks.iter().zip(vectors) {
            let key = format!("{}#{}", entity.uid, chunk.uid);
            let raw_ref = match self.backends.blobs.put_text(&key, &chunk.text).await {
                Ok(reference) => Some(reference),
                Err(e) => {
                    tracing::warn!(key = %key, error = %e, "Blob write failed");
                    None
                }
            };
            out.push(IndexedVector {
                entity_uid: entity.uid.clone(),
                chunk_id: chunk.uid.clone(),
                vector,
                caps_text: entity.capabilities.join(" "),
                frameworks_text: entity.frameworks.join(" "),
                providers_text: entity.providers.join(" "),
                quality_score: entity.quality_score,
                embed_model: embedder.model_id().to_string(),
                raw_ref,
            });
        }
        Ok(out)
    }

    /// Register every protocol server among `manifests` that exposes an
    /// endpoint. Gateway failures are returned as outcomes, never raised.
    async fn register_all<'a>(
        &self,
        manifests: impl Iterator<Item = &'a Manifest>,
        stats: &mut IngestStats,
    ) -> Vec<RegistrationOutcome> {
        let registrar = &self.backends.registrar;
        let pending: Vec<(String, ServerRegistration)> = manifests
            .filter_map(|m| Some((m.uid(), registration_for(m)?)))
            .collect();
        if pending.is_empty() {
            return Vec::new();
        }
        if !registrar.is_enabled() {
            tracing::debug!(servers = pending.len(), "No gateway configured; skipping registration");
            return Vec::new();
        }

        let outcomes: Vec<_> = stream::iter(pending)
            .map(|(uid, registration)| async move {
                let outcome = registrar.register_server(&registration).await;
                (uid, registration, outcome)
            })
            .buffer_unordered(self.settings.registration_workers.max(1))
            .collect()
            .await;

        outcomes
            .into_iter()
            .map(|(uid, registration, outcome)| {
                stats.registrations_attempted += 1;
                let outcome = match outcome {
                    Ok(()) => {
                        tracing::info!(uid = %uid, url = %registration.url, "Registered server");
                        Ok(())
                    }
                    Err(e) => {
                        stats.registrations_failed += 1;
                        tracing::warn!(uid = %uid, url = %registration.url, error = %e, "Registration failed");
                        Err(e.to_string())
                    }
                };
                (uid, outcome)
            })
            .collect()
    }
}

/// Gateway payload for a protocol server, named after the manifest (or its
/// id when it has no name).
fn registration_for(manifest: &Manifest) -> Option<ServerRegistration> {
    let name = manifest
        .name
        .as_deref()
        .map(str::trim)
        .filter(|n| !n.is_empty())
        .unwrap_or(&manifest.id);
    ServerRegistration::from_server_block(name, manifest.server_block()?)
}

/// Write registration outcomes for the entities in `stored`. Servers whose
/// manifest failed to store have no row to update.
async fn record_registrations(
    conn: &mut SqliteConnection,
    outcomes: Vec<RegistrationOutcome>,
    stored: &HashSet<String>,
    now: DateTime<Utc>,
) -> Result<()> {
    for (uid, outcome) in outcomes {
        if stored.contains(&uid) {
            repo::set_registration_status(&mut *conn, &uid, outcome, now).await?;
        }
    }
    Ok(())
}

/// CLI entry point: ingests `remotes` (or every configured remote when
/// empty) and prints the counters.
pub async fn run_ingest(config: &Config, remotes: &[String]) -> Result<()> {
    let pool = db::connect(config).await?;
    let backends = Backends::from_config(config, &pool).await?;
    let ingestor = Ingestor::new(pool.clone(), &backends, config);

    let remotes: Vec<String> = if remotes.is_empty() {
        config.ingest.remotes.clone()
    } else {
        remotes.to_vec()
    };
    if remotes.is_empty() {
        anyhow::bail!("No remotes to ingest. Set [ingest].remotes or pass --remote.");
    }
    let stats = ingestor.ingest_remotes(&remotes).await;
    pool.close().await;

    println!("ingest ({} remotes)", remotes.len());
    println!("  manifests seen: {}", stats.manifests_seen);
    println!("  entities upserted: {}", stats.entities_upserted);
    println!("  embeddings upserted: {}", stats.embeddings_upserted);
    println!("  skipped: {}", stats.skipped);
    println!("  errors: {}", stats.errors);
    if stats.registrations_attempted > 0 {
        println!(
            "  registrations: {} attempted, {} failed",
            stats.registrations_attempted, stats.registrations_failed
        );
    }
    println!("ok");
    Ok(())
}

/// Searchable text for an entity: name, summary, description, tag lines,
/// readme and examples, separated by blank lines.
pub fn build_corpus(entity: &Entity, readme: Option<&str>, examples: &[String]) -> String {
    let mut parts: Vec<String> = vec![entity.name.clone()];
    parts.extend(entity.summary.clone());
    parts.extend(entity.description.clone());
    for (label, tags) in [
        ("Capabilities", &entity.capabilities),
        ("Frameworks", &entity.frameworks),
        ("Providers", &entity.providers),
    ] {
        if !tags.is_empty() {
            parts.push(format!("{}: {}", label, tags.join(", ")));
        }
    }
    parts.extend(readme.map(str::to_string));
    parts.extend(examples.iter().cloned());

    parts
        .into_iter()
        .map(|p| p.trim().to_string())
        .filter(|p| !p.is_empty())
        .collect::<Vec<_>>()
        .join("\n\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::EntityType;
    use std::collections::BTreeMap;

    fn entity() -> Entity {
        let now = Utc::now();
        Entity {
            uid: "tool:pdf@1.0".into(),
            kind: EntityType::Tool,
            name: "PDF Summarizer".into(),
            version: "1.0".into(),
            summary: Some("Summarizes PDFs".into()),
            description: None,
            license: None,
            homepage: None,
            source_url: None,
            capabilities: vec!["pdf".into(), "summarize".into()],
            frameworks: Vec::new(),
            providers: vec!["openai".into()],
            quality_score: 0.7,
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

    #[test]
    fn test_corpus_layout() {
        let corpus = build_corpus(&entity(), Some("  # Usage\nRun it.  "), &["pdf in, text out".into()]);
        assert_eq!(
            corpus,
            "PDF Summarizer\n\nSummarizes PDFs\n\nCapabilities: pdf, summarize\n\n\
             Providers: openai\n\n# Usage\nRun it.\n\npdf in, text out"
        );
    }

    #[test]
    fn test_corpus_skips_empty_parts() {
        let mut e = entity();
        e.summary = Some("   ".into());
        e.capabilities.clear();
        e.providers.clear();
        assert_eq!(build_corpus(&e, Some(""), &[]), "PDF Summarizer");
    }

    #[test]
    fn test_stats_absorb() {
        let mut total = IngestStats::default();
        let one = IngestStats {
            manifests_seen: 3,
            entities_upserted: 2,
            skipped: 1,
            ..IngestStats::default()
        };
        total.absorb(&one);
        total.absorb(&one);
        assert_eq!(total.manifests_seen, 6);
        assert_eq!(total.entities_upserted, 4);
        assert_eq!(total.skipped, 2);
        assert_eq!(total.errors, 0);
    }
}
