//! TOML configuration parsing and validation.
//!
//! Every setting the hub reads lives in one TOML file (default
//! `./config/hub.toml`). Only `[db]` is required; every other section
//! falls back to defaults, so a minimal file is:
//!
//! ```toml
//! [db]
//! path = "./data/catalog.sqlite"
//! ```
//!
//! # Sections
//!
//! | Section | Purpose |
//! |---------|---------|
//! | `[db]` | SQLite database path |
//! | `[chunking]` | Token budget, overlap and block mode for the chunker |
//! | `[search]` | Backend selection, visibility, recency half-life, weights |
//! | `[ingest]` | Remote index URLs, worker pool size, timeouts |
//! | `[embedding]` | Embedding provider (`disabled`, `hash`, `openai`) |
//! | `[blobs]` | Where raw chunk text is stored |
//! | `[registration]` | Gateway that protocol servers are registered with |

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::chunk::ChunkMode;
use crate::search::ranker::SearchWeights;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub search: SearchConfig,
    #[serde(default)]
    pub ingest: IngestConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub blobs: BlobConfig,
    #[serde(default)]
    pub registration: RegistrationConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    #[serde(default = "default_max_tokens")]
    pub max_tokens: usize,
    #[serde(default = "default_overlap")]
    pub overlap_tokens: usize,
    #[serde(default)]
    pub mode: ChunkMode,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            max_tokens: default_max_tokens(),
            overlap_tokens: default_overlap(),
            mode: ChunkMode::default(),
        }
    }
}

fn default_max_tokens() -> usize {
    256
}
fn default_overlap() -> usize {
    48
}

/// Which lexical backend answers keyword queries.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LexicalKind {
    /// Trigram similarity over name, summary and description.
    #[default]
    Similarity,
    /// Portable substring matching.
    Like,
    None,
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum VectorKind {
    #[default]
    Nearest,
    None,
}

/// How chunk vectors are stored. Only consulted when the schema is first
/// created; afterwards the value recorded in `schema_meta` wins.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum VectorEncodingSetting {
    #[default]
    F32le,
    Json,
}

#[derive(Debug, Deserialize, Clone)]
pub struct SearchConfig {
    #[serde(default)]
    pub lexical: LexicalKind,
    #[serde(default)]
    pub vector: VectorKind,
    #[serde(default)]
    pub include_pending: bool,
    #[serde(default = "default_half_life")]
    pub recency_half_life_days: f64,
    #[serde(default)]
    pub vector_encoding: VectorEncodingSetting,
    #[serde(default)]
    pub weights: SearchWeights,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            lexical: LexicalKind::default(),
            vector: VectorKind::default(),
            include_pending: false,
            recency_half_life_days: default_half_life(),
            vector_encoding: VectorEncodingSetting::default(),
            weights: SearchWeights::default(),
        }
    }
}

fn default_half_life() -> f64 {
    180.0
}

#[derive(Debug, Deserialize, Clone)]
pub struct IngestConfig {
    #[serde(default)]
    pub remotes: Vec<String>,
    #[serde(default = "default_workers")]
    pub workers: usize,
    #[serde(default = "default_registration_workers")]
    pub registration_workers: usize,
    #[serde(default = "default_ingest_timeout")]
    pub timeout_secs: u64,
    #[serde(default = "default_true")]
    pub validate: bool,
    /// Also create a `tool` entity from each protocol server's registration block.
    #[serde(default)]
    pub derive_tools: bool,
    #[serde(default = "default_true")]
    pub embed: bool,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            remotes: Vec::new(),
            workers: default_workers(),
            registration_workers: default_registration_workers(),
            timeout_secs: default_ingest_timeout(),
            validate: true,
            derive_tools: false,
            embed: true,
        }
    }
}

fn default_workers() -> usize {
    8
}
fn default_registration_workers() -> usize {
    4
}
fn default_ingest_timeout() -> u64 {
    20
}
fn default_true() -> bool {
    true
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    /// Base URL of an OpenAI-compatible API.
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: None,
            dims: None,
            url: None,
            api_key_env: default_api_key_env(),
            batch_size: default_batch_size(),
            max_retries: default_max_retries(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_provider() -> String {
    "disabled".to_string()
}
fn default_api_key_env() -> String {
    "OPENAI_API_KEY".to_string()
}
fn default_batch_size() -> usize {
    64
}
fn default_max_retries() -> u32 {
    5
}
fn default_timeout_secs() -> u64 {
    30
}

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum BlobBackend {
    #[default]
    Local,
    None,
}

#[derive(Debug, Deserialize, Clone)]
pub struct BlobConfig {
    #[serde(default)]
    pub backend: BlobBackend,
    #[serde(default = "default_blob_dir")]
    pub dir: PathBuf,
}

impl Default for BlobConfig {
    fn default() -> Self {
        Self {
            backend: BlobBackend::default(),
            dir: default_blob_dir(),
        }
    }
}

fn default_blob_dir() -> PathBuf {
    PathBuf::from("./data/blobs")
}

#[derive(Debug, Deserialize, Clone)]
pub struct RegistrationConfig {
    /// Gateway base URL. Registration is skipped when unset.
    #[serde(default)]
    pub gateway_url: Option<String>,
    /// Environment variable holding the bearer token.
    #[serde(default = "default_token_env")]
    pub token_env: String,
    #[serde(default = "default_registration_retries")]
    pub max_retries: u32,
    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
    #[serde(default = "default_registration_timeout")]
    pub timeout_secs: u64,
    /// Treat `409 Conflict` as "already registered".
    #[serde(default = "default_true")]
    pub idempotent: bool,
}

impl Default for RegistrationConfig {
    fn default() -> Self {
        Self {
            gateway_url: None,
            token_env: default_token_env(),
            max_retries: default_registration_retries(),
            backoff_base_ms: default_backoff_base_ms(),
            max_backoff_ms: default_max_backoff_ms(),
            timeout_secs: default_registration_timeout(),
            idempotent: true,
        }
    }
}

fn default_token_env() -> String {
    "GATEWAY_TOKEN".to_string()
}
fn default_registration_retries() -> u32 {
    3
}
fn default_backoff_base_ms() -> u64 {
    500
}
fn default_max_backoff_ms() -> u64 {
    5_000
}
fn default_registration_timeout() -> u64 {
    15
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

/// Check the cross-field constraints `serde` cannot express.
pub fn validate(config: &Config) -> Result<()> {
    // Validate chunking
    if config.chunking.max_tokens == 0 {
        anyhow::bail!("chunking.max_tokens must be > 0");
    }
    if config.chunking.overlap_tokens >= config.chunking.max_tokens {
        anyhow::bail!("chunking.overlap_tokens must be smaller than chunking.max_tokens");
    }

    // Validate search
    config.search.weights.validate()?;
    let half_life = config.search.recency_half_life_days;
    if half_life.is_nan() || half_life <= 0.0 {
        anyhow::bail!("search.recency_half_life_days must be > 0");
    }

    // Validate ingest
    if config.ingest.workers == 0 {
        anyhow::bail!("ingest.workers must be >= 1");
    }
    if config.ingest.registration_workers == 0 {
        anyhow::bail!("ingest.registration_workers must be >= 1");
    }

    // Validate embedding
    match config.embedding.provider.as_str() {
        "disabled" | "hash" | "openai" => {}
        other => anyhow::bail!(
            "Unknown embedding provider: '{}'. Must be disabled, hash, or openai.",
            other
        ),
    }
    if config.embedding.is_enabled() {
        if config.embedding.dims.is_none() || config.embedding.dims == Some(0) {
            anyhow::bail!(
                "embedding.dims must be > 0 when provider is '{}'",
                config.embedding.provider
            );
        }
        if config.embedding.provider == "openai" && config.embedding.model.is_none() {
            anyhow::bail!("embedding.model must be specified when provider is 'openai'");
        }
        if config.embedding.batch_size == 0 {
            anyhow::bail!("embedding.batch_size must be >= 1");
        }
    }

    if let Some(url) = &config.registration.gateway_url {
        url::Url::parse(url)
            .with_context(|| format!("registration.gateway_url is not a valid URL: {}", url))?;
    }

    Ok(())
}
