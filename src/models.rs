//! Core data models used throughout the catalog hub.
//!
//! These types represent the catalog entities, chunks, vectors and search
//! hits that flow through the ingestion and retrieval pipeline.
//!
//! | Type | Persisted | Owner |
//! |------|-----------|-------|
//! | [`Entity`] | `entity` table | natural key `type:id@version` |
//! | [`Chunk`] | `chunk` table | one entity |
//! | [`IndexedVector`] | `embedding_chunk` table | one chunk |
//! | [`Hit`] | no | a single query |
//! | [`RankedResult`] | no | a single query |

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Kind of installable artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityType {
    Agent,
    Tool,
    #[serde(alias = "mcp_server")]
    ProtocolServer,
}

impl EntityType {
    pub const ALL: [EntityType; 3] = [
        EntityType::Agent,
        EntityType::Tool,
        EntityType::ProtocolServer,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EntityType::Agent => "agent",
            EntityType::Tool => "tool",
            EntityType::ProtocolServer => "protocol_server",
        }
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntityType {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "agent" => Ok(EntityType::Agent),
            "tool" => Ok(EntityType::Tool),
            "protocol_server" | "mcp_server" => Ok(EntityType::ProtocolServer),
            other => anyhow::bail!(
                "Unknown entity type: '{}'. Must be agent, tool, or protocol_server.",
                other
            ),
        }
    }
}

/// Build the natural key `"{type}:{id}@{version}"`.
pub fn entity_uid(kind: EntityType, id: &str, version: &str) -> String {
    format!("{}:{}@{}", kind, id, version)
}

/// Whether a free-text query is shaped like a full natural key.
pub fn looks_like_uid(query: &str) -> bool {
    query.contains(':') && query.contains('@')
}

/// A catalog record: one version of one installable artifact.
#[derive(Debug, Clone, Serialize)]
pub struct Entity {
    pub uid: String,
    #[serde(rename = "type")]
    pub kind: EntityType,
    pub name: String,
    pub version: String,
    pub summary: Option<String>,
    pub description: Option<String>,
    pub license: Option<String>,
    pub homepage: Option<String>,
    pub source_url: Option<String>,
    pub capabilities: Vec<String>,
    pub frameworks: Vec<String>,
    pub providers: Vec<String>,
    pub quality_score: f64,
    pub release_ts: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub registered_at: Option<DateTime<Utc>>,
    pub registration_error: Option<String>,
    /// Protocol-native sub-manifests keyed by protocol name (e.g. `a2a`).
    pub manifests: BTreeMap<String, Value>,
    /// Protocol tags such as `a2a@1.0`, sorted and unique.
    pub protocols: Vec<String>,
    pub mcp_registration: Option<Value>,
}

impl Entity {
    /// Registered with the gateway and no outstanding registration error.
    pub fn is_ready(&self) -> bool {
        self.registered_at.is_some() && self.registration_error.is_none()
    }

    /// Timestamp used for recency: release time, else creation time.
    pub fn effective_ts(&self) -> DateTime<Utc> {
        self.release_ts.unwrap_or(self.created_at)
    }
}

/// A token-budgeted slice of an entity's searchable text.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Chunk {
    pub uid: String,
    pub order: i64,
    pub text: String,
    pub start_char: usize,
    pub end_char: usize,
    pub tokens_est: usize,
    pub meta: BTreeMap<String, String>,
}

/// Embedding of one chunk, with denormalized filter text.
#[derive(Debug, Clone)]
pub struct IndexedVector {
    pub entity_uid: String,
    pub chunk_id: String,
    pub vector: Vec<f32>,
    pub caps_text: String,
    pub frameworks_text: String,
    pub providers_text: String,
    pub quality_score: f64,
    pub embed_model: String,
    pub raw_ref: Option<String>,
}

/// Which retrieval path produced a [`Hit`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HitSource {
    Lexical,
    Vector,
    /// Exact natural-key match used when keyword search finds nothing.
    Fallback,
}

/// A single retrieval result, before ranking.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Hit {
    pub entity_id: String,
    pub score: f64,
    pub source: HitSource,
    pub quality: Option<f64>,
    pub recency: Option<f64>,
    pub best_chunk_id: Option<String>,
}

/// Ranked output row with every component signal exposed.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RankedResult {
    pub entity_id: String,
    pub score_lexical: f64,
    pub score_semantic: f64,
    pub score_quality: f64,
    pub score_recency: f64,
    pub score_final: f64,
    pub best_chunk_id: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uid_format() {
        assert_eq!(
            entity_uid(EntityType::ProtocolServer, "fs", "1.2.0"),
            "protocol_server:fs@1.2.0"
        );
        assert_eq!(entity_uid(EntityType::Tool, "hello", "0.1.0"), "tool:hello@0.1.0");
    }

    #[test]
    fn test_legacy_type_spelling() {
        assert_eq!(
            "mcp_server".parse::<EntityType>().unwrap(),
            EntityType::ProtocolServer
        );
        let parsed: EntityType = serde_json::from_str("\"mcp_server\"").unwrap();
        assert_eq!(parsed, EntityType::ProtocolServer);
        assert!("plugin".parse::<EntityType>().is_err());
    }

    #[test]
    fn test_looks_like_uid() {
        assert!(looks_like_uid("tool:hello@0.1.0"));
        assert!(!looks_like_uid("hello"));
        assert!(!looks_like_uid("tool:hello"));
    }
}
