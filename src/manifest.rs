//! Catalog index and manifest parsing, plus manifest validation.
//!
//! A remote publishes an **index** that points at individual **manifests**.
//! Three index shapes are understood, either at the top level or under a
//! well-known key:
//!
//! | Shape | Example |
//! |-------|---------|
//! | flat URL list | `["https://…/a.yaml"]` or `{"manifests": [...]}` |
//! | objects with `manifest_url` | `{"items": [{"manifest_url": "…"}]}` |
//! | `path` + `base_url` pairs | `{"entries": [{"path": "a.yaml", "base_url": "…"}]}` |
//!
//! Relative locations resolve against the entry's `base_url`, then the
//! index-level `base_url`, then the index URL itself.
//!
//! Manifests are YAML (JSON parses as YAML too). Anything malformed is
//! reported as [`ManifestError::Skip`] so one bad document never stops a
//! remote.

use chrono::{DateTime, NaiveDate, Utc};
use serde::Deserialize;
use serde_json::Value;
use std::collections::{BTreeMap, HashSet};
use url::Url;

use crate::error::ManifestError;
use crate::models::{entity_uid, EntityType};

// ============ Index ============

/// Extract absolute manifest URLs from an index document, deduplicated in
/// first-seen order.
pub fn extract_manifest_urls(index: &Value, index_url: Option<&Url>) -> Vec<String> {
    let index_base = index
        .get("base_url")
        .and_then(Value::as_str)
        .and_then(|b| Url::parse(b).ok())
        .or_else(|| index_url.cloned());

    let mut items: Vec<&Value> = Vec::new();
    match index {
        Value::Array(entries) => items.extend(entries),
        Value::Object(map) => {
            for key in ["manifests", "items", "entries"] {
                if let Some(Value::Array(entries)) = map.get(key) {
                    items.extend(entries);
                }
            }
        }
        _ => {}
    }

    let mut seen = HashSet::new();
    let mut urls = Vec::new();
    for item in items {
        let Some(url) = resolve_entry(item, index_base.as_ref()) else {
            tracing::debug!(entry = %item, "ignoring unresolvable index entry");
            continue;
        };
        if seen.insert(url.clone()) {
            urls.push(url);
        }
    }
    urls
}

fn resolve_entry(item: &Value, index_base: Option<&Url>) -> Option<String> {
    match item {
        Value::String(location) => resolve(location, index_base),
        Value::Object(map) => {
            if let Some(location) = map.get("manifest_url").and_then(Value::as_str) {
                return resolve(location, index_base);
            }
            let path = map.get("path").and_then(Value::as_str)?;
            let entry_base = map
                .get("base_url")
                .and_then(Value::as_str)
                .and_then(|b| Url::parse(b).ok());
            resolve(path, entry_base.as_ref().or(index_base))
        }
        _ => None,
    }
}

fn resolve(location: &str, base: Option<&Url>) -> Option<String> {
    let location = location.trim();
    if location.is_empty() {
        return None;
    }
    if let Ok(absolute) = Url::parse(location) {
        return Some(absolute.to_string());
    }
    base.and_then(|b| b.join(location).ok()).map(|u| u.to_string())
}

// ============ Parsing ============

/// Parse a YAML or JSON document into a JSON value with a mapping root.
pub fn parse_document(text: &str) -> Result<Value, ManifestError> {
    let value: Value = serde_yaml::from_str(text)
        .map_err(|e| ManifestError::skip(format!("unparseable document: {}", e)))?;
    if !value.is_object() {
        return Err(ManifestError::skip("document root is not a mapping"));
    }
    Ok(value)
}

/// Parse an index document. Indexes may also be a bare list.
pub fn parse_index(text: &str) -> anyhow::Result<Value> {
    let value: Value = serde_yaml::from_str(text)?;
    if !(value.is_object() || value.is_array()) {
        anyhow::bail!("index is neither a mapping nor a list");
    }
    Ok(value)
}

/// Typed view of a validated manifest.
#[derive(Debug, Clone, Deserialize)]
pub struct Manifest {
    #[serde(rename = "type")]
    pub kind: EntityType,
    pub id: String,
    pub version: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub summary: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub license: Option<String>,
    #[serde(default)]
    pub homepage: Option<String>,
    #[serde(default)]
    pub source_url: Option<String>,
    #[serde(default)]
    pub capabilities: Vec<String>,
    #[serde(default)]
    pub frameworks: Vec<String>,
    #[serde(default)]
    pub providers: Vec<String>,
    #[serde(default)]
    pub compatibility: Option<Compatibility>,
    #[serde(default)]
    pub quality_score: Option<f64>,
    #[serde(default)]
    pub release_ts: Option<Value>,
    #[serde(default)]
    pub readme: Option<String>,
    #[serde(default)]
    pub readme_url: Option<String>,
    #[serde(default)]
    pub examples: Vec<String>,
    #[serde(default)]
    pub artifacts: Vec<Value>,
    #[serde(default)]
    pub mcp_registration: Option<Value>,
    #[serde(default)]
    pub manifests: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Compatibility {
    #[serde(default)]
    pub frameworks: Vec<String>,
    #[serde(default)]
    pub providers: Vec<String>,
}

impl Manifest {
    /// Build the typed manifest from a parsed document. Numeric `id` and
    /// `version` values (`version: 1.0` in YAML) are read as strings, and a
    /// null list or mapping (`capabilities:` with no value) reads as empty.
    pub fn from_document(mut doc: Value) -> Result<Self, ManifestError> {
        if let Value::Object(map) = &mut doc {
            for key in ["id", "version"] {
                if let Some(Value::Number(n)) = map.get(key) {
                    let text = n.to_string();
                    map.insert(key.to_string(), Value::String(text));
                }
            }
            drop_nulls(map, &LIST_KEYS);
            if let Some(Value::Object(compat)) = map.get_mut("compatibility") {
                drop_nulls(compat, &["frameworks", "providers"]);
            }
        }
        let manifest: Manifest = serde_json::from_value(doc)
            .map_err(|e| ManifestError::skip(format!("invalid manifest: {}", e)))?;
        if manifest.id.trim().is_empty() || manifest.version.trim().is_empty() {
            return Err(ManifestError::skip("manifest id and version must be non-empty"));
        }
        Ok(manifest)
    }

    pub fn uid(&self) -> String {
        entity_uid(self.kind, &self.id, &self.version)
    }

    /// Top-level frameworks followed by `compatibility.frameworks`.
    pub fn all_frameworks(&self) -> Vec<String> {
        merge_tags(
            &self.frameworks,
            self.compatibility.as_ref().map(|c| c.frameworks.as_slice()),
        )
    }

    pub fn all_providers(&self) -> Vec<String> {
        merge_tags(
            &self.providers,
            self.compatibility.as_ref().map(|c| c.providers.as_slice()),
        )
    }

    /// Release timestamp from RFC 3339, `YYYY-MM-DD`, or Unix seconds.
    pub fn release_time(&self) -> Option<DateTime<Utc>> {
        match self.release_ts.as_ref()? {
            Value::String(s) => DateTime::parse_from_rfc3339(s)
                .map(|dt| dt.with_timezone(&Utc))
                .ok()
                .or_else(|| {
                    NaiveDate::parse_from_str(s, "%Y-%m-%d")
                        .ok()
                        .and_then(|d| d.and_hms_opt(0, 0, 0))
                        .map(|dt| dt.and_utc())
                }),
            Value::Number(n) => n.as_i64().and_then(|secs| DateTime::from_timestamp(secs, 0)),
            _ => None,
        }
    }

    /// `name@version` for each protocol sub-manifest, or just `name` when
    /// the block carries no version.
    pub fn protocol_tags(&self) -> Vec<String> {
        self.manifests
            .iter()
            .map(|(protocol, block)| match block.get("version") {
                Some(Value::String(v)) if !v.is_empty() => format!("{}@{}", protocol, v),
                Some(Value::Number(n)) => format!("{}@{}", protocol, n),
                _ => protocol.clone(),
            })
            .collect()
    }

    /// The `server` block of a protocol server's registration, if any.
    pub fn server_block(&self) -> Option<&Value> {
        if self.kind != EntityType::ProtocolServer {
            return None;
        }
        self.mcp_registration.as_ref()?.get("server")
    }

    /// A `tool` manifest derived from `mcp_registration.tool`.
    pub fn derived_tool(&self) -> Option<Manifest> {
        if self.kind != EntityType::ProtocolServer {
            return None;
        }
        let tool = self.mcp_registration.as_ref()?.get("tool")?.as_object()?;
        let text = |key: &str| {
            tool.get(key)
                .and_then(Value::as_str)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
        };
        let description = text("description");

        Some(Manifest {
            kind: EntityType::Tool,
            id: text("id").unwrap_or_else(|| format!("{}-tool", self.id)),
            version: self.version.clone(),
            name: text("name").or_else(|| self.name.clone()),
            summary: description.clone().or_else(|| self.summary.clone()),
            description,
            license: None,
            homepage: None,
            source_url: self.source_url.clone(),
            capabilities: self.capabilities.clone(),
            frameworks: self.all_frameworks(),
            providers: self.all_providers(),
            compatibility: None,
            quality_score: None,
            release_ts: None,
            readme: None,
            readme_url: None,
            examples: Vec::new(),
            artifacts: Vec::new(),
            mcp_registration: None,
            manifests: BTreeMap::new(),
        })
    }
}

/// Collection-valued manifest keys; null stands for empty.
const LIST_KEYS: [&str; 6] = [
    "capabilities",
    "frameworks",
    "providers",
    "examples",
    "artifacts",
    "manifests",
];

fn drop_nulls(map: &mut serde_json::Map<String, Value>, keys: &[&str]) {
    for key in keys {
        if matches!(map.get(*key), Some(Value::Null)) {
            map.remove(*key);
        }
    }
}

fn merge_tags(primary: &[String], extra: Option<&[String]>) -> Vec<String> {
    let mut seen = HashSet::new();
    primary
        .iter()
        .chain(extra.unwrap_or_default())
        .map(|t| t.trim())
        .filter(|t| !t.is_empty() && seen.insert(t.to_string()))
        .map(str::to_string)
        .collect()
}

// ============ Validation ============

/// Type-specific manifest validation.
pub trait ManifestValidator: Send + Sync {
    /// `Err(Skip)` when the document must not be ingested.
    fn validate(&self, doc: &Value) -> Result<(), ManifestError>;
}

/// Built-in structural validator covering every entity type.
///
/// A `protocol_server` may declare an empty `artifacts` list; agents and
/// tools that declare `artifacts` must list at least one.
#[derive(Debug, Default, Clone)]
pub struct SchemaValidator;

impl ManifestValidator for SchemaValidator {
    fn validate(&self, doc: &Value) -> Result<(), ManifestError> {
        let mut problems = Vec::new();
        let Some(map) = doc.as_object() else {
            return Err(ManifestError::skip("manifest root is not a mapping"));
        };

        let kind = match map.get("type").and_then(Value::as_str) {
            Some(t) => match t.parse::<EntityType>() {
                Ok(kind) => Some(kind),
                Err(_) => {
                    problems.push(format!("unknown type '{}'", t));
                    None
                }
            },
            None => {
                problems.push("missing 'type'".to_string());
                None
            }
        };

        match scalar_text(map.get("id")) {
            Some(id) if id.contains([':', '@']) || id.chars().any(char::is_whitespace) => {
                problems.push(format!("id '{}' must not contain ':', '@' or whitespace", id))
            }
            Some(_) => {}
            None => problems.push("missing or empty 'id'".to_string()),
        }
        if scalar_text(map.get("version")).is_none() {
            problems.push("missing or empty 'version'".to_string());
        }

        for key in ["name", "summary", "description", "license", "homepage", "source_url", "readme", "readme_url"] {
            if let Some(value) = map.get(key) {
                if !(value.is_string() || value.is_null()) {
                    problems.push(format!("'{}' must be a string", key));
                }
            }
        }

        for key in ["capabilities", "frameworks", "providers", "examples"] {
            check_string_list(map.get(key), key, &mut problems);
        }
        if let Some(compat) = map.get("compatibility") {
            match compat {
                Value::Object(c) => {
                    check_string_list(c.get("frameworks"), "compatibility.frameworks", &mut problems);
                    check_string_list(c.get("providers"), "compatibility.providers", &mut problems);
                }
                Value::Null => {}
                _ => problems.push("'compatibility' must be a mapping".to_string()),
            }
        }

        if let Some(score) = map.get("quality_score") {
            if !(score.is_number() || score.is_null()) {
                problems.push("'quality_score' must be a number".to_string());
            }
        }

        match map.get("artifacts") {
            None | Some(Value::Null) => {}
            Some(Value::Array(artifacts)) => {
                if artifacts.is_empty() && kind != Some(EntityType::ProtocolServer) {
                    problems.push("'artifacts' must list at least one artifact".to_string());
                }
                for (i, artifact) in artifacts.iter().enumerate() {
                    if artifact.get("kind").and_then(Value::as_str).is_none() {
                        problems.push(format!("artifacts[{}] needs a string 'kind'", i));
                    }
                }
            }
            Some(_) => problems.push("'artifacts' must be a list".to_string()),
        }

        match map.get("mcp_registration") {
            None | Some(Value::Null) => {}
            Some(Value::Object(reg)) => {
                if let Some(url) = reg.get("server").and_then(|s| s.get("url")) {
                    if !url.is_string() {
                        problems.push("'mcp_registration.server.url' must be a string".to_string());
                    }
                }
            }
            Some(_) => problems.push("'mcp_registration' must be a mapping".to_string()),
        }

        match map.get("manifests") {
            None | Some(Value::Null) => {}
            Some(Value::Object(blocks)) => {
                for (protocol, block) in blocks {
                    if !block.is_object() {
                        problems.push(format!("manifests.{} must be a mapping", protocol));
                    }
                }
            }
            Some(_) => problems.push("'manifests' must be a mapping".to_string()),
        }

        for warning in trust_warnings(map) {
            tracing::warn!(id = ?scalar_text(map.get("id")), "{}", warning);
        }

        if problems.is_empty() {
            Ok(())
        } else {
            Err(ManifestError::Skip(problems.join("; ")))
        }
    }
}

fn scalar_text(value: Option<&Value>) -> Option<String> {
    match value? {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn check_string_list(value: Option<&Value>, key: &str, problems: &mut Vec<String>) {
    match value {
        None | Some(Value::Null) => {}
        Some(Value::Array(items)) if items.iter().all(Value::is_string) => {}
        Some(_) => problems.push(format!("'{}' must be a list of strings", key)),
    }
}

/// Missing signature or SBOM hints. Never blocks ingestion.
fn trust_warnings(map: &serde_json::Map<String, Value>) -> Vec<String> {
    let mut warnings = Vec::new();
    let has = |m: &serde_json::Map<String, Value>, key: &str| {
        m.get(key).and_then(Value::as_str).is_some_and(|s| !s.is_empty())
    };
    if let Some(Value::Array(artifacts)) = map.get("artifacts") {
        for (i, artifact) in artifacts.iter().enumerate() {
            if let Some(a) = artifact.as_object() {
                if !has(a, "sig_uri") && !has(map, "sig_uri") {
                    warnings.push(format!("artifacts[{}] has no signature (sig_uri)", i));
                }
                if !has(a, "sbom_uri") && !has(map, "sbom_uri") {
                    warnings.push(format!("artifacts[{}] has no SBOM (sbom_uri)", i));
                }
            }
        }
    }
    warnings
}
