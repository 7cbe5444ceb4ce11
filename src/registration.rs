//! Protocol-server registration with an external gateway.
//!
//! After a remote is ingested, every protocol server that exposes an
//! endpoint in `mcp_registration.server` is registered with the gateway.
//! Registration is best-effort: the outcome is recorded on the entity
//! (`registered_at` / `registration_error`) and never fails ingestion.
//!
//! # Retry Strategy
//!
//! | Response | Outcome |
//! |----------|---------|
//! | 2xx | success |
//! | 409 with `idempotent = true` | success (already registered) |
//! | other 4xx | fail immediately |
//! | 5xx or network error | retry, backoff `base · 2^(attempt-1)` capped at `max_backoff_ms` |

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

use crate::config::RegistrationConfig;
use crate::error::RegistrationError;

/// Payload sent to the gateway.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ServerRegistration {
    pub name: String,
    pub url: String,
    pub transport: String,
    pub description: String,
}

impl ServerRegistration {
    /// Build a registration from a manifest's `mcp_registration.server`
    /// block. `None` when the block has no URL.
    pub fn from_server_block(default_name: &str, block: &Value) -> Option<Self> {
        let url = block.get("url").and_then(Value::as_str)?.trim();
        if url.is_empty() {
            return None;
        }
        let transport = normalize_transport(block.get("transport").and_then(Value::as_str));
        let text = |key: &str| {
            block
                .get(key)
                .and_then(Value::as_str)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
        };

        Some(Self {
            name: text("name").unwrap_or_else(|| default_name.to_string()),
            url: endpoint_url(url, transport),
            transport: transport.to_string(),
            description: text("description").unwrap_or_default(),
        })
    }
}

/// Map manifest transport names onto the gateway's set. Unknown and
/// missing values default to SSE.
pub fn normalize_transport(transport: Option<&str>) -> &'static str {
    match transport.map(|t| t.trim().to_ascii_uppercase()).as_deref() {
        Some("HTTP") => "HTTP",
        Some("STDIO") => "STDIO",
        Some("STREAMABLEHTTP") => "STREAMABLEHTTP",
        _ => "SSE",
    }
}

/// SSE servers are reached through their `/messages/` endpoint.
fn endpoint_url(url: &str, transport: &str) -> String {
    let base = url.trim_end_matches('/');
    if transport != "SSE" {
        return base.to_string();
    }
    if base.ends_with("/messages") {
        format!("{}/", base)
    } else {
        format!("{}/messages/", base)
    }
}

#[async_trait]
pub trait Registrar: Send + Sync {
    /// `false` when no gateway is configured; registration is skipped.
    fn is_enabled(&self) -> bool {
        true
    }
    async fn register_server(&self, registration: &ServerRegistration)
        -> Result<(), RegistrationError>;
}

pub fn create_registrar(config: &RegistrationConfig) -> anyhow::Result<Arc<dyn Registrar>> {
    match &config.gateway_url {
        Some(_) => Ok(Arc::new(GatewayRegistrar::from_config(config)?)),
        None => Ok(Arc::new(NullRegistrar)),
    }
}

pub struct NullRegistrar;

#[async_trait]
impl Registrar for NullRegistrar {
    fn is_enabled(&self) -> bool {
        false
    }

    async fn register_server(&self, _: &ServerRegistration) -> Result<(), RegistrationError> {
        Ok(())
    }
}

/// How a single gateway response is handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    Success,
    Retry,
    Fail,
}

pub fn classify(status: u16, idempotent: bool) -> Disposition {
    match status {
        200..=299 => Disposition::Success,
        409 if idempotent => Disposition::Success,
        500..=599 => Disposition::Retry,
        _ => Disposition::Fail,
    }
}

/// Backoff before retry `attempt` (1-based).
pub fn backoff_delay(attempt: u32, base_ms: u64, max_ms: u64) -> Duration {
    let exp = attempt.saturating_sub(1).min(16);
    Duration::from_millis(base_ms.saturating_mul(1u64 << exp).min(max_ms))
}

/// Registers servers through `POST {gateway_url}/gateways`.
pub struct GatewayRegistrar {
    client: reqwest::Client,
    endpoint: String,
    token: Option<String>,
    max_retries: u32,
    backoff_base_ms: u64,
    max_backoff_ms: u64,
    idempotent: bool,
}

impl GatewayRegistrar {
    pub fn from_config(config: &RegistrationConfig) -> anyhow::Result<Self> {
        let base = config
            .gateway_url
            .as_deref()
            .ok_or_else(|| anyhow::anyhow!("registration.gateway_url required"))?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            client,
            endpoint: format!("{}/gateways", base.trim_end_matches('/')),
            token: std::env::var(&config.token_env).ok().filter(|t| !t.is_empty()),
            max_retries: config.max_retries,
            backoff_base_ms: config.backoff_base_ms,
            max_backoff_ms: config.max_backoff_ms,
            idempotent: config.idempotent,
        })
    }
}

#[async_trait]
impl Registrar for GatewayRegistrar {
    async fn register_server(
        &self,
        registration: &ServerRegistration,
    ) -> Result<(), RegistrationError> {
        let attempts = self.max_retries + 1;
        let mut last = String::new();

        for attempt in 0..attempts {
            if attempt > 0 {
                tokio::time::sleep(backoff_delay(
                    attempt,
                    self.backoff_base_ms,
                    self.max_backoff_ms,
                ))
                .await;
            }

            let mut request = self.client.post(&self.endpoint).json(registration);
            if let Some(token) = &self.token {
                request = request.bearer_auth(token);
            }

            let response = match request.send().await {
                Ok(r) => r,
                Err(e) if e.is_builder() => return Err(RegistrationError::Client(e.to_string())),
                Err(e) => {
                    tracing::warn!(url = %registration.url, attempt, error = %e, "gateway unreachable");
                    last = e.to_string();
                    continue;
                }
            };

            let status = response.status().as_u16();
            match classify(status, self.idempotent) {
                Disposition::Success => {
                    tracing::info!(name = %registration.name, status, "registered server with gateway");
                    return Ok(());
                }
                Disposition::Retry => {
                    let body = response.text().await.unwrap_or_default();
                    tracing::warn!(name = %registration.name, status, attempt, "gateway server error");
                    last = format!("{}: {}", status, body);
                }
                Disposition::Fail => {
                    let body = response.text().await.unwrap_or_default();
                    return Err(RegistrationError::Rejected { status, body });
                }
            }
        }

        Err(RegistrationError::Exhausted { attempts, last })
    }
}
