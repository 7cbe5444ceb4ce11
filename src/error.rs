//! Typed failures the ingestion pipeline and registration client branch on.
//!
//! Storage and configuration problems travel as [`anyhow::Error`]; only the
//! cases a caller has to tell apart get a dedicated type here.

use thiserror::Error;

/// Per-manifest failure. Never aborts the remote it belongs to.
#[derive(Debug, Error)]
pub enum ManifestError {
    /// Malformed or invalid document; the item is skipped and logged.
    #[error("{0}")]
    Skip(String),

    /// The document could not be retrieved.
    #[error("failed to fetch {url}: {message}")]
    Fetch { url: String, message: String },
}

impl ManifestError {
    pub fn skip(reason: impl Into<String>) -> Self {
        ManifestError::Skip(reason.into())
    }

    pub fn is_skip(&self) -> bool {
        matches!(self, ManifestError::Skip(_))
    }
}

/// Failure of a single server registration call.
#[derive(Debug, Error)]
pub enum RegistrationError {
    /// The gateway answered with a non-retryable client error.
    #[error("gateway rejected registration ({status}): {body}")]
    Rejected { status: u16, body: String },

    /// Every retry hit a server error or a network failure.
    #[error("registration failed after {attempts} attempts: {last}")]
    Exhausted { attempts: u32, last: String },

    /// The request could not be built (bad URL, bad client settings).
    #[error("registration client error: {0}")]
    Client(String),
}
