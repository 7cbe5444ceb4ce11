//! Document retrieval for catalog indexes, manifests and READMEs.

use anyhow::{Context, Result};
use async_trait::async_trait;
use std::time::Duration;
use url::Url;

/// Retrieves remote documents as text.
#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch_text(&self, url: &str) -> Result<String>;
}

/// HTTP(S) fetcher with a per-request timeout. `file://` URLs are read
/// from disk so local catalogs work without a web server.
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("catalog-hub/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch_text(&self, url: &str) -> Result<String> {
        let parsed = Url::parse(url).with_context(|| format!("Invalid URL: {}", url))?;

        if parsed.scheme() == "file" {
            let path = parsed
                .to_file_path()
                .map_err(|_| anyhow::anyhow!("Invalid file URL: {}", url))?;
            return tokio::fs::read_to_string(&path)
                .await
                .with_context(|| format!("Failed to read {}", path.display()));
        }

        let response = self
            .client
            .get(parsed)
            .send()
            .await
            .with_context(|| format!("GET {} failed", url))?;
        let status = response.status();
        if !status.is_success() {
            anyhow::bail!("GET {} returned {}", url, status);
        }
        response
            .text()
            .await
            .with_context(|| format!("Failed to read body of {}", url))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_file_urls_are_read_from_disk() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("index.json");
        std::fs::write(&path, "{\"manifests\": []}").unwrap();
        let url = Url::from_file_path(&path).unwrap();

        let fetcher = HttpFetcher::new(Duration::from_secs(5)).unwrap();
        let text = fetcher.fetch_text(url.as_str()).await.unwrap();
        assert_eq!(text, "{\"manifests\": []}");

        let missing = Url::from_file_path(tmp.path().join("nope.json")).unwrap();
        assert!(fetcher.fetch_text(missing.as_str()).await.is_err());
    }

    #[tokio::test]
    async fn test_invalid_url_is_an_error() {
        let fetcher = HttpFetcher::new(Duration::from_secs(5)).unwrap();
        assert!(fetcher.fetch_text("not a url").await.is_err());
    }
}
