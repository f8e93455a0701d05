//! Manifest retrieval over HTTP.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use reqwest::{Client, Url};
use tracing::{debug, info, info_span, Instrument};

use crate::models::FileTree;
use crate::{AppError, Result};

/// Anything that can produce the project file tree for a run.
pub trait ManifestSource: Send + Sync {
    /// Retrieve the file tree. No retries are performed.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Fetch` on transport failure or non-success status,
    /// and `AppError::Parse` when the payload is not a valid file tree.
    fn fetch_manifest(&self) -> Pin<Box<dyn Future<Output = Result<FileTree>> + Send + '_>>;
}

/// HTTP client for a manifest provider endpoint.
#[derive(Debug, Clone)]
pub struct ManifestFetcher {
    client: Client,
    url: Url,
}

impl ManifestFetcher {
    /// Build a fetcher for `url` with a whole-request `timeout`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the URL is invalid or the HTTP client
    /// cannot be constructed.
    pub fn new(url: &str, timeout: Duration) -> Result<Self> {
        let url = Url::parse(url)
            .map_err(|err| AppError::Config(format!("invalid manifest_url {url:?}: {err}")))?;
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|err| AppError::Config(format!("failed to build http client: {err}")))?;
        Ok(Self { client, url })
    }

    /// Endpoint this fetcher reads from.
    #[must_use]
    pub fn url(&self) -> &Url {
        &self.url
    }

    async fn fetch(&self) -> Result<FileTree> {
        let response = self
            .client
            .get(self.url.clone())
            .send()
            .await
            .map_err(|err| AppError::Fetch(format!("error fetching project files: {err}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(AppError::Fetch(format!(
                "failed to fetch project files: HTTP {status}"
            )));
        }

        let body = response
            .bytes()
            .await
            .map_err(|err| AppError::Fetch(format!("error reading project files: {err}")))?;
        debug!(bytes = body.len(), "manifest body received");

        let tree: FileTree = serde_json::from_slice(&body)?;
        tree.validate()?;

        info!(files = tree.file_count(), "manifest fetched");
        Ok(tree)
    }
}

impl ManifestSource for ManifestFetcher {
    fn fetch_manifest(&self) -> Pin<Box<dyn Future<Output = Result<FileTree>> + Send + '_>> {
        let span = info_span!("fetch_manifest", url = %self.url);
        Box::pin(self.fetch().instrument(span))
    }
}
