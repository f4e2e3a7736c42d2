//! URL fetch client
//!
//! Blocking-from-the-caller's-view network I/O with a timeout; a timeout or
//! non-2xx response fails the import without anything being persisted.

pub mod mock;

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;

pub use mock::MockFetcher;

#[derive(Error, Debug)]
pub enum FetchError {
    /// Network-level failure (connect error, timeout, ...)
    #[error("request to {url} failed: {reason}")]
    Request { url: String, reason: String },

    /// The server answered with a non-2xx status
    #[error("{url} returned status {status}")]
    Status { url: String, status: u16 },
}

/// A fetched remote resource.
#[derive(Debug, Clone)]
pub struct FetchedResource {
    pub data: Bytes,
    pub content_type: Option<String>,
}

/// Seam to the URL-fetch client.
#[async_trait]
pub trait RemoteFetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<FetchedResource, FetchError>;
}

/// HTTP fetcher backed by reqwest.
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    pub fn new(timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .expect("Failed to build HTTP client");
        Self { client }
    }
}

#[async_trait]
impl RemoteFetcher for HttpFetcher {
    async fn fetch(&self, url: &str) -> Result<FetchedResource, FetchError> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| FetchError::Request {
                url: url.to_string(),
                reason: e.to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(String::from);

        let data = response.bytes().await.map_err(|e| FetchError::Request {
            url: url.to_string(),
            reason: e.to_string(),
        })?;

        Ok(FetchedResource { data, content_type })
    }
}
