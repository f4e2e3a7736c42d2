//! Mock fetcher for testing (in-memory URL → resource map)

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::RwLock;

use super::{FetchError, FetchedResource, RemoteFetcher};

/// Fetcher that serves stubbed responses; unknown URLs return 404.
#[derive(Clone, Default)]
pub struct MockFetcher {
    resources: Arc<RwLock<HashMap<String, FetchedResource>>>,
    fetches: Arc<AtomicU64>,
    /// When set, every fetch fails with this status
    fail_with_status: Arc<RwLock<Option<u16>>>,
}

impl MockFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a response for a URL.
    pub fn stub(&self, url: &str, data: Bytes, content_type: Option<&str>) {
        self.resources.write().insert(
            url.to_string(),
            FetchedResource {
                data,
                content_type: content_type.map(String::from),
            },
        );
    }

    /// Make every subsequent fetch fail with the given status.
    pub fn set_fail_with_status(&self, status: Option<u16>) {
        *self.fail_with_status.write() = status;
    }

    /// Number of fetch calls observed.
    pub fn fetch_count(&self) -> u64 {
        self.fetches.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl RemoteFetcher for MockFetcher {
    async fn fetch(&self, url: &str) -> Result<FetchedResource, FetchError> {
        self.fetches.fetch_add(1, Ordering::Relaxed);

        if let Some(status) = *self.fail_with_status.read() {
            return Err(FetchError::Status {
                url: url.to_string(),
                status,
            });
        }

        self.resources
            .read()
            .get(url)
            .cloned()
            .ok_or_else(|| FetchError::Status {
                url: url.to_string(),
                status: 404,
            })
    }
}
