//! Blob persistence
//!
//! The wire protocol of the document store is an external concern; this
//! module defines the `DocumentStore` seam (findOne / insert / ensureIndex
//! over one keyed collection) and the `BlobStore` adapter that layers the
//! idempotent access patterns on top:
//!
//! - `insert_if_absent` — check-then-insert with duplicate-key absorption,
//!   so a racing redundant insert is never a caller-visible failure
//! - `find_by_key` — primary content-hash key or the `(date, filename)`
//!   locality key
//! - `find_by_url` — avoids redundant network fetches of an imported URL
//!
//! Cross-request consistency is entirely the store's uniqueness constraint
//! plus these contracts; there are no in-process locks.

pub mod memory;

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use crate::model::ImageRecord;

pub use memory::MemoryStore;

#[derive(Error, Debug)]
pub enum StoreError {
    /// Unique-constraint violation on insert
    #[error("duplicate key: {key}")]
    DuplicateKey { key: String },

    /// Any other backend failure
    #[error("store backend error: {0}")]
    Backend(String),
}

/// Query shapes supported by the collection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Query {
    /// Primary key: content hash or variant key
    ById(String),
    /// Secondary locality key for recently created records
    ByLocator { date: String, filename: String },
    /// Source URL of an imported original
    ByUrl(String),
}

/// Field projection for reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Projection {
    /// Full record including the binary payload
    Full,
    /// Record with the binary payload stripped
    MetadataOnly,
}

/// Seam to the underlying document store.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn find_one(
        &self,
        query: Query,
        projection: Projection,
    ) -> Result<Option<ImageRecord>, StoreError>;

    /// Insert a record; a unique-constraint violation on the primary key
    /// must surface as `StoreError::DuplicateKey`.
    async fn insert(&self, record: ImageRecord) -> Result<ImageRecord, StoreError>;

    async fn ensure_index(&self, keys: &[&str]) -> Result<(), StoreError>;
}

/// Idempotent store access over a `DocumentStore` backend.
#[derive(Clone)]
pub struct BlobStore {
    backend: Arc<dyn DocumentStore>,
}

impl BlobStore {
    pub fn new(backend: Arc<dyn DocumentStore>) -> Self {
        Self { backend }
    }

    /// Create the secondary indexes the adapter relies on.
    pub async fn ensure_indexes(&self) -> Result<(), StoreError> {
        self.backend.ensure_index(&["_id"]).await?;
        self.backend.ensure_index(&["date", "filename"]).await?;
        self.backend.ensure_index(&["url"]).await
    }

    /// Store a record unless one already exists under its primary key.
    ///
    /// A racing duplicate insert is absorbed: the existing record is
    /// returned and the conflict never surfaces to the caller.
    pub async fn insert_if_absent(&self, record: ImageRecord) -> Result<ImageRecord, StoreError> {
        let key = record.id.clone();
        if let Some(existing) = self
            .backend
            .find_one(Query::ById(key.clone()), Projection::Full)
            .await?
        {
            tracing::debug!(id = %key, "record already stored, skipping insert");
            return Ok(existing);
        }

        match self.backend.insert(record).await {
            Ok(stored) => Ok(stored),
            Err(StoreError::DuplicateKey { .. }) => {
                // A concurrent request won the race; its record is authoritative.
                tracing::debug!(id = %key, "duplicate insert absorbed");
                self.backend
                    .find_one(Query::ById(key), Projection::Full)
                    .await?
                    .ok_or_else(|| {
                        StoreError::Backend(
                            "record missing after duplicate-key conflict".to_string(),
                        )
                    })
            }
            Err(e) => Err(e),
        }
    }

    pub async fn find_by_id(
        &self,
        id: &str,
        projection: Projection,
    ) -> Result<Option<ImageRecord>, StoreError> {
        self.backend
            .find_one(Query::ById(id.to_string()), projection)
            .await
    }

    /// Look up by primary key or by the `(date, filename)` locality key.
    pub async fn find_by_key(
        &self,
        query: Query,
        projection: Projection,
    ) -> Result<Option<ImageRecord>, StoreError> {
        self.backend.find_one(query, projection).await
    }

    pub async fn find_by_url(&self, url: &str) -> Result<Option<ImageRecord>, StoreError> {
        self.backend
            .find_one(Query::ByUrl(url.to_string()), Projection::Full)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::OriginalImage;
    use bytes::Bytes;
    use chrono::Utc;
    use parking_lot::Mutex;

    fn record(content: &'static [u8]) -> ImageRecord {
        OriginalImage::from_bytes(
            Bytes::from_static(content),
            "image/jpeg".to_string(),
            400,
            300,
            None,
            None,
            Utc::now(),
        )
        .into_record()
    }

    #[tokio::test]
    async fn test_insert_if_absent_returns_existing() {
        let store = BlobStore::new(Arc::new(MemoryStore::new()));
        let first = store.insert_if_absent(record(b"abc")).await.unwrap();
        let second = store.insert_if_absent(record(b"abc")).await.unwrap();
        assert_eq!(first.id, second.id);
        assert_eq!(first.created, second.created);
    }

    /// Backend that reports "absent" on the first existence check, then
    /// rejects the insert as a duplicate — the race window made concrete.
    struct RacingStore {
        inner: MemoryStore,
        lied_once: Mutex<bool>,
    }

    #[async_trait]
    impl DocumentStore for RacingStore {
        async fn find_one(
            &self,
            query: Query,
            projection: Projection,
        ) -> Result<Option<ImageRecord>, StoreError> {
            {
                let mut lied = self.lied_once.lock();
                if !*lied {
                    *lied = true;
                    return Ok(None);
                }
            }
            self.inner.find_one(query, projection).await
        }

        async fn insert(&self, record: ImageRecord) -> Result<ImageRecord, StoreError> {
            self.inner.insert(record).await
        }

        async fn ensure_index(&self, keys: &[&str]) -> Result<(), StoreError> {
            self.inner.ensure_index(keys).await
        }
    }

    #[tokio::test]
    async fn test_racing_duplicate_insert_is_absorbed() {
        let inner = MemoryStore::new();
        // Another request already persisted the record.
        inner.insert(record(b"raced")).await.unwrap();

        let store = BlobStore::new(Arc::new(RacingStore {
            inner,
            lied_once: Mutex::new(false),
        }));

        // The duplicate-key rejection must resolve to the stored record.
        let stored = store.insert_if_absent(record(b"raced")).await.unwrap();
        assert_eq!(stored.id, record(b"raced").id);
    }
}
