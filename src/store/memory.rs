//! In-memory document store (HashMap storage)
//!
//! Serves the test suites and embedded use. Enforces the same contracts a
//! wire-connected driver must provide: a unique primary key and secondary
//! lookups by `(date, filename)` and source URL.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;

use super::{DocumentStore, Projection, Query, StoreError};
use crate::model::ImageRecord;

#[derive(Clone, Default)]
pub struct MemoryStore {
    records: Arc<RwLock<HashMap<String, ImageRecord>>>,
    by_url: Arc<RwLock<HashMap<String, String>>>,
    by_locator: Arc<RwLock<HashMap<(String, String), String>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored records
    pub fn record_count(&self) -> usize {
        self.records.read().len()
    }

    /// Drop all stored records
    pub fn clear(&self) {
        self.records.write().clear();
        self.by_url.write().clear();
        self.by_locator.write().clear();
    }

    fn project(record: &ImageRecord, projection: Projection) -> ImageRecord {
        match projection {
            Projection::Full => record.clone(),
            Projection::MetadataOnly => record.without_data(),
        }
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn find_one(
        &self,
        query: Query,
        projection: Projection,
    ) -> Result<Option<ImageRecord>, StoreError> {
        let records = self.records.read();
        let found = match query {
            Query::ById(id) => records.get(&id),
            Query::ByLocator { date, filename } => self
                .by_locator
                .read()
                .get(&(date, filename))
                .and_then(|id| records.get(id)),
            Query::ByUrl(url) => self.by_url.read().get(&url).and_then(|id| records.get(id)),
        };
        Ok(found.map(|r| Self::project(r, projection)))
    }

    async fn insert(&self, record: ImageRecord) -> Result<ImageRecord, StoreError> {
        let mut records = self.records.write();
        if records.contains_key(&record.id) {
            return Err(StoreError::DuplicateKey {
                key: record.id.clone(),
            });
        }
        if let Some(url) = &record.url {
            self.by_url.write().insert(url.clone(), record.id.clone());
        }
        self.by_locator
            .write()
            .insert((record.date.clone(), record.filename.clone()), record.id.clone());
        records.insert(record.id.clone(), record.clone());
        Ok(record)
    }

    async fn ensure_index(&self, _keys: &[&str]) -> Result<(), StoreError> {
        // All lookups are backed by eagerly maintained maps.
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::OriginalImage;
    use bytes::Bytes;
    use chrono::Utc;

    fn record(content: &'static [u8], url: Option<&str>) -> ImageRecord {
        OriginalImage::from_bytes(
            Bytes::from_static(content),
            "image/jpeg".to_string(),
            400,
            300,
            None,
            url.map(String::from),
            Utc::now(),
        )
        .into_record()
    }

    #[tokio::test]
    async fn test_insert_and_find_by_id() {
        let store = MemoryStore::new();
        let stored = store.insert(record(b"abc", None)).await.unwrap();

        let found = store
            .find_one(Query::ById(stored.id.clone()), Projection::Full)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.id, stored.id);
        assert_eq!(found.data, stored.data);
    }

    #[tokio::test]
    async fn test_duplicate_insert_rejected() {
        let store = MemoryStore::new();
        store.insert(record(b"abc", None)).await.unwrap();
        let result = store.insert(record(b"abc", None)).await;
        assert!(matches!(result, Err(StoreError::DuplicateKey { .. })));
        assert_eq!(store.record_count(), 1);
    }

    #[tokio::test]
    async fn test_find_by_locator() {
        let store = MemoryStore::new();
        let stored = store.insert(record(b"abc", None)).await.unwrap();

        let found = store
            .find_one(
                Query::ByLocator {
                    date: stored.date.clone(),
                    filename: stored.filename.clone(),
                },
                Projection::Full,
            )
            .await
            .unwrap();
        assert_eq!(found.unwrap().id, stored.id);
    }

    #[tokio::test]
    async fn test_find_by_url() {
        let store = MemoryStore::new();
        let stored = store
            .insert(record(b"abc", Some("http://example.com/a.jpg")))
            .await
            .unwrap();

        let found = store
            .find_one(
                Query::ByUrl("http://example.com/a.jpg".to_string()),
                Projection::Full,
            )
            .await
            .unwrap();
        assert_eq!(found.unwrap().id, stored.id);

        let missing = store
            .find_one(
                Query::ByUrl("http://example.com/other.jpg".to_string()),
                Projection::Full,
            )
            .await
            .unwrap();
        assert!(missing.is_none());
    }

    #[tokio::test]
    async fn test_metadata_projection_strips_data() {
        let store = MemoryStore::new();
        let stored = store.insert(record(b"abc", None)).await.unwrap();

        let found = store
            .find_one(Query::ById(stored.id), Projection::MetadataOnly)
            .await
            .unwrap()
            .unwrap();
        assert!(found.data.is_empty());
        assert_eq!(found.length, stored.length);
    }
}
