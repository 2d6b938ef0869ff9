//! In-process blob store for local development and tests.
//!
//! Blobs live only as long as the process. Nothing is served back over HTTP, so the store has no
//! endpoint; deployments using it must set `storage_account_url`.

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;

use super::{BlobStore, Result};

#[derive(Debug, Clone)]
pub struct StoredBlob {
    pub content_type: String,
    pub data: Bytes,
}

#[derive(Debug, Default)]
pub struct InMemoryBlobStore {
    container: String,
    blobs: DashMap<String, StoredBlob>,
}

impl InMemoryBlobStore {
    pub fn new(container: impl Into<String>) -> Self {
        Self {
            container: container.into(),
            blobs: DashMap::new(),
        }
    }

    pub fn container(&self) -> &str {
        &self.container
    }

    /// Fetch a stored blob, mostly useful for assertions.
    pub fn get(&self, key: &str) -> Option<StoredBlob> {
        self.blobs.get(key).map(|entry| entry.value().clone())
    }

    pub fn len(&self) -> usize {
        self.blobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blobs.is_empty()
    }
}

#[async_trait]
impl BlobStore for InMemoryBlobStore {
    async fn put(&self, key: &str, content_type: &str, data: Bytes) -> Result<()> {
        self.blobs.insert(
            key.to_string(),
            StoredBlob {
                content_type: content_type.to_string(),
                data,
            },
        );
        Ok(())
    }

    async fn list(&self) -> Result<Vec<String>> {
        let mut keys: Vec<String> = self.blobs.iter().map(|entry| entry.key().clone()).collect();
        keys.sort();
        Ok(keys)
    }

    async fn ensure_container(&self) -> Result<()> {
        Ok(())
    }
}
