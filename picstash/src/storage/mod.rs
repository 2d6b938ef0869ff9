//! Blob storage abstraction layer
//!
//! This module defines the `BlobStore` trait which abstracts the handful of object storage
//! primitives the service needs (overwrite upload, full listing, container creation) across
//! providers. Each store is bound to a single container at construction time.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;

use crate::config::{Config, StorageBackend};

pub mod azure;
pub mod connection_string;
pub mod memory;
pub mod s3;

/// Create a blob store from configuration
///
/// This is the single point where we convert config into store instances.
/// Adding a new provider requires adding a match arm here.
pub async fn create_store(config: &Config) -> Result<Arc<dyn BlobStore>> {
    let container = config.images_container.clone();
    let store: Arc<dyn BlobStore> = match config.storage.backend {
        StorageBackend::Azure => {
            let connection_string = config
                .storage
                .connection_string
                .as_deref()
                .ok_or_else(|| StorageError::Config("azure backend requires a connection string".to_string()))?;
            Arc::new(azure::AzureBlobStore::from_connection_string(connection_string, container)?)
        }
        StorageBackend::S3 => Arc::new(s3::S3BlobStore::new(&config.storage.s3, container).await?),
        StorageBackend::Memory => Arc::new(memory::InMemoryBlobStore::new(container)),
    };

    tracing::info!(
        backend = ?config.storage.backend,
        container = %config.images_container,
        "Blob store initialized"
    );

    Ok(store)
}

/// Result type for storage operations
pub type Result<T> = std::result::Result<T, StorageError>;

/// Errors that can occur while talking to a storage provider
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("Invalid connection string: {0}")]
    InvalidConnectionString(String),

    #[error("Storage {operation} failed with HTTP {status}: {message}")]
    Service { operation: String, status: u16, message: String },

    #[error("Storage request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("Storage {operation} failed: {message}")]
    Sdk { operation: String, message: String },

    #[error("Invalid storage configuration: {0}")]
    Config(String),
}

/// Abstract blob store interface
///
/// Implementors provide object storage for a single container. Keys form a flat namespace.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Write `data` under `key`, replacing any existing blob with that key.
    ///
    /// `content_type` is stored with the blob so that it is served back with the right type.
    async fn put(&self, key: &str, content_type: &str, data: Bytes) -> Result<()>;

    /// List every key in the container, following provider pagination to the end.
    ///
    /// The order is whatever the provider returns.
    async fn list(&self) -> Result<Vec<String>>;

    /// Create the container if it does not exist. Succeeds if it already exists.
    async fn ensure_container(&self) -> Result<()>;

    /// Public base URL of the account, when the provider can derive one.
    fn endpoint(&self) -> Option<String> {
        None
    }
}

/// Build the shared HTTP client used by REST-based stores.
pub(crate) fn http_client() -> Result<reqwest::Client> {
    // reqwest is built without a bundled crypto provider; install ours unless someone already did
    let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();

    Ok(reqwest::Client::builder().build()?)
}
