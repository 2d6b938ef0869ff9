//! Test utilities for integration testing (available with `test-utils` feature).

use std::sync::Arc;

use async_trait::async_trait;
use axum_test::TestServer;
use bytes::Bytes;
use minijinja::Environment;

use crate::api::handlers::index;
use crate::config::{Config, StorageBackend, StorageConfig};
use crate::storage::memory::InMemoryBlobStore;
use crate::storage::{self, BlobStore, StorageError};
use crate::{AppState, build_router};

/// Public base URL used by test configurations
pub const TEST_BASE_URL: &str = "https://teststore.blob.core.windows.net";

/// Container name used by test configurations
pub const TEST_CONTAINER: &str = "test-images";

pub fn create_test_config() -> Config {
    Config {
        host: "127.0.0.1".to_string(),
        port: 0,
        storage_account_url: Some(TEST_BASE_URL.to_string()),
        images_container: TEST_CONTAINER.to_string(),
        storage: StorageConfig {
            backend: StorageBackend::Memory,
            ..Default::default()
        },
        ..Default::default()
    }
}

fn test_templates() -> Arc<Environment<'static>> {
    Arc::new(index::templates().expect("Failed to compile templates"))
}

fn build_test_state(config: Config, store: Arc<dyn BlobStore>) -> AppState {
    let public_base_url = crate::resolve_public_base_url(&config, store.as_ref()).expect("Failed to resolve base URL");

    AppState::builder()
        .config(config)
        .store(store)
        .public_base_url(public_base_url)
        .templates(test_templates())
        .build()
}

/// Application state over a fresh in-memory store, for calling handler logic directly.
pub fn create_test_state(config: Config) -> (AppState, Arc<InMemoryBlobStore>) {
    let store = Arc::new(InMemoryBlobStore::new(config.images_container.clone()));
    (build_test_state(config, store.clone()), store)
}

/// Build a test server around any store, skipping container creation.
pub fn create_test_server(config: Config, store: Arc<dyn BlobStore>) -> TestServer {
    let state = build_test_state(config, store);
    let router = build_router(&state).expect("Failed to build router");
    TestServer::new(router).expect("Failed to create test server")
}

/// Test server over a fresh in-memory store, returned alongside it for assertions.
pub fn create_test_app_with(config: Config) -> (TestServer, Arc<InMemoryBlobStore>) {
    let store = Arc::new(InMemoryBlobStore::new(config.images_container.clone()));
    let server = create_test_server(config, store.clone());
    (server, store)
}

pub fn create_test_app() -> (TestServer, Arc<InMemoryBlobStore>) {
    create_test_app_with(create_test_config())
}

/// A store whose every operation fails the way an unreachable account would.
pub struct FailingBlobStore;

impl FailingBlobStore {
    fn error(operation: &str) -> StorageError {
        StorageError::Service {
            operation: operation.to_string(),
            status: 503,
            message: "The server is currently unable to receive requests.".to_string(),
        }
    }
}

#[async_trait]
impl BlobStore for FailingBlobStore {
    async fn put(&self, _key: &str, _content_type: &str, _data: Bytes) -> storage::Result<()> {
        Err(Self::error("upload blob"))
    }

    async fn list(&self) -> storage::Result<Vec<String>> {
        Err(Self::error("list blobs"))
    }

    async fn ensure_container(&self) -> storage::Result<()> {
        Err(Self::error("create container"))
    }
}
