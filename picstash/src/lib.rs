//! # picstash: image uploads backed by a blob container
//!
//! `picstash` is a small HTTP service that accepts image uploads, writes them to a cloud blob
//! container and lists the container back as a gallery of public URLs. It is intentionally thin:
//! request parsing and a few validation checks in front of pass-through calls to the store.
//!
//! ## Endpoints
//!
//! | Method | Path | Purpose |
//! |---|---|---|
//! | POST | `/api/v1/upload` | multipart `file` field, returns `{ok, url}` |
//! | GET | `/api/v1/gallery` | every image URL in the container, `{ok, gallery}` |
//! | GET | `/health` | liveness, `{ok: true}` |
//! | GET | `/` | landing page with an upload form |
//! | GET | `/docs`, `/api-docs/openapi.json` | API reference |
//! | GET | `/internal/metrics` | Prometheus metrics, when `enable_metrics` is set |
//!
//! ## Storage
//!
//! Handlers talk to a [`storage::BlobStore`]. Azure Blob Storage (connection string) is the
//! default backend; S3 and an in-memory store are also available. Blob URLs are
//! `{base}/{container}/{key}`, where `base` is `storage_account_url` or, when that is unset, the
//! store's own endpoint.
//!
//! ## Running
//!
//! ```bash
//! AZURE_STORAGE_CONNECTION_STRING="DefaultEndpointsProtocol=https;AccountName=...;AccountKey=..." \
//!   picstash -f config.yaml
//! ```
//!
//! Embedding the service:
//!
//! ```ignore
//! let config = picstash::Config::load(&args)?;
//! picstash::Application::new(config).await?.serve(shutdown_signal()).await?;
//! ```

pub mod api;
pub mod config;
pub mod errors;
pub mod images;
mod openapi;
pub mod storage;
pub mod telemetry;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

#[cfg(test)]
mod test;

use std::sync::Arc;

use anyhow::Context;
use axum::extract::DefaultBodyLimit;
use axum::http::{self, HeaderValue};
use axum::{
    Json, Router,
    routing::{get, post},
};
use axum_prometheus::PrometheusMetricLayer;
use bon::Builder;
pub use config::Config;
use minijinja::Environment;
use tokio::net::TcpListener;
use tower_http::{
    cors::{AllowOrigin, CorsLayer},
    trace::{DefaultMakeSpan, DefaultOnRequest, DefaultOnResponse, TraceLayer},
};
use tracing::{Level, debug, info, instrument};
use utoipa::OpenApi;
use utoipa_scalar::{Scalar, Servable};

use crate::api::handlers::{health, images as image_handlers, index};
use crate::config::CorsOrigin;
use crate::openapi::ApiDoc;
use crate::storage::BlobStore;

/// Room for multipart framing on top of the image itself, so oversized images are caught by the
/// handler's own size check rather than the transport limit.
const MULTIPART_OVERHEAD_BYTES: usize = 1024 * 1024;

/// Application state shared across all request handlers.
///
/// Everything here is fixed at startup; handlers only read it.
///
/// ```ignore
/// let state = AppState::builder()
///     .config(config)
///     .store(store)
///     .public_base_url(base)
///     .templates(Arc::new(index::templates()?))
///     .build();
/// ```
#[derive(Clone, Builder)]
pub struct AppState {
    pub config: Config,
    pub store: Arc<dyn BlobStore>,
    /// Prefix of every returned blob URL, without a trailing slash
    pub public_base_url: String,
    pub templates: Arc<Environment<'static>>,
}

/// Pick the base for public blob URLs: the configured account URL, else the store's endpoint.
pub fn resolve_public_base_url(config: &Config, store: &dyn BlobStore) -> anyhow::Result<String> {
    let base = config
        .storage_account_url
        .clone()
        .or_else(|| store.endpoint())
        .context("storage_account_url is not set and the storage backend has no public endpoint")?;

    Ok(base.trim_end_matches('/').to_string())
}

/// Create CORS layer from configuration. `None` when no origins are allowed.
fn create_cors_layer(config: &Config) -> anyhow::Result<Option<CorsLayer>> {
    let origins = &config.cors.allowed_origins;
    if origins.is_empty() {
        return Ok(None);
    }

    let allow_origin = if origins.iter().any(|o| matches!(o, CorsOrigin::Wildcard)) {
        AllowOrigin::any()
    } else {
        let mut values = Vec::new();
        for origin in origins {
            if let CorsOrigin::Url(url) = origin {
                // Origins never carry a path, Url adds a trailing slash
                values.push(url.as_str().trim_end_matches('/').parse::<HeaderValue>()?);
            }
        }
        AllowOrigin::list(values)
    };

    let mut cors = CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods([http::Method::GET, http::Method::POST]);

    if let Some(max_age) = config.cors.max_age {
        cors = cors.max_age(std::time::Duration::from_secs(max_age));
    }

    Ok(Some(cors))
}

/// Build the application router with all endpoints and middleware.
///
/// Metrics are only mounted when `enable_metrics` is set; the Prometheus recorder is global and
/// can be installed once per process.
#[instrument(skip_all)]
pub fn build_router(state: &AppState) -> anyhow::Result<Router> {
    let upload_limit = usize::try_from(state.config.max_upload_bytes)
        .unwrap_or(usize::MAX)
        .saturating_add(MULTIPART_OVERHEAD_BYTES);

    let api_routes = Router::new()
        .route(
            "/upload",
            post(image_handlers::upload_image).layer(DefaultBodyLimit::max(upload_limit)),
        )
        .route("/gallery", get(image_handlers::list_gallery));

    let mut router = Router::new()
        .route("/", get(index::index))
        .route("/health", get(health::health))
        .route("/api-docs/openapi.json", get(|| async { Json(ApiDoc::openapi()) }))
        .nest("/api/v1", api_routes)
        .with_state(state.clone())
        .merge(Scalar::with_url("/docs", ApiDoc::openapi()));

    if let Some(cors_layer) = create_cors_layer(&state.config)? {
        router = router.layer(cors_layer);
    }

    if state.config.enable_metrics {
        let (prometheus_layer, metric_handle) = PrometheusMetricLayer::pair();
        router = router
            .route("/internal/metrics", get(|| async move { metric_handle.render() }))
            .layer(prometheus_layer);
    }

    let router = router.layer(
        TraceLayer::new_for_http()
            .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
            .on_request(DefaultOnRequest::new().level(Level::INFO))
            .on_response(DefaultOnResponse::new().level(Level::INFO)),
    );

    Ok(router)
}

/// The assembled service: storage client, state and router.
///
/// 1. [`Application::new`] builds the blob store from configuration, optionally creates the
///    container and wires the router
/// 2. [`Application::serve`] binds the listener and runs until the shutdown future resolves
pub struct Application {
    router: Router,
    config: Config,
}

impl Application {
    /// Create a new application instance with the configured storage backend
    pub async fn new(config: Config) -> anyhow::Result<Self> {
        // Config carries credentials, so only the non-secret parts are logged
        debug!(
            bind = %config.bind_address(),
            backend = ?config.storage.backend,
            container = %config.images_container,
            "Starting picstash"
        );

        let store = storage::create_store(&config)
            .await
            .context("Failed to initialize blob storage")?;

        Self::with_store(config, store).await
    }

    /// Create an application around an already constructed store
    pub async fn with_store(config: Config, store: Arc<dyn BlobStore>) -> anyhow::Result<Self> {
        if config.storage.create_container {
            store
                .ensure_container()
                .await
                .with_context(|| format!("Failed to create container '{}'", config.images_container))?;
            info!(container = %config.images_container, "Container ready");
        }

        let public_base_url = resolve_public_base_url(&config, store.as_ref())?;
        info!(base = %public_base_url, "Serving blob URLs");

        let state = AppState::builder()
            .config(config.clone())
            .store(store)
            .public_base_url(public_base_url)
            .templates(Arc::new(index::templates()?))
            .build();

        let router = build_router(&state)?;

        Ok(Self { router, config })
    }

    /// Convert application into a test server (for tests)
    #[cfg(any(test, feature = "test-utils"))]
    pub fn into_test_server(self) -> axum_test::TestServer {
        axum_test::TestServer::new(self.router).expect("Failed to create test server")
    }

    /// Start serving the application
    pub async fn serve<F>(self, shutdown: F) -> anyhow::Result<()>
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let bind_addr = self.config.bind_address();
        let listener = TcpListener::bind(&bind_addr).await?;
        info!(
            "picstash listening on http://{}, available at http://localhost:{}",
            bind_addr, self.config.port
        );

        axum::serve(listener, self.router.into_make_service())
            .with_graceful_shutdown(shutdown)
            .await?;

        info!("Shutting down telemetry...");
        telemetry::shutdown_telemetry();

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CorsConfig;
    use crate::storage::memory::InMemoryBlobStore;
    use crate::test_utils::{TEST_BASE_URL, create_test_config, create_test_server};
    use url::Url;

    struct EndpointStore;

    #[async_trait::async_trait]
    impl BlobStore for EndpointStore {
        async fn put(&self, _: &str, _: &str, _: bytes::Bytes) -> storage::Result<()> {
            Ok(())
        }
        async fn list(&self) -> storage::Result<Vec<String>> {
            Ok(Vec::new())
        }
        async fn ensure_container(&self) -> storage::Result<()> {
            Ok(())
        }
        fn endpoint(&self) -> Option<String> {
            Some("https://acct.blob.core.windows.net/".to_string())
        }
    }

    #[test]
    fn test_configured_base_url_wins() {
        let config = create_test_config();
        let base = resolve_public_base_url(&config, &EndpointStore).unwrap();
        assert_eq!(base, TEST_BASE_URL);
    }

    #[test]
    fn test_base_url_falls_back_to_store_endpoint() {
        let mut config = create_test_config();
        config.storage_account_url = None;
        let base = resolve_public_base_url(&config, &EndpointStore).unwrap();
        assert_eq!(base, "https://acct.blob.core.windows.net");
    }

    #[test]
    fn test_base_url_trailing_slash_trimmed() {
        let mut config = create_test_config();
        config.storage_account_url = Some("https://cdn.example.com/".to_string());
        let base = resolve_public_base_url(&config, &EndpointStore).unwrap();
        assert_eq!(base, "https://cdn.example.com");
    }

    #[test]
    fn test_missing_base_url_is_an_error() {
        let mut config = create_test_config();
        config.storage_account_url = None;
        let err = resolve_public_base_url(&config, &InMemoryBlobStore::new("x")).unwrap_err();
        assert!(err.to_string().contains("storage_account_url"));
    }

    #[test]
    fn test_no_cors_layer_by_default() {
        assert!(create_cors_layer(&create_test_config()).unwrap().is_none());
    }

    #[tokio::test]
    async fn test_cors_allows_configured_origin() {
        let mut config = create_test_config();
        config.cors = CorsConfig {
            allowed_origins: vec![CorsOrigin::Url(Url::parse("https://app.example.com").unwrap())],
            max_age: Some(600),
        };
        let server = create_test_server(config, Arc::new(InMemoryBlobStore::new("test-images")));

        let response = server
            .get("/api/v1/gallery")
            .add_header("origin", "https://app.example.com")
            .await;

        response.assert_status_ok();
        assert_eq!(
            response.header("access-control-allow-origin"),
            HeaderValue::from_static("https://app.example.com")
        );
    }

    #[tokio::test]
    async fn test_wildcard_cors() {
        let mut config = create_test_config();
        config.cors.allowed_origins = vec![CorsOrigin::Wildcard];
        let server = create_test_server(config, Arc::new(InMemoryBlobStore::new("test-images")));

        let response = server.get("/health").add_header("origin", "https://anywhere.test").await;
        assert_eq!(response.header("access-control-allow-origin"), HeaderValue::from_static("*"));
    }

    #[tokio::test]
    async fn test_openapi_and_docs_served() {
        let server = create_test_server(create_test_config(), Arc::new(InMemoryBlobStore::new("test-images")));

        let doc: serde_json::Value = server.get("/api-docs/openapi.json").await.json();
        assert!(doc["paths"]["/api/v1/upload"]["post"].is_object());

        server.get("/docs").await.assert_status_ok();
    }
}
