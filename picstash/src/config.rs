//! Application configuration management.
//!
//! Configuration is loaded from a YAML file with environment variable overrides. The configuration
//! file path defaults to `config.yaml` but can be specified via `-f` flag or `PICSTASH_CONFIG`
//! environment variable. A missing file is not an error: every field has a default, so the service
//! can be configured from the environment alone.
//!
//! ## Loading Priority
//!
//! Configuration sources are merged in the following order (later sources override earlier ones):
//!
//! 1. **YAML config file** - Base configuration (default: `config.yaml`)
//! 2. **Environment variables** - Variables prefixed with `PICSTASH_` override YAML values
//! 3. **Deployment variables** - `STORAGE_ACCOUNT_URL`, `IMAGES_CONTAINER` and
//!    `AZURE_STORAGE_CONNECTION_STRING` are accepted unprefixed, since that is how existing
//!    deployments hand them to the service
//!
//! For nested config values, use double underscores in environment variables. For example,
//! `PICSTASH_STORAGE__BACKEND=memory` sets the `storage.backend` field.
//!
//! ## Usage
//!
//! ```no_run
//! use clap::Parser;
//! use picstash::config::{Args, Config};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let args = Args::parse();
//! let config = Config::load(&args)?;
//!
//! println!("Server will bind to {}:{}", config.host, config.port);
//! # Ok(())
//! # }
//! ```
//!
//! ## Environment Variable Examples
//!
//! ```bash
//! # Where uploaded images are publicly reachable
//! STORAGE_ACCOUNT_URL="https://myaccount.blob.core.windows.net"
//!
//! # Storage credentials
//! AZURE_STORAGE_CONNECTION_STRING="DefaultEndpointsProtocol=https;AccountName=myaccount;AccountKey=...;EndpointSuffix=core.windows.net"
//!
//! # Override server port and upload limit
//! PICSTASH_PORT=8080
//! PICSTASH_MAX_UPLOAD_BYTES=5242880
//! ```

use clap::Parser;
use figment::{
    Figment,
    providers::{Env, Format, Yaml},
};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::errors::Error;

/// Container used when none is configured.
pub const DEFAULT_IMAGES_CONTAINER: &str = "lanternfly-images-469n70cr";

/// Upload size limit used when none is configured (10 MiB).
pub const DEFAULT_MAX_UPLOAD_BYTES: u64 = 10 * MIB;

const MIB: u64 = 1024 * 1024;

/// Simple CLI args - just for specifying config file
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Path to configuration file
    #[arg(short = 'f', long, env = "PICSTASH_CONFIG", default_value = "config.yaml")]
    pub config: String,

    /// Validate configuration and exit without starting the server.
    #[arg(long)]
    pub validate: bool,
}

/// Main application configuration.
///
/// This is the root configuration structure loaded from YAML and environment variables.
/// All fields have sensible defaults defined in the `Default` implementation.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// HTTP server host to bind to (e.g., "0.0.0.0" for all interfaces)
    pub host: String,
    /// HTTP server port to bind to
    pub port: u16,
    /// Public base URL of the storage account. Gallery URLs are `{storage_account_url}/{container}/{key}`.
    /// When unset, the storage backend's own endpoint is used if it can be derived.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub storage_account_url: Option<String>,
    /// Name of the container (bucket) that images are written to and listed from
    pub images_container: String,
    /// Largest accepted image body, in bytes
    pub max_upload_bytes: u64,
    /// Title shown on the landing page
    pub title: String,
    /// Enable Prometheus metrics endpoint at `/internal/metrics`
    pub enable_metrics: bool,
    /// Enable OpenTelemetry OTLP export for distributed tracing
    pub enable_otel_export: bool,
    /// CORS settings for browser clients served from other origins
    pub cors: CorsConfig,
    /// Blob storage backend settings
    pub storage: StorageConfig,
}

/// Which blob storage provider backs the service.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    /// Azure Blob Storage, authorized through a connection string
    #[default]
    Azure,
    /// Amazon S3 or an S3-compatible service
    S3,
    /// Process-local store, contents are lost on restart
    Memory,
}

/// Blob storage configuration.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct StorageConfig {
    pub backend: StorageBackend,
    /// Azure Storage connection string (required for the `azure` backend)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub connection_string: Option<String>,
    /// Create the container on startup if it does not exist yet
    pub create_container: bool,
    /// Settings for the `s3` backend
    pub s3: S3Config,
}

/// S3 backend settings. Credentials fall back to the default AWS provider chain when not set.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct S3Config {
    pub region: String,
    /// Custom endpoint for S3-compatible services; enables path-style addressing
    #[serde(skip_serializing_if = "Option::is_none")]
    pub endpoint_url: Option<Url>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub access_key_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub secret_access_key: Option<String>,
}

impl Default for S3Config {
    fn default() -> Self {
        Self {
            region: "us-east-1".to_string(),
            endpoint_url: None,
            access_key_id: None,
            secret_access_key: None,
        }
    }
}

/// CORS (Cross-Origin Resource Sharing) configuration.
///
/// With no allowed origins the CORS layer is not installed at all, which is what a same-origin
/// deployment (landing page and API on one host) wants.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct CorsConfig {
    /// Allowed origins for CORS requests
    pub allowed_origins: Vec<CorsOrigin>,
    /// Cache preflight requests for this many seconds
    pub max_age: Option<u64>,
}

/// CORS origin specification.
///
/// Can be either a wildcard (`*`) to allow all origins, or a specific URL.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(untagged)]
pub enum CorsOrigin {
    /// Allow all origins (`*`)
    #[serde(deserialize_with = "parse_wildcard")]
    Wildcard,
    /// Specific origin URL (e.g., `https://app.example.com`)
    #[serde(deserialize_with = "parse_url")]
    Url(Url),
}

fn parse_wildcard<'de, D>(deserializer: D) -> Result<(), D::Error>
where
    D: serde::Deserializer<'de>,
{
    let s: String = Deserialize::deserialize(deserializer)?;
    if s == "*" {
        Ok(())
    } else {
        Err(serde::de::Error::custom("Expected '*'"))
    }
}

fn parse_url<'de, D>(deserializer: D) -> Result<Url, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let s: String = Deserialize::deserialize(deserializer)?;
    Url::parse(&s).map_err(serde::de::Error::custom)
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 5000,
            storage_account_url: None,
            images_container: DEFAULT_IMAGES_CONTAINER.to_string(),
            max_upload_bytes: DEFAULT_MAX_UPLOAD_BYTES,
            title: "Image Gallery".to_string(),
            enable_metrics: false,
            enable_otel_export: false,
            cors: CorsConfig::default(),
            storage: StorageConfig::default(),
        }
    }
}

impl Config {
    pub fn load(args: &Args) -> Result<Self, figment::Error> {
        let config: Self = Self::figment(args).extract()?;
        config.validate().map_err(|e| figment::Error::from(e.to_string()))?;
        Ok(config)
    }

    pub fn figment(args: &Args) -> Figment {
        Figment::new()
            // Load base config file
            .merge(Yaml::file(&args.config))
            // PICSTASH_CONFIG names the file itself, it is not a config key
            .merge(Env::prefixed("PICSTASH_").ignore(&["config"]).split("__"))
            .merge(Env::raw().only(&["STORAGE_ACCOUNT_URL", "IMAGES_CONTAINER"]))
            .merge(
                Env::raw()
                    .only(&["AZURE_STORAGE_CONNECTION_STRING"])
                    .map(|_| "storage.connection_string".into()),
            )
    }

    /// Validate the configuration for consistency and required fields
    pub fn validate(&self) -> Result<(), Error> {
        if self.images_container.trim().is_empty() {
            return Err(invalid("images_container cannot be empty"));
        }

        if self.max_upload_bytes == 0 {
            return Err(invalid("max_upload_bytes must be positive"));
        }

        // Users see the limit in whole megabytes
        if self.max_upload_bytes % MIB != 0 {
            return Err(invalid(&format!(
                "max_upload_bytes must be a whole number of MiB (a multiple of {MIB}), got {}",
                self.max_upload_bytes
            )));
        }

        if let Some(base) = &self.storage_account_url {
            Url::parse(base).map_err(|e| invalid(&format!("storage_account_url '{base}' is not a valid URL: {e}")))?;
        }

        match self.storage.backend {
            StorageBackend::Azure => {
                if self.storage.connection_string.as_deref().is_none_or(|s| s.trim().is_empty()) {
                    return Err(invalid(
                        "the azure storage backend needs a connection string. \
                         Set AZURE_STORAGE_CONNECTION_STRING or storage.connection_string.",
                    ));
                }
            }
            StorageBackend::S3 => {
                let s3 = &self.storage.s3;
                if s3.access_key_id.is_some() != s3.secret_access_key.is_some() {
                    return Err(invalid(
                        "storage.s3.access_key_id and storage.s3.secret_access_key must be set together",
                    ));
                }
            }
            StorageBackend::Memory => {}
        }

        Ok(())
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Upload limit in megabytes, as shown to users. Exact for any validated config.
    pub fn max_upload_mb(&self) -> u64 {
        self.max_upload_bytes / MIB
    }
}

fn invalid(reason: &str) -> Error {
    Error::Internal {
        operation: format!("validate config: {reason}"),
    }
}
