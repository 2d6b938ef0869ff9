use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Returned after a successful upload
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct UploadResponse {
    /// Always `true`
    pub ok: bool,
    /// Public URL of the stored image
    #[schema(example = "https://account.blob.core.windows.net/images/20240101T120000-cat.png")]
    pub url: String,
}

/// Every image currently in the container
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct GalleryResponse {
    pub ok: bool,
    /// Image URLs in the order the storage provider listed them
    pub gallery: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct HealthResponse {
    pub ok: bool,
}

/// Body of every failed request
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ErrorResponse {
    /// Always `false`
    pub ok: bool,
    #[schema(example = "Only images allowed")]
    pub error: String,
}
