use axum::{
    Json,
    extract::{
        Multipart, State,
        multipart::{MultipartError, MultipartRejection},
    },
    http::StatusCode,
};
use bytes::{Bytes, BytesMut};
use chrono::{DateTime, Utc};
use tracing::{info, instrument, warn};

use crate::AppState;
use crate::api::models::images::{ErrorResponse, GalleryResponse, UploadResponse};
use crate::config::Config;
use crate::errors::{Error, Result};
use crate::images;

const NO_FILE: &str = "No file provided";
const NOT_AN_IMAGE: &str = "Only images allowed";

fn too_large(config: &Config) -> Error {
    Error::validation(format!("File too large (max {} MB)", config.max_upload_mb()))
}

fn multipart_error(err: MultipartError, config: &Config) -> Error {
    // Tripping the route's body limit surfaces as a multipart read error
    if err.status() == StatusCode::PAYLOAD_TOO_LARGE {
        too_large(config)
    } else {
        Error::validation(format!("Failed to parse multipart data: {err}"))
    }
}

/// Write one image under the key derived from `now` and return its public URL.
pub(crate) async fn store_image(
    state: &AppState,
    now: DateTime<Utc>,
    filename: &str,
    content_type: &str,
    data: Bytes,
) -> Result<String> {
    let size = data.len();
    let key = images::blob_key(now, filename);
    state.store.put(&key, content_type, data).await?;
    info!(key = %key, content_type = %content_type, size, "Image uploaded");

    Ok(images::blob_url(&state.public_base_url, &state.config.images_container, &key))
}

#[utoipa::path(
    post,
    path = "/api/v1/upload",
    tag = "images",
    summary = "Upload image",
    description = "Store one image in the container. The multipart field must be named `file` and carry an `image/*` content type.",
    request_body(
        content_type = "multipart/form-data",
        description = "A single `file` part holding the image"
    ),
    responses(
        (status = 200, description = "Image stored", body = UploadResponse),
        (status = 400, description = "Missing file, not an image, or too large", body = ErrorResponse),
        (status = 500, description = "Storage failure", body = ErrorResponse),
    )
)]
#[instrument(skip_all)]
pub async fn upload_image(
    State(state): State<AppState>,
    multipart: std::result::Result<Multipart, MultipartRejection>,
) -> Result<Json<UploadResponse>> {
    let Ok(mut multipart) = multipart else {
        return Err(Error::validation(NO_FILE));
    };
    let limit = state.config.max_upload_bytes;

    while let Some(mut field) = multipart
        .next_field()
        .await
        .map_err(|e| multipart_error(e, &state.config))?
    {
        if field.name() != Some("file") {
            continue;
        }

        let filename = field.file_name().unwrap_or_default().to_string();
        if filename.is_empty() {
            return Err(Error::validation(NO_FILE));
        }

        let content_type = field.content_type().map(str::to_string);
        if !images::is_image(content_type.as_deref()) {
            return Err(Error::validation(NOT_AN_IMAGE));
        }
        let content_type = content_type.unwrap_or_default();

        // Stream the part so an oversized body is rejected without buffering all of it
        let mut data = BytesMut::new();
        while let Some(chunk) = field.chunk().await.map_err(|e| multipart_error(e, &state.config))? {
            let total = (data.len() + chunk.len()) as u64;
            if total > limit {
                warn!(filename = %filename, total, limit, "Upload exceeds size limit, rejecting");
                return Err(too_large(&state.config));
            }
            data.extend_from_slice(&chunk);
        }

        let url = store_image(&state, Utc::now(), &filename, &content_type, data.freeze()).await?;
        return Ok(Json(UploadResponse { ok: true, url }));
    }

    Err(Error::validation(NO_FILE))
}

#[utoipa::path(
    get,
    path = "/api/v1/gallery",
    tag = "images",
    summary = "List images",
    description = "URLs of every image in the container, in the order the storage provider returns them.",
    responses(
        (status = 200, description = "All stored images", body = GalleryResponse),
        (status = 500, description = "Storage failure", body = ErrorResponse),
    )
)]
#[instrument(skip_all)]
pub async fn list_gallery(State(state): State<AppState>) -> Result<Json<GalleryResponse>> {
    let keys = state.store.list().await?;
    let gallery: Vec<String> = keys
        .iter()
        .map(|key| images::blob_url(&state.public_base_url, &state.config.images_container, key))
        .collect();

    tracing::debug!(count = gallery.len(), "Listed gallery");
    Ok(Json(GalleryResponse { ok: true, gallery }))
}
