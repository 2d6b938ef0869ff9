//! OpenAPI documentation for the JSON API.
//!
//! The document is served at `/api-docs/openapi.json` and rendered by Scalar at `/docs`.

use utoipa::OpenApi;

use crate::api;

#[derive(OpenApi)]
#[openapi(
    info(
        title = "picstash",
        description = "Upload images to a blob container and list them back as a gallery."
    ),
    paths(
        api::handlers::images::upload_image,
        api::handlers::images::list_gallery,
        api::handlers::health::health,
    ),
    components(schemas(
        api::models::images::UploadResponse,
        api::models::images::GalleryResponse,
        api::models::images::HealthResponse,
        api::models::images::ErrorResponse,
    )),
    tags(
        (name = "images", description = "Image upload and listing"),
        (name = "health", description = "Liveness"),
    )
)]
pub struct ApiDoc;
