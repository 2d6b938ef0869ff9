//! API layer for HTTP request handling and data models.
//!
//! - **[`handlers`]**: Axum route handlers
//! - **[`models`]**: Response bodies shared by handlers, errors and the OpenAPI document
//!
//! # API Structure
//!
//! - **Images** (`/api/v1/upload`, `/api/v1/gallery`): upload a picture, list stored pictures
//! - **Health** (`/health`): liveness probe
//! - **Index** (`/`): the HTML landing page
//!
//! The JSON endpoints are documented with `utoipa`; the reference UI lives at `/docs`.

pub mod handlers;
pub mod models;
