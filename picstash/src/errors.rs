use crate::api::models::images::ErrorResponse;
use crate::storage::StorageError;
use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use thiserror::Error as ThisError;

#[derive(ThisError, Debug)]
pub enum Error {
    /// The client sent something we refuse to store (missing file, wrong type, too large)
    #[error("{message}")]
    Validation { message: String },

    /// Any failure reported by the blob storage provider
    #[error(transparent)]
    Storage(#[from] StorageError),

    /// Generic internal service error
    #[error("Failed to {operation}")]
    Internal { operation: String },
}

impl Error {
    pub fn validation(message: impl Into<String>) -> Self {
        Error::Validation { message: message.into() }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            Error::Validation { .. } => StatusCode::BAD_REQUEST,
            Error::Storage(_) | Error::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        match &self {
            Error::Storage(_) | Error::Internal { .. } => {
                tracing::error!("Internal service error: {:#}", self);
            }
            Error::Validation { .. } => {
                tracing::debug!("Client error: {}", self);
            }
        }

        // Storage messages are passed through untouched so clients can see what the provider said
        let body = ErrorResponse {
            ok: false,
            error: self.to_string(),
        };

        (self.status_code(), Json(body)).into_response()
    }
}

impl From<minijinja::Error> for Error {
    fn from(err: minijinja::Error) -> Self {
        Error::Internal {
            operation: format!("render page: {err}"),
        }
    }
}

/// Type alias for service operation results
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::to_bytes;

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_validation_error_is_bad_request() {
        let response = Error::validation("Only images allowed").into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let json = body_json(response).await;
        assert_eq!(json, serde_json::json!({ "ok": false, "error": "Only images allowed" }));
    }

    #[tokio::test]
    async fn test_storage_error_exposes_raw_message() {
        let err = Error::from(StorageError::Service {
            operation: "list blobs".to_string(),
            status: 403,
            message: "Server failed to authenticate the request.".to_string(),
        });
        let expected = err.to_string();
        let response = err.into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let json = body_json(response).await;
        assert_eq!(json["ok"], false);
        assert_eq!(json["error"], expected);
        assert!(expected.contains("Server failed to authenticate the request."));
    }

    #[tokio::test]
    async fn test_internal_error_is_server_error() {
        let response = Error::Internal {
            operation: "render page".to_string(),
        }
        .into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let json = body_json(response).await;
        assert_eq!(json["error"], "Failed to render page");
    }
}
