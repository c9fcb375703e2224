//! HTTP error mapping.
//!
//! Three client-visible categories: missing or invalid input (400),
//! unauthorized or not found (401/404), and everything else (500 with a
//! generic message; the cause is logged, never returned).

use axum::extract::multipart::MultipartError;
use axum::extract::rejection::{JsonRejection, PathRejection, QueryRejection};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use glaze_core::GlazeError;
use glaze_ingest::IngestError;
use serde::Serialize;
use thiserror::Error;

pub const INTERNAL_ERROR_MESSAGE: &str = "Internal server error";

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    Unauthorized(String),

    #[error("{0}")]
    NotFound(String),

    #[error("internal error: {0}")]
    Internal(String),
}

/// Standard HTTP error response
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub status: String,
}

impl ErrorResponse {
    pub fn new(msg: impl Into<String>) -> Self {
        Self {
            error: msg.into(),
            status: "error".to_string(),
        }
    }
}

impl ApiError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = match self {
            Self::Internal(cause) => {
                tracing::error!(error = %cause, "Request failed");
                ErrorResponse::new(INTERNAL_ERROR_MESSAGE)
            }
            other => ErrorResponse::new(other.to_string()),
        };
        (status, Json(body)).into_response()
    }
}

impl From<GlazeError> for ApiError {
    fn from(err: GlazeError) -> Self {
        match err {
            GlazeError::InvalidInput(msg) => Self::BadRequest(msg),
            GlazeError::NotFound(msg) => Self::NotFound(msg),
            other => Self::Internal(format!("{:?}", other)),
        }
    }
}

impl From<IngestError> for ApiError {
    fn from(err: IngestError) -> Self {
        Self::BadRequest(err.to_string())
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self::BadRequest(rejection.body_text())
    }
}

impl From<PathRejection> for ApiError {
    fn from(rejection: PathRejection) -> Self {
        Self::BadRequest(rejection.body_text())
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        Self::BadRequest(rejection.body_text())
    }
}

impl From<MultipartError> for ApiError {
    fn from(err: MultipartError) -> Self {
        Self::BadRequest(err.body_text())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn body_json(resp: Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_internal_error_hides_cause() {
        let resp = ApiError::Internal("connection refused on 10.0.0.5".to_string()).into_response();
        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body = body_json(resp).await;
        assert_eq!(body["error"], INTERNAL_ERROR_MESSAGE);
        assert_eq!(body["status"], "error");
    }

    #[tokio::test]
    async fn test_bad_request_returns_message() {
        let resp = ApiError::BadRequest("message field is required".to_string()).into_response();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_json(resp).await["error"], "message field is required");
    }

    #[test]
    fn test_glaze_error_mapping() {
        let err: ApiError = GlazeError::InvalidInput("blank".to_string()).into();
        assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);

        let err: ApiError = GlazeError::NotFound("conversation".to_string()).into();
        assert_eq!(err.status_code(), StatusCode::NOT_FOUND);

        let err: ApiError = GlazeError::Other("boom".to_string()).into();
        assert_eq!(err.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn test_ingest_error_is_a_client_error() {
        let err: ApiError = IngestError::Empty.into();
        assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);
    }
}
