//! Proxy response types and error handling.

use axum::{
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

use crate::fallback::FALLBACK_PAYLOAD;
use crate::ShelfLifeError;

/// Standard JSON envelope for the proxy's own endpoints
#[derive(Serialize)]
pub struct ApiResponse<T: Serialize> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorDetail>,
}

#[derive(Serialize)]
pub struct ErrorDetail {
    pub code: String,
    pub message: String,
}

impl<T: Serialize> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }
}

/// Error type that renders as a JSON error response
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub code: String,
    pub message: String,
}

impl ApiError {
    pub fn new(status: StatusCode, code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            status,
            code: code.into(),
            message: message.into(),
        }
    }

    pub fn bad_gateway(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_GATEWAY, "BAD_GATEWAY", message)
    }

    pub fn gateway_timeout(message: impl Into<String>) -> Self {
        Self::new(StatusCode::GATEWAY_TIMEOUT, "GATEWAY_TIMEOUT", message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR", message)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ApiResponse::<()> {
            success: false,
            data: None,
            error: Some(ErrorDetail {
                code: self.code,
                message: self.message,
            }),
        };

        (self.status, Json(body)).into_response()
    }
}

impl From<ShelfLifeError> for ApiError {
    fn from(err: ShelfLifeError) -> Self {
        match err {
            ShelfLifeError::FetchTimeout { url, timeout_secs } => {
                Self::gateway_timeout(format!("{} did not answer within {}s", url, timeout_secs))
            }
            ShelfLifeError::Transport { url, message } => {
                Self::bad_gateway(format!("{}: {}", url, message))
            }
            ShelfLifeError::Http { url, status } => {
                Self::bad_gateway(format!("{} answered {}", url, status))
            }
            ShelfLifeError::Io(e) => {
                tracing::error!("IO error: {}", e);
                Self::internal("IO error")
            }
            ShelfLifeError::Serialization(e) => {
                tracing::error!("Serialization error: {}", e);
                Self::internal("Serialization error")
            }
            ShelfLifeError::Internal(e) => {
                tracing::error!("Internal error: {}", e);
                Self::internal("Internal error")
            }
            other => Self::internal(other.to_string()),
        }
    }
}

/// Synthesized catalog response used when neither network nor cache has one
pub fn fallback_catalog() -> Response {
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "application/json")],
        FALLBACK_PAYLOAD,
    )
        .into_response()
}

/// Plain 404 for uncacheable misses while offline
pub fn not_found() -> Response {
    (
        StatusCode::NOT_FOUND,
        [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
        "Not found",
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_status_codes() {
        let timeout: ApiError = ShelfLifeError::FetchTimeout {
            url: "http://up".into(),
            timeout_secs: 10,
        }
        .into();
        assert_eq!(timeout.status, StatusCode::GATEWAY_TIMEOUT);

        let transport: ApiError = ShelfLifeError::Transport {
            url: "http://up".into(),
            message: "refused".into(),
        }
        .into();
        assert_eq!(transport.status, StatusCode::BAD_GATEWAY);

        let other: ApiError = ShelfLifeError::CacheEmpty.into();
        assert_eq!(other.status, StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn test_api_response_success() {
        let response = ApiResponse::success("ok");
        assert!(response.success);
        assert!(response.error.is_none());
    }

    #[test]
    fn test_synthetic_responses() {
        let fallback = fallback_catalog();
        assert_eq!(fallback.status(), StatusCode::OK);
        assert_eq!(fallback.headers()[header::CONTENT_TYPE], "application/json");

        assert_eq!(not_found().status(), StatusCode::NOT_FOUND);
    }
}
