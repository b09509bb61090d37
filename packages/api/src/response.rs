// ABOUTME: Shared API response types and error handling
// ABOUTME: Provides consistent response format across all API endpoints

use axum::{
    extract::rejection::JsonRejection,
    http::StatusCode,
    response::{IntoResponse, Json as ResponseJson, Response},
};
use serde::Serialize;
use tracing::error;

use devbox_sandbox::SandboxError;

/// Standard API response wrapper
#[derive(Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: Option<T>,
    pub error: Option<String>,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        ApiResponse {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn error(message: String) -> ApiResponse<()> {
        ApiResponse {
            success: false,
            data: None,
            error: Some(message),
        }
    }
}

/// 200 with the standard envelope
pub fn ok<T: Serialize>(data: T) -> Response {
    (StatusCode::OK, ResponseJson(ApiResponse::success(data))).into_response()
}

/// Envelope with a non-200 success status (201 for creates, 202 for queued work)
pub fn with_status<T: Serialize>(status: StatusCode, data: T) -> Response {
    (status, ResponseJson(ApiResponse::success(data))).into_response()
}

/// Errors a handler can return
#[derive(Debug)]
pub enum ApiError {
    Sandbox(SandboxError),
    /// Body could not be parsed as the expected JSON
    BadRequest(String),
}

impl From<SandboxError> for ApiError {
    fn from(err: SandboxError) -> Self {
        ApiError::Sandbox(err)
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::BadRequest(rejection.body_text())
    }
}

impl ApiError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Sandbox(err) => match err {
                SandboxError::Validation(_) => StatusCode::BAD_REQUEST,
                SandboxError::SandboxNotFound(_) | SandboxError::CommandNotFound(_) => {
                    StatusCode::NOT_FOUND
                }
                SandboxError::InvalidState { .. } | SandboxError::Conflict(_) => {
                    StatusCode::CONFLICT
                }
                SandboxError::Backend(_) => StatusCode::BAD_GATEWAY,
                SandboxError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
            },
        }
    }
}

/// Convert handler errors to HTTP responses
impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let message = match self {
            ApiError::BadRequest(message) => message,
            ApiError::Sandbox(SandboxError::Storage(e)) => {
                // Storage details stay in the logs
                error!(error = %e, "Storage failure while handling request");
                "Database error".to_string()
            }
            ApiError::Sandbox(e) => e.to_string(),
        };

        (status, ResponseJson(ApiResponse::<()>::error(message))).into_response()
    }
}

pub type ApiResult = Result<Response, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;
    use devbox_sandbox::{BackendError, SandboxStatus, StorageError};

    #[test]
    fn test_error_status_mapping() {
        let cases = [
            (SandboxError::Validation("bad".into()), StatusCode::BAD_REQUEST),
            (SandboxError::SandboxNotFound("sbx".into()), StatusCode::NOT_FOUND),
            (SandboxError::CommandNotFound("cmd".into()), StatusCode::NOT_FOUND),
            (
                SandboxError::InvalidState {
                    sandbox_id: "sbx".into(),
                    status: SandboxStatus::Stopped,
                },
                StatusCode::CONFLICT,
            ),
            (SandboxError::Conflict("busy".into()), StatusCode::CONFLICT),
            (
                SandboxError::Backend(BackendError::NotAvailable("down".into())),
                StatusCode::BAD_GATEWAY,
            ),
            (
                SandboxError::Storage(StorageError::InvalidRow("bad".into())),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];

        for (err, expected) in cases {
            assert_eq!(ApiError::from(err).status_code(), expected);
        }
    }

    #[test]
    fn test_error_envelope_shape() {
        let body = serde_json::to_value(ApiResponse::<()>::error("nope".into())).unwrap();
        assert_eq!(
            body,
            serde_json::json!({ "success": false, "data": null, "error": "nope" })
        );
    }
}
