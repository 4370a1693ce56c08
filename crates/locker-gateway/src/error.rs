use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;

use locker_core::error::LockerError;
use locker_core::wire::ErrorResponse;

/// Wraps [`LockerError`] so handlers can `?`-propagate it straight into an
/// HTTP response — status and body follow `http_status()`/`short_message()`
/// (§7), the same taxonomy `locker-client` decodes on the other side.
pub struct ApiError(pub LockerError);

impl From<LockerError> for ApiError {
    fn from(e: LockerError) -> Self {
        Self(e)
    }
}

fn code_for(status: u16) -> &'static str {
    match status {
        400 => "bad_request",
        404 => "not_found",
        409 => "conflict",
        422 => "unprocessable",
        429 => "rate_limited",
        _ => "internal_error",
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.0.http_status();
        if status >= 500 {
            tracing::error!(error = %self.0, "request failed");
        } else {
            tracing::debug!(error = %self.0, "request rejected");
        }
        let body = ErrorResponse {
            code: code_for(status).to_string(),
            message: self.0.short_message(),
        };
        let status = StatusCode::from_u16(status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        (status, Json(body)).into_response()
    }
}

pub type ApiResult<T> = Result<T, ApiError>;
