//! HTTP error envelope.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use kyc_core::KycError;
use serde_json::json;

/// Wraps [`KycError`] so handlers can `?` core results straight into a
/// `{success: false, code, message}` response.
#[derive(Debug)]
pub struct AppError(pub KycError);

impl From<KycError> for AppError {
    fn from(err: KycError) -> Self {
        Self(err)
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status =
            StatusCode::from_u16(self.0.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let message = match &self.0 {
            KycError::Internal(err) => {
                tracing::error!(error = ?err, "request failed");
                "internal server error".to_string()
            }
            KycError::AuthorizationDenied(denial) => denial.message().to_string(),
            other => {
                if status.is_server_error() {
                    tracing::warn!(error = %other, "request failed");
                }
                other.to_string()
            }
        };
        let body = json!({
            "success": false,
            "code": self.0.code(),
            "message": message,
        });
        (status, Json(body)).into_response()
    }
}
