use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

use orbit_types::api::ErrorResponse;
use orbit_types::error::Error;

/// Wraps the shared error taxonomy so handlers can use `?` and still
/// produce the JSON error envelope.
#[derive(Debug)]
pub struct ApiError(pub Error);

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status =
            StatusCode::from_u16(self.0.status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let body = Json(ErrorResponse {
            success: false,
            error: self.0.to_string(),
        });
        (status, body).into_response()
    }
}
