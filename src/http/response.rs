//! Response helpers.
//!
//! # Responsibilities
//! - Health endpoint
//! - JSON bodies for gateway-generated error responses
//!
//! Upstream responses pass through untouched apart from hop-by-hop headers.

use axum::{http::StatusCode, response::IntoResponse, response::Response, Json};
use serde::{Deserialize, Serialize};

/// Body of every gateway-generated error response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub detail: String,
    pub reason: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service: Option<String>,
}

pub fn error_response(
    status: StatusCode,
    detail: &str,
    reason: &str,
    service: Option<&str>,
) -> Response {
    let body = ErrorBody {
        detail: detail.to_string(),
        reason: reason.to_string(),
        service: service.map(str::to_string),
    };
    (status, Json(body)).into_response()
}

#[derive(Debug, Serialize)]
pub struct HealthStatus {
    pub status: &'static str,
}

/// `GET /health`. Mounted outside every pipeline stage.
pub async fn health() -> Json<HealthStatus> {
    Json(HealthStatus { status: "healthy" })
}
