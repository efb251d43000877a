use std::time::Instant;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::Serialize;

use crate::http::server::AppState;
use crate::resilience::CircuitState;

#[derive(Serialize)]
pub struct SystemStatus {
    pub version: &'static str,
    pub status: &'static str,
}

#[derive(Serialize)]
pub struct BreakerStatus {
    pub service: String,
    pub state: CircuitState,
    pub failure_count: u32,
    pub last_failure_secs_ago: Option<f64>,
}

#[derive(Serialize)]
pub struct RateLimitStatus {
    pub enabled: bool,
    pub window_secs: u64,
    pub max_requests: usize,
    pub tracked_keys: usize,
}

pub async fn get_status() -> Json<SystemStatus> {
    Json(SystemStatus {
        version: env!("CARGO_PKG_VERSION"),
        status: "operational",
    })
}

pub async fn get_breakers(State(state): State<AppState>) -> Json<Vec<BreakerStatus>> {
    let now = Instant::now();
    let statuses = state
        .breakers
        .snapshot_at(now)
        .into_iter()
        .map(|snap| BreakerStatus {
            service: snap.service.to_string(),
            state: snap.state,
            failure_count: snap.failure_count,
            last_failure_secs_ago: snap
                .last_failure
                .map(|at| now.saturating_duration_since(at).as_secs_f64()),
        })
        .collect();

    Json(statuses)
}

pub async fn reset_breaker(
    State(state): State<AppState>,
    Path(service): Path<String>,
) -> Result<Json<serde_json::Value>, StatusCode> {
    if !state.breakers.reset(&service) {
        return Err(StatusCode::NOT_FOUND);
    }
    Ok(Json(serde_json::json!({
        "service": service,
        "state": CircuitState::Closed,
    })))
}

pub async fn get_rate_limits(State(state): State<AppState>) -> Json<RateLimitStatus> {
    let config = &state.config.rate_limit;
    Json(RateLimitStatus {
        enabled: config.enabled,
        window_secs: config.window_secs,
        max_requests: config.max_requests,
        tracked_keys: state.limiter.tracked_keys(),
    })
}
