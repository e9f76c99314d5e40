/// API Request Handlers
/// Thin views over the shared profiler history

use axum::{
    extract::{rejection::QueryRejection, Query, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::AppState;
use crate::core::{ProfilerStatus, Snapshot};

// ============================================================================
// Response Types
// ============================================================================

#[derive(Serialize)]
pub struct ApiResponse<T> {
    success: bool,
    data: Option<T>,
    error: Option<String>,
}

impl<T> ApiResponse<T> {
    fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    fn error(msg: String) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(msg),
        }
    }
}

/// One dashboard refresh: the windowed series plus poller status
#[derive(Serialize)]
pub struct UsageReport {
    pub board: String,
    #[serde(flatten)]
    pub snapshot: Snapshot,
    pub status: ProfilerStatus,
}

impl UsageReport {
    pub fn collect(state: &AppState, window: Duration) -> Self {
        Self {
            board: state.board.clone(),
            snapshot: state.profiler.snapshot(window),
            status: state.profiler.status(),
        }
    }
}

#[derive(Serialize)]
pub struct DashboardConfig {
    board: String,
    interval_ms: u64,
    window_s: f64,
    history_length: usize,
    version: &'static str,
}

#[derive(Serialize)]
pub struct HealthInfo {
    status: &'static str,
    samples: usize,
    last_error: Option<String>,
    last_sample_at: Option<f64>,
}

#[derive(Deserialize)]
pub struct UsageQuery {
    /// Override the configured window, in seconds
    #[serde(default)]
    window: Option<f64>,
}

// ============================================================================
// Handlers
// ============================================================================

pub async fn get_usage(
    State(state): State<AppState>,
    query: Result<Query<UsageQuery>, QueryRejection>,
) -> (StatusCode, Json<ApiResponse<UsageReport>>) {
    let params = match query {
        Ok(Query(params)) => params,
        Err(rejection) => {
            return (StatusCode::BAD_REQUEST, Json(ApiResponse::error(rejection.body_text())));
        }
    };

    let window = match params.window {
        None => state.window,
        Some(secs) => match parse_window(secs) {
            Some(window) => window,
            None => {
                return (
                    StatusCode::BAD_REQUEST,
                    Json(ApiResponse::error(format!("Window must be a positive number of seconds, got {}", secs))),
                )
            }
        },
    };

    (StatusCode::OK, Json(ApiResponse::ok(UsageReport::collect(&state, window))))
}

fn parse_window(secs: f64) -> Option<Duration> {
    if secs <= 0.0 {
        return None;
    }
    Duration::try_from_secs_f64(secs).ok()
}

pub async fn get_config(State(state): State<AppState>) -> Json<ApiResponse<DashboardConfig>> {
    let config = state.profiler.config();
    Json(ApiResponse::ok(DashboardConfig {
        board: state.board.clone(),
        interval_ms: config.interval.as_millis() as u64,
        window_s: state.window.as_secs_f64(),
        history_length: state.profiler.history_length(),
        version: env!("CARGO_PKG_VERSION"),
    }))
}

pub async fn health_check(State(state): State<AppState>) -> Json<ApiResponse<HealthInfo>> {
    let status = state.profiler.status();
    Json(ApiResponse::ok(HealthInfo {
        status: if status.last_error.is_some() { "degraded" } else { "ok" },
        samples: status.samples,
        last_error: status.last_error,
        last_sample_at: status.last_sample_at,
    }))
}
