use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use serde::Serialize;
use std::collections::BTreeMap;

use crate::state::AppState;

/// Body returned when a dependency check fails
#[derive(Debug, Serialize)]
pub struct HealthReport {
    pub status: &'static str,
    pub failed: BTreeMap<&'static str, String>,
}

/// Health check endpoint: OK when every dependency answers
#[tracing::instrument(skip(state))]
pub async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    let mut failed = BTreeMap::new();
    for check in &state.checks {
        if let Err(e) = check.check().await {
            tracing::warn!(dependency = check.name(), error = %e, "Health check failed");
            failed.insert(check.name(), e);
        }
    }

    if failed.is_empty() {
        (StatusCode::OK, "OK").into_response()
    } else {
        let report = HealthReport {
            status: "unhealthy",
            failed,
        };
        (StatusCode::SERVICE_UNAVAILABLE, Json(report)).into_response()
    }
}
