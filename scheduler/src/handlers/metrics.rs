use axum::{extract::State, http::StatusCode, response::IntoResponse};

use crate::state::AppState;

/// Prometheus metrics endpoint, rendered from the recorder installed at startup
#[tracing::instrument(skip(state))]
pub async fn metrics_handler(State(state): State<AppState>) -> impl IntoResponse {
    (StatusCode::OK, state.metrics.render())
}
