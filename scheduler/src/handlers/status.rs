use axum::{extract::State, Json};
use serde::Serialize;

use crate::handlers::ErrorResponse;
use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    /// Jobs in the table
    pub total: i64,
    /// Broker publishes in flight
    pub running: usize,
}

#[tracing::instrument(skip(state))]
pub async fn status(State(state): State<AppState>) -> Result<Json<StatusResponse>, ErrorResponse> {
    let total = state.manager.total().await?;
    Ok(Json(StatusResponse {
        total,
        running: state.manager.running(),
    }))
}
