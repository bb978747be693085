use axum::{
    extract::{
        rejection::{JsonRejection, QueryRejection},
        Query, State,
    },
    http::StatusCode,
    Json,
};
use serde::Deserialize;

use crate::handlers::ErrorResponse;
use crate::state::AppState;
use common::models::Job;

/// Request to create or update a job
#[derive(Debug, Deserialize)]
pub struct ScheduleJobRequest {
    pub routing_key: String,
    #[serde(default)]
    pub body: String,
    /// Seconds between runs
    pub interval: i64,
    #[serde(default)]
    pub one_off: bool,
}

/// Identifies a job by routing key and body
#[derive(Debug, Deserialize)]
pub struct JobRef {
    pub routing_key: String,
    #[serde(default)]
    pub body: String,
}

/// Create or update a job
#[tracing::instrument(skip_all)]
pub async fn schedule_job(
    State(state): State<AppState>,
    payload: Result<Json<ScheduleJobRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<Job>), ErrorResponse> {
    let Json(req) = payload?;
    let interval = u64::try_from(req.interval).map_err(|_| {
        ErrorResponse::new(
            "validation_error",
            format!("Invalid field value for interval: {} is negative", req.interval),
        )
    })?;

    let job = state
        .manager
        .schedule(&req.routing_key, &req.body, interval, req.one_off)
        .await?;

    Ok((StatusCode::CREATED, Json(job)))
}

/// Get a job by routing key and body
#[tracing::instrument(skip_all)]
pub async fn get_job(
    State(state): State<AppState>,
    query: Result<Query<JobRef>, QueryRejection>,
) -> Result<Json<Job>, ErrorResponse> {
    let Query(key) = query?;
    let job = state.manager.get(&key.routing_key, &key.body).await?;
    Ok(Json(job))
}

/// Make a job due immediately
#[tracing::instrument(skip_all)]
pub async fn trigger_job(
    State(state): State<AppState>,
    payload: Result<Json<JobRef>, JsonRejection>,
) -> Result<Json<Job>, ErrorResponse> {
    let Json(key) = payload?;
    let job = state.manager.trigger(&key.routing_key, &key.body).await?;
    Ok(Json(job))
}

/// Remove a job
#[tracing::instrument(skip_all)]
pub async fn cancel_job(
    State(state): State<AppState>,
    payload: Result<Json<JobRef>, JsonRejection>,
) -> Result<StatusCode, ErrorResponse> {
    let Json(key) = payload?;
    state.manager.cancel(&key.routing_key, &key.body).await?;
    Ok(StatusCode::NO_CONTENT)
}
