use axum::{
    routing::{get, post},
    Router,
};
use tower::ServiceBuilder;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::handlers;
use crate::state::AppState;

/// Create the application router with all routes and middleware
pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let job_routes = Router::new()
        .route(
            "/api/jobs",
            post(handlers::jobs::schedule_job).get(handlers::jobs::get_job),
        )
        .route("/api/jobs/trigger", post(handlers::jobs::trigger_job))
        .route("/api/jobs/cancel", post(handlers::jobs::cancel_job))
        .route("/api/status", get(handlers::status::status));

    // Health and metrics stay outside the API namespace for orchestrators and scraping
    let ops_routes = Router::new()
        .route("/health", get(handlers::health::health_check))
        .route("/metrics", get(handlers::metrics::metrics_handler));

    Router::new()
        .merge(job_routes)
        .merge(ops_routes)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(cors),
        )
        .with_state(state)
}
