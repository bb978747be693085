use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::Arc;

use common::health::HealthCheck;
use common::manager::JobManager;

/// Application state shared across all handlers
#[derive(Clone)]
pub struct AppState {
    pub manager: JobManager,
    pub metrics: PrometheusHandle,
    /// Dependencies reported by `/health`
    pub checks: Vec<Arc<dyn HealthCheck>>,
}

impl AppState {
    pub fn new(
        manager: JobManager,
        metrics: PrometheusHandle,
        checks: Vec<Arc<dyn HealthCheck>>,
    ) -> Self {
        Self {
            manager,
            metrics,
            checks,
        }
    }
}
