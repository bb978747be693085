// Dependency health checks reported by the HTTP health endpoint

use crate::db::DbPool;
use crate::queue::NatsClient;
use async_trait::async_trait;

/// A dependency whose reachability can be checked on demand
#[async_trait]
pub trait HealthCheck: Send + Sync {
    fn name(&self) -> &'static str;

    async fn check(&self) -> Result<(), String>;
}

#[async_trait]
impl HealthCheck for DbPool {
    fn name(&self) -> &'static str {
        "database"
    }

    async fn check(&self) -> Result<(), String> {
        self.health_check().await.map_err(|e| e.to_string())
    }
}

#[async_trait]
impl HealthCheck for NatsClient {
    fn name(&self) -> &'static str {
        "nats"
    }

    async fn check(&self) -> Result<(), String> {
        self.health_check().await.map_err(|e| e.to_string())
    }
}
