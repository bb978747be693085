// Scheduler binary: runs the scheduling loop and the HTTP job API in one process

use anyhow::Result;
use std::net::SocketAddr;
use std::sync::Arc;

mod handlers;
mod routes;
mod state;

use common::config::Settings;
use common::db::{DbPool, JobTable, PgJobTable};
use common::health::HealthCheck;
use common::manager::JobManager;
use common::queue::{MessageBroker, NatsBroker, NatsClient, NatsConfig};
use common::scheduler::{Scheduler, SchedulerConfig, SchedulerEngine};
use common::telemetry;
use state::AppState;

#[tokio::main]
async fn main() -> Result<()> {
    let settings = Settings::load()?;
    settings
        .validate()
        .map_err(|e| anyhow::anyhow!("Invalid configuration: {}", e))?;

    telemetry::init_logging(
        &settings.observability.log_level,
        settings.observability.tracing_endpoint.as_deref(),
    )?;
    let metrics_handle = telemetry::init_metrics()?;

    tracing::info!(
        host = %settings.server.host,
        port = %settings.server.port,
        nats_url = %settings.nats.url,
        table = %settings.database.table,
        "Configuration loaded"
    );

    // Job table
    let db_pool = DbPool::new(&settings.database).await?;
    let pg_table = PgJobTable::new(db_pool.clone(), settings.database.table.clone())?;
    pg_table.ensure_schema().await?;
    let table: Arc<dyn JobTable> = Arc::new(pg_table);
    tracing::info!("Job table ready");

    // Broker
    let nats_client = NatsClient::new(NatsConfig::from(&settings.nats)).await?;
    nats_client.initialize_stream().await?;
    let db_check: Arc<dyn HealthCheck> = Arc::new(db_pool.clone());
    let nats_check: Arc<dyn HealthCheck> = Arc::new(nats_client.clone());
    let checks = vec![db_check, nats_check];
    let broker: Arc<dyn MessageBroker> = Arc::new(NatsBroker::new(nats_client));
    tracing::info!("NATS broker ready");

    // Scheduler loop
    let engine = Arc::new(SchedulerEngine::new(
        SchedulerConfig::from(&settings.scheduler),
        table.clone(),
        broker,
    ));
    let manager = JobManager::new(table, engine.handle());

    let runner = engine.clone();
    let scheduler_task = tokio::spawn(async move {
        if let Err(e) = runner.start().await {
            tracing::error!(error = %e, "Scheduler error");
        }
    });

    // HTTP API
    let app = routes::create_router(AppState::new(manager, metrics_handle, checks));
    let addr = SocketAddr::from((
        settings.server.host.parse::<std::net::IpAddr>()?,
        settings.server.port,
    ));
    tracing::info!(addr = %addr, "Starting HTTP server");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    if let Err(e) = engine.stop().await {
        tracing::error!(error = %e, "Error during scheduler shutdown");
    }
    if let Err(e) = scheduler_task.await {
        tracing::error!(error = %e, "Scheduler task failed");
    }
    db_pool.close().await;

    tracing::info!("Scheduler stopped");
    telemetry::shutdown_tracer();
    Ok(())
}

/// Resolves on Ctrl+C or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C signal");
        },
        _ = terminate => {
            tracing::info!("Received SIGTERM signal");
        },
    }

    tracing::info!("Initiating graceful shutdown");
}
