// Cadence sweep worker - runs the expiry and resume sweeps on a schedule

use std::sync::Arc;

use tracing::info;
use tracing_subscriber::EnvFilter;

use cadence_engine::config::EngineConfig;
use cadence_engine::jobs::{EngineScheduler, SweepWorker};
use cadence_engine::services;
use cadence_engine::store::PgStore;
use cadence_engine::workflows::engine::WorkflowEngine;
use cadence_engine::database;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = EngineConfig::from_env()?;
    let database_url = std::env::var("DATABASE_URL")?;
    let pool = database::create_pool(&database_url).await?;
    database::run_migrations(&pool).await?;

    let store = Arc::new(PgStore::new(pool));
    let engine = Arc::new(WorkflowEngine::new(
        store.clone(),
        services::log_only::collaborators(),
        config.clone(),
    ));

    let claimant = format!("sweep-{}", std::process::id());
    let worker = Arc::new(SweepWorker::new(
        engine,
        store,
        config.sweep_batch_size,
        &claimant,
    ));

    let scheduler = EngineScheduler::new(worker).await?;
    scheduler.start(config.sweep_interval_minutes).await?;
    info!(%claimant, "sweep worker running");

    tokio::signal::ctrl_c().await?;
    info!("shutting down");
    Ok(())
}
