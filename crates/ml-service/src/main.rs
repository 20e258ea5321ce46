//! Munda ML Service - soil and crop prediction server
//!
//! Loads the model registry once at startup and serves predictions,
//! plant detection, health checks and metrics over HTTP.

use anyhow::{Context, Result};
use munda_ml::{
    observability::{ServiceMetrics, StructuredLogger},
    DetectionEngine, ModelRegistry, PredictionEngine,
};
use munda_ml_service::{api, config::ServiceConfig};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

const SERVICE_NAME: &str = "ML Service";
const SERVICE_VERSION: &str = env!("CARGO_PKG_VERSION");

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing with JSON output and env filter
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().json())
        .init();

    info!("Starting munda-ml-service");

    let config = ServiceConfig::load()?;
    info!(
        addr = %config.bind_addr(),
        models_dir = %config.models_dir.display(),
        "Service configured"
    );

    let logger = StructuredLogger::new(SERVICE_NAME);

    // Model loading reads and parses every artifact; keep it off the runtime threads
    let registry_config = config.registry_config();
    let load_logger = logger.clone();
    let registry =
        tokio::task::spawn_blocking(move || ModelRegistry::load(&registry_config, &load_logger))
            .await
            .context("Model loading task failed")?;
    let registry = Arc::new(registry);

    let metrics = ServiceMetrics::new();
    metrics.set_models_loaded(&registry);
    logger.log_startup(SERVICE_VERSION, &registry);

    let predictions = Arc::new(PredictionEngine::new(
        registry.clone(),
        metrics.clone(),
        logger.clone(),
    ));
    let detection = Arc::new(
        DetectionEngine::new(
            registry.clone(),
            config.fetch_config(),
            metrics.clone(),
            logger.clone(),
        )?
        .with_config(config.detector_config()),
    );

    let app_state = Arc::new(api::AppState::new(predictions, detection, registry));
    let app = api::create_router(app_state.clone(), &config.api_prefix)
        .layer(api::cors_layer(&config.cors_origins)?);

    app_state.health.mark_started();

    api::serve(
        &config.bind_addr(),
        app,
        api::shutdown_signal(tokio::signal::ctrl_c(), logger),
    )
    .await?;

    info!("Shutting down");
    Ok(())
}
