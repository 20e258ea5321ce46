//! HTTP API: predictions, plant detection, health checks and Prometheus metrics

use axum::{
    extract::State,
    http::{HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use munda_ml::{
    health::{ComponentStatus, ServiceHealth},
    observability::StructuredLogger,
    CropTypeResult, DetectionEngine, DetectionRequest, DetectionResult, FieldViolation,
    ModelRegistry, Operation, PredictionEngine, SensorReading, SoilPhResult, SoilQualityResult,
    SoilTypeResult, ValidationError,
};
use prometheus::{Encoder, TextEncoder};
use serde_json::json;
use std::sync::Arc;
use tower_http::cors::{AllowHeaders, AllowMethods, AllowOrigin, CorsLayer};
use tracing::{error, info};

/// Shared application state
pub struct AppState {
    pub predictions: Arc<PredictionEngine>,
    pub detection: Arc<DetectionEngine>,
    pub registry: Arc<ModelRegistry>,
    pub health: ServiceHealth,
}

impl AppState {
    pub fn new(
        predictions: Arc<PredictionEngine>,
        detection: Arc<DetectionEngine>,
        registry: Arc<ModelRegistry>,
    ) -> Self {
        let health = ServiceHealth::new(predictions.clone(), detection.clone());
        Self {
            predictions,
            detection,
            registry,
            health,
        }
    }
}

/// Errors surfaced to HTTP callers
#[derive(Debug)]
pub enum ApiError {
    /// Request fields out of range
    Validation(Vec<FieldViolation>),
    /// Unexpected failure, message names the operation
    Internal(String),
}

impl From<ValidationError> for ApiError {
    fn from(err: ValidationError) -> Self {
        ApiError::Validation(err.violations)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::Validation(violations) => (
                StatusCode::UNPROCESSABLE_ENTITY,
                Json(json!({ "detail": violations })),
            )
                .into_response(),
            ApiError::Internal(detail) => {
                error!(detail = %detail, "Request failed");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(json!({ "detail": detail })),
                )
                    .into_response()
            }
        }
    }
}

/// Validate, then run a prediction on the blocking pool
async fn run_prediction<T, F>(
    state: &AppState,
    operation: Operation,
    reading: SensorReading,
    predict: F,
) -> Result<Json<T>, ApiError>
where
    T: Send + 'static,
    F: FnOnce(&PredictionEngine, &SensorReading) -> T + Send + 'static,
{
    reading.validate()?;
    let engine = state.predictions.clone();
    tokio::task::spawn_blocking(move || predict(&engine, &reading))
        .await
        .map(Json)
        .map_err(|e| ApiError::Internal(format!("Error predicting {}: {}", operation.description(), e)))
}

async fn predict_soil_type(
    State(state): State<Arc<AppState>>,
    Json(reading): Json<SensorReading>,
) -> Result<Json<SoilTypeResult>, ApiError> {
    run_prediction(&state, Operation::SoilType, reading, |engine, r| {
        engine.predict_soil_type(r).into_value()
    })
    .await
}

async fn predict_soil_ph(
    State(state): State<Arc<AppState>>,
    Json(reading): Json<SensorReading>,
) -> Result<Json<SoilPhResult>, ApiError> {
    run_prediction(&state, Operation::SoilPh, reading, |engine, r| {
        engine.predict_soil_ph(r).into_value()
    })
    .await
}

async fn predict_crop_type(
    State(state): State<Arc<AppState>>,
    Json(reading): Json<SensorReading>,
) -> Result<Json<CropTypeResult>, ApiError> {
    run_prediction(&state, Operation::CropType, reading, |engine, r| {
        engine.predict_crop_type(r).into_value()
    })
    .await
}

async fn predict_soil_quality(
    State(state): State<Arc<AppState>>,
    Json(reading): Json<SensorReading>,
) -> Result<Json<SoilQualityResult>, ApiError> {
    run_prediction(&state, Operation::SoilQuality, reading, |engine, r| {
        engine.predict_soil_quality(r).into_value()
    })
    .await
}

async fn detect_plant(
    State(state): State<Arc<AppState>>,
    Json(request): Json<DetectionRequest>,
) -> Result<Json<DetectionResult>, ApiError> {
    state
        .detection
        .detect_plants(request.image_base64.as_deref(), request.image_url.as_deref())
        .await
        .map(Json)
        .map_err(|e| ApiError::Internal(format!("Error detecting plants: {}", e)))
}

/// Liveness contract kept for existing callers; see `/healthz` for detail
async fn health() -> impl IntoResponse {
    Json(json!({
        "status": "healthy",
        "service": "ML Service",
        "models_loaded": true,
    }))
}

async fn list_models(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.registry.inventory())
}

async fn root() -> impl IntoResponse {
    Json(json!({
        "message": "Munda AI ML Service",
        "version": env!("CARGO_PKG_VERSION"),
        "docs": env!("CARGO_PKG_REPOSITORY"),
    }))
}

/// Health check response - returns 200 if healthy, 503 if unhealthy
async fn healthz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let health = state.health.report();

    let status_code = match health.status {
        ComponentStatus::Healthy => StatusCode::OK,
        ComponentStatus::Degraded => StatusCode::OK, // Serving fallbacks
        ComponentStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };

    (status_code, Json(health))
}

/// Readiness check response - returns 200 if ready, 503 if not ready
async fn readyz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let readiness = state.health.readiness();

    let status_code = if readiness.ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (status_code, Json(readiness))
}

/// Prometheus metrics endpoint
async fn metrics() -> Response {
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();

    if let Err(e) = encoder.encode(&prometheus::gather(), &mut buffer) {
        error!(error = %e, "Failed to encode metrics");
        return StatusCode::INTERNAL_SERVER_ERROR.into_response();
    }

    (
        StatusCode::OK,
        [("content-type", "text/plain; charset=utf-8")],
        buffer,
    )
        .into_response()
}

/// Credentialed CORS with any method and header, restricted to `origins`
pub fn cors_layer(origins: &[String]) -> anyhow::Result<CorsLayer> {
    let origins = origins
        .iter()
        .map(|o| HeaderValue::from_str(o))
        .collect::<Result<Vec<_>, _>>()?;

    Ok(CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_credentials(true)
        .allow_methods(AllowMethods::mirror_request())
        .allow_headers(AllowHeaders::mirror_request()))
}

/// Create the API router with the prediction routes nested under `api_prefix`
pub fn create_router(state: Arc<AppState>, api_prefix: &str) -> Router {
    let api = Router::new()
        .route("/predict/soil-type", post(predict_soil_type))
        .route("/predict/soil-ph", post(predict_soil_ph))
        .route("/predict/crop-type", post(predict_crop_type))
        .route("/predict/soil-quality", post(predict_soil_quality))
        .route("/detect-plant", post(detect_plant))
        .route("/health", get(health))
        .route("/models", get(list_models));

    Router::new()
        .route("/", get(root))
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/metrics", get(metrics))
        .nest(api_prefix, api)
        .with_state(state)
}

/// Start the API server and run until `shutdown` resolves
pub async fn serve(
    addr: &str,
    app: Router,
    shutdown: impl std::future::Future<Output = ()> + Send + 'static,
) -> anyhow::Result<()> {
    info!(addr = %addr, "Starting API server");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await?;

    Ok(())
}

/// Resolves when `signal` fires. If the signal handler could not be
/// installed the error is logged and this never resolves, so the server
/// runs until it is killed.
pub async fn shutdown_signal(
    signal: impl std::future::Future<Output = std::io::Result<()>>,
    logger: StructuredLogger,
) {
    match signal.await {
        Ok(()) => logger.log_shutdown("SIGINT received"),
        Err(e) => {
            error!(error = %e, "Failed to listen for shutdown signal");
            std::future::pending::<()>().await;
        }
    }
}
