//! Observability infrastructure for the ML service
//!
//! Provides:
//! - Prometheus metrics (prediction latency, provenance counts, loaded models,
//!   detection outcomes, image fetch latency)
//! - Structured JSON logging with tracing

use crate::registry::{ModelInfo, ModelRegistry, ModelSlot};
use prometheus::{
    register_histogram, register_histogram_vec, register_int_counter_vec, register_int_gauge_vec,
    Histogram, HistogramVec, IntCounterVec, IntGaugeVec,
};
use std::path::Path;
use std::sync::OnceLock;
use tracing::{error, info, warn};

/// Default histogram buckets for latency measurements (in seconds)
const LATENCY_BUCKETS: &[f64] = &[
    0.0001, 0.0005, 0.001, 0.0025, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0,
];

/// Buckets for remote image retrieval, which is network bound
const FETCH_BUCKETS: &[f64] = &[0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0];

/// Global metrics instance (registered once)
static GLOBAL_METRICS: OnceLock<ServiceMetricsInner> = OnceLock::new();

struct ServiceMetricsInner {
    prediction_latency_seconds: HistogramVec,
    predictions_total: IntCounterVec,
    models_loaded: IntGaugeVec,
    detections_total: IntCounterVec,
    image_fetch_latency_seconds: Histogram,
}

impl ServiceMetricsInner {
    fn new() -> Self {
        Self {
            prediction_latency_seconds: register_histogram_vec!(
                "munda_ml_prediction_latency_seconds",
                "Time spent serving a prediction, fallbacks included",
                &["operation"],
                LATENCY_BUCKETS.to_vec()
            )
            .expect("Failed to register prediction_latency_seconds"),

            predictions_total: register_int_counter_vec!(
                "munda_ml_predictions_total",
                "Predictions served, by operation and provenance",
                &["operation", "provenance"]
            )
            .expect("Failed to register predictions_total"),

            models_loaded: register_int_gauge_vec!(
                "munda_ml_models_loaded",
                "Whether a tabular model is loaded for a slot (1) or not (0)",
                &["slot"]
            )
            .expect("Failed to register models_loaded"),

            detections_total: register_int_counter_vec!(
                "munda_ml_detections_total",
                "Plant detection requests, by outcome",
                &["outcome"]
            )
            .expect("Failed to register detections_total"),

            image_fetch_latency_seconds: register_histogram!(
                "munda_ml_image_fetch_latency_seconds",
                "Time spent retrieving images from remote URLs",
                FETCH_BUCKETS.to_vec()
            )
            .expect("Failed to register image_fetch_latency_seconds"),
        }
    }
}

/// Service metrics for Prometheus exposition
///
/// This is a lightweight handle to the global metrics instance.
/// Multiple clones share the same underlying metrics.
#[derive(Clone)]
pub struct ServiceMetrics {
    _private: (),
}

impl Default for ServiceMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl ServiceMetrics {
    /// Create a new metrics handle (initializes global metrics if needed)
    pub fn new() -> Self {
        GLOBAL_METRICS.get_or_init(ServiceMetricsInner::new);
        Self { _private: () }
    }

    fn inner(&self) -> &ServiceMetricsInner {
        GLOBAL_METRICS.get().expect("Metrics not initialized")
    }

    pub fn observe_prediction_latency(&self, operation: &str, duration_secs: f64) {
        self.inner()
            .prediction_latency_seconds
            .with_label_values(&[operation])
            .observe(duration_secs);
    }

    pub fn inc_predictions(&self, operation: &str, provenance: &str) {
        self.inner()
            .predictions_total
            .with_label_values(&[operation, provenance])
            .inc();
    }

    /// Publish which slots hold a model
    pub fn set_models_loaded(&self, registry: &ModelRegistry) {
        for slot in ModelSlot::ALL {
            self.inner()
                .models_loaded
                .with_label_values(&[slot.as_str()])
                .set(registry.is_loaded(slot) as i64);
        }
    }

    pub fn inc_detections(&self, outcome: &str) {
        self.inner().detections_total.with_label_values(&[outcome]).inc();
    }

    pub fn observe_image_fetch_latency(&self, duration_secs: f64) {
        self.inner().image_fetch_latency_seconds.observe(duration_secs);
    }
}

/// Structured logger for service events
#[derive(Clone)]
pub struct StructuredLogger {
    service: String,
}

impl StructuredLogger {
    pub fn new(service: impl Into<String>) -> Self {
        Self {
            service: service.into(),
        }
    }

    pub fn log_startup(&self, version: &str, registry: &ModelRegistry) {
        let missing: Vec<&str> = registry.missing_slots().iter().map(ModelSlot::as_str).collect();
        info!(
            event = "service_started",
            service = %self.service,
            version = %version,
            models_loaded = registry.loaded_count(),
            missing_models = ?missing,
            detection_available = registry.detection_assets().is_available(),
            "ML service started"
        );
    }

    pub fn log_model_loaded(&self, slot: ModelSlot, info: &ModelInfo) {
        info!(
            event = "model_loaded",
            service = %self.service,
            slot = %slot,
            path = %info.path.display(),
            size_bytes = info.size_bytes,
            sha256 = %info.sha256,
            "Successfully loaded {} model",
            slot.display_name()
        );
    }

    /// The slot stays empty and its fallback serves every request
    pub fn log_model_load_failed(&self, slot: ModelSlot, path: &Path, error: &anyhow::Error) {
        error!(
            event = "model_load_failed",
            service = %self.service,
            slot = %slot,
            path = %path.display(),
            error = %format!("{:#}", error),
            "Error loading {} model, fallback will be used",
            slot.display_name()
        );
    }

    pub fn log_shutdown(&self, reason: &str) {
        info!(
            event = "service_shutdown",
            service = %self.service,
            reason = %reason,
            "ML service shutting down"
        );
    }

    /// Log a served prediction. Fallbacks are logged at warn level.
    pub fn log_prediction(&self, operation: &str, provenance: &str, summary: &str, duration_us: u64) {
        if provenance == "model" {
            info!(
                event = "prediction_served",
                service = %self.service,
                operation = %operation,
                provenance = %provenance,
                result = %summary,
                duration_us = duration_us,
                "Prediction served"
            );
        } else {
            warn!(
                event = "prediction_served",
                service = %self.service,
                operation = %operation,
                provenance = %provenance,
                result = %summary,
                duration_us = duration_us,
                "Prediction served from fallback"
            );
        }
    }

    pub fn log_detection(&self, outcome: &str, count: usize) {
        info!(
            event = "detection_served",
            service = %self.service,
            outcome = %outcome,
            count = count,
            "Plant detection served"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use prometheus::{Encoder, TextEncoder};

    #[test]
    fn test_service_metrics_exposed() {
        let metrics = ServiceMetrics::new();
        metrics.observe_prediction_latency("soil_ph", 0.001);
        metrics.inc_predictions("soil_ph", "model_absent");
        metrics.set_models_loaded(&ModelRegistry::empty());
        metrics.inc_detections("no_image");
        metrics.observe_image_fetch_latency(0.2);

        let mut buffer = Vec::new();
        TextEncoder::new()
            .encode(&prometheus::gather(), &mut buffer)
            .unwrap();
        let text = String::from_utf8(buffer).unwrap();

        assert!(text.contains("munda_ml_prediction_latency_seconds_bucket"));
        assert!(text.contains("munda_ml_predictions_total{operation=\"soil_ph\",provenance=\"model_absent\"}"));
        assert!(text.contains("munda_ml_models_loaded{slot=\"crop_type\"} 0"));
        assert!(text.contains("munda_ml_detections_total{outcome=\"no_image\"}"));
        assert!(text.contains("munda_ml_image_fetch_latency_seconds_count"));
    }

    #[test]
    fn test_structured_logger_creation() {
        let logger = StructuredLogger::new("ML Service");
        assert_eq!(logger.service, "ML Service");
    }
}
