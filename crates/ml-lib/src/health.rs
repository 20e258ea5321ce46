//! Component health for the `/healthz` and `/readyz` endpoints
//!
//! Nothing is pushed into this module: every check derives component state
//! from the registry and the two engines as they are at that moment.
//!
//! - `model_registry` is degraded while any tabular slot is empty.
//! - `prediction_engine` is degraded while some loaded model keeps failing
//!   and unhealthy once every loaded model does.
//! - `detection_engine` is degraded while detections are necessarily empty
//!   (no detection graph, or no detector that runs inference).

use crate::detection::DetectionEngine;
use crate::predictor::PredictionEngine;
use crate::registry::{ModelRegistry, ModelSlot};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Consecutive failed runs after which a loaded model counts as failing
pub const FAILURE_STREAK_THRESHOLD: u32 = 3;

/// Component state, ordered from best to worst
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ComponentStatus {
    Healthy,
    /// Serving, but some answers come from fallbacks
    Degraded,
    Unhealthy,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentHealth {
    pub status: ComponentStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub last_check_timestamp: i64,
}

impl ComponentHealth {
    fn new(status: ComponentStatus, message: Option<String>) -> Self {
        Self {
            status,
            message,
            last_check_timestamp: chrono::Utc::now().timestamp(),
        }
    }

    pub fn healthy() -> Self {
        Self::new(ComponentStatus::Healthy, None)
    }

    pub fn degraded(message: impl Into<String>) -> Self {
        Self::new(ComponentStatus::Degraded, Some(message.into()))
    }

    pub fn unhealthy(message: impl Into<String>) -> Self {
        Self::new(ComponentStatus::Unhealthy, Some(message.into()))
    }
}

/// Body of `/healthz`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    /// Worst component status
    pub status: ComponentStatus,
    pub components: BTreeMap<String, ComponentHealth>,
}

impl HealthResponse {
    fn from_components(components: BTreeMap<String, ComponentHealth>) -> Self {
        let status = components
            .values()
            .map(|c| c.status)
            .max()
            .unwrap_or(ComponentStatus::Healthy);
        Self { status, components }
    }
}

/// Body of `/readyz`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadinessResponse {
    pub ready: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Component names as they appear in `/healthz`
pub mod components {
    pub const MODEL_REGISTRY: &str = "model_registry";
    pub const PREDICTION_ENGINE: &str = "prediction_engine";
    pub const DETECTION_ENGINE: &str = "detection_engine";
}

/// Health view over the running engines
pub struct ServiceHealth {
    predictions: Arc<PredictionEngine>,
    detection: Arc<DetectionEngine>,
    started: AtomicBool,
}

impl ServiceHealth {
    pub fn new(predictions: Arc<PredictionEngine>, detection: Arc<DetectionEngine>) -> Self {
        Self {
            predictions,
            detection,
            started: AtomicBool::new(false),
        }
    }

    /// Called once the router is built and about to serve
    pub fn mark_started(&self) {
        self.started.store(true, Ordering::Release);
    }

    pub fn report(&self) -> HealthResponse {
        let components = BTreeMap::from([
            (
                components::MODEL_REGISTRY.to_string(),
                registry_health(self.predictions.registry()),
            ),
            (
                components::PREDICTION_ENGINE.to_string(),
                prediction_health(&self.predictions),
            ),
            (
                components::DETECTION_ENGINE.to_string(),
                detection_health(&self.detection),
            ),
        ]);
        HealthResponse::from_components(components)
    }

    /// Ready once started, unless a component is unhealthy. Missing models
    /// only degrade health since every operation has a fallback.
    pub fn readiness(&self) -> ReadinessResponse {
        let reason = if !self.started.load(Ordering::Acquire) {
            Some("Models not yet loaded".to_string())
        } else {
            let report = self.report();
            report
                .components
                .iter()
                .find(|(_, c)| c.status == ComponentStatus::Unhealthy)
                .map(|(name, c)| match &c.message {
                    Some(message) => format!("{} unhealthy: {}", name, message),
                    None => format!("{} unhealthy", name),
                })
        };

        ReadinessResponse {
            ready: reason.is_none(),
            reason,
        }
    }
}

fn registry_health(registry: &ModelRegistry) -> ComponentHealth {
    let missing = registry.missing_slots();
    if missing.is_empty() {
        return ComponentHealth::healthy();
    }
    let names: Vec<&str> = missing.iter().map(ModelSlot::as_str).collect();
    ComponentHealth::degraded(format!("serving fallbacks for: {}", names.join(", ")))
}

fn prediction_health(engine: &PredictionEngine) -> ComponentHealth {
    let loaded: Vec<ModelSlot> = ModelSlot::ALL
        .into_iter()
        .filter(|slot| engine.registry().is_loaded(*slot))
        .collect();
    let failing: Vec<String> = loaded
        .iter()
        .filter_map(|slot| {
            let streak = engine.failure_streak(*slot);
            (streak >= FAILURE_STREAK_THRESHOLD)
                .then(|| format!("{} ({} consecutive failures)", slot, streak))
        })
        .collect();

    if failing.is_empty() {
        ComponentHealth::healthy()
    } else if failing.len() == loaded.len() {
        ComponentHealth::unhealthy(format!("every loaded model is failing: {}", failing.join(", ")))
    } else {
        ComponentHealth::degraded(format!("failing models: {}", failing.join(", ")))
    }
}

fn detection_health(engine: &DetectionEngine) -> ComponentHealth {
    if !engine.registry().detection_assets().is_available() {
        ComponentHealth::degraded("detection model not found, detections are empty")
    } else if !engine.runs_inference() {
        ComponentHealth::degraded("no object detector installed, detections are empty")
    } else {
        ComponentHealth::healthy()
    }
}
