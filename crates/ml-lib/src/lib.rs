//! Core library for the Munda ML prediction service
//!
//! This crate provides:
//! - Sensor reading validation and feature encoding
//! - A model registry loaded once at startup
//! - Soil and crop predictions with deterministic fallbacks
//! - Plant detection image ingestion
//! - Health checks and observability

pub mod detection;
pub mod error;
pub mod health;
pub mod models;
pub mod observability;
pub mod predictor;
pub mod registry;

pub use detection::{DetectionEngine, FetchConfig, ObjectDetector, StubDetector};
pub use error::{DetectionError, FieldViolation, ImageError, ValidationError};
pub use health::{
    ComponentHealth, ComponentStatus, HealthResponse, ReadinessResponse, ServiceHealth,
};
pub use models::*;
pub use observability::{ServiceMetrics, StructuredLogger};
pub use predictor::{Operation, Prediction, PredictionEngine, Provenance, TabularModel};
pub use registry::{ModelRegistry, ModelSlot, RegistryConfig};
