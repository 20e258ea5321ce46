//! Feature encoding for tabular inference
//!
//! Every tabular model was trained on the column order in
//! [`FEATURE_NAMES`](crate::models::FEATURE_NAMES). This is the only place
//! that order is spelled out.

use crate::models::{FeatureVector, SensorReading};

/// Encode a validated reading into the model input vector.
///
/// A missing yield estimate is encoded as `0.0`.
pub fn encode(reading: &SensorReading) -> FeatureVector {
    FeatureVector::new([
        reading.npk_n as f32,
        reading.npk_p as f32,
        reading.npk_k as f32,
        reading.soil_moisture as f32,
        reading.humidity as f32,
        reading.temperature as f32,
        reading.crop_yield_estimate.unwrap_or(0.0) as f32,
    ])
}
