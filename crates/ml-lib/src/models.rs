//! Core data models for the ML service
//!
//! Request payloads are validated at the HTTP boundary with
//! [`SensorReading::validate`]; everything past that point assumes the
//! bounds hold. Result types derive their categories from the numeric value
//! at construction, so a category can never disagree with its score.

use crate::error::{FieldViolation, ValidationError};
use serde::{Deserialize, Serialize, Serializer};

/// Base URL for crop illustration images
pub const CROP_IMAGE_BASE_URL: &str = "https://images.example.com/crops/";

/// IoT kit sensor reading
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensorReading {
    /// Nitrogen level (0-100)
    pub npk_n: f64,
    /// Phosphorus level (0-100)
    pub npk_p: f64,
    /// Potassium level (0-100)
    pub npk_k: f64,
    /// Soil moisture percentage (0-100)
    pub soil_moisture: f64,
    /// Air humidity percentage (0-100)
    pub humidity: f64,
    /// Temperature in Celsius (-20-50)
    pub temperature: f64,
    /// Estimated crop yield
    #[serde(default)]
    pub crop_yield_estimate: Option<f64>,
}

impl SensorReading {
    /// Check every field against its declared bounds
    pub fn validate(&self) -> Result<(), ValidationError> {
        let checks: [(&'static str, f64, f64, f64); 6] = [
            ("npk_n", self.npk_n, 0.0, 100.0),
            ("npk_p", self.npk_p, 0.0, 100.0),
            ("npk_k", self.npk_k, 0.0, 100.0),
            ("soil_moisture", self.soil_moisture, 0.0, 100.0),
            ("humidity", self.humidity, 0.0, 100.0),
            ("temperature", self.temperature, -20.0, 50.0),
        ];

        let mut violations: Vec<FieldViolation> = checks
            .iter()
            .filter_map(|&(field, value, min, max)| check_bounds(field, value, min, max))
            .collect();

        if let Some(estimate) = self.crop_yield_estimate {
            if !estimate.is_finite() {
                violations.push(FieldViolation::new(
                    "crop_yield_estimate",
                    "must be a finite number",
                ));
            }
        }

        if violations.is_empty() {
            Ok(())
        } else {
            Err(ValidationError { violations })
        }
    }
}

fn check_bounds(field: &'static str, value: f64, min: f64, max: f64) -> Option<FieldViolation> {
    if !value.is_finite() {
        return Some(FieldViolation::new(field, "must be a finite number"));
    }
    if value < min || value > max {
        return Some(FieldViolation::new(
            field,
            format!("must be between {} and {}, got {}", min, max, value),
        ));
    }
    None
}

/// Number of features every tabular model consumes
pub const NUM_FEATURES: usize = 7;

/// Feature names in model input order
pub const FEATURE_NAMES: [&str; NUM_FEATURES] = [
    "npk_n",
    "npk_p",
    "npk_k",
    "soil_moisture",
    "humidity",
    "temperature",
    "crop_yield_estimate",
];

/// Feature vector for ML inference, ordered as [`FEATURE_NAMES`]
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct FeatureVector([f32; NUM_FEATURES]);

impl FeatureVector {
    pub fn new(values: [f32; NUM_FEATURES]) -> Self {
        Self(values)
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.0
    }

    pub fn to_vec(&self) -> Vec<f32> {
        self.0.to_vec()
    }
}

/// Soil type prediction
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SoilTypeResult {
    soil_type: String,
    confidence: Option<f64>,
}

impl SoilTypeResult {
    pub fn new(soil_type: impl Into<String>, confidence: Option<f64>) -> Self {
        Self {
            soil_type: soil_type.into(),
            confidence,
        }
    }

    pub fn soil_type(&self) -> &str {
        &self.soil_type
    }

    pub fn confidence(&self) -> Option<f64> {
        self.confidence
    }
}

/// pH band of a soil sample
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PhCategory {
    Acidic,
    Neutral,
    Alkaline,
}

impl PhCategory {
    /// Below 6.5 is acidic, above 7.5 alkaline; both boundaries are neutral.
    pub fn from_ph(ph: f64) -> Self {
        if ph < 6.5 {
            PhCategory::Acidic
        } else if ph > 7.5 {
            PhCategory::Alkaline
        } else {
            PhCategory::Neutral
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PhCategory::Acidic => "acidic",
            PhCategory::Neutral => "neutral",
            PhCategory::Alkaline => "alkaline",
        }
    }
}

/// Soil pH prediction
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SoilPhResult {
    soil_ph: f64,
    ph_category: PhCategory,
}

impl SoilPhResult {
    /// Build from a raw pH value. The category is taken from the raw value
    /// and the reported pH is rounded to two decimals.
    pub fn new(ph: f64) -> Self {
        Self {
            soil_ph: round2(ph),
            ph_category: PhCategory::from_ph(ph),
        }
    }

    pub fn soil_ph(&self) -> f64 {
        self.soil_ph
    }

    pub fn ph_category(&self) -> PhCategory {
        self.ph_category
    }
}

/// Crop recommendation
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CropTypeResult {
    crop_type: String,
    confidence: Option<f64>,
    image_url: Option<String>,
}

impl CropTypeResult {
    pub fn new(crop_type: impl Into<String>, confidence: Option<f64>) -> Self {
        let crop_type = crop_type.into();
        let image_url = Some(crop_image_url(&crop_type));
        Self {
            crop_type,
            confidence,
            image_url,
        }
    }

    pub fn crop_type(&self) -> &str {
        &self.crop_type
    }

    pub fn confidence(&self) -> Option<f64> {
        self.confidence
    }

    pub fn image_url(&self) -> Option<&str> {
        self.image_url.as_deref()
    }
}

/// Illustration URL for a crop label. Not checked for existence.
pub fn crop_image_url(crop: &str) -> String {
    format!("{}{}.jpg", CROP_IMAGE_BASE_URL, crop.to_lowercase())
}

/// Soil quality band
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QualityCategory {
    Poor,
    Fair,
    Good,
    Excellent,
}

impl QualityCategory {
    pub fn from_score(score: f64) -> Self {
        if score < 30.0 {
            QualityCategory::Poor
        } else if score < 60.0 {
            QualityCategory::Fair
        } else if score < 80.0 {
            QualityCategory::Good
        } else {
            QualityCategory::Excellent
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            QualityCategory::Poor => "poor",
            QualityCategory::Fair => "fair",
            QualityCategory::Good => "good",
            QualityCategory::Excellent => "excellent",
        }
    }
}

/// Soil quality prediction, score in 0-100
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SoilQualityResult {
    soil_quality_score: f64,
    quality_category: QualityCategory,
}

impl SoilQualityResult {
    /// Build from a raw score. The score is clamped to 0-100 first.
    pub fn new(score: f64) -> Self {
        let clamped = score.clamp(0.0, 100.0);
        Self {
            soil_quality_score: round2(clamped),
            quality_category: QualityCategory::from_score(clamped),
        }
    }

    pub fn soil_quality_score(&self) -> f64 {
        self.soil_quality_score
    }

    pub fn quality_category(&self) -> QualityCategory {
        self.quality_category
    }
}

/// Plant detection request; the base64 payload takes priority over the URL
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DetectionRequest {
    #[serde(default)]
    pub image_base64: Option<String>,
    #[serde(default)]
    pub image_url: Option<String>,
}

/// Axis-aligned box in pixel coordinates, serialized as `[x, y, width, height]`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl Serialize for BoundingBox {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_seq([self.x, self.y, self.width, self.height])
    }
}

/// A single detected object
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DetectedObject {
    pub class_name: String,
    pub confidence: f32,
    #[serde(rename = "bbox")]
    pub bounding_box: BoundingBox,
}

/// Detection response; `count` always equals the number of detections
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DetectionResult {
    detected_plants: Vec<DetectedObject>,
    count: usize,
}

impl DetectionResult {
    pub fn new(detected_plants: Vec<DetectedObject>) -> Self {
        let count = detected_plants.len();
        Self {
            detected_plants,
            count,
        }
    }

    pub fn empty() -> Self {
        Self::new(Vec::new())
    }

    pub fn detected_plants(&self) -> &[DetectedObject] {
        &self.detected_plants
    }

    pub fn count(&self) -> usize {
        self.count
    }
}

/// Round half away from zero to two decimal places
pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
