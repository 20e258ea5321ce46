//! Prediction operations
//!
//! Each operation follows the same ladder: run the registered model, else
//! use the deterministic fallback, and if the model fails serve the
//! constant recovery value. None of them return an error to the caller.

use super::{encode, FallbackPredictor, FallbackReason, Prediction, Provenance, TabularModel};
use crate::models::{
    CropTypeResult, FeatureVector, SensorReading, SoilPhResult, SoilQualityResult, SoilTypeResult,
};
use crate::observability::{ServiceMetrics, StructuredLogger};
use crate::registry::{ModelRegistry, ModelSlot};
use anyhow::Result;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error};

/// The four prediction operations
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    SoilType,
    SoilPh,
    CropType,
    SoilQuality,
}

impl Operation {
    pub fn slot(&self) -> ModelSlot {
        match self {
            Operation::SoilType => ModelSlot::SoilType,
            Operation::SoilPh => ModelSlot::SoilPh,
            Operation::CropType => ModelSlot::CropType,
            Operation::SoilQuality => ModelSlot::SoilQuality,
        }
    }

    pub fn as_str(&self) -> &'static str {
        self.slot().as_str()
    }

    /// Phrase used in error messages, e.g. "predicting soil pH"
    pub fn description(&self) -> &'static str {
        match self {
            Operation::SoilType => "soil type",
            Operation::SoilPh => "soil pH",
            Operation::CropType => "crop type",
            Operation::SoilQuality => "soil quality",
        }
    }
}

/// Serves predictions from the registry's models with fallbacks
pub struct PredictionEngine {
    registry: Arc<ModelRegistry>,
    /// Consecutive failed model runs per slot, indexed like `ModelSlot::ALL`
    failure_streaks: [AtomicU32; ModelSlot::ALL.len()],
    metrics: ServiceMetrics,
    logger: StructuredLogger,
}

impl PredictionEngine {
    pub fn new(registry: Arc<ModelRegistry>, metrics: ServiceMetrics, logger: StructuredLogger) -> Self {
        Self {
            registry,
            failure_streaks: Default::default(),
            metrics,
            logger,
        }
    }

    pub fn registry(&self) -> &ModelRegistry {
        &self.registry
    }

    /// Runs of the slot's model that failed since it last succeeded
    pub fn failure_streak(&self, slot: ModelSlot) -> u32 {
        self.failure_streaks[slot.index()].load(Ordering::Relaxed)
    }

    pub fn predict_soil_type(&self, reading: &SensorReading) -> Prediction<SoilTypeResult> {
        let start = Instant::now();
        let op = Operation::SoilType;

        let prediction = match self.registry.get_model(op.slot()) {
            None => Prediction::fallback(FallbackPredictor::soil_type(), FallbackReason::ModelAbsent),
            Some(model) => match infer_label(model, &encode(reading)) {
                Ok((label, confidence)) => {
                    Prediction::from_model(SoilTypeResult::new(label, confidence))
                }
                Err(e) => {
                    log_inference_error(op, &e);
                    Prediction::fallback(FallbackPredictor::soil_type(), FallbackReason::InferenceFailed)
                }
            },
        };

        self.record(op, start, &prediction, prediction.value.soil_type());
        prediction
    }

    pub fn predict_soil_ph(&self, reading: &SensorReading) -> Prediction<SoilPhResult> {
        let start = Instant::now();
        let op = Operation::SoilPh;

        let prediction = match self.registry.get_model(op.slot()) {
            None => Prediction::fallback(FallbackPredictor::soil_ph(), FallbackReason::ModelAbsent),
            Some(model) => match infer_scalar(model, &encode(reading)) {
                Ok(ph) => Prediction::from_model(SoilPhResult::new(ph)),
                Err(e) => {
                    log_inference_error(op, &e);
                    Prediction::fallback(FallbackPredictor::soil_ph(), FallbackReason::InferenceFailed)
                }
            },
        };

        let summary = format!(
            "{} ({})",
            prediction.value.soil_ph(),
            prediction.value.ph_category().as_str()
        );
        self.record(op, start, &prediction, &summary);
        prediction
    }

    pub fn predict_crop_type(&self, reading: &SensorReading) -> Prediction<CropTypeResult> {
        let start = Instant::now();
        let op = Operation::CropType;

        let prediction = match self.registry.get_model(op.slot()) {
            None => Prediction::fallback(FallbackPredictor::crop_type(), FallbackReason::ModelAbsent),
            Some(model) => match infer_label(model, &encode(reading)) {
                Ok((crop, confidence)) => Prediction::from_model(CropTypeResult::new(crop, confidence)),
                Err(e) => {
                    log_inference_error(op, &e);
                    Prediction::fallback(FallbackPredictor::crop_type(), FallbackReason::InferenceFailed)
                }
            },
        };

        self.record(op, start, &prediction, prediction.value.crop_type());
        prediction
    }

    /// Unlike the other operations, a missing model falls back to a score
    /// computed from the reading; only a failing model yields the constant.
    pub fn predict_soil_quality(&self, reading: &SensorReading) -> Prediction<SoilQualityResult> {
        let start = Instant::now();
        let op = Operation::SoilQuality;

        let prediction = match self.registry.get_model(op.slot()) {
            None => Prediction::fallback(
                FallbackPredictor::soil_quality(reading),
                FallbackReason::ModelAbsent,
            ),
            Some(model) => match infer_scalar(model, &encode(reading)) {
                Ok(score) => Prediction::from_model(SoilQualityResult::new(score)),
                Err(e) => {
                    log_inference_error(op, &e);
                    Prediction::fallback(
                        FallbackPredictor::soil_quality_on_error(),
                        FallbackReason::InferenceFailed,
                    )
                }
            },
        };

        let summary = format!(
            "{} ({})",
            prediction.value.soil_quality_score(),
            prediction.value.quality_category().as_str()
        );
        self.record(op, start, &prediction, &summary);
        prediction
    }

    fn record<T>(&self, op: Operation, start: Instant, prediction: &Prediction<T>, summary: &str) {
        let streak = &self.failure_streaks[op.slot().index()];
        match prediction.provenance {
            Provenance::Model => streak.store(0, Ordering::Relaxed),
            Provenance::Fallback(FallbackReason::InferenceFailed) => {
                streak.fetch_add(1, Ordering::Relaxed);
            }
            Provenance::Fallback(FallbackReason::ModelAbsent) => {}
        }

        let elapsed = start.elapsed();
        let provenance = prediction.provenance.as_label();
        self.metrics
            .observe_prediction_latency(op.as_str(), elapsed.as_secs_f64());
        self.metrics.inc_predictions(op.as_str(), provenance);
        self.logger
            .log_prediction(op.as_str(), provenance, summary, elapsed.as_micros() as u64);
    }
}

/// Label plus best-effort confidence from one inference run. A failed
/// confidence read only drops the confidence.
fn infer_label(model: &dyn TabularModel, features: &FeatureVector) -> Result<(String, Option<f64>)> {
    if !model.supports_confidence() {
        return Ok((model.predict(features)?.into_label(), None));
    }

    let (output, confidence) = model.predict_with_confidence(features)?;
    let confidence = match confidence {
        Ok(c) if c.is_finite() => Some(c),
        Ok(c) => {
            debug!(confidence = c, "Discarding non-finite confidence");
            None
        }
        Err(e) => {
            debug!(error = %e, "Confidence query failed");
            None
        }
    };
    Ok((output.into_label(), confidence))
}

fn infer_scalar(model: &dyn TabularModel, features: &FeatureVector) -> Result<f64> {
    model.predict(features)?.to_scalar()
}

fn log_inference_error(op: Operation, e: &anyhow::Error) {
    error!(
        operation = op.as_str(),
        error = %format!("{:#}", e),
        "Error predicting {}, serving fallback",
        op.description()
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{PhCategory, QualityCategory};
    use crate::predictor::{ModelOutput, Provenance};
    use anyhow::anyhow;
    use std::sync::Mutex;

    /// Test model with scripted outputs
    struct StubModel {
        output: std::result::Result<ModelOutput, String>,
        confidence: Option<std::result::Result<f64, String>>,
        seen: Mutex<Option<FeatureVector>>,
        runs: Mutex<u32>,
    }

    impl StubModel {
        fn returning(output: ModelOutput) -> Self {
            Self {
                output: Ok(output),
                confidence: None,
                seen: Mutex::new(None),
                runs: Mutex::new(0),
            }
        }

        fn failing(message: &str) -> Self {
            Self {
                output: Err(message.to_string()),
                confidence: None,
                seen: Mutex::new(None),
                runs: Mutex::new(0),
            }
        }

        fn with_confidence(mut self, confidence: std::result::Result<f64, String>) -> Self {
            self.confidence = Some(confidence);
            self
        }
    }

    impl TabularModel for StubModel {
        fn predict(&self, features: &FeatureVector) -> Result<ModelOutput> {
            *self.seen.lock().unwrap() = Some(*features);
            *self.runs.lock().unwrap() += 1;
            self.output.clone().map_err(|e| anyhow!(e))
        }

        fn supports_confidence(&self) -> bool {
            self.confidence.is_some()
        }

        fn predict_with_confidence(
            &self,
            features: &FeatureVector,
        ) -> Result<(ModelOutput, Result<f64>)> {
            let output = self.predict(features)?;
            let confidence = match &self.confidence {
                Some(c) => c.clone().map_err(|e| anyhow!(e)),
                None => Err(anyhow!("unsupported")),
            };
            Ok((output, confidence))
        }
    }

    fn create_test_reading() -> SensorReading {
        SensorReading {
            npk_n: 60.0,
            npk_p: 45.0,
            npk_k: 45.0,
            soil_moisture: 50.0,
            humidity: 70.0,
            temperature: 24.0,
            crop_yield_estimate: Some(80.0),
        }
    }

    fn engine_with(slot: ModelSlot, model: Arc<dyn TabularModel>) -> PredictionEngine {
        let registry = ModelRegistry::empty().with_model(slot, model);
        PredictionEngine::new(
            Arc::new(registry),
            ServiceMetrics::new(),
            StructuredLogger::new("test"),
        )
    }

    fn empty_engine() -> PredictionEngine {
        PredictionEngine::new(
            Arc::new(ModelRegistry::empty()),
            ServiceMetrics::new(),
            StructuredLogger::new("test"),
        )
    }

    fn ph_for(value: f64) -> SoilPhResult {
        let engine = engine_with(ModelSlot::SoilPh, Arc::new(StubModel::returning(ModelOutput::Scalar(value))));
        engine.predict_soil_ph(&create_test_reading()).into_value()
    }

    #[test]
    fn test_no_models_serves_defaults() {
        let engine = empty_engine();
        let reading = create_test_reading();
        let absent = Provenance::Fallback(FallbackReason::ModelAbsent);

        let soil_type = engine.predict_soil_type(&reading);
        assert_eq!(soil_type.provenance, absent);
        assert_eq!(soil_type.value.soil_type(), "Loamy");
        assert_eq!(soil_type.value.confidence(), None);

        let ph = engine.predict_soil_ph(&reading);
        assert_eq!(ph.provenance, absent);
        assert_eq!(ph.value.soil_ph(), 6.5);
        assert_eq!(ph.value.ph_category(), PhCategory::Neutral);

        let crop = engine.predict_crop_type(&reading);
        assert_eq!(crop.provenance, absent);
        assert_eq!(crop.value.crop_type(), "Maize");
        assert_eq!(crop.value.confidence(), None);
        assert_eq!(
            crop.value.image_url(),
            Some("https://images.example.com/crops/maize.jpg")
        );

        // avg(60, 45, 45) = 50 -> 35, moisture 50 -> 15
        let quality = engine.predict_soil_quality(&reading);
        assert_eq!(quality.provenance, absent);
        assert_eq!(quality.value.soil_quality_score(), 50.0);
        assert_eq!(quality.value.quality_category(), QualityCategory::Fair);
    }

    #[test]
    fn test_ph_category_boundaries() {
        assert_eq!(ph_for(6.5).ph_category(), PhCategory::Neutral);
        assert_eq!(ph_for(7.5).ph_category(), PhCategory::Neutral);
        assert_eq!(ph_for(6.49).ph_category(), PhCategory::Acidic);
        assert_eq!(ph_for(7.51).ph_category(), PhCategory::Alkaline);
        assert_eq!(ph_for(6.789).soil_ph(), 6.79);
    }

    #[test]
    fn test_ph_model_failure_serves_neutral() {
        let engine = engine_with(ModelSlot::SoilPh, Arc::new(StubModel::failing("boom")));
        let prediction = engine.predict_soil_ph(&create_test_reading());
        assert_eq!(
            prediction.provenance,
            Provenance::Fallback(FallbackReason::InferenceFailed)
        );
        assert_eq!(prediction.value.soil_ph(), 6.5);
        assert_eq!(prediction.value.ph_category(), PhCategory::Neutral);
    }

    #[test]
    fn test_ph_non_numeric_output_serves_neutral() {
        let engine = engine_with(
            ModelSlot::SoilPh,
            Arc::new(StubModel::returning(ModelOutput::Label("Clay".into()))),
        );
        let prediction = engine.predict_soil_ph(&create_test_reading());
        assert!(prediction.is_fallback());
        assert_eq!(prediction.value.soil_ph(), 6.5);
    }

    #[test]
    fn test_quality_model_output_clamped() {
        let engine = engine_with(
            ModelSlot::SoilQuality,
            Arc::new(StubModel::returning(ModelOutput::Scalar(150.0))),
        );
        let prediction = engine.predict_soil_quality(&create_test_reading());
        assert_eq!(prediction.provenance, Provenance::Model);
        assert_eq!(prediction.value.soil_quality_score(), 100.0);
        assert_eq!(prediction.value.quality_category(), QualityCategory::Excellent);

        let engine = engine_with(
            ModelSlot::SoilQuality,
            Arc::new(StubModel::returning(ModelOutput::Scalar(-3.0))),
        );
        let prediction = engine.predict_soil_quality(&create_test_reading());
        assert_eq!(prediction.value.soil_quality_score(), 0.0);
        assert_eq!(prediction.value.quality_category(), QualityCategory::Poor);
    }

    #[test]
    fn test_quality_model_failure_serves_constant_not_formula() {
        let mut reading = create_test_reading();
        reading.npk_n = 100.0;
        reading.npk_p = 100.0;
        reading.npk_k = 100.0;
        reading.soil_moisture = 100.0;

        let engine = engine_with(ModelSlot::SoilQuality, Arc::new(StubModel::failing("boom")));
        let prediction = engine.predict_soil_quality(&reading);
        assert_eq!(
            prediction.provenance,
            Provenance::Fallback(FallbackReason::InferenceFailed)
        );
        assert_eq!(prediction.value.soil_quality_score(), 50.0);
        assert_eq!(prediction.value.quality_category(), QualityCategory::Fair);
    }

    #[test]
    fn test_quality_rounded() {
        let engine = engine_with(
            ModelSlot::SoilQuality,
            Arc::new(StubModel::returning(ModelOutput::Scalar(79.996))),
        );
        let prediction = engine.predict_soil_quality(&create_test_reading());
        assert_eq!(prediction.value.soil_quality_score(), 80.0);
        // Category is taken from the unrounded score
        assert_eq!(prediction.value.quality_category(), QualityCategory::Good);
    }

    #[test]
    fn test_soil_type_with_confidence() {
        let model = StubModel::returning(ModelOutput::Label("Clay".into())).with_confidence(Ok(0.87));
        let engine = engine_with(ModelSlot::SoilType, Arc::new(model));
        let prediction = engine.predict_soil_type(&create_test_reading());
        assert_eq!(prediction.provenance, Provenance::Model);
        assert_eq!(prediction.value.soil_type(), "Clay");
        assert_eq!(prediction.value.confidence(), Some(0.87));
    }

    #[test]
    fn test_labelled_prediction_runs_model_once() {
        let model = Arc::new(
            StubModel::returning(ModelOutput::Label("Clay".into())).with_confidence(Ok(0.9)),
        );
        let engine = engine_with(ModelSlot::SoilType, model.clone());
        engine.predict_soil_type(&create_test_reading());
        assert_eq!(*model.runs.lock().unwrap(), 1);
    }

    #[test]
    fn test_confidence_failure_keeps_prediction() {
        let model = StubModel::returning(ModelOutput::Label("Sandy".into()))
            .with_confidence(Err("probabilities unavailable".into()));
        let engine = engine_with(ModelSlot::SoilType, Arc::new(model));
        let prediction = engine.predict_soil_type(&create_test_reading());
        assert_eq!(prediction.provenance, Provenance::Model);
        assert_eq!(prediction.value.soil_type(), "Sandy");
        assert_eq!(prediction.value.confidence(), None);
    }

    #[test]
    fn test_soil_type_class_id_coerced_to_label() {
        let engine = engine_with(
            ModelSlot::SoilType,
            Arc::new(StubModel::returning(ModelOutput::Integer(2))),
        );
        let prediction = engine.predict_soil_type(&create_test_reading());
        assert_eq!(prediction.value.soil_type(), "2");
    }

    #[test]
    fn test_soil_type_failure_matches_absent_value() {
        let engine = engine_with(ModelSlot::SoilType, Arc::new(StubModel::failing("boom")));
        let failed = engine.predict_soil_type(&create_test_reading());
        let absent = empty_engine().predict_soil_type(&create_test_reading());
        assert_eq!(failed.value, absent.value);
        assert_ne!(failed.provenance, absent.provenance);
    }

    #[test]
    fn test_crop_image_url_follows_label() {
        let model = StubModel::returning(ModelOutput::Label("Beans".into())).with_confidence(Ok(0.6));
        let engine = engine_with(ModelSlot::CropType, Arc::new(model));
        let prediction = engine.predict_crop_type(&create_test_reading());
        assert_eq!(prediction.value.crop_type(), "Beans");
        assert_eq!(prediction.value.confidence(), Some(0.6));
        assert_eq!(
            prediction.value.image_url(),
            Some("https://images.example.com/crops/beans.jpg")
        );
    }

    #[test]
    fn test_crop_failure_serves_maize() {
        let engine = engine_with(ModelSlot::CropType, Arc::new(StubModel::failing("boom")));
        let prediction = engine.predict_crop_type(&create_test_reading());
        assert_eq!(prediction.value.crop_type(), "Maize");
        assert_eq!(prediction.value.confidence(), None);
        assert_eq!(
            prediction.value.image_url(),
            Some("https://images.example.com/crops/maize.jpg")
        );
    }

    #[test]
    fn test_failure_streak_resets_on_success() {
        let engine = engine_with(ModelSlot::SoilPh, Arc::new(StubModel::failing("boom")));
        engine.predict_soil_ph(&create_test_reading());
        engine.predict_soil_ph(&create_test_reading());
        assert_eq!(engine.failure_streak(ModelSlot::SoilPh), 2);
        assert_eq!(engine.failure_streak(ModelSlot::SoilType), 0);

        let engine = engine_with(ModelSlot::SoilPh, Arc::new(StubModel::returning(ModelOutput::Scalar(7.0))));
        engine.predict_soil_ph(&create_test_reading());
        assert_eq!(engine.failure_streak(ModelSlot::SoilPh), 0);

        // Absent models are not failures
        let engine = empty_engine();
        engine.predict_soil_type(&create_test_reading());
        assert_eq!(engine.failure_streak(ModelSlot::SoilType), 0);
    }

    #[test]
    fn test_model_receives_encoded_features() {
        let model = Arc::new(StubModel::returning(ModelOutput::Scalar(7.0)));
        let engine = engine_with(ModelSlot::SoilPh, model.clone());
        let mut reading = create_test_reading();
        reading.crop_yield_estimate = None;
        engine.predict_soil_ph(&reading);

        let seen = model.seen.lock().unwrap().expect("model was not invoked");
        assert_eq!(seen, encode(&reading));
        assert_eq!(seen.as_slice()[6], 0.0);
    }
}
