//! ONNX inference using tract
//!
//! Tabular models are ONNX graphs with a single `[1, 7]` f32 input. Output 0
//! carries the prediction (label, class id or regression value); an optional
//! output 1 carries class probabilities.

use super::{ModelOutput, TabularModel};
use crate::models::{
    CropTypeResult, FeatureVector, SensorReading, SoilPhResult, SoilQualityResult,
    SoilTypeResult, NUM_FEATURES,
};
use anyhow::{anyhow, bail, Context, Result};
use std::time::Instant;
use tract_onnx::prelude::*;
use tracing::{debug, warn};

/// Maximum inference latency before warning
const MAX_INFERENCE_MS: u128 = 5;

type TractModel = SimplePlan<TypedFact, Box<dyn TypedOp>, Graph<TypedFact, Box<dyn TypedOp>>>;

/// ONNX-based tabular model using tract for lightweight inference
pub struct OnnxModel {
    model: TractModel,
    output_count: usize,
}

impl OnnxModel {
    /// Load a model from ONNX bytes
    pub fn from_bytes(model_bytes: &[u8]) -> Result<Self> {
        let model = Self::load_model(model_bytes)?;
        let output_count = model
            .model()
            .output_outlets()
            .context("Failed to read model outputs")?
            .len();
        if output_count == 0 {
            bail!("Model declares no outputs");
        }
        Ok(Self {
            model,
            output_count,
        })
    }

    /// Load and optimize an ONNX model from bytes
    fn load_model(model_bytes: &[u8]) -> Result<TractModel> {
        let model = tract_onnx::onnx()
            .model_for_read(&mut std::io::Cursor::new(model_bytes))
            .context("Failed to parse ONNX model")?
            .with_input_fact(0, f32::fact([1, NUM_FEATURES]).into())
            .context("Failed to set input shape")?
            .into_optimized()
            .context("Failed to optimize model")?
            .into_runnable()
            .context("Failed to create runnable model")?;
        Ok(model)
    }

    /// Convert feature vector to tensor input
    fn features_to_tensor(features: &FeatureVector) -> Result<Tensor> {
        let array = tract_ndarray::Array2::from_shape_vec((1, NUM_FEATURES), features.to_vec())
            .context("Feature vector has wrong length")?;
        Ok(array.into())
    }

    fn run(&self, features: &FeatureVector) -> Result<TVec<TValue>> {
        let start = Instant::now();
        let input = Self::features_to_tensor(features)?;
        let outputs = self.model.run(tvec!(input.into()))?;

        let elapsed = start.elapsed();
        if elapsed.as_millis() > MAX_INFERENCE_MS {
            warn!(elapsed_ms = elapsed.as_millis(), "Inference exceeded {}ms target", MAX_INFERENCE_MS);
        } else {
            debug!(elapsed_us = elapsed.as_micros(), "Inference completed");
        }

        Ok(outputs)
    }
}

impl TabularModel for OnnxModel {
    fn predict(&self, features: &FeatureVector) -> Result<ModelOutput> {
        let outputs = self.run(features)?;
        let output = outputs.first().context("No output from model")?;
        tensor_to_output(output)
    }

    fn supports_confidence(&self) -> bool {
        self.output_count > 1
    }

    fn predict_with_confidence(&self, features: &FeatureVector) -> Result<(ModelOutput, Result<f64>)> {
        let outputs = self.run(features)?;
        let output = outputs.first().context("No output from model")?;
        let confidence = match outputs.get(1) {
            Some(probabilities) => max_probability(probabilities),
            None => Err(anyhow!("Model has no probability output")),
        };
        Ok((tensor_to_output(output)?, confidence))
    }
}

fn max_probability(probabilities: &Tensor) -> Result<f64> {
    let probabilities = probabilities.cast_to::<f64>()?;
    probabilities
        .as_slice::<f64>()?
        .iter()
        .copied()
        .fold(None, |max: Option<f64>, p| Some(max.map_or(p, |m| m.max(p))))
        .context("Probability output is empty")
}

/// Take the first element of a prediction tensor
fn tensor_to_output(tensor: &Tensor) -> Result<ModelOutput> {
    let datum_type = tensor.datum_type();
    if datum_type == DatumType::String {
        let view = tensor.to_array_view::<String>()?;
        let label = view.iter().next().context("Model returned an empty label tensor")?;
        return Ok(ModelOutput::Label(label.clone()));
    }
    if datum_type.is_integer() {
        let cast = tensor.cast_to::<i64>()?;
        let value = cast.as_slice::<i64>()?.first().copied();
        return value
            .map(ModelOutput::Integer)
            .context("Model returned an empty output tensor");
    }
    if datum_type.is_float() {
        let cast = tensor.cast_to::<f64>()?;
        let value = cast.as_slice::<f64>()?.first().copied();
        return value
            .map(ModelOutput::Scalar)
            .context("Model returned an empty output tensor");
    }
    bail!("Unsupported model output type {:?}", datum_type)
}

/// Fallback values used when a model is unavailable or fails
pub struct FallbackPredictor;

impl FallbackPredictor {
    pub const SOIL_TYPE: &'static str = "Loamy";
    pub const SOIL_PH: f64 = 6.5;
    pub const CROP_TYPE: &'static str = "Maize";
    /// Quality score served when a soil quality model errors
    pub const SOIL_QUALITY_ON_ERROR: f64 = 50.0;

    pub fn soil_type() -> SoilTypeResult {
        SoilTypeResult::new(Self::SOIL_TYPE, None)
    }

    pub fn soil_ph() -> SoilPhResult {
        SoilPhResult::new(Self::SOIL_PH)
    }

    pub fn crop_type() -> CropTypeResult {
        CropTypeResult::new(Self::CROP_TYPE, None)
    }

    /// NPK average weighted 70%, moisture weighted 30%
    pub fn soil_quality(reading: &SensorReading) -> SoilQualityResult {
        let npk_avg = (reading.npk_n + reading.npk_p + reading.npk_k) / 3.0;
        let score = (npk_avg / 100.0) * 70.0 + (reading.soil_moisture / 100.0) * 30.0;
        SoilQualityResult::new(score.clamp(0.0, 100.0))
    }

    pub fn soil_quality_on_error() -> SoilQualityResult {
        SoilQualityResult::new(Self::SOIL_QUALITY_ON_ERROR)
    }
}
