//! ML prediction engine

mod engine;
mod features;
mod inference;
#[cfg(test)]
pub(crate) mod test_graphs;

pub use engine::{Operation, PredictionEngine};
pub use features::encode;
pub use inference::{FallbackPredictor, OnnxModel};

use crate::models::FeatureVector;
use anyhow::{anyhow, bail, Result};
use serde::Serialize;

/// Raw first output of a tabular model
#[derive(Debug, Clone, PartialEq)]
pub enum ModelOutput {
    /// String class label
    Label(String),
    /// Integer class id
    Integer(i64),
    /// Regression value
    Scalar(f64),
}

impl ModelOutput {
    /// Coerce to a class label
    pub fn into_label(self) -> String {
        match self {
            ModelOutput::Label(label) => label,
            ModelOutput::Integer(id) => id.to_string(),
            ModelOutput::Scalar(value) => value.to_string(),
        }
    }

    /// Coerce to a finite float
    pub fn to_scalar(&self) -> Result<f64> {
        let value = match self {
            ModelOutput::Label(label) => match label.trim().parse::<f64>() {
                Ok(v) => v,
                Err(_) => bail!("Model output {:?} is not numeric", label),
            },
            ModelOutput::Integer(id) => *id as f64,
            ModelOutput::Scalar(value) => *value,
        };
        if !value.is_finite() {
            bail!("Model output {} is not finite", value);
        }
        Ok(value)
    }
}

/// Trait for tabular model implementations bound to a registry slot
pub trait TabularModel: Send + Sync {
    /// Run inference on an encoded reading
    fn predict(&self, features: &FeatureVector) -> Result<ModelOutput>;

    /// Whether [`TabularModel::predict_with_confidence`] yields probabilities
    fn supports_confidence(&self) -> bool {
        false
    }

    /// Prediction plus its highest class probability from a single run.
    /// The inner error only means the probability could not be read.
    fn predict_with_confidence(&self, features: &FeatureVector) -> Result<(ModelOutput, Result<f64>)> {
        let output = self.predict(features)?;
        Ok((output, Err(anyhow!("Model does not expose class probabilities"))))
    }
}

/// Why a fallback value was served instead of a model result
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FallbackReason {
    /// No model is registered for the slot
    ModelAbsent,
    /// The model errored or produced an unusable output
    InferenceFailed,
}

/// Where a prediction value came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "source", content = "reason")]
pub enum Provenance {
    Model,
    Fallback(FallbackReason),
}

impl Provenance {
    /// Metric label for this provenance
    pub fn as_label(&self) -> &'static str {
        match self {
            Provenance::Model => "model",
            Provenance::Fallback(FallbackReason::ModelAbsent) => "model_absent",
            Provenance::Fallback(FallbackReason::InferenceFailed) => "inference_failed",
        }
    }
}

/// A prediction together with its provenance
#[derive(Debug, Clone, PartialEq)]
pub struct Prediction<T> {
    pub value: T,
    pub provenance: Provenance,
}

impl<T> Prediction<T> {
    pub fn from_model(value: T) -> Self {
        Self {
            value,
            provenance: Provenance::Model,
        }
    }

    pub fn fallback(value: T, reason: FallbackReason) -> Self {
        Self {
            value,
            provenance: Provenance::Fallback(reason),
        }
    }

    pub fn is_fallback(&self) -> bool {
        matches!(self.provenance, Provenance::Fallback(_))
    }

    pub fn into_value(self) -> T {
        self.value
    }
}
