//! Model registry
//!
//! Loads every model artifact once at startup from a models directory and
//! serves read-only handles afterwards. Missing or corrupt artifacts are
//! logged and leave their slot empty; a registry with no models at all is a
//! valid steady state where every prediction uses its fallback.
//!
//! The service constructs exactly one registry and shares it behind an
//! `Arc`, so no locking is needed for reads.

use crate::observability::StructuredLogger;
use crate::predictor::{OnnxModel, TabularModel};
use anyhow::{Context, Result};
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{error, info, warn};

/// Logical prediction role a tabular model is bound to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelSlot {
    SoilType,
    SoilPh,
    CropType,
    SoilQuality,
}

impl ModelSlot {
    pub const ALL: [ModelSlot; 4] = [
        ModelSlot::SoilType,
        ModelSlot::SoilPh,
        ModelSlot::CropType,
        ModelSlot::SoilQuality,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ModelSlot::SoilType => "soil_type",
            ModelSlot::SoilPh => "soil_ph",
            ModelSlot::CropType => "crop_type",
            ModelSlot::SoilQuality => "soil_quality",
        }
    }

    /// Position in [`ModelSlot::ALL`]
    pub fn index(&self) -> usize {
        match self {
            ModelSlot::SoilType => 0,
            ModelSlot::SoilPh => 1,
            ModelSlot::CropType => 2,
            ModelSlot::SoilQuality => 3,
        }
    }

    /// Human-readable name used in log messages
    pub fn display_name(&self) -> &'static str {
        match self {
            ModelSlot::SoilType => "Soil Type",
            ModelSlot::SoilPh => "Soil pH",
            ModelSlot::CropType => "Crop Type",
            ModelSlot::SoilQuality => "Soil Quality",
        }
    }
}

impl fmt::Display for ModelSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where to find model artifacts
#[derive(Debug, Clone)]
pub struct RegistryConfig {
    pub models_dir: PathBuf,
    pub soil_type_model: String,
    pub soil_ph_model: String,
    pub crop_type_model: String,
    pub soil_quality_model: String,
    /// Frozen detection graph
    pub detection_model: String,
    /// Companion config describing the detection graph layout
    pub detection_config: String,
    /// Newline-delimited class labels
    pub labels_file: String,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            models_dir: PathBuf::from("models"),
            soil_type_model: "styp.onnx".to_string(),
            soil_ph_model: "sph.onnx".to_string(),
            crop_type_model: "ctyp.onnx".to_string(),
            soil_quality_model: "sqm.onnx".to_string(),
            detection_model: "frozen_inference_graph.pb".to_string(),
            detection_config: "ssd_mobilenet_v3_large_coco_2020_01_14.pbtxt".to_string(),
            labels_file: "coco.txt".to_string(),
        }
    }
}

impl RegistryConfig {
    /// Default file names under the given directory
    pub fn with_models_dir(models_dir: impl Into<PathBuf>) -> Self {
        Self {
            models_dir: models_dir.into(),
            ..Self::default()
        }
    }

    /// Configured file name for a tabular slot
    pub fn file_for(&self, slot: ModelSlot) -> &str {
        match slot {
            ModelSlot::SoilType => &self.soil_type_model,
            ModelSlot::SoilPh => &self.soil_ph_model,
            ModelSlot::CropType => &self.crop_type_model,
            ModelSlot::SoilQuality => &self.soil_quality_model,
        }
    }

    pub fn path_for(&self, slot: ModelSlot) -> PathBuf {
        self.models_dir.join(self.file_for(slot))
    }
}

/// Paths of the detection graph and its config, recorded only when the graph exists
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DetectionAssets {
    pub model_path: Option<PathBuf>,
    pub config_path: Option<PathBuf>,
}

impl DetectionAssets {
    pub fn is_available(&self) -> bool {
        self.model_path.is_some()
    }
}

/// Metadata about a loaded model artifact
#[derive(Debug, Clone, Serialize)]
pub struct ModelInfo {
    pub path: PathBuf,
    pub size_bytes: usize,
    pub sha256: String,
    pub loaded_at: i64,
}

struct RegisteredModel {
    model: Arc<dyn TabularModel>,
    info: Option<ModelInfo>,
}

/// Status of one slot in the registry inventory
#[derive(Debug, Clone, Serialize)]
pub struct SlotStatus {
    pub slot: ModelSlot,
    pub loaded: bool,
    pub supports_confidence: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub info: Option<ModelInfo>,
}

/// Snapshot of everything the registry holds
#[derive(Debug, Clone, Serialize)]
pub struct RegistryInventory {
    pub models: Vec<SlotStatus>,
    pub detection: DetectionAssets,
    pub label_count: usize,
}

/// Read-only store of loaded models
pub struct ModelRegistry {
    models: HashMap<ModelSlot, RegisteredModel>,
    detection_assets: DetectionAssets,
    labels: Option<Vec<String>>,
}

impl ModelRegistry {
    /// Registry with no models, no detection assets and no labels
    pub fn empty() -> Self {
        Self {
            models: HashMap::new(),
            detection_assets: DetectionAssets::default(),
            labels: None,
        }
    }

    /// Load every artifact named by the config. Never fails.
    pub fn load(config: &RegistryConfig, logger: &StructuredLogger) -> Self {
        info!(models_dir = %config.models_dir.display(), "Loading ML models");

        let mut registry = Self::empty();
        for slot in ModelSlot::ALL {
            let path = config.path_for(slot);
            match load_tabular_model(&path) {
                Ok((model, info)) => {
                    logger.log_model_loaded(slot, &info);
                    registry.models.insert(
                        slot,
                        RegisteredModel {
                            model: Arc::new(model),
                            info: Some(info),
                        },
                    );
                }
                Err(e) => logger.log_model_load_failed(slot, &path, &e),
            }
        }

        registry.detection_assets = locate_detection_assets(config);
        registry.labels = load_labels(&config.models_dir.join(&config.labels_file));

        info!(
            loaded = registry.models.len(),
            total = ModelSlot::ALL.len(),
            detection_available = registry.detection_assets.is_available(),
            "Model loading completed"
        );
        registry
    }

    /// Bind a model to a slot, replacing any previous one
    pub fn with_model(mut self, slot: ModelSlot, model: Arc<dyn TabularModel>) -> Self {
        self.models.insert(slot, RegisteredModel { model, info: None });
        self
    }

    pub fn with_labels(mut self, labels: Vec<String>) -> Self {
        self.labels = Some(labels);
        self
    }

    pub fn with_detection_assets(mut self, assets: DetectionAssets) -> Self {
        self.detection_assets = assets;
        self
    }

    /// Model bound to a slot, if one loaded
    pub fn get_model(&self, slot: ModelSlot) -> Option<&dyn TabularModel> {
        self.models.get(&slot).map(|m| m.model.as_ref())
    }

    pub fn is_loaded(&self, slot: ModelSlot) -> bool {
        self.models.contains_key(&slot)
    }

    /// Number of tabular slots with a model
    pub fn loaded_count(&self) -> usize {
        self.models.len()
    }

    pub fn missing_slots(&self) -> Vec<ModelSlot> {
        ModelSlot::ALL
            .into_iter()
            .filter(|slot| !self.is_loaded(*slot))
            .collect()
    }

    pub fn detection_assets(&self) -> &DetectionAssets {
        &self.detection_assets
    }

    /// Detection class labels, one per class id
    pub fn labels(&self) -> Option<&[String]> {
        self.labels.as_deref()
    }

    pub fn inventory(&self) -> RegistryInventory {
        let models = ModelSlot::ALL
            .into_iter()
            .map(|slot| match self.models.get(&slot) {
                Some(registered) => SlotStatus {
                    slot,
                    loaded: true,
                    supports_confidence: registered.model.supports_confidence(),
                    info: registered.info.clone(),
                },
                None => SlotStatus {
                    slot,
                    loaded: false,
                    supports_confidence: false,
                    info: None,
                },
            })
            .collect();

        RegistryInventory {
            models,
            detection: self.detection_assets.clone(),
            label_count: self.labels.as_ref().map_or(0, Vec::len),
        }
    }
}

fn load_tabular_model(path: &Path) -> Result<(OnnxModel, ModelInfo)> {
    if !path.exists() {
        anyhow::bail!("Model file not found: {}", path.display());
    }
    let bytes =
        fs::read(path).with_context(|| format!("Failed to read model file {}", path.display()))?;
    let model = OnnxModel::from_bytes(&bytes)?;
    let info = ModelInfo {
        path: path.to_path_buf(),
        size_bytes: bytes.len(),
        sha256: compute_checksum(&bytes),
        loaded_at: chrono::Utc::now().timestamp(),
    };
    Ok((model, info))
}

/// The graph itself is not deserialized here
fn locate_detection_assets(config: &RegistryConfig) -> DetectionAssets {
    let model_path = config.models_dir.join(&config.detection_model);
    let config_path = config.models_dir.join(&config.detection_config);

    if !model_path.exists() {
        warn!(path = %model_path.display(), "Object detection model not found");
        return DetectionAssets::default();
    }

    info!(path = %model_path.display(), "Object detection model found");
    DetectionAssets {
        model_path: Some(model_path),
        config_path: Some(config_path),
    }
}

fn load_labels(path: &Path) -> Option<Vec<String>> {
    if !path.exists() {
        warn!(path = %path.display(), "Detection labels not found");
        return None;
    }
    match fs::read_to_string(path) {
        Ok(content) => {
            let labels: Vec<String> = content.lines().map(|l| l.trim().to_string()).collect();
            info!(count = labels.len(), "Loaded detection labels");
            Some(labels)
        }
        Err(e) => {
            error!(path = %path.display(), error = %e, "Error loading detection labels");
            None
        }
    }
}

fn compute_checksum(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}
