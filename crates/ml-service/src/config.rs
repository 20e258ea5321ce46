//! Service configuration

use anyhow::{bail, Context, Result};
use munda_ml::detection::{ChannelOrder, DetectorConfig, FetchConfig};
use munda_ml::registry::RegistryConfig;
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

const ENV_PREFIX: &str = "MUNDA";
const CONFIG_FILE: &str = "munda-ml";

/// ML service configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// Prefix for the prediction and detection routes
    #[serde(default = "default_api_prefix")]
    pub api_prefix: String,

    #[serde(default = "default_models_dir")]
    pub models_dir: PathBuf,

    #[serde(default)]
    pub soil_type_model: Option<String>,
    #[serde(default)]
    pub soil_ph_model: Option<String>,
    #[serde(default)]
    pub crop_type_model: Option<String>,
    #[serde(default)]
    pub soil_quality_model: Option<String>,
    #[serde(default)]
    pub detection_model: Option<String>,
    #[serde(default)]
    pub detection_config: Option<String>,
    #[serde(default)]
    pub labels_file: Option<String>,

    /// Origins allowed to call the API from a browser
    #[serde(default = "default_cors_origins")]
    pub cors_origins: Vec<String>,

    #[serde(default = "default_image_fetch_timeout")]
    pub image_fetch_timeout_secs: u64,

    #[serde(default = "default_image_max_bytes")]
    pub image_max_bytes: usize,

    /// Channel order the detection graph expects (`rgb` or `bgr`)
    #[serde(default)]
    pub detector_channel_order: ChannelOrder,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8001
}

fn default_api_prefix() -> String {
    "/api/v1".to_string()
}

fn default_models_dir() -> PathBuf {
    PathBuf::from("models")
}

fn default_cors_origins() -> Vec<String> {
    vec![
        "http://localhost:3000".to_string(),
        "http://localhost:5000".to_string(),
    ]
}

fn default_image_fetch_timeout() -> u64 {
    10
}

fn default_image_max_bytes() -> usize {
    10 * 1024 * 1024
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            api_prefix: default_api_prefix(),
            models_dir: default_models_dir(),
            soil_type_model: None,
            soil_ph_model: None,
            crop_type_model: None,
            soil_quality_model: None,
            detection_model: None,
            detection_config: None,
            labels_file: None,
            cors_origins: default_cors_origins(),
            image_fetch_timeout_secs: default_image_fetch_timeout(),
            image_max_bytes: default_image_max_bytes(),
            detector_channel_order: ChannelOrder::default(),
        }
    }
}

/// `MUNDA_*` variables; `MUNDA_CORS_ORIGINS` is a comma-separated list
fn environment() -> config::Environment {
    config::Environment::with_prefix(ENV_PREFIX)
        .try_parsing(true)
        .list_separator(",")
        .with_list_parse_key("cors_origins")
}

impl ServiceConfig {
    /// Load configuration from an optional `munda-ml` file and the environment
    pub fn load() -> Result<Self> {
        let config = config::Config::builder()
            .add_source(config::File::with_name(CONFIG_FILE).required(false))
            .add_source(environment())
            .build()
            .context("Failed to read configuration")?;
        Self::from_config(config)
    }

    fn from_config(config: config::Config) -> Result<Self> {
        let parsed: ServiceConfig = config
            .try_deserialize()
            .context("Invalid configuration")?;
        parsed.validate()?;
        Ok(parsed)
    }

    fn validate(&self) -> Result<()> {
        if !self.api_prefix.starts_with('/') || self.api_prefix.ends_with('/') {
            bail!(
                "api_prefix must start with '/' and not end with one, got {:?}",
                self.api_prefix
            );
        }
        if self.image_fetch_timeout_secs == 0 {
            bail!("image_fetch_timeout_secs must be positive");
        }
        if self.image_max_bytes == 0 {
            bail!("image_max_bytes must be positive");
        }
        for origin in &self.cors_origins {
            if !(origin.starts_with("http://") || origin.starts_with("https://")) {
                bail!("CORS origin {:?} must be an http or https origin", origin);
            }
        }
        Ok(())
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn registry_config(&self) -> RegistryConfig {
        let mut registry = RegistryConfig::with_models_dir(&self.models_dir);
        let overrides = [
            (&self.soil_type_model, &mut registry.soil_type_model),
            (&self.soil_ph_model, &mut registry.soil_ph_model),
            (&self.crop_type_model, &mut registry.crop_type_model),
            (&self.soil_quality_model, &mut registry.soil_quality_model),
            (&self.detection_model, &mut registry.detection_model),
            (&self.detection_config, &mut registry.detection_config),
            (&self.labels_file, &mut registry.labels_file),
        ];
        for (configured, target) in overrides {
            if let Some(name) = configured {
                *target = name.clone();
            }
        }
        registry
    }

    pub fn fetch_config(&self) -> FetchConfig {
        FetchConfig {
            timeout: Duration::from_secs(self.image_fetch_timeout_secs),
            max_bytes: self.image_max_bytes,
        }
    }

    pub fn detector_config(&self) -> DetectorConfig {
        DetectorConfig {
            channel_order: self.detector_channel_order,
            ..DetectorConfig::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn from_vars(vars: &[(&str, &str)]) -> Result<ServiceConfig> {
        let source: config::Map<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        let config = config::Config::builder()
            .add_source(environment().source(Some(source)))
            .build()?;
        ServiceConfig::from_config(config)
    }

    #[test]
    fn test_defaults() {
        let config = from_vars(&[]).unwrap();
        assert_eq!(config.bind_addr(), "0.0.0.0:8001");
        assert_eq!(config.api_prefix, "/api/v1");
        assert_eq!(config.cors_origins, default_cors_origins());
        assert_eq!(config.fetch_config().timeout, Duration::from_secs(10));
        assert_eq!(config.fetch_config().max_bytes, 10 * 1024 * 1024);
        assert_eq!(config.detector_config().channel_order, ChannelOrder::Rgb);

        let registry = config.registry_config();
        assert_eq!(registry.models_dir, PathBuf::from("models"));
        assert_eq!(registry.soil_type_model, "styp.onnx");
        assert_eq!(registry.labels_file, "coco.txt");
    }

    #[test]
    fn test_environment_overrides() {
        let config = from_vars(&[
            ("MUNDA_PORT", "9100"),
            ("MUNDA_MODELS_DIR", "/srv/models"),
            ("MUNDA_SOIL_PH_MODEL", "ph_v2.onnx"),
            (
                "MUNDA_CORS_ORIGINS",
                "https://app.munda.ai,http://localhost:8080",
            ),
            ("MUNDA_IMAGE_MAX_BYTES", "2048"),
            ("MUNDA_DETECTOR_CHANNEL_ORDER", "bgr"),
        ])
        .unwrap();

        assert_eq!(config.detector_config().channel_order, ChannelOrder::Bgr);
        assert_eq!(config.detector_config().input_size, 300);

        assert_eq!(config.port, 9100);
        assert_eq!(
            config.cors_origins,
            vec!["https://app.munda.ai", "http://localhost:8080"]
        );
        assert_eq!(config.fetch_config().max_bytes, 2048);

        let registry = config.registry_config();
        assert_eq!(registry.path_for(munda_ml::ModelSlot::SoilPh), PathBuf::from("/srv/models/ph_v2.onnx"));
        assert_eq!(registry.soil_type_model, "styp.onnx");
    }

    #[test]
    fn test_invalid_values_rejected() {
        assert!(from_vars(&[("MUNDA_PORT", "not-a-port")]).is_err());
        assert!(from_vars(&[("MUNDA_API_PREFIX", "api/v1")]).is_err());
        assert!(from_vars(&[("MUNDA_IMAGE_FETCH_TIMEOUT_SECS", "0")]).is_err());
        assert!(from_vars(&[("MUNDA_CORS_ORIGINS", "localhost:3000")]).is_err());
        assert!(from_vars(&[("MUNDA_DETECTOR_CHANNEL_ORDER", "rgba")]).is_err());
    }
}
