//! API client for the Munda ML service

use anyhow::{Context, Result};
use reqwest::{Client, Response};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::collections::BTreeMap;
use url::Url;

/// API client for the ML service
pub struct ApiClient {
    client: Client,
    base_url: Url,
    /// Base URL plus the service's API prefix, always ending in '/'
    api_url: Url,
}

impl ApiClient {
    /// Create a client for a service whose prediction routes live under `api_prefix`
    pub fn new(base_url: &str, api_prefix: &str) -> Result<Self> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .context("Failed to create HTTP client")?;

        let mut base_url = Url::parse(base_url).context("Invalid API URL")?;
        // Relative joins replace the last segment unless the base ends with '/'
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }

        let prefix = api_prefix.trim_matches('/');
        let api_url = if prefix.is_empty() {
            base_url.clone()
        } else {
            base_url
                .join(&format!("{}/", prefix))
                .context("Invalid API prefix")?
        };

        Ok(Self {
            client,
            base_url,
            api_url,
        })
    }

    /// URL of a route outside the API prefix, such as `healthz`
    fn url(&self, path: &str) -> Result<Url> {
        self.base_url.join(path).context("Invalid path")
    }

    /// URL of a route under the API prefix
    fn api_url(&self, path: &str) -> Result<Url> {
        self.api_url.join(path).context("Invalid path")
    }

    /// GET a route under the API prefix
    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let response = self
            .client
            .get(self.api_url(path)?)
            .send()
            .await
            .context("Failed to send request")?;

        parse(response).await
    }

    /// POST a JSON body to a route under the API prefix
    pub async fn post<T: DeserializeOwned, B: Serialize>(&self, path: &str, body: &B) -> Result<T> {
        let response = self
            .client
            .post(self.api_url(path)?)
            .json(body)
            .send()
            .await
            .context("Failed to send request")?;

        parse(response).await
    }

    pub async fn predict_soil_type(&self, reading: &SensorReading) -> Result<SoilTypeResult> {
        self.post("predict/soil-type", reading).await
    }

    pub async fn predict_soil_ph(&self, reading: &SensorReading) -> Result<SoilPhResult> {
        self.post("predict/soil-ph", reading).await
    }

    pub async fn predict_crop_type(&self, reading: &SensorReading) -> Result<CropTypeResult> {
        self.post("predict/crop-type", reading).await
    }

    pub async fn predict_soil_quality(&self, reading: &SensorReading) -> Result<SoilQualityResult> {
        self.post("predict/soil-quality", reading).await
    }

    /// Run all four predictions concurrently
    pub async fn predict_all(&self, reading: &SensorReading) -> Result<SoilReport> {
        let (soil_type, soil_ph, crop_type, soil_quality) = tokio::try_join!(
            self.predict_soil_type(reading),
            self.predict_soil_ph(reading),
            self.predict_crop_type(reading),
            self.predict_soil_quality(reading),
        )?;

        Ok(SoilReport {
            soil_type,
            soil_ph,
            crop_type,
            soil_quality,
        })
    }

    pub async fn detect_plants(&self, request: &DetectionRequest) -> Result<DetectionResult> {
        self.post("detect-plant", request).await
    }

    pub async fn service_health(&self) -> Result<ServiceHealth> {
        self.get("health").await
    }

    /// Component health; a 503 still carries the report
    pub async fn component_health(&self) -> Result<HealthReport> {
        let response = self
            .client
            .get(self.url("healthz")?)
            .send()
            .await
            .context("Failed to send request")?;

        if response.status() == reqwest::StatusCode::SERVICE_UNAVAILABLE {
            return response.json().await.context("Failed to parse response");
        }
        parse(response).await
    }

    pub async fn models(&self) -> Result<ModelInventory> {
        self.get("models").await
    }
}

async fn parse<T: DeserializeOwned>(response: Response) -> Result<T> {
    if !response.status().is_success() {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        anyhow::bail!("API error ({}): {}", status, error_detail(&body));
    }

    response.json().await.context("Failed to parse response")
}

/// Pull the `detail` field out of an error body, if there is one
fn error_detail(body: &str) -> String {
    match serde_json::from_str::<ErrorResponse>(body) {
        Ok(ErrorResponse {
            detail: serde_json::Value::String(message),
        }) => message,
        Ok(ErrorResponse {
            detail: serde_json::Value::Array(violations),
        }) => violations
            .iter()
            .map(|v| {
                format!(
                    "{} {}",
                    v["field"].as_str().unwrap_or("?"),
                    v["message"].as_str().unwrap_or("is invalid")
                )
            })
            .collect::<Vec<_>>()
            .join("; "),
        _ => body.to_string(),
    }
}

// API request and response types

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensorReading {
    pub npk_n: f64,
    pub npk_p: f64,
    pub npk_k: f64,
    pub soil_moisture: f64,
    pub humidity: f64,
    pub temperature: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub crop_yield_estimate: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SoilTypeResult {
    pub soil_type: String,
    pub confidence: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SoilPhResult {
    pub soil_ph: f64,
    pub ph_category: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CropTypeResult {
    pub crop_type: String,
    pub confidence: Option<f64>,
    pub image_url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SoilQualityResult {
    pub soil_quality_score: f64,
    pub quality_category: String,
}

/// All four predictions for one reading
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SoilReport {
    pub soil_type: SoilTypeResult,
    pub soil_ph: SoilPhResult,
    pub crop_type: CropTypeResult,
    pub soil_quality: SoilQualityResult,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DetectionRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_base64: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectedPlant {
    pub class_name: String,
    pub confidence: f32,
    /// `[x, y, width, height]`
    pub bbox: [f32; 4],
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectionResult {
    pub detected_plants: Vec<DetectedPlant>,
    pub count: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceHealth {
    pub status: String,
    pub service: String,
    pub models_loaded: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentHealth {
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub last_check_timestamp: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthReport {
    pub status: String,
    pub components: BTreeMap<String, ComponentHealth>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelInfo {
    pub path: String,
    pub size_bytes: u64,
    pub sha256: String,
    pub loaded_at: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SlotStatus {
    pub slot: String,
    pub loaded: bool,
    pub supports_confidence: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub info: Option<ModelInfo>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectionAssets {
    pub model_path: Option<String>,
    pub config_path: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelInventory {
    pub models: Vec<SlotStatus>,
    pub detection: DetectionAssets,
    pub label_count: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub detail: serde_json::Value,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DEFAULT_API_PREFIX;
    use mockito::Matcher;
    use serde_json::json;

    fn reading() -> SensorReading {
        SensorReading {
            npk_n: 40.0,
            npk_p: 30.0,
            npk_k: 20.0,
            soil_moisture: 50.0,
            humidity: 60.0,
            temperature: 25.0,
            crop_yield_estimate: None,
        }
    }

    #[test]
    fn test_base_url_keeps_path_prefix() {
        let client = ApiClient::new("http://ml.internal:8001/munda", "/api/v1").unwrap();
        assert_eq!(
            client.api_url("health").unwrap().as_str(),
            "http://ml.internal:8001/munda/api/v1/health"
        );
        assert_eq!(
            client.url("healthz").unwrap().as_str(),
            "http://ml.internal:8001/munda/healthz"
        );
    }

    #[test]
    fn test_custom_api_prefix() {
        let client = ApiClient::new("http://ml.internal:8001", "/ml/v2/").unwrap();
        assert_eq!(
            client.api_url("predict/soil-ph").unwrap().as_str(),
            "http://ml.internal:8001/ml/v2/predict/soil-ph"
        );

        let client = ApiClient::new("http://ml.internal:8001", "").unwrap();
        assert_eq!(
            client.api_url("models").unwrap().as_str(),
            "http://ml.internal:8001/models"
        );
    }

    #[tokio::test]
    async fn test_requests_use_configured_prefix() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/ml/v2/health")
            .with_body(r#"{"status":"healthy","service":"ML Service","models_loaded":true}"#)
            .create_async()
            .await;

        let client = ApiClient::new(&server.url(), "/ml/v2").unwrap();
        let health = client.service_health().await.unwrap();

        mock.assert_async().await;
        assert_eq!(health.status, "healthy");
    }

    #[test]
    fn test_error_detail_formats() {
        assert_eq!(
            error_detail(r#"{"detail":"Error predicting soil pH: task panicked"}"#),
            "Error predicting soil pH: task panicked"
        );
        assert_eq!(
            error_detail(r#"{"detail":[{"field":"npk_n","message":"must be between 0 and 100, got 120"}]}"#),
            "npk_n must be between 0 and 100, got 120"
        );
        assert_eq!(error_detail("Bad Gateway"), "Bad Gateway");
    }

    #[tokio::test]
    async fn test_predict_all_issues_four_requests() {
        let mut server = mockito::Server::new_async().await;
        let body = Matcher::PartialJson(json!({ "npk_n": 40.0, "temperature": 25.0 }));

        let soil_type = server
            .mock("POST", "/api/v1/predict/soil-type")
            .match_body(body.clone())
            .with_body(r#"{"soil_type":"Clay","confidence":0.8}"#)
            .create_async()
            .await;
        let soil_ph = server
            .mock("POST", "/api/v1/predict/soil-ph")
            .match_body(body.clone())
            .with_body(r#"{"soil_ph":6.5,"ph_category":"neutral"}"#)
            .create_async()
            .await;
        let crop_type = server
            .mock("POST", "/api/v1/predict/crop-type")
            .match_body(body.clone())
            .with_body(r#"{"crop_type":"Maize","confidence":null,"image_url":"https://images.example.com/crops/maize.jpg"}"#)
            .create_async()
            .await;
        let soil_quality = server
            .mock("POST", "/api/v1/predict/soil-quality")
            .match_body(body)
            .with_body(r#"{"soil_quality_score":36.0,"quality_category":"fair"}"#)
            .create_async()
            .await;

        let client = ApiClient::new(&server.url(), DEFAULT_API_PREFIX).unwrap();
        let report = client.predict_all(&reading()).await.unwrap();

        soil_type.assert_async().await;
        soil_ph.assert_async().await;
        crop_type.assert_async().await;
        soil_quality.assert_async().await;
        assert_eq!(report.soil_type.soil_type, "Clay");
        assert_eq!(report.soil_ph.ph_category, "neutral");
        assert_eq!(report.crop_type.confidence, None);
        assert_eq!(report.soil_quality.quality_category, "fair");
    }

    #[tokio::test]
    async fn test_validation_error_surfaces_detail() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/api/v1/predict/soil-type")
            .with_status(422)
            .with_body(r#"{"detail":[{"field":"humidity","message":"must be between 0 and 100, got 140"}]}"#)
            .create_async()
            .await;

        let client = ApiClient::new(&server.url(), DEFAULT_API_PREFIX).unwrap();
        let err = client.predict_soil_type(&reading()).await.unwrap_err();
        let message = err.to_string();
        assert!(message.contains("422"));
        assert!(message.contains("humidity must be between 0 and 100"));
    }

    #[tokio::test]
    async fn test_component_health_accepts_unavailable() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/healthz")
            .with_status(503)
            .with_body(
                json!({
                    "status": "unhealthy",
                    "components": {
                        "prediction_engine": {
                            "status": "unhealthy",
                            "message": "every loaded model is failing: soil_ph (3 consecutive failures)",
                            "last_check_timestamp": 1700000000
                        }
                    }
                })
                .to_string(),
            )
            .create_async()
            .await;

        let client = ApiClient::new(&server.url(), DEFAULT_API_PREFIX).unwrap();
        let report = client.component_health().await.unwrap();
        assert_eq!(report.status, "unhealthy");
        assert_eq!(
            report.components["prediction_engine"].message.as_deref(),
            Some("every loaded model is failing: soil_ph (3 consecutive failures)")
        );
    }

    #[tokio::test]
    async fn test_detection_request_omits_absent_fields() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/api/v1/detect-plant")
            .match_body(Matcher::Json(json!({ "image_url": "https://farm.example/field.jpg" })))
            .with_body(r#"{"detected_plants":[],"count":0}"#)
            .create_async()
            .await;

        let client = ApiClient::new(&server.url(), DEFAULT_API_PREFIX).unwrap();
        let result = client
            .detect_plants(&DetectionRequest {
                image_base64: None,
                image_url: Some("https://farm.example/field.jpg".to_string()),
            })
            .await
            .unwrap();

        mock.assert_async().await;
        assert_eq!(result.count, 0);
        assert!(result.detected_plants.is_empty());
    }
}
