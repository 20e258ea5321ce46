//! Plant detection from images
//!
//! Images arrive as base64 payloads or URLs, are decoded and preprocessed
//! into the detector's input tensor, and handed to an [`ObjectDetector`].
//! The shipped detector is [`StubDetector`], which finds nothing: the
//! frozen detection graph is located by the registry but never executed.
//! Any acquisition or decoding failure yields an empty result.

mod acquire;
mod preprocess;

pub use acquire::{
    decode_base64, decode_image, FetchConfig, ImageFetcher, ImageSource, DEFAULT_FETCH_TIMEOUT,
    DEFAULT_MAX_IMAGE_BYTES,
};
pub use preprocess::{preprocess, ChannelOrder, DetectorConfig, DETECTOR_INPUT_SIZE};

use crate::error::{DetectionError, ImageError};
use crate::models::{DetectedObject, DetectionResult};
use crate::observability::{ServiceMetrics, StructuredLogger};
use crate::registry::ModelRegistry;
use anyhow::Result;
use std::sync::Arc;
use std::time::Instant;
use tract_onnx::prelude::tract_ndarray::Array4;
use tracing::{error, warn};

/// Detection outcome labels used in metrics and logs
pub mod outcomes {
    pub const NO_IMAGE: &str = "no_image";
    pub const ACQUISITION_FAILED: &str = "acquisition_failed";
    pub const DETECTOR_FAILED: &str = "detector_failed";
    pub const COMPLETED: &str = "completed";
}

/// Runs object detection on a preprocessed NHWC batch
pub trait ObjectDetector: Send + Sync {
    /// `labels` maps class ids to names and may be empty
    fn detect(&self, input: &Array4<f32>, labels: &[String]) -> Result<Vec<DetectedObject>>;

    /// False for detectors that never report anything
    fn runs_inference(&self) -> bool {
        true
    }
}

/// Detector that never reports any objects
#[derive(Debug, Default)]
pub struct StubDetector;

impl ObjectDetector for StubDetector {
    fn detect(&self, _input: &Array4<f32>, _labels: &[String]) -> Result<Vec<DetectedObject>> {
        warn!("Object detection inference not implemented, returning no detections");
        Ok(Vec::new())
    }

    fn runs_inference(&self) -> bool {
        false
    }
}

/// Serves plant detection requests
pub struct DetectionEngine {
    registry: Arc<ModelRegistry>,
    fetcher: ImageFetcher,
    detector: Arc<dyn ObjectDetector>,
    config: DetectorConfig,
    metrics: ServiceMetrics,
    logger: StructuredLogger,
}

impl DetectionEngine {
    pub fn new(
        registry: Arc<ModelRegistry>,
        fetch_config: FetchConfig,
        metrics: ServiceMetrics,
        logger: StructuredLogger,
    ) -> Result<Self> {
        Ok(Self {
            registry,
            fetcher: ImageFetcher::new(fetch_config)?,
            detector: Arc::new(StubDetector),
            config: DetectorConfig::default(),
            metrics,
            logger,
        })
    }

    pub fn with_detector(mut self, detector: Arc<dyn ObjectDetector>) -> Self {
        self.detector = detector;
        self
    }

    pub fn with_config(mut self, config: DetectorConfig) -> Self {
        self.config = config;
        self
    }

    pub fn registry(&self) -> &ModelRegistry {
        &self.registry
    }

    pub fn runs_inference(&self) -> bool {
        self.detector.runs_inference()
    }

    /// Detect plants in the given image.
    ///
    /// Missing or unusable images produce an empty result. `Err` is
    /// reserved for an aborted preprocessing task.
    pub async fn detect_plants(
        &self,
        image_base64: Option<&str>,
        image_url: Option<&str>,
    ) -> Result<DetectionResult, DetectionError> {
        let Some(source) = ImageSource::select(image_base64, image_url) else {
            return Ok(self.finish(outcomes::NO_IMAGE, DetectionResult::empty()));
        };

        let bytes = match self.acquire(source).await {
            Ok(bytes) => bytes,
            Err(e) => {
                error!(error = %e, "Error loading image");
                return Ok(self.finish(outcomes::ACQUISITION_FAILED, DetectionResult::empty()));
            }
        };

        let registry = self.registry.clone();
        let detector = self.detector.clone();
        let config = self.config.clone();
        let outcome = tokio::task::spawn_blocking(move || -> Result<Result<Vec<DetectedObject>>, ImageError> {
            let image = decode_image(&bytes)?;
            let input = preprocess(&image, &config);
            let labels = registry.labels().unwrap_or(&[]);
            Ok(detector.detect(&input, labels))
        })
        .await
        .map_err(|e| DetectionError::TaskAborted(e.to_string()))?;

        let result = match outcome {
            Err(e) => {
                error!(error = %e, "Error decoding image");
                self.finish(outcomes::ACQUISITION_FAILED, DetectionResult::empty())
            }
            Ok(Err(e)) => {
                error!(error = %format!("{:#}", e), "Object detection failed");
                self.finish(outcomes::DETECTOR_FAILED, DetectionResult::empty())
            }
            Ok(Ok(objects)) => self.finish(outcomes::COMPLETED, DetectionResult::new(objects)),
        };
        Ok(result)
    }

    async fn acquire(&self, source: ImageSource<'_>) -> Result<Vec<u8>, ImageError> {
        match source {
            ImageSource::Base64(payload) => decode_base64(payload),
            ImageSource::Url(url) => {
                let start = Instant::now();
                let fetched = self.fetcher.fetch(url).await;
                self.metrics
                    .observe_image_fetch_latency(start.elapsed().as_secs_f64());
                fetched
            }
        }
    }

    fn finish(&self, outcome: &str, result: DetectionResult) -> DetectionResult {
        self.metrics.inc_detections(outcome);
        self.logger.log_detection(outcome, result.count());
        result
    }
}
