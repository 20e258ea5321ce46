//! Error types for the ML service

use serde::Serialize;
use thiserror::Error;

/// A single out-of-bounds or malformed field in a request payload
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FieldViolation {
    pub field: &'static str,
    pub message: String,
}

impl FieldViolation {
    pub fn new(field: &'static str, message: impl Into<String>) -> Self {
        Self {
            field,
            message: message.into(),
        }
    }
}

/// Request payload failed boundary validation
#[derive(Debug, Clone, Error)]
#[error("invalid sensor reading: {}", summarize(.violations))]
pub struct ValidationError {
    pub violations: Vec<FieldViolation>,
}

fn summarize(violations: &[FieldViolation]) -> String {
    violations
        .iter()
        .map(|v| format!("{} {}", v.field, v.message))
        .collect::<Vec<_>>()
        .join("; ")
}

/// Failure to obtain a decodable image
#[derive(Debug, Error)]
pub enum ImageError {
    /// Payload is not valid base64
    #[error("invalid base64 payload: {0}")]
    InvalidBase64(#[from] base64::DecodeError),

    /// Bytes could not be decoded as an image
    #[error("undecodable image: {0}")]
    Decode(#[from] image::ImageError),

    /// URL is malformed or not http(s)
    #[error("unsupported image URL: {0}")]
    UnsupportedUrl(String),

    /// Remote server answered with a non-success status
    #[error("image fetch returned status {0}")]
    HttpStatus(u16),

    /// Body exceeded the configured size cap
    #[error("image exceeds {limit} bytes")]
    TooLarge { limit: usize },

    /// Transport failure, including timeouts
    #[error("image fetch failed: {0}")]
    Fetch(#[from] reqwest::Error),
}

/// Detection failed for a reason other than image acquisition
#[derive(Debug, Error)]
pub enum DetectionError {
    /// The preprocessing task panicked or was cancelled
    #[error("preprocessing task aborted: {0}")]
    TaskAborted(String),
}
