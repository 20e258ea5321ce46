//! Image acquisition from inline base64 payloads or remote URLs

use crate::error::ImageError;
use anyhow::{Context, Result};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use image::DynamicImage;
use reqwest::Client;
use std::time::Duration;
use url::Url;

/// Default timeout for remote image retrieval
pub const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(10);

/// Default cap on remote image size (10 MiB)
pub const DEFAULT_MAX_IMAGE_BYTES: usize = 10 * 1024 * 1024;

/// Limits for remote image retrieval
#[derive(Debug, Clone)]
pub struct FetchConfig {
    pub timeout: Duration,
    pub max_bytes: usize,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_FETCH_TIMEOUT,
            max_bytes: DEFAULT_MAX_IMAGE_BYTES,
        }
    }
}

/// Where a detection request's image comes from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageSource<'a> {
    Base64(&'a str),
    Url(&'a str),
}

impl<'a> ImageSource<'a> {
    /// A non-empty base64 payload wins over the URL
    pub fn select(image_base64: Option<&'a str>, image_url: Option<&'a str>) -> Option<Self> {
        let image_base64 = image_base64.filter(|s| !s.trim().is_empty());
        let image_url = image_url.filter(|s| !s.trim().is_empty());
        match (image_base64, image_url) {
            (Some(payload), _) => Some(ImageSource::Base64(payload)),
            (None, Some(url)) => Some(ImageSource::Url(url)),
            (None, None) => None,
        }
    }
}

/// HTTP client for remote images with a timeout and body size cap
pub struct ImageFetcher {
    client: Client,
    max_bytes: usize,
}

impl ImageFetcher {
    pub fn new(config: FetchConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .context("Failed to create HTTP client")?;
        Ok(Self {
            client,
            max_bytes: config.max_bytes,
        })
    }

    /// Download image bytes, enforcing the size cap while streaming
    pub async fn fetch(&self, raw_url: &str) -> Result<Vec<u8>, ImageError> {
        let url = Url::parse(raw_url.trim())
            .map_err(|e| ImageError::UnsupportedUrl(format!("{}: {}", raw_url, e)))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(ImageError::UnsupportedUrl(format!(
                "{}: scheme {} is not allowed",
                raw_url,
                url.scheme()
            )));
        }

        let mut response = self.client.get(url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(ImageError::HttpStatus(status.as_u16()));
        }

        let limit = self.max_bytes;
        if response.content_length().is_some_and(|len| len > limit as u64) {
            return Err(ImageError::TooLarge { limit });
        }

        let mut body = Vec::new();
        while let Some(chunk) = response.chunk().await? {
            if body.len() + chunk.len() > limit {
                return Err(ImageError::TooLarge { limit });
            }
            body.extend_from_slice(&chunk);
        }
        Ok(body)
    }
}

/// Decode a standard base64 payload, ignoring embedded whitespace
pub fn decode_base64(payload: &str) -> Result<Vec<u8>, ImageError> {
    let compact: String = payload.chars().filter(|c| !c.is_ascii_whitespace()).collect();
    Ok(STANDARD.decode(compact)?)
}

/// Decode encoded image bytes (PNG, JPEG, ...) into pixels
pub fn decode_image(bytes: &[u8]) -> Result<DynamicImage, ImageError> {
    Ok(image::load_from_memory(bytes)?)
}
