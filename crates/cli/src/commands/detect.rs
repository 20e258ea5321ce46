//! Plant detection command

use anyhow::{Context, Result};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use clap::Args;
use std::path::PathBuf;
use tabled::Tabled;

use crate::client::{ApiClient, DetectionRequest};
use crate::output::{format_confidence, print_json, print_rows, print_warning, OutputFormat};

/// Image to run detection on
#[derive(Args, Debug)]
#[group(required = true, multiple = false)]
pub struct ImageArgs {
    /// Local image file, uploaded base64-encoded
    #[arg(long, value_name = "FILE")]
    pub image: Option<PathBuf>,

    /// Image URL for the service to fetch
    #[arg(long)]
    pub url: Option<String>,
}

impl ImageArgs {
    pub fn into_request(self) -> Result<DetectionRequest> {
        let image_base64 = match &self.image {
            Some(path) => {
                let bytes = std::fs::read(path)
                    .with_context(|| format!("Failed to read {}", path.display()))?;
                Some(STANDARD.encode(bytes))
            }
            None => None,
        };

        Ok(DetectionRequest {
            image_base64,
            image_url: self.url,
        })
    }
}

/// Row for detections table
#[derive(Tabled)]
struct DetectionRow {
    #[tabled(rename = "Class")]
    class_name: String,
    #[tabled(rename = "Confidence")]
    confidence: String,
    #[tabled(rename = "Box (x, y, w, h)")]
    bbox: String,
}

pub async fn detect(client: &ApiClient, args: ImageArgs, format: OutputFormat) -> Result<()> {
    let request = args.into_request()?;
    let result = client.detect_plants(&request).await?;

    match format {
        OutputFormat::Json => print_json(&result)?,
        OutputFormat::Table => {
            if result.detected_plants.is_empty() {
                print_warning("No plants detected");
                return Ok(());
            }

            let rows: Vec<DetectionRow> = result
                .detected_plants
                .iter()
                .map(|p| DetectionRow {
                    class_name: p.class_name.clone(),
                    confidence: format_confidence(p.confidence as f64),
                    bbox: format!(
                        "{:.0}, {:.0}, {:.0}, {:.0}",
                        p.bbox[0], p.bbox[1], p.bbox[2], p.bbox[3]
                    ),
                })
                .collect();
            print_rows(rows);
            println!("\nTotal: {} plants", result.count);
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    #[test]
    fn test_local_image_is_base64_encoded() {
        let file = NamedTempFile::new().unwrap();
        std::fs::write(file.path(), b"\x89PNG fake").unwrap();

        let request = ImageArgs {
            image: Some(file.path().to_path_buf()),
            url: None,
        }
        .into_request()
        .unwrap();

        assert_eq!(request.image_base64.as_deref(), Some("iVBORyBmYWtl"));
        assert!(request.image_url.is_none());
    }

    #[test]
    fn test_url_passed_through() {
        let request = ImageArgs {
            image: None,
            url: Some("https://farm.example/field.jpg".to_string()),
        }
        .into_request()
        .unwrap();

        assert!(request.image_base64.is_none());
        assert_eq!(request.image_url.as_deref(), Some("https://farm.example/field.jpg"));
    }

    #[test]
    fn test_missing_file_is_error() {
        let result = ImageArgs {
            image: Some(PathBuf::from("/nonexistent/leaf.png")),
            url: None,
        }
        .into_request();
        assert!(result.is_err());
    }
}
