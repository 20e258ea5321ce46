//! Soil and crop prediction command

use anyhow::{Context, Result};
use clap::Args;
use std::path::{Path, PathBuf};
use tabled::Tabled;

use crate::client::{ApiClient, SensorReading, SoilReport};
use crate::output::{color_confidence, color_quality, print_json, print_rows, OutputFormat};

/// Sensor reading given as flags or as a JSON file
#[derive(Args, Debug)]
pub struct ReadingArgs {
    /// Nitrogen level (0-100)
    #[arg(long, required_unless_present = "from_file")]
    pub nitrogen: Option<f64>,

    /// Phosphorus level (0-100)
    #[arg(long, required_unless_present = "from_file")]
    pub phosphorus: Option<f64>,

    /// Potassium level (0-100)
    #[arg(long, required_unless_present = "from_file")]
    pub potassium: Option<f64>,

    /// Soil moisture percentage (0-100)
    #[arg(long, required_unless_present = "from_file")]
    pub moisture: Option<f64>,

    /// Relative humidity percentage (0-100)
    #[arg(long, required_unless_present = "from_file")]
    pub humidity: Option<f64>,

    /// Air temperature in °C (-20 to 50)
    #[arg(long, required_unless_present = "from_file", allow_hyphen_values = true)]
    pub temperature: Option<f64>,

    /// Expected crop yield
    #[arg(long)]
    pub yield_estimate: Option<f64>,

    /// Read the reading from a JSON file instead of flags
    #[arg(
        long,
        value_name = "FILE",
        conflicts_with_all = ["nitrogen", "phosphorus", "potassium", "moisture", "humidity", "temperature", "yield_estimate"]
    )]
    pub from_file: Option<PathBuf>,
}

impl ReadingArgs {
    pub fn into_reading(self) -> Result<SensorReading> {
        if let Some(path) = &self.from_file {
            return read_reading(path);
        }

        Ok(SensorReading {
            npk_n: self.nitrogen.context("--nitrogen is required")?,
            npk_p: self.phosphorus.context("--phosphorus is required")?,
            npk_k: self.potassium.context("--potassium is required")?,
            soil_moisture: self.moisture.context("--moisture is required")?,
            humidity: self.humidity.context("--humidity is required")?,
            temperature: self.temperature.context("--temperature is required")?,
            crop_yield_estimate: self.yield_estimate,
        })
    }
}

fn read_reading(path: &Path) -> Result<SensorReading> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    serde_json::from_str(&content)
        .with_context(|| format!("{} is not a valid sensor reading", path.display()))
}

/// Row for the prediction summary table
#[derive(Tabled)]
struct PredictionRow {
    #[tabled(rename = "Prediction")]
    prediction: &'static str,
    #[tabled(rename = "Value")]
    value: String,
    #[tabled(rename = "Detail")]
    detail: String,
}

fn summary_rows(report: &SoilReport) -> Vec<PredictionRow> {
    vec![
        PredictionRow {
            prediction: "Soil type",
            value: report.soil_type.soil_type.clone(),
            detail: color_confidence(report.soil_type.confidence),
        },
        PredictionRow {
            prediction: "Soil pH",
            value: format!("{:.2}", report.soil_ph.soil_ph),
            detail: report.soil_ph.ph_category.clone(),
        },
        PredictionRow {
            prediction: "Crop",
            value: report.crop_type.crop_type.clone(),
            detail: color_confidence(report.crop_type.confidence),
        },
        PredictionRow {
            prediction: "Soil quality",
            value: format!("{:.2}", report.soil_quality.soil_quality_score),
            detail: color_quality(&report.soil_quality.quality_category),
        },
    ]
}

/// Run all four predictions for one reading
pub async fn predict(client: &ApiClient, args: ReadingArgs, format: OutputFormat) -> Result<()> {
    let reading = args.into_reading()?;
    let report = client.predict_all(&reading).await?;

    match format {
        OutputFormat::Json => print_json(&report)?,
        OutputFormat::Table => {
            print_rows(summary_rows(&report));
            if let Some(url) = &report.crop_type.image_url {
                println!("\nCrop image: {}", url);
            }
        }
    }

    Ok(())
}
