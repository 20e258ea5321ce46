//! Service health and model inventory commands

use anyhow::Result;
use serde::Serialize;
use tabled::Tabled;

use crate::client::{ApiClient, HealthReport, ModelInventory, ServiceHealth};
use crate::output::{
    color_status, format_bytes, print_info, print_json, print_rows, print_success, print_warning,
    short_digest, OutputFormat,
};

/// Row for component health table
#[derive(Tabled)]
struct ComponentRow {
    #[tabled(rename = "Component")]
    name: String,
    #[tabled(rename = "Status")]
    status: String,
    #[tabled(rename = "Message")]
    message: String,
}

/// Row for models table
#[derive(Tabled)]
struct ModelRow {
    #[tabled(rename = "Slot")]
    slot: String,
    #[tabled(rename = "Status")]
    status: String,
    #[tabled(rename = "Confidence")]
    confidence: String,
    #[tabled(rename = "Size")]
    size: String,
    #[tabled(rename = "SHA256")]
    sha256: String,
    #[tabled(rename = "Path")]
    path: String,
}

#[derive(Serialize)]
struct HealthOutput {
    service: ServiceHealth,
    components: HealthReport,
}

/// Show the service health contract and per-component health
pub async fn show_health(client: &ApiClient, format: OutputFormat) -> Result<()> {
    let (service, components) =
        tokio::try_join!(client.service_health(), client.component_health())?;

    match format {
        OutputFormat::Json => print_json(&HealthOutput {
            service,
            components,
        })?,
        OutputFormat::Table => {
            let headline = format!("{} is {}", service.service, color_status(&components.status));
            match components.status.as_str() {
                "healthy" => print_success(&headline),
                _ => print_warning(&headline),
            }

            let rows: Vec<ComponentRow> = components
                .components
                .iter()
                .map(|(name, health)| ComponentRow {
                    name: name.clone(),
                    status: color_status(&health.status),
                    message: health.message.clone().unwrap_or_default(),
                })
                .collect();
            print_rows(rows);
        }
    }

    Ok(())
}

fn model_rows(inventory: &ModelInventory) -> Vec<ModelRow> {
    inventory
        .models
        .iter()
        .map(|m| {
            let (size, sha256, path) = match &m.info {
                Some(info) => (
                    format_bytes(info.size_bytes),
                    short_digest(&info.sha256),
                    info.path.clone(),
                ),
                None => (String::new(), String::new(), String::new()),
            };
            ModelRow {
                slot: m.slot.clone(),
                status: color_status(if m.loaded { "loaded" } else { "missing" }),
                confidence: if m.supports_confidence { "yes" } else { "no" }.to_string(),
                size,
                sha256,
                path,
            }
        })
        .collect()
}

/// Show which models the service loaded
pub async fn show_models(client: &ApiClient, format: OutputFormat) -> Result<()> {
    let inventory = client.models().await?;

    match format {
        OutputFormat::Json => print_json(&inventory)?,
        OutputFormat::Table => {
            print_rows(model_rows(&inventory));

            match &inventory.detection.model_path {
                Some(path) => print_info(&format!(
                    "Detection graph: {} ({} labels)",
                    path, inventory.label_count
                )),
                None => print_warning("Detection graph not found"),
            }

            let missing = inventory.models.iter().filter(|m| !m.loaded).count();
            if missing > 0 {
                print_warning(&format!("{} model(s) missing, serving fallbacks", missing));
            }
        }
    }

    Ok(())
}
