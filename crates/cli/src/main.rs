//! Munda ML CLI
//!
//! A command-line client for the Munda ML service: soil and crop
//! predictions, plant detection, and service status.

mod client;
mod commands;
mod config;
mod output;

use anyhow::Result;
use clap::{Parser, Subcommand};
use commands::{detect, predict, status};

/// Munda ML CLI
#[derive(Parser)]
#[command(name = "munda")]
#[command(author, version, about = "CLI for the Munda ML prediction service", long_about = None)]
pub struct Cli {
    /// API endpoint URL (defaults to the config file, then http://localhost:8001)
    #[arg(long, env = "MUNDA_API_URL")]
    pub api_url: Option<String>,

    /// Route prefix of the service API (defaults to the config file, then /api/v1)
    #[arg(long, env = "MUNDA_API_PREFIX")]
    pub api_prefix: Option<String>,

    /// Output format
    #[arg(long, short, default_value = "table")]
    pub format: output::OutputFormat,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Predict soil type, pH, crop and soil quality for a sensor reading
    Predict(predict::ReadingArgs),

    /// Detect plants in an image
    Detect(detect::ImageArgs),

    /// Show service health
    Health,

    /// Show loaded models
    Models,

    /// Manage CLI configuration
    #[command(subcommand)]
    Config(ConfigCommands),
}

#[derive(Subcommand)]
pub enum ConfigCommands {
    /// Show the configuration file and resolved API URL and prefix
    Show,

    /// Store the API URL in the configuration file
    SetApiUrl {
        /// API endpoint URL
        url: String,
    },

    /// Store the API route prefix in the configuration file
    SetApiPrefix {
        /// Route prefix, e.g. /api/v1
        prefix: String,
    },
}

fn run_config(
    command: ConfigCommands,
    mut file_config: config::Config,
    api_url: &str,
    api_prefix: &str,
) -> Result<()> {
    match command {
        ConfigCommands::Show => {
            output::print_info(&format!(
                "Config file: {}",
                config::Config::config_path()?.display()
            ));
            output::print_info(&format!("API URL: {}", api_url));
            output::print_info(&format!("API prefix: {}", api_prefix));
        }
        ConfigCommands::SetApiUrl { url } => {
            // Reject URLs the client could not use
            client::ApiClient::new(&url, api_prefix)?;
            file_config.api_url = Some(url);
            let path = file_config.save()?;
            output::print_success(&format!("Saved API URL to {}", path.display()));
        }
        ConfigCommands::SetApiPrefix { prefix } => {
            client::ApiClient::new(api_url, &prefix)?;
            file_config.api_prefix = Some(prefix);
            let path = file_config.save()?;
            output::print_success(&format!("Saved API prefix to {}", path.display()));
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let file_config = config::Config::load()?;
    let api_url = file_config.resolve_api_url(cli.api_url.as_deref());
    let api_prefix = file_config.resolve_api_prefix(cli.api_prefix.as_deref());
    let connect = || client::ApiClient::new(&api_url, &api_prefix);

    // Execute command
    match cli.command {
        Commands::Predict(args) => predict::predict(&connect()?, args, cli.format).await?,
        Commands::Detect(args) => detect::detect(&connect()?, args, cli.format).await?,
        Commands::Health => status::show_health(&connect()?, cli.format).await?,
        Commands::Models => status::show_models(&connect()?, cli.format).await?,
        Commands::Config(command) => run_config(command, file_config, &api_url, &api_prefix)?,
    }

    Ok(())
}
