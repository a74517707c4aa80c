use anyhow::{Context, bail};
use clap::{Parser, Subcommand};
use inquire::{CustomType, Password, PasswordDisplayMode};
use marine_core::{Config, ForecastPipeline, PipelineError, ProviderId};
use tracing::{debug, info};

use crate::output;

/// Top-level CLI struct.
#[derive(Debug, Parser)]
#[command(name = "marine", version, about = "Multi-provider marine forecast CLI")]
pub struct Cli {
    /// Enable debug logging (overridden by RUST_LOG).
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Configure credentials and weight for a specific provider.
    Configure {
        /// Provider short name, e.g. "stormglass", "weatherapi" or "openmeteo".
        provider: String,
    },

    /// List known providers and whether they are usable.
    Providers,

    /// Fetch, merge and print the forecast for a location.
    Forecast {
        /// Latitude in decimal degrees.
        #[arg(long, allow_hyphen_values = true)]
        lat: f64,

        /// Longitude in decimal degrees.
        #[arg(long, allow_hyphen_values = true)]
        lon: f64,

        /// Location identifier used as the row key in JSON output.
        #[arg(long)]
        spot: Option<String>,

        /// Print storage rows as JSON instead of a table.
        #[arg(long)]
        json: bool,
    },
}

impl Cli {
    pub async fn run(self) -> anyhow::Result<()> {
        match self.command {
            Command::Configure { provider } => configure(&provider),
            Command::Providers => list_providers(),
            Command::Forecast {
                lat,
                lon,
                spot,
                json,
            } => forecast(lat, lon, spot, json).await,
        }
    }
}

fn load_config() -> anyhow::Result<Config> {
    let mut config = Config::load()?;
    config.apply_env();
    Ok(config)
}

fn configure(provider: &str) -> anyhow::Result<()> {
    let id = ProviderId::try_from(provider)?;
    // Only what is on disk gets saved back; environment overrides stay out.
    let mut config = Config::load()?;

    if id.requires_api_key() {
        let key = Password::new(&format!("{id} API key:"))
            .with_display_mode(PasswordDisplayMode::Masked)
            .without_confirmation()
            .prompt()
            .context("Failed to read API key")?;
        config.upsert_provider_api_key(id, key.trim().to_string());
    }

    let weight = CustomType::<f64>::new(&format!("{id} confidence weight:"))
        .with_default(config.provider_weight(id)?)
        .with_error_message("Please enter a positive number")
        .prompt()
        .context("Failed to read weight")?;
    config.set_provider_weight(id, weight)?;

    config.save()?;
    println!(
        "Saved {id} settings to {}",
        Config::config_file_path()?.display()
    );
    Ok(())
}

fn list_providers() -> anyhow::Result<()> {
    let config = load_config()?;
    let enabled = config.enabled_provider_ids().unwrap_or_default();

    for id in ProviderId::all() {
        let status = if enabled.contains(id) {
            "enabled"
        } else if config.is_provider_usable(*id) {
            "available"
        } else {
            "missing API key"
        };
        let weight = config.provider_weight(*id)?;
        println!("{:<12} weight {:>4.1}  {status}", id.as_str(), weight);
    }
    Ok(())
}

async fn forecast(lat: f64, lon: f64, spot: Option<String>, json: bool) -> anyhow::Result<()> {
    if !(-90.0..=90.0).contains(&lat) {
        bail!("Latitude {lat} is out of range (-90..=90)");
    }
    if !(-180.0..=180.0).contains(&lon) {
        bail!("Longitude {lon} is out of range (-180..=180)");
    }

    let config = load_config()?;
    let pipeline = ForecastPipeline::from_config(&config)?;
    debug!(providers = ?pipeline.provider_names(), lat, lon, "Running forecast pipeline");

    let result = tokio::select! {
        result = pipeline.fetch_and_merge(lat, lon) => result,
        _ = tokio::signal::ctrl_c() => {
            bail!("Interrupted; outstanding provider requests were cancelled");
        }
    };

    let merged = match result {
        Ok(merged) => merged,
        Err(PipelineError::AllProvidersFailed { dropped }) => {
            for d in &dropped {
                eprintln!("warning: {} failed: {}", d.name, d.reason);
            }
            bail!("Weather data unavailable for ({lat}, {lon})");
        }
        Err(err) => return Err(err.into()),
    };

    info!(
        samples = merged.samples.len(),
        partial = merged.is_partial(),
        "Forecast merged"
    );
    for d in &merged.dropped_providers {
        eprintln!("warning: {} dropped: {}", d.name, d.reason);
    }

    if json {
        let spot_id = spot.unwrap_or_else(|| format!("{lat},{lon}"));
        println!("{}", serde_json::to_string_pretty(&merged.rows(&spot_id))?);
    } else if merged.samples.is_empty() {
        println!("No forecast data available for ({lat}, {lon}).");
    } else {
        print!("{}", output::render_table(&merged.samples));
    }

    Ok(())
}
