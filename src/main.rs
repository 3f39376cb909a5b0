//! sensorhub - sensor orchestration over a GPIO request/response bus
//!
//! This is the binary entry point. All logic lives in the library.

use std::path::PathBuf;

use clap::Parser;
use sensorhub_app::config::{default_config_path, init_config, load_settings};

/// sensorhub - sensor orchestration over a GPIO request/response bus
#[derive(Parser, Debug)]
#[command(name = "sensorhub")]
#[command(about = "Sensor orchestration speaking NDJSON on stdin/stdout", long_about = None)]
struct Args {
    /// Path to the settings file
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Write a default settings file and exit
    #[arg(long)]
    init_config: bool,
}

#[tokio::main]
async fn main() -> color_eyre::Result<()> {
    color_eyre::install()?;
    let args = Args::parse();

    // stdout is the bus, logs go to file only
    sensorhub_core::logging::init()?;

    let config_path = args.config.unwrap_or_else(default_config_path);
    if args.init_config {
        init_config(&config_path)?;
        eprintln!("Settings written to {}", config_path.display());
        return Ok(());
    }

    let settings = load_settings(&config_path);
    sensorhub::bridge::run(settings).await?;
    Ok(())
}
