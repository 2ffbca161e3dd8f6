//! Diagnostic entry point
//!
//! Loads configuration from the environment, warms the artifact bundle and
//! classifies the image file named on the command line, printing the ranked
//! result as JSON. The HTTP API that normally fronts the engine lives in a
//! separate service.

use mealscan_infer::{
    utils::{format_duration, init_logging},
    Config, InferenceEngine, Result, VERSION,
};
use std::time::Instant;
use tracing::{error, info};

#[tokio::main]
async fn main() -> Result<()> {
    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load configuration: {}", e);
            std::process::exit(2);
        }
    };

    init_logging(&config.logging.level, &config.logging.format)?;

    info!("mealscan-infer v{}", VERSION);
    info!("  Artifact location: {}", config.artifact.location);
    info!("  Cache directory: {:?}", config.artifact.cache_dir);
    info!("  Device preference: {}", config.model.device);

    let image_path = match std::env::args().nth(1) {
        Some(path) => path,
        None => {
            eprintln!("Usage: mealscan-infer <image-file>");
            std::process::exit(2);
        }
    };

    let engine = InferenceEngine::new(config)?;

    let start = Instant::now();
    if let Err(e) = engine.warm_up().await {
        error!("Failed to initialize artifact bundle: {}", e);
        return Err(e);
    }
    info!("Artifact bundle warmed in {}", format_duration(start.elapsed()));

    let image_bytes = std::fs::read(&image_path)?;
    match engine.predict(&image_bytes).await {
        Ok(response) => {
            println!("{}", serde_json::to_string_pretty(&response)?);
            Ok(())
        }
        Err(e) => {
            error!("Prediction failed: {}", e);
            Err(e)
        }
    }
}
