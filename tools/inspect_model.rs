//! Model Inspection Tool
//!
//! Loads the classifier and labels the same way the server does and prints
//! what was found. Useful for checking a new export before deploying it.

use anyhow::Result;
use thai_food_classifier::config::{AppConfig, DEFAULT_CONFIG_PATH};
use thai_food_classifier::models::loader::{self, ModelLoader};
use tracing::{error, info};

fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("inspect_model=info".parse()?)
                .add_directive("thai_food_classifier=info".parse()?),
        )
        .init();

    // Parse arguments
    let args: Vec<String> = std::env::args().collect();
    let config_path = args.get(1).map(|s| s.as_str()).unwrap_or(DEFAULT_CONFIG_PATH);

    let config = AppConfig::load_from_path(config_path)?;
    let model_config = &config.model;
    info!(
        model = %model_config.model_file().display(),
        exists = model_config.model_file().exists(),
        "Inspecting model"
    );

    let loader = ModelLoader::new(model_config)?;
    let model = match loader.load_model() {
        Ok(model) => model,
        Err(e) => {
            error!(error = %e, "Model could not be loaded");
            return Err(e.into());
        }
    };

    let labels = loader::load_labels(model_config.labels_file())?;
    loader::check_label_width(labels.len(), model.output_width())?;

    println!("Strategy:     {}", model.strategy);
    println!("Path:         {}", model.path.display());
    println!("Input:        {} {:?}", model.input_name, model.input_shape);
    println!("Output:       {} {:?}", model.output_name, model.output_shape);
    println!("Labels:       {}", labels.len());
    for (i, label) in labels.iter().enumerate() {
        println!("  [{:>3}] {}", i, label);
    }

    Ok(())
}
