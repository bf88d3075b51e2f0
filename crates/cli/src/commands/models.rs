//! `lyra models`: list the chat models the backend serves.

use lyra_config::AppConfig;
use lyra_gateway::{Runtime, is_embedding_model};

pub async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let config = AppConfig::load().map_err(|e| format!("Failed to load config: {e}"))?;
    let runtime = Runtime::from_config(&config)?;

    let models = runtime
        .backend
        .list_models()
        .await
        .map_err(|e| format!("Failed to list models: {e}"))?;

    for model in models.iter().filter(|m| !is_embedding_model(m, &config.embedding_model)) {
        let marker = if *model == config.default_model { "*" } else { " " };
        println!("{marker} {model}");
    }

    Ok(())
}
