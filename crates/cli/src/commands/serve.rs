//! `lyra serve`: start the HTTP gateway.

use lyra_config::AppConfig;

pub async fn run(port_override: Option<u16>) -> Result<(), Box<dyn std::error::Error>> {
    let mut config = AppConfig::load().map_err(|e| format!("Failed to load config: {e}"))?;

    if let Some(port) = port_override {
        config.gateway.port = port;
    }

    println!("Lyra gateway");
    println!("   Listening:    http://{}:{}", config.gateway.host, config.gateway.port);
    println!("   Ollama:       {}", config.ollama.url);
    println!("   Vector store: {} ({})", config.vector_store.backend, config.vector_store.url);
    println!("   TTS:          {}", if config.tts.enabled { config.tts.url.as_str() } else { "disabled" });

    lyra_gateway::start(config).await?;

    Ok(())
}
