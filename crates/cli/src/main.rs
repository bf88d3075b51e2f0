//! Lyra CLI, the main entry point.
//!
//! Commands:
//! - `serve`   Start the HTTP gateway and the ingest worker
//! - `chat`    Interactive chat or single-message mode
//! - `models`  List the chat models Ollama serves

use clap::{Parser, Subcommand};

mod commands;

#[derive(Parser)]
#[command(name = "lyra", about = "Lyra, a tool-calling agent controller for Ollama", version, author)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP gateway server
    Serve {
        /// Override the port
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Chat with the agent
    Chat {
        /// Send a single message instead of entering interactive mode
        #[arg(short, long)]
        message: Option<String>,

        /// Model to chat with (defaults to `default_model`)
        #[arg(long)]
        model: Option<String>,

        /// Print the answer as it is generated
        #[arg(long)]
        stream: bool,

        /// Augment each message with retrieved documents
        #[arg(long)]
        rag: bool,
    },

    /// List available models
    Models,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Serve { port } => commands::serve::run(port).await?,
        Commands::Chat {
            message,
            model,
            stream,
            rag,
        } => {
            commands::chat::run(commands::chat::ChatOptions {
                message,
                model,
                stream,
                rag,
            })
            .await?
        }
        Commands::Models => commands::models::run().await?,
    }

    Ok(())
}
