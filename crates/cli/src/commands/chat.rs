//! `lyra chat`: interactive or single-message chat mode.

use lyra_agent::{Orchestrator, TurnEvent, TurnRequest};
use lyra_config::AppConfig;
use lyra_gateway::Runtime;
use std::io::Write;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_util::sync::CancellationToken;
use tracing::debug;

pub struct ChatOptions {
    pub message: Option<String>,
    pub model: Option<String>,
    pub stream: bool,
    pub rag: bool,
}

/// Session used for the whole CLI conversation.
const CLI_SESSION: &str = "cli";

pub async fn run(options: ChatOptions) -> Result<(), Box<dyn std::error::Error>> {
    let config = AppConfig::load().map_err(|e| format!("Failed to load config: {e}"))?;
    let runtime = Runtime::from_config(&config)?;
    let model = options.model.clone().unwrap_or_else(|| config.default_model.clone());
    debug!(model = %model, stream = options.stream, rag = options.rag, "Starting chat");

    if let Some(message) = &options.message {
        return turn(&runtime.orchestrator, &model, message, &options).await;
    }

    println!();
    println!("  Lyra, interactive mode");
    println!();
    println!("  Model:     {model}");
    println!("  Ollama:    {}", config.ollama.url);
    println!("  Tools:     {}", runtime.tools.names().join(", "));
    println!("  Retrieval: {}", if options.rag { "on" } else { "off" });
    println!();
    println!("  Type your message and press Enter.");
    println!("  Type 'exit' or Ctrl+D to quit.");
    println!();

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    prompt()?;
    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line == "exit" || line == "quit" {
            break;
        }
        if !line.is_empty() {
            if let Err(e) = turn(&runtime.orchestrator, &model, line, &options).await {
                eprintln!("  [Error] {e}");
            }
            println!();
        }
        prompt()?;
    }

    println!();
    println!("  Goodbye!");
    Ok(())
}

fn prompt() -> std::io::Result<()> {
    print!("  You > ");
    std::io::stdout().flush()
}

/// Run one turn. Ctrl-C abandons the turn, not the session.
async fn turn(
    orchestrator: &Orchestrator,
    model: &str,
    message: &str,
    options: &ChatOptions,
) -> Result<(), Box<dyn std::error::Error>> {
    let request = TurnRequest::new(model, message)
        .with_session(CLI_SESSION)
        .with_rag(options.rag);
    let cancel = CancellationToken::new();
    let watcher = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                cancel.cancel();
            }
        })
    };

    let result = if options.stream {
        streamed(orchestrator, request, cancel).await
    } else {
        buffered(orchestrator, request, cancel).await
    };
    watcher.abort();
    result
}

async fn buffered(
    orchestrator: &Orchestrator,
    request: TurnRequest,
    cancel: CancellationToken,
) -> Result<(), Box<dyn std::error::Error>> {
    eprint!("  Thinking...");
    let result = orchestrator.run_turn(request, cancel).await;
    eprint!("\r              \r");

    let outcome = result?;
    println!("{}", outcome.content);
    if let Some(diagnostic) = outcome.diagnostic {
        eprintln!("  [Note] {diagnostic}");
    }
    Ok(())
}

async fn streamed(
    orchestrator: &Orchestrator,
    request: TurnRequest,
    cancel: CancellationToken,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut rx = orchestrator.run_turn_stream(request, cancel.clone());
    let mut stdout = std::io::stdout();

    while let Some(event) = rx.recv().await {
        match event {
            TurnEvent::Chunk { message } => {
                if let Some(thinking) = &message.thinking {
                    eprint!("{thinking}");
                }
                print!("{}", message.content);
                stdout.flush()?;
            }
            TurnEvent::ToolCall { name, arguments, .. } => eprintln!("\n  [tool] {name} {arguments}"),
            TurnEvent::ToolResult { name, success, .. } => {
                eprintln!("  [tool] {name} {}", if success { "ok" } else { "failed" });
            }
            TurnEvent::Diagnostic { message } => eprintln!("\n  [Note] {message}"),
            TurnEvent::Done { .. } => println!(),
            TurnEvent::Error { message } => return Err(message.into()),
        }
    }

    if cancel.is_cancelled() {
        eprintln!("\n  [Cancelled]");
    }
    Ok(())
}
