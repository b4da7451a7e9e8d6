use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use copilot_core::{
    ChatMessage, ChatRequest, ChatRole, Config, JsonFileStore, MemoryStore, StreamOutcome,
    StreamTransport, TranscriptController, TranscriptEvent, TranscriptStore,
};
use std::fs;
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tokio::sync::broadcast::error::RecvError;
use tracing_subscriber::EnvFilter;

mod app;
mod handler;
mod tui;
mod ui;

use app::App;
use tui::EventHandler;

#[derive(Parser)]
#[command(name = "copilot")]
#[command(about = "Terminal client for the delivery co-pilot", version)]
struct Cli {
    /// Co-pilot backend URL (overrides the config file)
    #[arg(long, global = true)]
    base_url: Option<String>,
    /// Project id sent as conversation context
    #[arg(short, long, global = true)]
    project: Option<String>,
    /// Keep the conversation in memory only
    #[arg(long, global = true)]
    ephemeral: bool,
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Interactive chat (default)
    Chat,
    /// Ask one question and print the answer as it streams
    Ask {
        /// Your question
        question: String,
        /// Wait for the complete answer instead of streaming it
        #[arg(long)]
        no_stream: bool,
    },
    /// Print the saved conversation
    History,
    /// Delete the saved conversation
    Clear,
    /// Show the effective configuration
    Config {
        /// Persist the command-line overrides
        #[arg(long)]
        save: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = Config::load().unwrap_or_else(|e| {
        eprintln!("Ignoring config file: {e}");
        Config::new()
    });
    if let Some(base_url) = cli.base_url {
        config.base_url = base_url;
    }
    if cli.project.is_some() {
        config.context_id = cli.project;
    }

    match cli.command.unwrap_or(Commands::Chat) {
        Commands::Chat => {
            init_logging(Some(Config::data_dir()?.join("copilot.log")))?;
            let controller = build_controller(&config, cli.ephemeral)?;
            run_chat(controller, config.base_url).await?
        }
        Commands::Ask { question, no_stream } => {
            init_logging(None)?;
            let controller = build_controller(&config, cli.ephemeral)?;
            if no_stream {
                ask_once(&config, &controller, &question).await?
            } else {
                ask_streaming(&controller, &question).await?
            }
        }
        Commands::History => {
            init_logging(None)?;
            print_history(&build_controller(&config, cli.ephemeral)?.messages());
        }
        Commands::Clear => {
            init_logging(None)?;
            build_controller(&config, cli.ephemeral)?.clear();
            println!("Conversation cleared");
        }
        Commands::Config { save } => {
            println!("{}", serde_json::to_string_pretty(&config)?);
            if save {
                config.save()?;
                println!("Saved to {}", Config::get_config_path()?.display());
            }
        }
    }

    Ok(())
}

/// Logs go to `log_file` when the terminal is owned by the UI, stderr otherwise.
fn init_logging(log_file: Option<PathBuf>) -> Result<()> {
    let default_level = if log_file.is_some() { "info" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    match log_file {
        Some(path) => {
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent)?;
            }
            let file = fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&path)
                .with_context(|| format!("Could not open log file {}", path.display()))?;
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_ansi(false)
                .with_writer(Mutex::new(file))
                .init();
        }
        None => {
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(io::stderr)
                .init();
        }
    }

    Ok(())
}

fn build_controller(config: &Config, ephemeral: bool) -> Result<TranscriptController> {
    let transport = StreamTransport::new(&config.base_url).with_idle_timeout(config.idle_timeout());
    let store: Arc<dyn TranscriptStore> = if ephemeral {
        Arc::new(MemoryStore::new())
    } else {
        Arc::new(JsonFileStore::open_default(config.max_persisted_messages)?)
    };

    Ok(TranscriptController::new(Arc::new(transport), store)
        .with_context_id(config.context_id.clone()))
}

async fn run_chat(controller: TranscriptController, base_url: String) -> Result<()> {
    tui::install_panic_hook();
    let mut terminal = tui::init()?;
    let mut events = EventHandler::new(controller.subscribe());
    let mut app = App::new(controller, base_url);

    let result = async {
        while !app.should_quit {
            terminal.draw(|frame| ui::render(&mut app, frame))?;
            match events.next().await {
                Some(event) => handler::handle_event(&mut app, event),
                None => break,
            }
        }
        Ok::<(), anyhow::Error>(())
    }
    .await;

    // Partial output of an interrupted answer is kept and saved before exit.
    app.shutdown().await;
    tui::restore()?;
    result
}

/// Print the newest assistant text not yet written to stdout.
fn print_new_content(controller: &TranscriptController, printed: &mut usize) -> io::Result<()> {
    let fresh = controller.read(|messages| {
        messages
            .last()
            .and_then(|m| m.content.get(*printed..))
            .map(str::to_string)
            .unwrap_or_default()
    });
    if !fresh.is_empty() {
        *printed += fresh.len();
        let mut stdout = io::stdout().lock();
        stdout.write_all(fresh.as_bytes())?;
        stdout.flush()?;
    }
    Ok(())
}

async fn ask_streaming(controller: &TranscriptController, question: &str) -> Result<()> {
    let mut events = controller.subscribe();
    let Some(handle) = controller.send(question) else {
        bail!("Nothing to ask");
    };

    let finished = handle.finished();
    tokio::pin!(finished);
    let mut printed = 0;

    let outcome = loop {
        tokio::select! {
            outcome = &mut finished => break outcome,
            _ = tokio::signal::ctrl_c() => {
                controller.cancel();
            }
            event = events.recv() => match event {
                Ok(TranscriptEvent::ContentAppended { .. }) | Err(RecvError::Lagged(_)) => {
                    print_new_content(controller, &mut printed)?;
                }
                Ok(_) => {}
                Err(RecvError::Closed) => {}
            }
        }
    };

    match outcome {
        StreamOutcome::Failed => {
            println!();
            let message = controller.messages().pop().map(|m| m.content).unwrap_or_default();
            bail!("{}", message.trim_start_matches("Error: "));
        }
        StreamOutcome::Completed | StreamOutcome::Cancelled => {
            print_new_content(controller, &mut printed)?;
            println!();
            if outcome == StreamOutcome::Cancelled {
                eprintln!("(stopped)");
            }
        }
    }

    Ok(())
}

async fn ask_once(config: &Config, controller: &TranscriptController, question: &str) -> Result<()> {
    if question.trim().is_empty() {
        bail!("Nothing to ask");
    }

    let mut history = controller.messages();
    history.push(ChatMessage::user(question));

    let transport = StreamTransport::new(&config.base_url);
    let reply = transport
        .complete(&ChatRequest::new(config.context_id.clone(), history))
        .await?;

    println!("{}", reply.content);
    if let Some(meta) = reply.meta {
        if let (Some(intent), Some(task_type)) = (meta.intent, meta.task_type) {
            eprintln!("({} / {})", intent, task_type);
        }
    }
    Ok(())
}

fn print_history(messages: &[ChatMessage]) {
    if messages.is_empty() {
        println!("No saved conversation");
        return;
    }

    for message in messages {
        let speaker = match message.role {
            ChatRole::User => "You",
            ChatRole::Assistant => "Co-pilot",
        };
        match message.meta.as_ref().and_then(|m| m.intent.as_deref()) {
            Some(intent) => println!("{} [{}]:", speaker, intent),
            None => println!("{}:", speaker),
        }
        println!("{}\n", message.content);
    }
}
