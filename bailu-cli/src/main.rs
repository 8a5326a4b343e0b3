//! Bailu CLI
//!
//! Binary entry point: argument parsing, logging setup, and mode
//! dispatch. `chat` (the default) starts the interactive REPL; the
//! remaining subcommands manage configuration and stored sessions.

mod approval;
mod commands;
mod repl;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::prelude::*;

use bailu_core::config::{sample_config, Settings};
use bailu_core::mediator::QuitRequested;
use bailu_core::persistence::SessionStore;
use bailu_core::types::SafetyMode;
use bailu_provider_openai::OpenAiTransport;
use bailu_store_fs::FsSessionStore;

// ---------------------------------------------------------------------------
// CLI definition
// ---------------------------------------------------------------------------

#[derive(Parser)]
#[command(name = "bailu", version, about = "Bailu — an interactive coding-agent terminal")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Interactive chat in the current workspace (default)
    Chat {
        /// Workspace root (defaults to the current directory)
        #[arg(long)]
        workspace: Option<PathBuf>,
        /// Safety mode: dry-run, review, or auto-apply
        #[arg(long)]
        safety: Option<String>,
    },
    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
    /// Stored chat sessions
    Sessions {
        #[command(subcommand)]
        action: SessionsAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Print the resolved configuration
    Show,
    /// Write a sample config.json
    Init,
}

#[derive(Subcommand)]
enum SessionsAction {
    /// List stored sessions
    List,
    /// Delete a session by id
    Delete { id: String },
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() {
    let settings = match Settings::resolve() {
        Ok(s) => s,
        Err(e) => {
            eprintln!("❌ Bailu failed to start: {:#}", e);
            std::process::exit(1);
        }
    };
    init_tracing(&settings);

    if let Err(e) = run(settings).await {
        if e.downcast_ref::<QuitRequested>().is_some() {
            std::process::exit(0);
        }
        eprintln!("❌ Bailu fatal error: {}", e);
        for cause in e.chain().skip(1) {
            eprintln!("   caused by: {}", cause);
        }
        std::process::exit(1);
    }
}

/// Logs go to stderr (stdout belongs to the conversation). `DEBUG`
/// drops the filter to debug and mirrors the stream into
/// `<config-dir>/debug.log`.
fn init_tracing(settings: &Settings) {
    let default_filter = if settings.debug { "debug" } else { "warn" };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_filter));

    let is_tty = std::io::IsTerminal::is_terminal(&std::io::stderr());
    let stderr_layer = tracing_subscriber::fmt::layer()
        .with_ansi(is_tty)
        .with_writer(std::io::stderr);

    let file_layer = if settings.debug {
        std::fs::create_dir_all(&settings.config_dir).ok();
        std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(settings.config_dir.join("debug.log"))
            .ok()
            .map(|file| {
                tracing_subscriber::fmt::layer()
                    .with_ansi(false)
                    .with_writer(Arc::new(file))
            })
    } else {
        None
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(stderr_layer)
        .with(file_layer)
        .init();
}

async fn run(settings: Settings) -> Result<()> {
    let cli = Cli::parse();

    match cli.command.unwrap_or(Commands::Chat {
        workspace: None,
        safety: None,
    }) {
        Commands::Chat { workspace, safety } => run_chat(settings, workspace, safety).await,
        Commands::Config { action } => run_config(settings, action),
        Commands::Sessions { action } => run_sessions(settings, action).await,
    }
}

// ---------------------------------------------------------------------------
// Chat mode
// ---------------------------------------------------------------------------

async fn run_chat(
    settings: Settings,
    workspace: Option<PathBuf>,
    safety: Option<String>,
) -> Result<()> {
    let api_key = settings.api_key.clone().context(
        "no API key configured.\n\
         Set the API_KEY environment variable (and optionally BASE_URL / MODEL_NAME).",
    )?;

    let workspace_root = match workspace {
        Some(dir) => dir,
        None => std::env::current_dir().context("could not determine current directory")?,
    };
    let workspace_root = workspace_root
        .canonicalize()
        .with_context(|| format!("workspace does not exist: {}", workspace_root.display()))?;

    let safety_mode = match safety {
        Some(raw) => SafetyMode::parse(&raw)
            .with_context(|| format!("invalid safety mode '{}' (dry-run, review, auto-apply)", raw))?,
        None => settings.safety_mode,
    };

    std::fs::create_dir_all(&settings.config_dir)
        .with_context(|| format!("failed to create {}", settings.config_dir.display()))?;
    let store = FsSessionStore::new(&settings.sessions_dir())?;

    let base_url = settings.base_url.clone();
    let transport_factory = move |model: &str| {
        Arc::new(OpenAiTransport::new(&api_key, model, &base_url)) as Arc<dyn bailu_core::ChatTransport>
    };

    let mut repl = repl::Repl::new(
        settings,
        workspace_root,
        safety_mode,
        Box::new(transport_factory),
        store,
    )?;
    repl.run().await
}

// ---------------------------------------------------------------------------
// Config / sessions subcommands
// ---------------------------------------------------------------------------

fn run_config(settings: Settings, action: ConfigAction) -> Result<()> {
    match action {
        ConfigAction::Show => {
            println!("config dir:  {}", settings.config_dir.display());
            println!("base url:    {}", settings.base_url);
            println!("model:       {}", settings.model);
            println!("safety mode: {}", settings.safety_mode);
            println!(
                "api key:     {}",
                if settings.api_key.is_some() { "set" } else { "not set" }
            );
            Ok(())
        }
        ConfigAction::Init => {
            let path = settings.config_dir.join("config.json");
            if path.exists() {
                anyhow::bail!("{} already exists", path.display());
            }
            std::fs::create_dir_all(&settings.config_dir)?;
            std::fs::write(&path, sample_config())?;
            println!("wrote {}", path.display());
            Ok(())
        }
    }
}

async fn run_sessions(settings: Settings, action: SessionsAction) -> Result<()> {
    let store = FsSessionStore::new(&settings.sessions_dir())?;
    match action {
        SessionsAction::List => {
            let sessions = store.list().await?;
            if sessions.is_empty() {
                println!("no stored sessions.");
                return Ok(());
            }
            println!("{:<38} {:<18} {:>8}  NAME", "ID", "UPDATED", "MESSAGES");
            for s in sessions {
                println!(
                    "{:<38} {:<18} {:>8}  {}",
                    s.id,
                    s.last_updated_at.format("%Y-%m-%d %H:%M"),
                    s.message_count,
                    s.name.as_deref().unwrap_or("-"),
                );
            }
            Ok(())
        }
        SessionsAction::Delete { id } => {
            store.delete(&id).await?;
            println!("deleted session {}", id);
            Ok(())
        }
    }
}
