//! Slash Commands
//!
//! Dispatch for `/`-prefixed REPL input. Commands mutate REPL state
//! (safety mode, model, conversation) or talk to the session store;
//! everything else is handed to the orchestrator as a prompt.

use anyhow::Result;
use console::style;

use bailu_core::conversation::{Conversation, COMPRESS_KEEP_TAIL, DEFAULT_TOKEN_BUDGET};
use bailu_core::persistence::{ChatSession, SessionStore};
use bailu_core::system_prompt::{ConversationMemory, DEFAULT_SYSTEM_PROMPT};
use bailu_core::types::SafetyMode;

use crate::repl::Repl;

/// What the REPL should do after a command.
pub enum CommandAction {
    Continue,
    Quit,
}

pub async fn dispatch(repl: &mut Repl, line: &str) -> Result<CommandAction> {
    let mut parts = line.splitn(2, char::is_whitespace);
    let command = parts.next().unwrap_or("");
    let argument = parts.next().map(|s| s.trim()).unwrap_or("");

    match command {
        "/quit" | "/exit" | "/q" => return Ok(CommandAction::Quit),
        "/help" | "/h" => help(),
        "/safety" => safety(repl, argument),
        "/compress" => compress(repl),
        "/context" => context(repl),
        "/clear" => clear(repl),
        "/models" => models(repl).await,
        "/model" => model(repl, argument),
        "/save" => save(repl, argument).await?,
        "/sessions" => sessions(repl).await?,
        "/load" => load(repl, argument).await,
        "/delete" => delete(repl, argument).await,
        other => {
            eprintln!(
                "unknown command: {}. Type {} for the list.",
                other,
                style("/help").bold()
            );
        }
    }
    Ok(CommandAction::Continue)
}

fn help() {
    eprintln!("Available commands:");
    eprintln!("  /safety [mode]   - show or set the safety mode (dry-run, review, auto-apply)");
    eprintln!("  /compress        - compress old context, keeping the last 3 rounds");
    eprintln!("  /context         - show conversation size and token estimate");
    eprintln!("  /clear           - start a fresh conversation");
    eprintln!("  /models          - list models the endpoint offers");
    eprintln!("  /model [name]    - show or switch the active model");
    eprintln!("  /save [name]     - save this session (optionally under a name)");
    eprintln!("  /sessions        - list saved sessions");
    eprintln!("  /load <id|name>  - resume a saved session");
    eprintln!("  /delete <id>     - delete a saved session");
    eprintln!("  /help            - this help");
    eprintln!("  /quit            - exit");
}

fn safety(repl: &mut Repl, argument: &str) {
    if argument.is_empty() {
        eprintln!("safety mode: {}", style(repl.safety_mode).bold());
        eprintln!("usage: /safety <dry-run|review|auto-apply>");
        return;
    }
    match SafetyMode::parse(argument) {
        Some(mode) => {
            repl.safety_mode = mode;
            eprintln!("✅ safety mode set to {}", style(mode).bold());
        }
        None => eprintln!("❌ unknown mode '{}' (dry-run, review, auto-apply)", argument),
    }
}

fn compress(repl: &mut Repl) {
    let elided = repl.conversation.compress(COMPRESS_KEEP_TAIL);
    if elided == 0 {
        eprintln!("nothing to compress yet.");
    } else {
        eprintln!(
            "🧹 compressed: {} messages elided, {} kept.",
            elided,
            repl.conversation.len()
        );
    }
}

fn context(repl: &Repl) {
    eprintln!(
        "📊 {} messages, ~{} tokens (budget {}).",
        repl.conversation.len(),
        repl.conversation.estimated_tokens(),
        DEFAULT_TOKEN_BUDGET,
    );
}

fn clear(repl: &mut Repl) {
    repl.conversation = Conversation::new(DEFAULT_SYSTEM_PROMPT);
    repl.memory = ConversationMemory::new();
    repl.session = ChatSession::new();
    eprintln!("🧹 conversation cleared.");
}

async fn models(repl: &Repl) {
    match repl.transport.list_models().await {
        Ok(models) if models.is_empty() => eprintln!("the endpoint reported no models."),
        Ok(models) => {
            let current = repl.transport.current_model_name();
            for model in models {
                let marker = if model == current { "*" } else { " " };
                eprintln!("{} {}", marker, model);
            }
        }
        Err(e) => eprintln!("❌ could not list models: {:#}", e),
    }
}

fn model(repl: &mut Repl, argument: &str) {
    if argument.is_empty() {
        eprintln!("model: {}", repl.transport.current_model_name());
        eprintln!("usage: /model <name>");
        return;
    }
    repl.transport = (repl.make_transport)(argument);
    repl.settings.model = argument.to_string();
    eprintln!("✅ model switched to {}", style(argument).bold());
}

async fn save(repl: &mut Repl, argument: &str) -> Result<()> {
    if !argument.is_empty() {
        repl.session.name = Some(argument.to_string());
    }
    repl.session.messages = repl.conversation.tail();
    repl.session.active_files = repl.memory.touched_files();
    repl.session.touch();
    repl.store.save(&repl.session).await?;
    eprintln!(
        "💾 saved session {}{}",
        repl.session.id,
        repl.session
            .name
            .as_deref()
            .map(|n| format!(" ({})", n))
            .unwrap_or_default()
    );
    Ok(())
}

async fn sessions(repl: &Repl) -> Result<()> {
    let sessions = repl.store.list().await?;
    if sessions.is_empty() {
        eprintln!("no saved sessions. Use /save first.");
        return Ok(());
    }
    eprintln!("{:<38} {:<18} {:>8}  NAME", "ID", "UPDATED", "MESSAGES");
    for s in &sessions {
        eprintln!(
            "{:<38} {:<18} {:>8}  {}",
            s.id,
            s.last_updated_at.format("%Y-%m-%d %H:%M"),
            s.message_count,
            s.name.as_deref().unwrap_or("-"),
        );
    }
    Ok(())
}

async fn load(repl: &mut Repl, argument: &str) {
    if argument.is_empty() {
        eprintln!("usage: /load <id|name> (see /sessions)");
        return;
    }
    match repl.store.load(argument).await {
        Ok(session) => {
            repl.conversation =
                Conversation::from_messages(DEFAULT_SYSTEM_PROMPT, session.messages.clone());
            let mut memory = ConversationMemory::new();
            memory.seed_files(&session.active_files);
            repl.memory = memory;
            eprintln!(
                "✅ loaded session {} ({} messages).",
                session.id,
                session.messages.len()
            );
            repl.session = session;
        }
        Err(e) => eprintln!("❌ {:#}", e),
    }
}

async fn delete(repl: &Repl, argument: &str) {
    if argument.is_empty() {
        eprintln!("usage: /delete <id>");
        return;
    }
    match repl.store.delete(argument).await {
        Ok(()) => eprintln!("🗑 deleted session {}.", argument),
        Err(e) => eprintln!("❌ {:#}", e),
    }
}
