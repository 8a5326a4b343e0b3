//! Interactive REPL
//!
//! The read-eval loop: a rustyline editor for input (bracketed paste
//! folds multi-line pastes into one input event), slash-command
//! dispatch, one orchestrator run per non-slash input, and SIGINT
//! double-tap handling. The editor only reads between runs, so the
//! approval prompt is free to use stdin while a run is in flight.

use std::io::Write as _;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use console::style;
use rustyline::error::ReadlineError;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use bailu_core::backup::BackupManager;
use bailu_core::config::{Settings, WorkspaceHints};
use bailu_core::conversation::Conversation;
use bailu_core::mediator::{QuitRequested, SafetyMediator};
use bailu_core::orchestrator::{Orchestrator, OrchestratorConfig};
use bailu_core::persistence::ChatSession;
use bailu_core::registry::ToolRegistry;
use bailu_core::system_prompt::{ConversationMemory, DEFAULT_SYSTEM_PROMPT};
use bailu_core::tools::builtin_registry;
use bailu_core::transport::ChatTransport;
use bailu_core::types::{ExecutionContext, Message, SafetyMode};
use bailu_store_fs::{load_history, save_history, FsSessionStore};

use crate::approval::TerminalApproval;
use crate::commands::{self, CommandAction};

/// Second Ctrl-C within this window terminates the process.
const INTERRUPT_WINDOW: Duration = Duration::from_secs(3);

/// Builds a transport for a given model name; used by `/model`.
pub type TransportFactory = Box<dyn Fn(&str) -> Arc<dyn ChatTransport> + Send>;

/// One unit of user input. A bracketed paste arrives as a single event
/// with embedded newlines.
#[derive(Debug)]
struct InputEvent {
    text: String,
    is_paste: bool,
}

pub struct Repl {
    pub settings: Settings,
    pub workspace_root: PathBuf,
    pub safety_mode: SafetyMode,
    pub transport: Arc<dyn ChatTransport>,
    pub store: FsSessionStore,
    pub session: ChatSession,
    pub conversation: Conversation,
    pub memory: ConversationMemory,
    pub registry: Arc<ToolRegistry>,
    pub backups: Arc<BackupManager>,
    pub make_transport: TransportFactory,
    editor: rustyline::Editor<(), rustyline::history::DefaultHistory>,
    history: Vec<String>,
    last_interrupt: Option<Instant>,
}

impl Repl {
    pub fn new(
        settings: Settings,
        workspace_root: PathBuf,
        safety_mode: SafetyMode,
        make_transport: TransportFactory,
        store: FsSessionStore,
    ) -> Result<Self> {
        let backups = Arc::new(BackupManager::new());
        let registry = Arc::new(builtin_registry(backups.clone())?);
        let transport = make_transport(&settings.model);

        let config = rustyline::Config::builder()
            .max_history_size(bailu_store_fs::HISTORY_MAX_LINES)?
            .auto_add_history(false)
            .build();
        let mut editor = rustyline::Editor::with_config(config)?;

        let history = load_history(&settings.history_path());
        for line in &history {
            let _ = editor.add_history_entry(line);
        }

        Ok(Self {
            settings,
            workspace_root,
            safety_mode,
            transport,
            store,
            session: ChatSession::new(),
            conversation: Conversation::new(DEFAULT_SYSTEM_PROMPT),
            memory: ConversationMemory::new(),
            registry,
            backups,
            make_transport,
            editor,
            history,
            last_interrupt: None,
        })
    }

    pub async fn run(&mut self) -> Result<()> {
        self.banner();

        loop {
            let event = match self.read_input() {
                Ok(event) => event,
                Err(ReadlineError::Interrupted) => {
                    if self.note_interrupt() {
                        break;
                    }
                    eprintln!(
                        "{}",
                        style("press ctrl-c again within 3 s to exit").dim()
                    );
                    continue;
                }
                Err(ReadlineError::Eof) => break,
                Err(e) => return Err(e).context("line editor failed"),
            };

            if event.text.is_empty() {
                continue;
            }

            // Slash commands are typed, never pasted.
            if !event.is_paste && event.text.starts_with('/') {
                match commands::dispatch(self, &event.text).await? {
                    CommandAction::Continue => continue,
                    CommandAction::Quit => break,
                }
            }

            debug!(len = event.text.len(), is_paste = event.is_paste, "user input");
            match self.run_turn(&event.text).await {
                Ok(()) => {}
                Err(e) if e.downcast_ref::<QuitRequested>().is_some() => {
                    self.shutdown();
                    return Err(e);
                }
                Err(e) => {
                    eprintln!("{} {:#}", style("❌ error:").red().bold(), e);
                    eprintln!("   The session is still alive; try again or /safety dry-run.");
                }
            }
        }

        eprintln!("{}", style("bye!").dim());
        self.shutdown();
        Ok(())
    }

    // -- input --------------------------------------------------------------

    /// Read one input event. Bracketed paste hands multi-line input back
    /// as a single string with embedded newlines; `is_paste` marks it.
    fn read_input(&mut self) -> Result<InputEvent, ReadlineError> {
        let line = tokio::task::block_in_place(|| self.editor.readline("❯ "))?;
        let text = line.trim().to_string();
        if !text.is_empty() {
            let _ = self.editor.add_history_entry(&text);
            self.history.push(text.clone());
        }
        let is_paste = text.contains('\n');
        Ok(InputEvent { text, is_paste })
    }

    /// Returns true when this interrupt is the second within the window.
    fn note_interrupt(&mut self) -> bool {
        let now = Instant::now();
        let double = self
            .last_interrupt
            .is_some_and(|prev| now.duration_since(prev) < INTERRUPT_WINDOW);
        self.last_interrupt = Some(now);
        double
    }

    // -- one agent turn -----------------------------------------------------

    async fn run_turn(&mut self, input: &str) -> Result<()> {
        self.conversation.push(Message::user(input));

        let hints = WorkspaceHints::load(&self.workspace_root).render();
        let mut ctx = ExecutionContext::new(self.workspace_root.clone(), self.safety_mode);
        ctx.verbose = self.settings.debug;
        let mediator = SafetyMediator::new(
            self.registry.clone(),
            self.backups.clone(),
            Arc::new(TerminalApproval),
            ctx,
        );

        let mut orchestrator = Orchestrator::new(
            self.transport.clone(),
            mediator,
            OrchestratorConfig::default(),
        )
        .with_memory(std::mem::take(&mut self.memory))
        .with_hints(hints)
        .with_text_callback(Arc::new(|text: &str| {
            print!("{}", text);
            let _ = std::io::stdout().flush();
        }))
        .with_tool_callback(Arc::new(
            |call: &bailu_core::types::ToolCall, result: &bailu_core::types::ToolResult| {
                if result.success {
                    eprintln!("{} {}", style("🔧").dim(), style(&call.tool).dim());
                } else {
                    eprintln!(
                        "{} {} failed\n   {}",
                        style("✗").red().bold(),
                        call.tool,
                        result.error.as_deref().unwrap_or("unknown error"),
                    );
                }
            },
        ));

        let cancel = CancellationToken::new();
        let mut exit_after = false;

        let outcome = {
            let run = orchestrator.run(&mut self.conversation, cancel.clone());
            tokio::pin!(run);
            let mut last_interrupt = self.last_interrupt;
            let outcome = loop {
                tokio::select! {
                    outcome = &mut run => break outcome,
                    _ = tokio::signal::ctrl_c() => {
                        let now = Instant::now();
                        if last_interrupt
                            .is_some_and(|prev| now.duration_since(prev) < INTERRUPT_WINDOW)
                        {
                            exit_after = true;
                        } else {
                            eprintln!(
                                "\n{}",
                                style("interrupting… press ctrl-c again within 3 s to exit").dim()
                            );
                        }
                        last_interrupt = Some(now);
                        cancel.cancel();
                    }
                }
            };
            self.last_interrupt = last_interrupt;
            outcome
        };
        self.memory = orchestrator.into_memory();

        let outcome = outcome?;
        if outcome.cancelled {
            eprintln!("{}", style("⏹ interrupted").yellow());
        }
        if let Some(error) = &outcome.error {
            eprintln!("{} {}", style("❌ run failed:").red().bold(), error);
            eprintln!("   Check the connection and try again; the conversation is preserved.");
        }

        self.session.stats.iterations += outcome.iterations;
        self.session.stats.tool_calls_executed += outcome.tool_calls_executed;
        self.session.active_files = self.memory.touched_files();
        eprintln!();

        if exit_after {
            self.shutdown();
            std::process::exit(0);
        }
        Ok(())
    }

    // -- lifecycle ----------------------------------------------------------

    fn banner(&self) {
        eprintln!("🤖 Bailu v{}", env!("CARGO_PKG_VERSION"));
        eprintln!(
            "   Model: {} | Safety: {}",
            self.transport.current_model_name(),
            self.safety_mode
        );
        eprintln!("   Workspace: {}", self.workspace_root.display());
        eprintln!("   Tools: {} available", self.registry.len());
        eprintln!("   Type /help for commands, /quit to exit\n");
    }

    fn shutdown(&mut self) {
        if let Err(e) = save_history(&self.settings.history_path(), &self.history) {
            debug!(err = %e, "failed to save history");
        }
    }
}
