//! Orchestrator
//!
//! The iteration driver: streams an assistant message, parses tool calls
//! out of it, dispatches them through the safety mediator, feeds results
//! back into the conversation, and decides whether to iterate again,
//! stop, or abort. One instance per `run()` invocation.

use std::sync::Arc;

use anyhow::Result;
use futures::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::conversation::Conversation;
use crate::mediator::SafetyMediator;
use crate::parser::parse_assistant_message;
use crate::stream::ActionFilter;
use crate::system_prompt::{inject_memory, inject_tool_docs, ConversationMemory};
use crate::transport::ChatTransport;
use crate::types::{IterationStats, Message, SafetyMode, ToolCall, ToolDefinition, ToolResult};

/// Default sanity ceiling on iterations.
pub const DEFAULT_MAX_ITERATIONS: usize = 100;

/// Ceilings above this draw a warning at construction.
const MAX_ITERATIONS_WARN: usize = 1000;

/// Same-tool consecutive failures that trip the circuit breaker.
const CIRCUIT_BREAKER_THRESHOLD: usize = 3;

// ---------------------------------------------------------------------------
// Configuration and callbacks
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Sanity ceiling; the loop is unbounded in principle.
    pub max_iterations: usize,
}

impl OrchestratorConfig {
    pub fn new(max_iterations: usize) -> Self {
        if max_iterations > MAX_ITERATIONS_WARN {
            warn!(max_iterations, "iteration ceiling is unusually high");
        }
        Self { max_iterations }
    }
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_iterations: DEFAULT_MAX_ITERATIONS,
        }
    }
}

/// Receives visible streamed text as it arrives (never action-block
/// content). The `Bailu: ` prefix arrives through the same channel, once
/// per iteration that produces visible text.
pub type TextCallback = Arc<dyn Fn(&str) + Send + Sync>;

/// Observes each dispatched tool call and its result, for display.
pub type ToolCallback = Arc<dyn Fn(&ToolCall, &ToolResult) + Send + Sync>;

// ---------------------------------------------------------------------------
// Run outcome
// ---------------------------------------------------------------------------

/// What `run()` hands back to the embedding REPL.
#[derive(Debug)]
pub struct RunOutcome {
    pub success: bool,
    pub final_response: String,
    pub iterations: usize,
    pub tool_calls_executed: usize,
    pub error: Option<String>,
    pub cancelled: bool,
    /// The conversation excluding the leading system message, so the
    /// caller can append it to its own history verbatim.
    pub messages: Vec<Message>,
}

// ---------------------------------------------------------------------------
// Orchestrator
// ---------------------------------------------------------------------------

pub struct Orchestrator {
    transport: Arc<dyn ChatTransport>,
    mediator: SafetyMediator,
    config: OrchestratorConfig,
    memory: ConversationMemory,
    on_text: Option<TextCallback>,
    on_tool: Option<ToolCallback>,
}

impl Orchestrator {
    pub fn new(
        transport: Arc<dyn ChatTransport>,
        mediator: SafetyMediator,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            transport,
            mediator,
            config,
            memory: ConversationMemory::new(),
            on_text: None,
            on_tool: None,
        }
    }

    pub fn with_text_callback(mut self, cb: TextCallback) -> Self {
        self.on_text = Some(cb);
        self
    }

    pub fn with_tool_callback(mut self, cb: ToolCallback) -> Self {
        self.on_tool = Some(cb);
        self
    }

    pub fn with_hints(mut self, hints: Vec<String>) -> Self {
        self.memory.hints = hints;
        self
    }

    /// Seed the advisory memory carried over from a previous run.
    pub fn with_memory(mut self, memory: ConversationMemory) -> Self {
        self.memory = memory;
        self
    }

    /// Hand the memory back so the caller can carry it into the next run.
    pub fn into_memory(self) -> ConversationMemory {
        self.memory
    }

    /// Drive the conversation until the model answers without tool calls
    /// or a termination check fires. Transport failures surface in the
    /// outcome; only mediator-level errors (quit at the approval prompt)
    /// escape as `Err`.
    pub async fn run(
        &mut self,
        conversation: &mut Conversation,
        cancel: CancellationToken,
    ) -> Result<RunOutcome> {
        self.refresh_system_message(conversation);

        let definitions: Vec<ToolDefinition> = self
            .mediator
            .registry()
            .list()
            .into_iter()
            .cloned()
            .collect();

        let mut stats = IterationStats::default();

        loop {
            if cancel.is_cancelled() {
                info!("run cancelled");
                return Ok(self.outcome(conversation, &stats, |o| {
                    o.success = false;
                    o.cancelled = true;
                }));
            }

            stats.iterations += 1;
            debug!(iteration = stats.iterations, "orchestrator iteration");

            // 1. Keep the context inside budget.
            if let Some(elided) = conversation.auto_compress() {
                self.emit_text(&format!("[compressed: {} messages elided]\n", elided));
            }

            // 2. Stream the assistant message.
            let full_text = match self.stream_turn(conversation, &definitions, &cancel).await {
                Ok(Some(text)) => text,
                Ok(None) => {
                    return Ok(self.outcome(conversation, &stats, |o| {
                        o.success = false;
                        o.cancelled = true;
                    }));
                }
                Err(e) => {
                    warn!(err = %e, "transport failed");
                    return Ok(self.outcome(conversation, &stats, |o| {
                        o.success = false;
                        o.error = Some(format!("transport: {:#}", e));
                    }));
                }
            };

            // 3–4. Parse; a turn with no tool calls is the final answer.
            let parsed = parse_assistant_message(&full_text);
            if parsed.tool_calls.is_empty() {
                conversation.push(Message::assistant(full_text));
                return Ok(self.outcome(conversation, &stats, |o| {
                    o.final_response = parsed.text.clone();
                }));
            }

            // 5. The appended assistant message is byte-exact the text
            //    observed on the streaming channel.
            conversation.push(Message::assistant(full_text));

            // 6. Dispatch in order; results come back as one tagged
            //    user-role feedback message.
            let results = self.mediator.dispatch_turn(&parsed.tool_calls).await?;
            stats.tool_calls_executed += results.len();
            for (call, result) in &results {
                self.memory.note_call(call, result);
                if let Some(cb) = &self.on_tool {
                    cb(call, result);
                }
            }
            conversation.push(Message::user(render_tool_results(&results)));
            self.refresh_memory_section(conversation);

            // 7. Consecutive same-tool failure accounting.
            let failed_tool = results
                .iter()
                .find(|(_, r)| !r.success)
                .map(|(c, _)| c.tool.clone());
            match failed_tool {
                Some(tool) => {
                    if stats.last_failed_tool.as_deref() == Some(tool.as_str()) {
                        stats.consecutive_failures += 1;
                    } else {
                        stats.consecutive_failures = 1;
                        stats.last_failed_tool = Some(tool);
                    }
                }
                None => {
                    stats.consecutive_failures = 0;
                    stats.last_failed_tool = None;
                }
            }

            // 8. Termination checks, in order.
            if stats.consecutive_failures >= CIRCUIT_BREAKER_THRESHOLD {
                let tool = stats.last_failed_tool.clone().unwrap_or_default();
                warn!(tool = %tool, "circuit breaker tripped");
                let advisory = format!(
                    "Stopped early: '{}' failed {} times in a row. \
                     The last error is in the conversation above.",
                    tool, CIRCUIT_BREAKER_THRESHOLD
                );
                self.emit_text(&format!("{}\n", advisory));
                return Ok(self.outcome(conversation, &stats, |o| {
                    o.final_response = advisory.clone();
                }));
            }
            if self.mediator.context().safety_mode == SafetyMode::DryRun && stats.iterations == 1 {
                let advisory = "Dry run: tool calls were simulated, nothing was executed.";
                self.emit_text(&format!("{}\n", advisory));
                return Ok(self.outcome(conversation, &stats, |o| {
                    o.final_response = advisory.into();
                }));
            }
            if stats.iterations >= self.config.max_iterations {
                warn!(iterations = stats.iterations, "iteration ceiling reached");
                let advisory = format!(
                    "Stopped after {} iterations (sanity ceiling). \
                     Ask me to continue if the task is not finished.",
                    stats.iterations
                );
                self.emit_text(&format!("{}\n", advisory));
                return Ok(self.outcome(conversation, &stats, |o| {
                    o.final_response = advisory.clone();
                }));
            }
        }
    }

    /// Stream one assistant turn, filtering action blocks out of the
    /// visible output. Returns the full assembled text, or `None` when
    /// cancelled mid-stream.
    async fn stream_turn(
        &self,
        conversation: &Conversation,
        definitions: &[ToolDefinition],
        cancel: &CancellationToken,
    ) -> Result<Option<String>> {
        let mut stream = self
            .transport
            .chat_stream(conversation.messages(), Some(definitions))
            .await?;

        let mut filter = ActionFilter::new();
        let mut full_text = String::new();
        let mut prefix_emitted = false;

        loop {
            let chunk = tokio::select! {
                _ = cancel.cancelled() => return Ok(None),
                chunk = stream.next() => chunk,
            };
            let Some(chunk) = chunk else { break };
            let chunk = chunk?;
            full_text.push_str(&chunk);
            let visible = filter.feed(&chunk);
            self.emit_visible(&visible, &mut prefix_emitted);
        }
        let rest = filter.finish();
        self.emit_visible(&rest, &mut prefix_emitted);
        if prefix_emitted {
            self.emit_text("\n");
        }

        Ok(Some(full_text))
    }

    /// Write visible text, emitting the `Bailu: ` prefix once per
    /// iteration. Action-only responses never produce the prefix.
    fn emit_visible(&self, visible: &str, prefix_emitted: &mut bool) {
        if visible.is_empty() {
            return;
        }
        if !*prefix_emitted {
            // Whitespace between action blocks is not worth a prefix.
            if visible.trim().is_empty() {
                return;
            }
            self.emit_text("Bailu: ");
            *prefix_emitted = true;
        }
        self.emit_text(visible);
    }

    fn emit_text(&self, text: &str) {
        if let Some(cb) = &self.on_text {
            cb(text);
        }
    }

    fn refresh_system_message(&self, conversation: &mut Conversation) {
        let tools = self.mediator.registry().list();
        let system = inject_tool_docs(conversation.system(), &tools);
        let system = inject_memory(&system, &self.memory);
        conversation.set_system(system);
    }

    fn refresh_memory_section(&self, conversation: &mut Conversation) {
        let system = inject_memory(conversation.system(), &self.memory);
        conversation.set_system(system);
    }

    fn outcome(
        &self,
        conversation: &Conversation,
        stats: &IterationStats,
        patch: impl FnOnce(&mut RunOutcome),
    ) -> RunOutcome {
        let mut outcome = RunOutcome {
            success: true,
            final_response: String::new(),
            iterations: stats.iterations,
            tool_calls_executed: stats.tool_calls_executed,
            error: None,
            cancelled: false,
            messages: conversation.tail(),
        };
        patch(&mut outcome);
        if outcome.error.is_some() {
            outcome.success = false;
        }
        outcome
    }
}

// ---------------------------------------------------------------------------
// Tool-result feedback rendering
// ---------------------------------------------------------------------------

/// Concatenate a turn's results into one user-role feedback message,
/// one tagged block per result so the model can correlate.
fn render_tool_results(results: &[(ToolCall, ToolResult)]) -> String {
    let mut out = String::new();
    for (index, (call, result)) in results.iter().enumerate() {
        if index > 0 {
            out.push('\n');
        }
        let status = if result.success { "ok" } else { "error" };
        out.push_str(&format!(
            "<tool_result index=\"{}\" tool=\"{}\" status=\"{}\">\n",
            index + 1,
            call.tool,
            status
        ));
        if let Some(output) = &result.output {
            out.push_str(output);
            if !output.ends_with('\n') && !output.is_empty() {
                out.push('\n');
            }
        }
        if let Some(error) = &result.error {
            out.push_str(error);
            out.push('\n');
        }
        if let Some(meta) = &result.metadata {
            out.push_str(&format!(
                "<metadata>{}</metadata>\n",
                serde_json::Value::Object(meta.clone())
            ));
        }
        out.push_str("</tool_result>\n");
    }
    out
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
