//! # Bailu Agent Core
//!
//! Core library for the Bailu coding-agent terminal. Provides the
//! conversation store, action-block parser, streaming filter, tool
//! registry and built-in tools, safety mediator with backup/rollback,
//! the orchestrator loop, the LLM transport trait with retry, and the
//! session-persistence contract.

pub mod backup;
pub mod config;
pub mod conversation;
pub mod mediator;
pub mod orchestrator;
pub mod parser;
pub mod persistence;
pub mod registry;
pub mod retry;
pub mod stream;
pub mod system_prompt;
pub mod tools;
pub mod transport;
pub mod types;

// Re-export key types
pub use backup::BackupManager;
pub use config::{Settings, UserConfig, WorkspaceHints};
pub use conversation::Conversation;
pub use mediator::{
    ApprovalDecision, ApprovalPrompt, ApprovalRequest, DiffPreview, QuitRequested, SafetyMediator,
};
pub use orchestrator::{Orchestrator, OrchestratorConfig, RunOutcome};
pub use parser::{parse_assistant_message, render_action_block, ParsedMessage};
pub use persistence::{ChatSession, SessionStore, SessionSummary};
pub use registry::{ToolHandler, ToolRegistry};
pub use retry::{classify_http_error, with_retry, ErrorKind, RetryPolicy};
pub use stream::ActionFilter;
pub use system_prompt::{ConversationMemory, DEFAULT_SYSTEM_PROMPT};
pub use transport::{ChatTransport, ChunkStream, TransportError};
pub use types::{
    ErrorCode, ExecutionContext, IterationStats, Message, Role, SafetyMode, ToolCall,
    ToolDefinition, ToolParameter, ToolResult,
};
