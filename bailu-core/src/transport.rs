//! LLM Transport
//!
//! The trait the orchestrator consumes: a streaming chat call, a
//! non-streaming variant for auxiliary work, and the model-listing
//! surface the slash commands use. Concrete transports (OpenAI-compatible
//! endpoints) live in their own crate.
//!
//! A transport that receives tool calls through a native function-calling
//! channel must serialize them into the textual `<action>` form before
//! the assistant text reaches the parser.

use anyhow::Result;
use async_trait::async_trait;
use futures::stream::BoxStream;

use crate::retry::ErrorKind;
use crate::types::{Message, ToolDefinition};

/// Stream of partial assistant text.
pub type ChunkStream = BoxStream<'static, Result<String>>;

#[async_trait]
pub trait ChatTransport: Send + Sync {
    /// Transport identifier for logs and status lines.
    fn name(&self) -> &str;

    /// Request an assistant message, yielding text chunks as they
    /// arrive. Completes normally at end of turn; fails on transport
    /// error after retries.
    async fn chat_stream(
        &self,
        messages: &[Message],
        tools: Option<&[ToolDefinition]>,
    ) -> Result<ChunkStream>;

    /// Non-streaming variant for auxiliary calls.
    async fn chat(
        &self,
        messages: &[Message],
        tools: Option<&[ToolDefinition]>,
    ) -> Result<String>;

    /// Models the endpoint offers. Used only by slash commands.
    async fn list_models(&self) -> Result<Vec<String>>;

    fn current_model_name(&self) -> String;
}

// ---------------------------------------------------------------------------
// Transport error
// ---------------------------------------------------------------------------

/// Typed transport failure carrying its retry classification.
#[derive(Debug)]
pub struct TransportError {
    pub kind: ErrorKind,
    pub message: String,
}

impl TransportError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NetworkError, message)
    }

    pub fn fatal(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Fatal, message)
    }
}

impl std::fmt::Display for TransportError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "transport: {}", self.message)
    }
}

impl std::error::Error for TransportError {}
