//! Core Data Types
//!
//! Shared message, tool, and execution-context types used across the
//! agent codebase.

use std::collections::VecDeque;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Message types
// ---------------------------------------------------------------------------

/// A message in the conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }
}

/// Message role.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

// ---------------------------------------------------------------------------
// Tool surface types
// ---------------------------------------------------------------------------

/// Declared type of a tool parameter.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ParamType {
    String,
    Number,
    Boolean,
    Array,
    Object,
}

impl ParamType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ParamType::String => "string",
            ParamType::Number => "number",
            ParamType::Boolean => "boolean",
            ParamType::Array => "array",
            ParamType::Object => "object",
        }
    }
}

/// A single parameter in a tool's schema.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolParameter {
    pub name: String,
    pub param_type: ParamType,
    pub description: String,
    pub required: bool,
    /// Filled in for absent optional parameters before dispatch.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default: Option<serde_json::Value>,
}

impl ToolParameter {
    pub fn required(name: &str, param_type: ParamType, description: &str) -> Self {
        Self {
            name: name.to_string(),
            param_type,
            description: description.to_string(),
            required: true,
            default: None,
        }
    }

    pub fn optional(
        name: &str,
        param_type: ParamType,
        description: &str,
        default: Option<serde_json::Value>,
    ) -> Self {
        Self {
            name: name.to_string(),
            param_type,
            description: description.to_string(),
            required: false,
            default,
        }
    }
}

/// A tool advertised to the LLM.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    /// Unique registry key.
    pub name: String,
    pub description: String,
    /// Ordered parameter list.
    pub parameters: Vec<ToolParameter>,
    /// `true` iff the tool performs no observable side effect.
    pub safe: bool,
}

impl ToolDefinition {
    /// JSON-schema-style rendering of the parameter list, for transports
    /// that advertise tools through a native function-calling channel.
    pub fn parameters_schema(&self) -> serde_json::Value {
        let mut properties = serde_json::Map::new();
        let mut required = Vec::new();
        for p in &self.parameters {
            properties.insert(
                p.name.clone(),
                serde_json::json!({
                    "type": p.param_type.as_str(),
                    "description": p.description,
                }),
            );
            if p.required {
                required.push(serde_json::Value::String(p.name.clone()));
            }
        }
        serde_json::json!({
            "type": "object",
            "properties": properties,
            "required": required,
        })
    }
}

/// A structured tool invocation parsed from an assistant message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub tool: String,
    pub params: serde_json::Map<String, serde_json::Value>,
}

impl ToolCall {
    pub fn new(tool: &str) -> Self {
        Self {
            tool: tool.to_string(),
            params: serde_json::Map::new(),
        }
    }

    pub fn with_param(mut self, name: &str, value: serde_json::Value) -> Self {
        self.params.insert(name.to_string(), value);
        self
    }

    pub fn str_param(&self, name: &str) -> Option<&str> {
        self.params.get(name).and_then(|v| v.as_str())
    }

    pub fn bool_param(&self, name: &str) -> Option<bool> {
        self.params.get(name).and_then(|v| v.as_bool())
    }

    pub fn u64_param(&self, name: &str) -> Option<u64> {
        self.params.get(name).and_then(|v| v.as_u64())
    }
}

/// Outcome of executing a tool. Every handler returns exactly one;
/// exceptions inside a handler are normalized to a failure at the
/// dispatch boundary.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ToolResult {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Map<String, serde_json::Value>>,
}

impl ToolResult {
    pub fn ok(output: impl Into<String>) -> Self {
        Self {
            success: true,
            output: Some(output.into()),
            error: None,
            metadata: None,
        }
    }

    pub fn fail(code: ErrorCode, message: impl std::fmt::Display) -> Self {
        Self {
            success: false,
            output: None,
            error: Some(code.render(&message.to_string())),
            metadata: None,
        }
    }

    pub fn with_meta(mut self, key: &str, value: serde_json::Value) -> Self {
        self.metadata
            .get_or_insert_with(serde_json::Map::new)
            .insert(key.to_string(), value);
        self
    }

    /// The stable error code prefix, if this is a failure.
    pub fn error_code(&self) -> Option<&str> {
        let err = self.error.as_deref()?;
        let err = err.trim_start_matches("🔒 ");
        err.split(':').next()
    }
}

// ---------------------------------------------------------------------------
// Error taxonomy
// ---------------------------------------------------------------------------

/// Stable error codes surfaced as `ToolResult.error` prefixes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    InvalidArguments,
    PathViolation,
    NotFound,
    PermissionDenied,
    FsFault,
    Blocked,
    Timeout,
    Transport,
    UserCancelled,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::InvalidArguments => "invalid-arguments",
            ErrorCode::PathViolation => "path-violation",
            ErrorCode::NotFound => "not-found",
            ErrorCode::PermissionDenied => "permission-denied",
            ErrorCode::FsFault => "fs-fault",
            ErrorCode::Blocked => "blocked",
            ErrorCode::Timeout => "timeout",
            ErrorCode::Transport => "transport",
            ErrorCode::UserCancelled => "user-cancelled",
        }
    }

    /// Render `code: message`. Path violations carry a lock marker so
    /// they stand out in the model feedback and the terminal.
    pub fn render(&self, message: &str) -> String {
        match self {
            ErrorCode::PathViolation => format!("🔒 {}: {}", self.as_str(), message),
            _ => format!("{}: {}", self.as_str(), message),
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Execution context
// ---------------------------------------------------------------------------

/// Safety policy applied to every tool dispatch.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum SafetyMode {
    DryRun,
    Review,
    AutoApply,
}

impl SafetyMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            SafetyMode::DryRun => "dry-run",
            SafetyMode::Review => "review",
            SafetyMode::AutoApply => "auto-apply",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim() {
            "dry-run" | "dryrun" => Some(SafetyMode::DryRun),
            "review" => Some(SafetyMode::Review),
            "auto-apply" | "auto" => Some(SafetyMode::AutoApply),
            _ => None,
        }
    }
}

impl std::fmt::Display for SafetyMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Immutable per-run execution context, read by the mediator on every call.
#[derive(Debug, Clone)]
pub struct ExecutionContext {
    /// Absolute root under which all file operations must occur.
    pub workspace_root: PathBuf,
    pub safety_mode: SafetyMode,
    pub verbose: bool,
}

impl ExecutionContext {
    pub fn new(workspace_root: PathBuf, safety_mode: SafetyMode) -> Self {
        Self {
            workspace_root,
            safety_mode,
            verbose: false,
        }
    }
}

// ---------------------------------------------------------------------------
// Backups and run statistics
// ---------------------------------------------------------------------------

/// A pre-mutation snapshot kept alongside a file to enable rollback.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupRecord {
    pub original_path: PathBuf,
    pub backup_path: PathBuf,
    /// Tool that triggered the backup.
    pub tool: String,
    pub created_at: DateTime<Utc>,
}

/// Per-file backup history, bounded FIFO.
pub type BackupHistory = VecDeque<BackupRecord>;

/// Counters the orchestrator keeps for termination decisions.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IterationStats {
    pub iterations: usize,
    pub tool_calls_executed: usize,
    pub consecutive_failures: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_failed_tool: Option<String>,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_code_rendering() {
        assert_eq!(
            ErrorCode::Blocked.render("rm -rf is not allowed"),
            "blocked: rm -rf is not allowed"
        );
        assert!(ErrorCode::PathViolation
            .render("escapes workspace")
            .starts_with("🔒 path-violation:"));
    }

    #[test]
    fn tool_result_error_code_extraction() {
        let r = ToolResult::fail(ErrorCode::NotFound, "no such file");
        assert_eq!(r.error_code(), Some("not-found"));

        let r = ToolResult::fail(ErrorCode::PathViolation, "escape");
        assert_eq!(r.error_code(), Some("path-violation"));

        let r = ToolResult::ok("fine");
        assert_eq!(r.error_code(), None);
    }

    #[test]
    fn safety_mode_round_trip() {
        for mode in [SafetyMode::DryRun, SafetyMode::Review, SafetyMode::AutoApply] {
            assert_eq!(SafetyMode::parse(mode.as_str()), Some(mode));
        }
        assert_eq!(SafetyMode::parse("yolo"), None);
    }

    #[test]
    fn parameters_schema_shape() {
        let def = ToolDefinition {
            name: "read_file".into(),
            description: "Read a file".into(),
            parameters: vec![
                ToolParameter::required("path", ParamType::String, "File path"),
                ToolParameter::optional("encoding", ParamType::String, "Encoding", None),
            ],
            safe: true,
        };
        let schema = def.parameters_schema();
        assert_eq!(schema["type"], "object");
        assert_eq!(schema["required"], serde_json::json!(["path"]));
        assert_eq!(schema["properties"]["path"]["type"], "string");
    }
}
