//! Safety Mediator
//!
//! Wraps every tool dispatch with policy: `dry-run` simulates, `review`
//! asks the human before any mutating tool runs, `auto-apply` passes
//! through. Takes pre-mutation backups, offers rollback after failed
//! mutations, and normalizes anything a handler lets escape.

use std::path::Path;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use futures::FutureExt;
use similar::{ChangeTag, TextDiff};
use tracing::{debug, info, warn};

use crate::backup::BackupManager;
use crate::registry::{validate_params, ToolRegistry};
use crate::types::{ErrorCode, ExecutionContext, SafetyMode, ToolCall, ToolResult};

/// Tools whose handlers mutate files and therefore get backup/rollback
/// treatment. `apply_diff` snapshots through the shared [`BackupManager`]
/// itself; `write_file` is backed up here before the handler runs.
const FILE_MUTATING_TOOLS: &[&str] = &["write_file", "apply_diff"];

// ---------------------------------------------------------------------------
// Approval prompt
// ---------------------------------------------------------------------------

/// What the human is being asked to approve.
#[derive(Debug, Clone)]
pub struct ApprovalRequest {
    pub tool: String,
    /// One-line description of the call.
    pub summary: String,
    /// Unified diff between current and proposed contents (file writes).
    pub diff: Option<DiffPreview>,
    /// Set after the user chose `d`: render the full diff this time.
    pub show_full: bool,
}

/// Rendered diff shown in the approval prompt.
#[derive(Debug, Clone)]
pub struct DiffPreview {
    /// Truncated rendering for the first prompt.
    pub preview: String,
    /// Complete rendering for the `d` option.
    pub full: String,
    pub added: usize,
    pub removed: usize,
}

/// The four answers the approval prompt accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApprovalDecision {
    Yes,
    No,
    /// Show the full diff, then ask again.
    Diff,
    /// Terminate the whole process cleanly.
    Quit,
}

/// Interactive confirmation surface. The REPL injects the terminal
/// implementation; tests inject scripted ones.
#[async_trait]
pub trait ApprovalPrompt: Send + Sync {
    async fn confirm(&self, request: &ApprovalRequest) -> Result<ApprovalDecision>;
    async fn confirm_rollback(&self, path: &Path, error: &str) -> Result<bool>;
}

/// Raised through `anyhow` when the user chooses `q` at an approval
/// prompt. The binary catches it and exits cleanly.
#[derive(Debug, Clone, Copy)]
pub struct QuitRequested;

impl std::fmt::Display for QuitRequested {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("quit requested at approval prompt")
    }
}

impl std::error::Error for QuitRequested {}

// ---------------------------------------------------------------------------
// Diff rendering
// ---------------------------------------------------------------------------

/// Lines shown in the truncated approval preview.
const DIFF_PREVIEW_LINES: usize = 40;

/// Render a line diff between current and proposed file contents.
pub fn render_diff(current: &str, proposed: &str, color: bool) -> DiffPreview {
    let diff = TextDiff::from_lines(current, proposed);
    let mut lines = Vec::new();
    let mut added = 0usize;
    let mut removed = 0usize;

    for change in diff.iter_all_changes() {
        let text = change.value().trim_end_matches('\n');
        let line = match change.tag() {
            ChangeTag::Insert => {
                added += 1;
                if color {
                    console::style(format!("+ {}", text)).green().to_string()
                } else {
                    format!("+ {}", text)
                }
            }
            ChangeTag::Delete => {
                removed += 1;
                if color {
                    console::style(format!("- {}", text)).red().to_string()
                } else {
                    format!("- {}", text)
                }
            }
            ChangeTag::Equal => format!("  {}", text),
        };
        lines.push(line);
    }

    let full = lines.join("\n");
    let preview = if lines.len() > DIFF_PREVIEW_LINES {
        let mut p = lines[..DIFF_PREVIEW_LINES].join("\n");
        p.push_str(&format!("\n… ({} more lines, 'd' for full diff)", lines.len() - DIFF_PREVIEW_LINES));
        p
    } else {
        full.clone()
    };

    DiffPreview {
        preview,
        full,
        added,
        removed,
    }
}

// ---------------------------------------------------------------------------
// Mediator
// ---------------------------------------------------------------------------

pub struct SafetyMediator {
    registry: Arc<ToolRegistry>,
    backups: Arc<BackupManager>,
    approval: Arc<dyn ApprovalPrompt>,
    ctx: ExecutionContext,
    /// When false (default), a failed call skips the rest of its turn.
    pub continue_on_error: bool,
}

impl SafetyMediator {
    pub fn new(
        registry: Arc<ToolRegistry>,
        backups: Arc<BackupManager>,
        approval: Arc<dyn ApprovalPrompt>,
        ctx: ExecutionContext,
    ) -> Self {
        Self {
            registry,
            backups,
            approval,
            ctx,
            continue_on_error: false,
        }
    }

    pub fn context(&self) -> &ExecutionContext {
        &self.ctx
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    /// Dispatch the calls of one turn in order. A non-final failure with
    /// `continue_on_error = false` skips the remaining calls; skipped
    /// calls do not appear in the output at all.
    pub async fn dispatch_turn(&self, calls: &[ToolCall]) -> Result<Vec<(ToolCall, ToolResult)>> {
        let mut results = Vec::new();
        for (i, call) in calls.iter().enumerate() {
            let result = self.dispatch(call).await?;
            let failed = !result.success;
            results.push((call.clone(), result));
            if failed && !self.continue_on_error && i + 1 < calls.len() {
                warn!(
                    tool = %call.tool,
                    skipped = calls.len() - i - 1,
                    "tool failed, skipping the rest of the turn"
                );
                break;
            }
        }
        Ok(results)
    }

    /// Dispatch a single call through policy, backup, and normalization.
    pub async fn dispatch(&self, call: &ToolCall) -> Result<ToolResult> {
        // 1. Resolve the tool.
        let Some((definition, handler)) = self.registry.get(&call.tool) else {
            return Ok(ToolResult {
                success: false,
                output: None,
                error: Some(format!("unknown-tool: no tool named '{}' is registered", call.tool)),
                metadata: None,
            });
        };
        let definition = definition.clone();
        let handler = handler.clone();

        // 2. Validate parameters.
        let params = match validate_params(&definition, call) {
            Ok(p) => p,
            Err(failure) => return Ok(failure),
        };
        if self.ctx.verbose {
            info!(
                tool = %call.tool,
                params = %serde_json::Value::Object(params.clone()),
                "dispatching tool call"
            );
        }

        // 3. Policy branch.
        match self.ctx.safety_mode {
            SafetyMode::DryRun => {
                info!(tool = %call.tool, "[dry-run] simulated");
                return Ok(ToolResult::ok("simulated")
                    .with_meta("simulated", serde_json::Value::Bool(true)));
            }
            SafetyMode::Review => {
                if definition.safe {
                    info!(tool = %call.tool, "[auto] read-only tool");
                } else {
                    let mut request = self.build_approval_request(call, &params).await;
                    loop {
                        match self.approval.confirm(&request).await? {
                            ApprovalDecision::Yes => break,
                            ApprovalDecision::No => {
                                return Ok(ToolResult::fail(
                                    ErrorCode::UserCancelled,
                                    format!("'{}' rejected at approval prompt", call.tool),
                                ));
                            }
                            ApprovalDecision::Diff => {
                                request.show_full = true;
                            }
                            ApprovalDecision::Quit => {
                                return Err(anyhow::Error::new(QuitRequested));
                            }
                        }
                    }
                }
            }
            SafetyMode::AutoApply => {}
        }

        // 4. Pre-invocation backup for file writes over existing targets.
        //    (`apply_diff` snapshots inside its handler.)
        let target = self.mutation_target(call, &params);
        if call.tool == "write_file" {
            if let Some(path) = &target {
                if path.exists() {
                    if let Err(e) = self.backups.create(path, &call.tool).await {
                        warn!(path = %path.display(), err = %e, "backup failed, refusing to mutate");
                        return Ok(ToolResult::fail(ErrorCode::FsFault, e));
                    }
                }
            }
        }

        // 5. Invoke, normalizing anything that escapes the handler.
        let invocation = std::panic::AssertUnwindSafe(handler.execute(&params, &self.ctx));
        let mut result = match invocation.catch_unwind().await {
            Ok(result) => result,
            Err(panic) => {
                let message = panic
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "tool handler panicked".into());
                ToolResult::fail(ErrorCode::FsFault, message)
            }
        };

        // 6. Rollback offer for failed mutations with an existing backup.
        if !result.success && FILE_MUTATING_TOOLS.contains(&call.tool.as_str()) {
            if let Some(path) = &target {
                if let Some(backup) = self.backups.latest(path).await {
                    result = self.offer_rollback(path, &backup.backup_path, result).await?;
                }
            }
        }

        debug!(tool = %call.tool, success = result.success, "dispatch complete");
        Ok(result)
    }

    /// Resolved mutation target for backup bookkeeping. Resolution
    /// failures are left for the handler, which owns the path-safety
    /// verdict.
    fn mutation_target(
        &self,
        call: &ToolCall,
        params: &serde_json::Map<String, serde_json::Value>,
    ) -> Option<std::path::PathBuf> {
        if !FILE_MUTATING_TOOLS.contains(&call.tool.as_str()) {
            return None;
        }
        let raw = params.get("path").and_then(|v| v.as_str())?;
        crate::tools::resolve_workspace_path(raw, &self.ctx.workspace_root).ok()
    }

    async fn build_approval_request(
        &self,
        call: &ToolCall,
        params: &serde_json::Map<String, serde_json::Value>,
    ) -> ApprovalRequest {
        let mut diff = None;
        let summary = match call.tool.as_str() {
            "write_file" => {
                let raw = params.get("path").and_then(|v| v.as_str()).unwrap_or("?");
                let proposed = params.get("content").and_then(|v| v.as_str()).unwrap_or("");
                let current = match crate::tools::resolve_workspace_path(raw, &self.ctx.workspace_root) {
                    Ok(path) => tokio::fs::read_to_string(&path).await.unwrap_or_default(),
                    Err(_) => String::new(),
                };
                let preview = render_diff(&current, proposed, true);
                let summary = format!(
                    "write_file {} (+{} / -{})",
                    raw, preview.added, preview.removed
                );
                diff = Some(preview);
                summary
            }
            "apply_diff" => {
                let raw = params.get("path").and_then(|v| v.as_str()).unwrap_or("?");
                format!("apply_diff {}", raw)
            }
            "run_command" => {
                let cmd = params.get("command").and_then(|v| v.as_str()).unwrap_or("?");
                format!("run_command: {}", cmd)
            }
            other => format!("{} {}", other, serde_json::Value::Object(params.clone())),
        };

        ApprovalRequest {
            tool: call.tool.clone(),
            summary,
            diff,
            show_full: false,
        }
    }

    async fn offer_rollback(
        &self,
        path: &Path,
        backup_path: &Path,
        mut result: ToolResult,
    ) -> Result<ToolResult> {
        if self.ctx.safety_mode == SafetyMode::Review {
            let error_text = result.error.clone().unwrap_or_default();
            if self.approval.confirm_rollback(path, &error_text).await? {
                match self.backups.restore(path).await {
                    Ok(_) => {
                        if let Some(err) = result.error.as_mut() {
                            err.push_str(" (rolled back)");
                        }
                        info!(path = %path.display(), "rolled back after failed mutation");
                    }
                    Err(e) => {
                        if let Some(err) = result.error.as_mut() {
                            err.push_str(&format!(" (rollback failed: {})", e));
                        }
                    }
                }
            }
        } else if let Some(err) = result.error.as_mut() {
            err.push_str(&format!(
                " (a backup exists at {}; restore it to roll back)",
                backup_path.display()
            ));
        }
        Ok(result)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
