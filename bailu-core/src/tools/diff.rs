//! Unified-Diff Tool
//!
//! `apply_diff`: applies a unified diff to a workspace file. Hunk headers
//! reseat a cursor over the original lines; `+` lines are emitted, `-`
//! lines consume an original line, context lines are copied through.
//! New-file creation is signaled by `--- /dev/null`. A `<path>.backup`
//! snapshot is taken before the write and restored if the write fails.

use std::sync::{Arc, LazyLock};

use async_trait::async_trait;
use regex::Regex;
use serde_json::Value;
use tracing::debug;

use crate::backup::BackupManager;
use crate::registry::ToolHandler;
use crate::tools::fs::write_atomic;
use crate::tools::{io_failure, resolve_workspace_path};
use crate::types::{
    ErrorCode, ExecutionContext, ParamType, ToolDefinition, ToolParameter, ToolResult,
};

static HUNK_HEADER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^@@ -(\d+)(?:,(\d+))? \+(\d+)(?:,(\d+))? @@").unwrap());

// ---------------------------------------------------------------------------
// Diff model
// ---------------------------------------------------------------------------

/// A single line inside a hunk.
#[derive(Debug, Clone, PartialEq, Eq)]
enum HunkLine {
    /// Leading space — copied through, advances the original cursor.
    Context(String),
    /// Leading `-` — consumes an original line without emitting it.
    Remove(String),
    /// Leading `+` — emitted into the result.
    Add(String),
}

#[derive(Debug, Clone)]
struct DiffHunk {
    /// 1-based start line in the original file.
    orig_start: usize,
    lines: Vec<HunkLine>,
}

#[derive(Debug)]
struct ParsedDiff {
    hunks: Vec<DiffHunk>,
    /// `--- /dev/null` header: the target is being created.
    creates_file: bool,
}

fn parse_diff(diff: &str) -> Option<ParsedDiff> {
    let lines: Vec<&str> = diff.lines().collect();
    let creates_file = lines.iter().any(|l| l.trim_end() == "--- /dev/null");

    let mut hunks: Vec<DiffHunk> = Vec::new();
    let mut i = 0;
    while i < lines.len() {
        let line = lines[i];
        let caps = match HUNK_HEADER_RE.captures(line) {
            Some(c) => c,
            None => {
                i += 1;
                continue;
            }
        };
        let orig_start: usize = caps[1].parse().unwrap_or(1);
        i += 1;

        let mut hunk_lines = Vec::new();
        while i < lines.len() && !lines[i].starts_with("@@ ") {
            let hl = lines[i];
            if let Some(rest) = hl.strip_prefix('+') {
                // `+++` header lines between hunks are not additions.
                if !hl.starts_with("+++ ") {
                    hunk_lines.push(HunkLine::Add(rest.to_string()));
                }
            } else if let Some(rest) = hl.strip_prefix('-') {
                // `---` header lines between hunks are not removals.
                if !hl.starts_with("---") {
                    hunk_lines.push(HunkLine::Remove(rest.to_string()));
                }
            } else if let Some(rest) = hl.strip_prefix(' ') {
                hunk_lines.push(HunkLine::Context(rest.to_string()));
            }
            // `\ No newline at end of file` and anything else is skipped.
            i += 1;
        }
        hunks.push(DiffHunk {
            orig_start,
            lines: hunk_lines,
        });
    }

    if hunks.is_empty() {
        return None;
    }
    Some(ParsedDiff {
        hunks,
        creates_file,
    })
}

/// Walk the original lines and the hunks in parallel.
fn apply_parsed(original: &str, diff: &ParsedDiff) -> (String, usize, usize) {
    let orig_lines: Vec<&str> = original.lines().collect();
    let mut out: Vec<String> = Vec::new();
    let mut cursor = 0usize;
    let mut added = 0usize;
    let mut removed = 0usize;

    for hunk in &diff.hunks {
        // 1-based header → 0-based cursor; a start of 0 means insertion
        // before the first line. Never rewind past already-consumed lines.
        let start = hunk.orig_start.saturating_sub(1).max(cursor);
        while cursor < start && cursor < orig_lines.len() {
            out.push(orig_lines[cursor].to_string());
            cursor += 1;
        }

        for hl in &hunk.lines {
            match hl {
                HunkLine::Context(text) => {
                    out.push(text.clone());
                    cursor += 1;
                }
                HunkLine::Remove(_) => {
                    cursor += 1;
                    removed += 1;
                }
                HunkLine::Add(text) => {
                    out.push(text.clone());
                    added += 1;
                }
            }
        }
    }

    while cursor < orig_lines.len() {
        out.push(orig_lines[cursor].to_string());
        cursor += 1;
    }

    let mut result = out.join("\n");
    let keep_newline = original.ends_with('\n') || (original.is_empty() && !result.is_empty());
    if keep_newline && !result.is_empty() {
        result.push('\n');
    }
    (result, added, removed)
}

// ---------------------------------------------------------------------------
// Tool
// ---------------------------------------------------------------------------

pub fn apply_diff_definition() -> ToolDefinition {
    ToolDefinition {
        name: "apply_diff".into(),
        description: "Apply a unified diff to a file. Use '--- /dev/null' to create a new file."
            .into(),
        parameters: vec![
            ToolParameter::required("path", ParamType::String, "Target file inside the workspace"),
            ToolParameter::required("diff", ParamType::String, "Unified diff with at least one @@ hunk"),
            ToolParameter::optional(
                "create_backup",
                ParamType::Boolean,
                "Write a .backup snapshot before modifying",
                Some(Value::Bool(true)),
            ),
        ],
        safe: false,
    }
}

pub struct ApplyDiffTool {
    backups: Arc<BackupManager>,
}

impl ApplyDiffTool {
    pub fn new(backups: Arc<BackupManager>) -> Self {
        Self { backups }
    }
}

#[async_trait]
impl ToolHandler for ApplyDiffTool {
    async fn execute(
        &self,
        params: &serde_json::Map<String, Value>,
        ctx: &ExecutionContext,
    ) -> ToolResult {
        let raw_path = params.get("path").and_then(|v| v.as_str()).unwrap_or("");
        let diff_text = params.get("diff").and_then(|v| v.as_str()).unwrap_or("");
        let create_backup = params
            .get("create_backup")
            .and_then(|v| v.as_bool())
            .unwrap_or(true);

        let path = match resolve_workspace_path(raw_path, &ctx.workspace_root) {
            Ok(p) => p,
            Err(e) => return e,
        };

        if !diff_text.contains("@@") {
            return ToolResult::fail(
                ErrorCode::InvalidArguments,
                "diff contains no @@ hunk header",
            );
        }
        let parsed = match parse_diff(diff_text) {
            Some(p) => p,
            None => {
                return ToolResult::fail(
                    ErrorCode::InvalidArguments,
                    "diff contains no parsable hunks",
                )
            }
        };

        let exists = path.exists();
        let original = if parsed.creates_file {
            String::new()
        } else if exists {
            match tokio::fs::read_to_string(&path).await {
                Ok(c) => c,
                Err(e) => return io_failure(&path, &e),
            }
        } else {
            return ToolResult::fail(
                ErrorCode::NotFound,
                format!("{} does not exist (use --- /dev/null to create)", path.display()),
            );
        };

        let backup = if exists && create_backup {
            match self.backups.create(&path, "apply_diff").await {
                Ok(record) => Some(record),
                Err(e) => return ToolResult::fail(ErrorCode::FsFault, e),
            }
        } else {
            None
        };

        let (result, added, removed) = apply_parsed(&original, &parsed);

        if let Some(parent) = path.parent() {
            if let Err(e) = tokio::fs::create_dir_all(parent).await {
                return io_failure(parent, &e);
            }
        }

        if let Err(write_err) = write_atomic(&path, &result).await {
            // Put the pre-mutation contents back before reporting.
            if backup.is_some() {
                match self.backups.restore(&path).await {
                    Ok(_) => {
                        return ToolResult::fail(
                            ErrorCode::FsFault,
                            format!(
                                "{}: write failed ({}); restored from backup",
                                path.display(),
                                write_err
                            ),
                        )
                    }
                    Err(restore_err) => {
                        return ToolResult::fail(
                            ErrorCode::FsFault,
                            format!(
                                "{}: write failed ({}) and restore failed ({})",
                                path.display(),
                                write_err,
                                restore_err
                            ),
                        )
                    }
                }
            }
            return io_failure(&path, &write_err);
        }

        debug!(path = %path.display(), added, removed, "apply_diff");
        let mut result = ToolResult::ok(format!("applied diff to {}", path.display()))
            .with_meta("linesAdded", Value::Number(added.into()))
            .with_meta("linesRemoved", Value::Number(removed.into()));
        if let Some(record) = backup {
            result = result.with_meta(
                "backup",
                Value::String(record.backup_path.display().to_string()),
            );
        }
        result
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
