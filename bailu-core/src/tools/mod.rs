//! Built-in Tools
//!
//! File inspection and mutation, directory listing, unified-diff
//! application, and shell command execution. Every tool that accepts a
//! `path` performs its own workspace containment check; the registry is
//! assembled once at startup via [`builtin_registry`].

pub mod diff;
pub mod fs;
pub mod shell;

use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use anyhow::Result;

use crate::backup::BackupManager;
use crate::registry::ToolRegistry;
use crate::types::{ErrorCode, ToolResult};

// ---------------------------------------------------------------------------
// Path safety
// ---------------------------------------------------------------------------

/// Resolve a tool-supplied path against the workspace root.
///
/// Relative inputs are joined onto the root; the result is normalized
/// lexically and must remain a descendant of (or equal to) the root.
/// Raw inputs carrying traversal sequences (`../`, `..\`, `%2e%2e`) are
/// rejected outright. This check lives inside each handler and is the
/// sole authority on what "the workspace" means to a tool.
pub fn resolve_workspace_path(raw: &str, root: &Path) -> Result<PathBuf, ToolResult> {
    let lowered = raw.to_ascii_lowercase();
    if raw.contains("../") || raw.contains("..\\") || raw == ".." || lowered.contains("%2e%2e") {
        return Err(ToolResult::fail(
            ErrorCode::PathViolation,
            format!("'{}' contains a parent-directory traversal", raw),
        ));
    }

    let candidate = if Path::new(raw).is_absolute() {
        PathBuf::from(raw)
    } else {
        root.join(raw)
    };

    let normalized = normalize(&candidate);
    if !normalized.starts_with(root) {
        return Err(ToolResult::fail(
            ErrorCode::PathViolation,
            format!("'{}' resolves outside the workspace", raw),
        ));
    }

    Ok(normalized)
}

/// Lexical normalization: strips `.` components and folds `..` without
/// touching the filesystem (the target may not exist yet).
fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other),
        }
    }
    out
}

/// Map an I/O error onto the stable error taxonomy.
pub(crate) fn io_failure(path: &Path, err: &std::io::Error) -> ToolResult {
    let code = match err.kind() {
        std::io::ErrorKind::NotFound => ErrorCode::NotFound,
        std::io::ErrorKind::PermissionDenied => ErrorCode::PermissionDenied,
        _ => ErrorCode::FsFault,
    };
    ToolResult::fail(code, format!("{}: {}", path.display(), err))
}

// ---------------------------------------------------------------------------
// Registry assembly
// ---------------------------------------------------------------------------

/// Build the registry of built-in tools. Called once at startup; the
/// registry is read-only afterwards.
pub fn builtin_registry(backups: Arc<BackupManager>) -> Result<ToolRegistry> {
    let mut registry = ToolRegistry::new();

    registry.register(fs::read_file_definition(), Arc::new(fs::ReadFileTool))?;
    registry.register(
        fs::list_directory_definition(),
        Arc::new(fs::ListDirectoryTool),
    )?;
    registry.register(fs::write_file_definition(), Arc::new(fs::WriteFileTool))?;
    registry.register(
        diff::apply_diff_definition(),
        Arc::new(diff::ApplyDiffTool::new(backups)),
    )?;
    registry.register(
        shell::run_command_definition(),
        Arc::new(shell::RunCommandTool),
    )?;

    Ok(registry)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
