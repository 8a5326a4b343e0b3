//! Filesystem Tools
//!
//! `read_file`, `list_directory`, and `write_file`. Reads are safe;
//! writes are atomic (temp file + rename) and go through the mediator's
//! backup step before reaching this handler.

use std::path::Path;

use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;
use walkdir::WalkDir;

use crate::registry::ToolHandler;
use crate::tools::{io_failure, resolve_workspace_path};
use crate::types::{
    ErrorCode, ExecutionContext, ParamType, ToolDefinition, ToolParameter, ToolResult,
};

// ---------------------------------------------------------------------------
// read_file
// ---------------------------------------------------------------------------

pub fn read_file_definition() -> ToolDefinition {
    ToolDefinition {
        name: "read_file".into(),
        description: "Read the contents of a file inside the workspace.".into(),
        parameters: vec![
            ToolParameter::required("path", ParamType::String, "File path, relative to the workspace root"),
            ToolParameter::optional(
                "encoding",
                ParamType::String,
                "Text encoding (only utf-8 is supported)",
                None,
            ),
        ],
        safe: true,
    }
}

pub struct ReadFileTool;

#[async_trait]
impl ToolHandler for ReadFileTool {
    async fn execute(
        &self,
        params: &serde_json::Map<String, Value>,
        ctx: &ExecutionContext,
    ) -> ToolResult {
        let raw_path = params.get("path").and_then(|v| v.as_str()).unwrap_or("");
        let path = match resolve_workspace_path(raw_path, &ctx.workspace_root) {
            Ok(p) => p,
            Err(e) => return e,
        };

        if let Some(encoding) = params.get("encoding").and_then(|v| v.as_str()) {
            let enc = encoding.to_ascii_lowercase();
            if enc != "utf-8" && enc != "utf8" {
                return ToolResult::fail(
                    ErrorCode::InvalidArguments,
                    format!("unsupported encoding '{}'", encoding),
                );
            }
        }

        match tokio::fs::read_to_string(&path).await {
            Ok(content) => {
                let lines = content.lines().count();
                let size = content.len();
                debug!(path = %path.display(), size, "read_file");
                ToolResult::ok(content)
                    .with_meta("size", Value::Number(size.into()))
                    .with_meta("lines", Value::Number(lines.into()))
            }
            Err(e) => io_failure(&path, &e),
        }
    }
}

// ---------------------------------------------------------------------------
// list_directory
// ---------------------------------------------------------------------------

pub fn list_directory_definition() -> ToolDefinition {
    ToolDefinition {
        name: "list_directory".into(),
        description: "List directory entries; directories carry a trailing '/'.".into(),
        parameters: vec![
            ToolParameter::optional(
                "path",
                ParamType::String,
                "Directory to list (workspace root when omitted)",
                Some(Value::String(".".into())),
            ),
            ToolParameter::optional(
                "recursive",
                ParamType::Boolean,
                "Descend into subdirectories",
                Some(Value::Bool(false)),
            ),
            ToolParameter::optional(
                "include_hidden",
                ParamType::Boolean,
                "Include dot-prefixed entries",
                Some(Value::Bool(false)),
            ),
        ],
        safe: true,
    }
}

pub struct ListDirectoryTool;

#[async_trait]
impl ToolHandler for ListDirectoryTool {
    async fn execute(
        &self,
        params: &serde_json::Map<String, Value>,
        ctx: &ExecutionContext,
    ) -> ToolResult {
        let raw_path = params.get("path").and_then(|v| v.as_str()).unwrap_or(".");
        let recursive = params
            .get("recursive")
            .and_then(|v| v.as_bool())
            .unwrap_or(false);
        let include_hidden = params
            .get("include_hidden")
            .and_then(|v| v.as_bool())
            .unwrap_or(false);

        let dir = match resolve_workspace_path(raw_path, &ctx.workspace_root) {
            Ok(p) => p,
            Err(e) => return e,
        };

        if !dir.is_dir() {
            return ToolResult::fail(
                ErrorCode::NotFound,
                format!("{} is not a directory", dir.display()),
            );
        }

        let entries = if recursive {
            list_recursive(&dir, include_hidden)
        } else {
            list_flat(&dir, include_hidden)
        };

        match entries {
            Ok(mut names) => {
                names.sort();
                let count = names.len();
                ToolResult::ok(names.join("\n"))
                    .with_meta("entries", Value::Number(count.into()))
            }
            Err(e) => io_failure(&dir, &e),
        }
    }
}

fn is_hidden(name: &str) -> bool {
    name.starts_with('.')
}

fn list_flat(dir: &Path, include_hidden: bool) -> std::io::Result<Vec<String>> {
    let mut names = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy().to_string();
        if !include_hidden && is_hidden(&name) {
            continue;
        }
        if entry.file_type()?.is_dir() {
            names.push(format!("{}/", name));
        } else {
            names.push(name);
        }
    }
    Ok(names)
}

fn list_recursive(dir: &Path, include_hidden: bool) -> std::io::Result<Vec<String>> {
    let mut names = Vec::new();
    let walker = WalkDir::new(dir).min_depth(1).into_iter();
    for entry in walker.filter_entry(|e| {
        include_hidden || !is_hidden(&e.file_name().to_string_lossy())
    }) {
        let entry = entry.map_err(std::io::Error::other)?;
        let rel = entry
            .path()
            .strip_prefix(dir)
            .unwrap_or(entry.path())
            .to_string_lossy()
            .to_string();
        if entry.file_type().is_dir() {
            names.push(format!("{}/", rel));
        } else {
            names.push(rel);
        }
    }
    Ok(names)
}

// ---------------------------------------------------------------------------
// write_file
// ---------------------------------------------------------------------------

pub fn write_file_definition() -> ToolDefinition {
    ToolDefinition {
        name: "write_file".into(),
        description: "Write a file atomically, replacing any existing contents.".into(),
        parameters: vec![
            ToolParameter::required("path", ParamType::String, "Target path inside the workspace"),
            ToolParameter::required("content", ParamType::String, "Full file content to write"),
            ToolParameter::optional(
                "create_dirs",
                ParamType::Boolean,
                "Create missing parent directories",
                Some(Value::Bool(true)),
            ),
        ],
        safe: false,
    }
}

pub struct WriteFileTool;

#[async_trait]
impl ToolHandler for WriteFileTool {
    async fn execute(
        &self,
        params: &serde_json::Map<String, Value>,
        ctx: &ExecutionContext,
    ) -> ToolResult {
        let raw_path = params.get("path").and_then(|v| v.as_str()).unwrap_or("");
        let content = params.get("content").and_then(|v| v.as_str()).unwrap_or("");
        let create_dirs = params
            .get("create_dirs")
            .and_then(|v| v.as_bool())
            .unwrap_or(true);

        let path = match resolve_workspace_path(raw_path, &ctx.workspace_root) {
            Ok(p) => p,
            Err(e) => return e,
        };

        let created = !path.exists();

        if create_dirs {
            if let Some(parent) = path.parent() {
                if let Err(e) = tokio::fs::create_dir_all(parent).await {
                    return io_failure(parent, &e);
                }
            }
        }

        if let Err(e) = write_atomic(&path, content).await {
            return io_failure(&path, &e);
        }

        let lines = content.lines().count();
        debug!(path = %path.display(), bytes = content.len(), created, "write_file");
        ToolResult::ok(format!("wrote {}", path.display()))
            .with_meta("bytes", Value::Number(content.len().into()))
            .with_meta("lines", Value::Number(lines.into()))
            .with_meta("created", Value::Bool(created))
    }
}

/// Write via a temp file in the target directory, then rename over the
/// destination, so readers never observe a half-written file.
pub(crate) async fn write_atomic(path: &Path, content: &str) -> std::io::Result<()> {
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| "file".into());
    let tmp = path.with_file_name(format!(".{}.tmp-{}", file_name, std::process::id()));
    tokio::fs::write(&tmp, content).await?;
    match tokio::fs::rename(&tmp, path).await {
        Ok(()) => Ok(()),
        Err(e) => {
            let _ = tokio::fs::remove_file(&tmp).await;
            Err(e)
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::SafetyMode;
    use tempfile::TempDir;

    fn ctx(dir: &TempDir) -> ExecutionContext {
        ExecutionContext::new(dir.path().to_path_buf(), SafetyMode::AutoApply)
    }

    fn params(pairs: &[(&str, Value)]) -> serde_json::Map<String, Value> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[tokio::test]
    async fn read_file_returns_contents_and_metadata() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("README.md"), "hello").unwrap();

        let result = ReadFileTool
            .execute(&params(&[("path", Value::String("README.md".into()))]), &ctx(&dir))
            .await;

        assert!(result.success);
        assert_eq!(result.output.as_deref(), Some("hello"));
        let meta = result.metadata.unwrap();
        assert_eq!(meta["size"], Value::Number(5.into()));
        assert_eq!(meta["lines"], Value::Number(1.into()));
    }

    #[tokio::test]
    async fn read_file_missing_is_not_found() {
        let dir = TempDir::new().unwrap();
        let result = ReadFileTool
            .execute(&params(&[("path", Value::String("nope.txt".into()))]), &ctx(&dir))
            .await;
        assert_eq!(result.error_code(), Some("not-found"));
    }

    #[tokio::test]
    async fn read_file_rejects_escape() {
        let dir = TempDir::new().unwrap();
        let result = ReadFileTool
            .execute(
                &params(&[("path", Value::String("../../etc/passwd".into()))]),
                &ctx(&dir),
            )
            .await;
        assert_eq!(result.error_code(), Some("path-violation"));
    }

    #[tokio::test]
    async fn read_file_rejects_unknown_encoding() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("f.txt"), "x").unwrap();
        let result = ReadFileTool
            .execute(
                &params(&[
                    ("path", Value::String("f.txt".into())),
                    ("encoding", Value::String("latin-1".into())),
                ]),
                &ctx(&dir),
            )
            .await;
        assert_eq!(result.error_code(), Some("invalid-arguments"));
    }

    #[tokio::test]
    async fn list_directory_marks_directories() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir(dir.path().join("src")).unwrap();
        std::fs::write(dir.path().join("a.txt"), "").unwrap();
        std::fs::write(dir.path().join(".hidden"), "").unwrap();

        let result = ListDirectoryTool.execute(&params(&[]), &ctx(&dir)).await;
        assert!(result.success);
        let listing = result.output.unwrap();
        assert!(listing.contains("src/"));
        assert!(listing.contains("a.txt"));
        assert!(!listing.contains(".hidden"));
    }

    #[tokio::test]
    async fn list_directory_recursive_and_hidden() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join("src/nested")).unwrap();
        std::fs::write(dir.path().join("src/nested/deep.rs"), "").unwrap();
        std::fs::write(dir.path().join(".env"), "").unwrap();

        let result = ListDirectoryTool
            .execute(
                &params(&[
                    ("recursive", Value::Bool(true)),
                    ("include_hidden", Value::Bool(true)),
                ]),
                &ctx(&dir),
            )
            .await;
        let listing = result.output.unwrap();
        assert!(listing.contains("src/nested/deep.rs"));
        assert!(listing.contains(".env"));
    }

    #[tokio::test]
    async fn list_directory_missing_is_not_found() {
        let dir = TempDir::new().unwrap();
        let result = ListDirectoryTool
            .execute(&params(&[("path", Value::String("void".into()))]), &ctx(&dir))
            .await;
        assert_eq!(result.error_code(), Some("not-found"));
    }

    #[tokio::test]
    async fn write_file_creates_parents_and_reports() {
        let dir = TempDir::new().unwrap();
        let result = WriteFileTool
            .execute(
                &params(&[
                    ("path", Value::String("deep/dir/out.txt".into())),
                    ("content", Value::String("one\ntwo\n".into())),
                ]),
                &ctx(&dir),
            )
            .await;

        assert!(result.success);
        let meta = result.metadata.unwrap();
        assert_eq!(meta["created"], Value::Bool(true));
        assert_eq!(meta["bytes"], Value::Number(8.into()));
        assert_eq!(meta["lines"], Value::Number(2.into()));

        let written = std::fs::read_to_string(dir.path().join("deep/dir/out.txt")).unwrap();
        assert_eq!(written, "one\ntwo\n");
    }

    #[tokio::test]
    async fn write_file_overwrites_existing() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("f.txt"), "old").unwrap();

        let result = WriteFileTool
            .execute(
                &params(&[
                    ("path", Value::String("f.txt".into())),
                    ("content", Value::String("new".into())),
                ]),
                &ctx(&dir),
            )
            .await;

        assert_eq!(result.metadata.unwrap()["created"], Value::Bool(false));
        assert_eq!(
            std::fs::read_to_string(dir.path().join("f.txt")).unwrap(),
            "new"
        );
    }

    #[tokio::test]
    async fn write_file_rejects_escape_without_touching_disk() {
        let dir = TempDir::new().unwrap();
        let result = WriteFileTool
            .execute(
                &params(&[
                    ("path", Value::String("../outside.txt".into())),
                    ("content", Value::String("x".into())),
                ]),
                &ctx(&dir),
            )
            .await;
        assert_eq!(result.error_code(), Some("path-violation"));
        assert!(!dir.path().parent().unwrap().join("outside.txt").exists());
    }
}
