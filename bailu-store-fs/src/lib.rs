//! Filesystem Session Store
//!
//! `SessionStore` implementation: one pretty-printed JSON file per
//! session under `<config-dir>/chat-sessions/`, plus the bounded
//! command-history file.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use tracing::debug;

use bailu_core::persistence::{ChatSession, SessionStore, SessionSummary};

/// Most recent history lines kept on save.
pub const HISTORY_MAX_LINES: usize = 1000;

// ---------------------------------------------------------------------------
// FsSessionStore
// ---------------------------------------------------------------------------

/// Filesystem-backed session store rooted at the chat-sessions directory.
pub struct FsSessionStore {
    sessions_dir: PathBuf,
}

impl FsSessionStore {
    /// Create a store, ensuring the directory exists.
    pub fn new(sessions_dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(sessions_dir)
            .with_context(|| format!("failed to create {}", sessions_dir.display()))?;
        Ok(Self {
            sessions_dir: sessions_dir.to_path_buf(),
        })
    }

    fn session_path(&self, id: &str) -> PathBuf {
        self.sessions_dir.join(format!("{}.json", id))
    }

    async fn load_all(&self) -> Result<Vec<ChatSession>> {
        let mut sessions = Vec::new();
        let mut entries = tokio::fs::read_dir(&self.sessions_dir)
            .await
            .with_context(|| format!("failed to read {}", self.sessions_dir.display()))?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            match read_session(&path).await {
                Ok(session) => sessions.push(session),
                Err(e) => debug!(path = %path.display(), err = %e, "skipping unreadable session file"),
            }
        }
        Ok(sessions)
    }
}

async fn read_session(path: &Path) -> Result<ChatSession> {
    let content = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("failed to read session: {}", path.display()))?;
    serde_json::from_str(&content)
        .with_context(|| format!("failed to parse session: {}", path.display()))
}

#[async_trait]
impl SessionStore for FsSessionStore {
    async fn save(&self, session: &ChatSession) -> Result<()> {
        let path = self.session_path(&session.id);
        let content =
            serde_json::to_string_pretty(session).context("failed to serialize session")?;
        tokio::fs::write(&path, content)
            .await
            .with_context(|| format!("failed to write session: {}", path.display()))?;
        debug!(id = %session.id, path = %path.display(), "saved session");
        Ok(())
    }

    async fn load(&self, id_or_name: &str) -> Result<ChatSession> {
        // Exact id first.
        let path = self.session_path(id_or_name);
        if path.exists() {
            return read_session(&path).await;
        }

        // Fall back to a unique name match.
        let matches: Vec<ChatSession> = self
            .load_all()
            .await?
            .into_iter()
            .filter(|s| s.name.as_deref() == Some(id_or_name))
            .collect();
        match matches.len() {
            0 => bail!("no session with id or name '{}'", id_or_name),
            1 => Ok(matches.into_iter().next().expect("one element")),
            n => bail!("name '{}' is ambiguous ({} sessions)", id_or_name, n),
        }
    }

    async fn list(&self) -> Result<Vec<SessionSummary>> {
        let mut summaries: Vec<SessionSummary> = self
            .load_all()
            .await?
            .iter()
            .map(SessionSummary::from)
            .collect();
        summaries.sort_by(|a, b| b.last_updated_at.cmp(&a.last_updated_at));
        Ok(summaries)
    }

    async fn delete(&self, id: &str) -> Result<()> {
        let path = self.session_path(id);
        if !path.exists() {
            bail!("no session with id '{}'", id);
        }
        tokio::fs::remove_file(&path)
            .await
            .with_context(|| format!("failed to delete session: {}", path.display()))?;
        debug!(id, "deleted session");
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Command history
// ---------------------------------------------------------------------------

/// Load the command-history lines, oldest first. A missing file is an
/// empty history.
pub fn load_history(path: &Path) -> Vec<String> {
    match std::fs::read_to_string(path) {
        Ok(content) => content.lines().map(|l| l.to_string()).collect(),
        Err(_) => Vec::new(),
    }
}

/// Persist history, truncated to the most recent [`HISTORY_MAX_LINES`].
pub fn save_history(path: &Path, lines: &[String]) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    let start = lines.len().saturating_sub(HISTORY_MAX_LINES);
    let mut content = lines[start..].join("\n");
    if !content.is_empty() {
        content.push('\n');
    }
    std::fs::write(path, content)
        .with_context(|| format!("failed to write history: {}", path.display()))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
