//! Backup Manager
//!
//! Pre-mutation snapshots for files touched by mutating tools. Backups
//! live alongside the original as `<path>.backup`; the in-memory record
//! history is bounded per file and discarded FIFO. Restore yields the
//! byte-exact pre-mutation contents.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::Utc;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::types::{BackupHistory, BackupRecord};

/// Most recent records kept per file.
pub const MAX_BACKUPS_PER_FILE: usize = 5;

/// Flat registry of backup histories keyed by absolute path.
pub struct BackupManager {
    records: Mutex<HashMap<PathBuf, BackupHistory>>,
}

impl BackupManager {
    pub fn new() -> Self {
        Self {
            records: Mutex::new(HashMap::new()),
        }
    }

    /// Path of the backup file for a target.
    pub fn backup_path(path: &Path) -> PathBuf {
        let mut name = path.as_os_str().to_os_string();
        name.push(".backup");
        PathBuf::from(name)
    }

    /// Snapshot `path` before a mutation by `tool`. The target must
    /// exist; callers skip the backup for new files.
    pub async fn create(&self, path: &Path, tool: &str) -> Result<BackupRecord> {
        let backup_path = Self::backup_path(path);
        tokio::fs::copy(path, &backup_path)
            .await
            .with_context(|| format!("failed to back up {}", path.display()))?;

        let record = BackupRecord {
            original_path: path.to_path_buf(),
            backup_path,
            tool: tool.to_string(),
            created_at: Utc::now(),
        };

        let mut records = self.records.lock().await;
        let history = records.entry(path.to_path_buf()).or_default();
        history.push_back(record.clone());
        while history.len() > MAX_BACKUPS_PER_FILE {
            let dropped = history.pop_front();
            debug!(path = %path.display(), dropped = dropped.is_some(), "discarded oldest backup record");
        }

        debug!(path = %path.display(), tool, "backup created");
        Ok(record)
    }

    /// Most recent record for a path, if any.
    pub async fn latest(&self, path: &Path) -> Option<BackupRecord> {
        self.records
            .lock()
            .await
            .get(path)
            .and_then(|h| h.back().cloned())
    }

    /// Restore the most recent backup of `path` over the current contents.
    pub async fn restore(&self, path: &Path) -> Result<BackupRecord> {
        let record = self
            .latest(path)
            .await
            .with_context(|| format!("no backup recorded for {}", path.display()))?;
        tokio::fs::copy(&record.backup_path, path)
            .await
            .with_context(|| format!("failed to restore {}", path.display()))?;
        info!(path = %path.display(), "restored from backup");
        Ok(record)
    }

    /// Number of records currently held for a path.
    pub async fn history_len(&self, path: &Path) -> usize {
        self.records
            .lock()
            .await
            .get(path)
            .map(|h| h.len())
            .unwrap_or(0)
    }
}

impl Default for BackupManager {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
