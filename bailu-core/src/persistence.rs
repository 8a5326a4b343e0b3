//! Session Persistence
//!
//! The `SessionStore` trait and the data it stores: one named chat
//! session per JSON file. The filesystem implementation lives in
//! `bailu-store-fs`.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::types::{IterationStats, Message};

// ---------------------------------------------------------------------------
// Data types
// ---------------------------------------------------------------------------

/// A persisted chat session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatSession {
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub created_at: DateTime<Utc>,
    pub last_updated_at: DateTime<Utc>,
    pub messages: Vec<Message>,
    #[serde(default)]
    pub stats: IterationStats,
    /// Files the session has touched, for the next run's memory section.
    #[serde(default)]
    pub active_files: Vec<String>,
}

impl ChatSession {
    pub fn new() -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            name: None,
            created_at: now,
            last_updated_at: now,
            messages: Vec::new(),
            stats: IterationStats::default(),
            active_files: Vec::new(),
        }
    }

    pub fn touch(&mut self) {
        self.last_updated_at = Utc::now();
    }
}

impl Default for ChatSession {
    fn default() -> Self {
        Self::new()
    }
}

/// Listing entry; cheap to build without loading message bodies.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSummary {
    pub id: String,
    pub name: Option<String>,
    pub created_at: DateTime<Utc>,
    pub last_updated_at: DateTime<Utc>,
    pub message_count: usize,
}

impl From<&ChatSession> for SessionSummary {
    fn from(session: &ChatSession) -> Self {
        Self {
            id: session.id.clone(),
            name: session.name.clone(),
            created_at: session.created_at,
            last_updated_at: session.last_updated_at,
            message_count: session.messages.len(),
        }
    }
}

// ---------------------------------------------------------------------------
// SessionStore trait
// ---------------------------------------------------------------------------

/// Persists sessions under a per-user directory.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Write a session, overwriting any previous file for its id.
    async fn save(&self, session: &ChatSession) -> Result<()>;

    /// Load by exact id, falling back to a unique name match.
    async fn load(&self, id_or_name: &str) -> Result<ChatSession>;

    /// All stored sessions, newest update first.
    async fn list(&self) -> Result<Vec<SessionSummary>>;

    async fn delete(&self, id: &str) -> Result<()>;
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
