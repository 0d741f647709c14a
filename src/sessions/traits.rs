//! Session storage traits and types for per-user conversation history.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Who authored a turn.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single message in a user's conversation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Turn {
    pub role: Role,
    pub text: String,
    pub timestamp: DateTime<Utc>,
}

/// Read-only view of a session, as shown by `/history`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SessionSummary {
    pub user_id: String,
    pub turn_count: usize,
    pub first_at: Option<DateTime<Utc>>,
    pub last_at: Option<DateTime<Utc>>,
    /// Most recent turns, oldest first. At most [`SUMMARY_RECENT_TURNS`].
    pub recent: Vec<Turn>,
}

/// Number of trailing turns carried in a [`SessionSummary`].
pub const SUMMARY_RECENT_TURNS: usize = 5;

impl SessionSummary {
    pub fn empty(user_id: &str) -> Self {
        Self {
            user_id: user_id.to_string(),
            turn_count: 0,
            first_at: None,
            last_at: None,
            recent: Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.turn_count == 0
    }
}

/// Bounded per-user conversation history.
///
/// Every operation succeeds: unknown users read as empty sessions, and
/// clearing an unknown session is a no-op. Implementations must serialize
/// concurrent mutations of the same user so the bound is never lost.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Append a turn, creating the session if needed and evicting the
    /// oldest turns once the history bound is exceeded.
    async fn append(&self, user_id: &str, role: Role, text: &str);

    /// Ordered turns (oldest first) for inclusion in a completion request.
    async fn get_context(&self, user_id: &str) -> Vec<Turn>;

    /// Drop every turn for the user.
    async fn clear(&self, user_id: &str);

    /// Describe the session without mutating it.
    async fn summarize(&self, user_id: &str) -> SessionSummary;

    /// Number of sessions currently held.
    async fn session_count(&self) -> usize;

    /// The name of this session store implementation.
    fn name(&self) -> &str;
}
