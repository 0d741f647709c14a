//! Session management: bounded per-user conversation history.

pub mod in_memory;
pub mod traits;

pub use in_memory::InMemorySessionStore;
pub use traits::{Role, SessionStore, SessionSummary, Turn, SUMMARY_RECENT_TURNS};

use crate::config::SessionsConfig;
use std::sync::Arc;

/// Create the session store described by `[sessions]`.
pub fn create_session_store(config: &SessionsConfig) -> Arc<dyn SessionStore> {
    let max_sessions = (config.max_sessions > 0).then_some(config.max_sessions);
    Arc::new(InMemorySessionStore::with_limits(
        config.max_history_length,
        max_sessions,
    ))
}
