//! In-memory session store implementation.

use async_trait::async_trait;
use chrono::Utc;
use lru::LruCache;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::num::NonZeroUsize;

use super::traits::{Role, SessionStore, SessionSummary, Turn, SUMMARY_RECENT_TURNS};

/// An in-memory session store backed by a mutex-protected LRU map.
///
/// `append` and `get_context` mark a session as recently active; when a
/// session cap is set, the least recently active session is dropped to make
/// room for a new user.
pub struct InMemorySessionStore {
    sessions: Mutex<LruCache<String, VecDeque<Turn>>>,
    max_history: usize,
}

impl InMemorySessionStore {
    /// Store with a per-user history bound and no cap on the number of users.
    pub fn new(max_history: usize) -> Self {
        Self::with_limits(max_history, None)
    }

    /// Store with a per-user history bound and an optional cap on the number
    /// of sessions held at once. `None` (or `Some(0)`) means unbounded.
    pub fn with_limits(max_history: usize, max_sessions: Option<usize>) -> Self {
        let sessions = match max_sessions.and_then(NonZeroUsize::new) {
            Some(cap) => LruCache::new(cap),
            None => LruCache::unbounded(),
        };
        Self {
            sessions: Mutex::new(sessions),
            max_history: max_history.max(1),
        }
    }

    pub fn max_history(&self) -> usize {
        self.max_history
    }
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    async fn append(&self, user_id: &str, role: Role, text: &str) {
        let turn = Turn {
            role,
            text: text.to_string(),
            timestamp: Utc::now(),
        };

        let mut sessions = self.sessions.lock();
        if !sessions.contains(user_id) {
            if let Some((evicted, turns)) = sessions.push(user_id.to_string(), VecDeque::new()) {
                tracing::debug!(
                    user_id = %evicted,
                    turns = turns.len(),
                    "evicted least recently active session"
                );
            }
        }

        if let Some(turns) = sessions.get_mut(user_id) {
            turns.push_back(turn);
            while turns.len() > self.max_history {
                turns.pop_front();
            }
        }
    }

    async fn get_context(&self, user_id: &str) -> Vec<Turn> {
        let mut sessions = self.sessions.lock();
        sessions
            .get(user_id)
            .map(|turns| turns.iter().cloned().collect())
            .unwrap_or_default()
    }

    async fn clear(&self, user_id: &str) {
        let mut sessions = self.sessions.lock();
        sessions.pop(user_id);
    }

    async fn summarize(&self, user_id: &str) -> SessionSummary {
        let sessions = self.sessions.lock();
        let Some(turns) = sessions.peek(user_id) else {
            return SessionSummary::empty(user_id);
        };

        let skip = turns.len().saturating_sub(SUMMARY_RECENT_TURNS);
        SessionSummary {
            user_id: user_id.to_string(),
            turn_count: turns.len(),
            first_at: turns.front().map(|t| t.timestamp),
            last_at: turns.back().map(|t| t.timestamp),
            recent: turns.iter().skip(skip).cloned().collect(),
        }
    }

    async fn session_count(&self) -> usize {
        self.sessions.lock().len()
    }

    fn name(&self) -> &str {
        "in_memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn texts(turns: &[Turn]) -> Vec<&str> {
        turns.iter().map(|t| t.text.as_str()).collect()
    }

    #[tokio::test]
    async fn append_and_get_context_preserves_order() {
        let store = InMemorySessionStore::new(10);
        store.append("alice", Role::User, "hi").await;
        store.append("alice", Role::Assistant, "hello").await;

        let turns = store.get_context("alice").await;
        assert_eq!(texts(&turns), ["hi", "hello"]);
        assert_eq!(turns[0].role, Role::User);
        assert_eq!(turns[1].role, Role::Assistant);
    }

    #[tokio::test]
    async fn oldest_turn_is_evicted_first() {
        let store = InMemorySessionStore::new(4);
        store.append("alice", Role::User, "U1").await;
        store.append("alice", Role::Assistant, "A1").await;
        store.append("alice", Role::User, "U2").await;
        store.append("alice", Role::Assistant, "A2").await;
        store.append("alice", Role::User, "U3").await;

        let turns = store.get_context("alice").await;
        assert_eq!(texts(&turns), ["A1", "U2", "A2", "U3"]);
    }

    #[tokio::test]
    async fn history_never_exceeds_bound() {
        let store = InMemorySessionStore::new(3);
        for i in 0..50 {
            store.append("alice", Role::User, &format!("m{i}")).await;
            assert!(store.get_context("alice").await.len() <= 3);
        }
        let turns = store.get_context("alice").await;
        assert_eq!(texts(&turns), ["m47", "m48", "m49"]);
    }

    #[tokio::test]
    async fn zero_bound_is_clamped_to_one() {
        let store = InMemorySessionStore::new(0);
        assert_eq!(store.max_history(), 1);
        store.append("alice", Role::User, "a").await;
        store.append("alice", Role::User, "b").await;
        assert_eq!(texts(&store.get_context("alice").await), ["b"]);
    }

    #[tokio::test]
    async fn unknown_user_reads_as_empty() {
        let store = InMemorySessionStore::new(4);
        assert!(store.get_context("nobody").await.is_empty());
        let summary = store.summarize("nobody").await;
        assert!(summary.is_empty());
        assert_eq!(store.session_count().await, 0);
    }

    #[tokio::test]
    async fn clear_empties_history_and_is_idempotent() {
        let store = InMemorySessionStore::new(4);
        store.clear("nobody").await;
        assert!(store.get_context("nobody").await.is_empty());

        store.append("alice", Role::User, "hi").await;
        store.clear("alice").await;
        assert!(store.get_context("alice").await.is_empty());
        store.clear("alice").await;
        assert!(store.get_context("alice").await.is_empty());
    }

    #[tokio::test]
    async fn summarize_reports_count_and_timestamps() {
        let store = InMemorySessionStore::new(10);
        store.append("alice", Role::User, "one").await;
        store.append("alice", Role::Assistant, "two").await;
        store.append("alice", Role::User, "three").await;

        let turns = store.get_context("alice").await;
        let summary = store.summarize("alice").await;
        assert_eq!(summary.turn_count, 3);
        assert_eq!(summary.first_at, Some(turns[0].timestamp));
        assert_eq!(summary.last_at, Some(turns[2].timestamp));
        assert_eq!(summary.recent, turns);
    }

    #[tokio::test]
    async fn summarize_keeps_only_recent_turns_and_does_not_mutate() {
        let store = InMemorySessionStore::new(20);
        for i in 0..8 {
            store.append("alice", Role::User, &format!("m{i}")).await;
        }

        let summary = store.summarize("alice").await;
        assert_eq!(summary.turn_count, 8);
        assert_eq!(summary.recent.len(), SUMMARY_RECENT_TURNS);
        assert_eq!(summary.recent[0].text, "m3");
        assert_eq!(store.get_context("alice").await.len(), 8);
    }

    #[tokio::test]
    async fn users_do_not_observe_each_other() {
        let store = InMemorySessionStore::new(4);
        store.append("bob", Role::User, "bob says").await;
        let before = store.get_context("bob").await;

        for i in 0..10 {
            store.append("alice", Role::User, &format!("alice {i}")).await;
        }

        assert_eq!(store.get_context("bob").await, before);
        assert!(store
            .get_context("alice")
            .await
            .iter()
            .all(|t| t.text.starts_with("alice")));
    }

    #[tokio::test]
    async fn session_cap_evicts_least_recently_active() {
        let store = InMemorySessionStore::with_limits(4, Some(2));
        store.append("alice", Role::User, "a").await;
        store.append("bob", Role::User, "b").await;
        // alice becomes the most recently active session
        let _ = store.get_context("alice").await;

        store.append("carol", Role::User, "c").await;

        assert_eq!(store.session_count().await, 2);
        assert!(store.get_context("bob").await.is_empty());
        assert_eq!(texts(&store.get_context("alice").await), ["a"]);
        assert_eq!(texts(&store.get_context("carol").await), ["c"]);
    }

    #[tokio::test]
    async fn summarize_does_not_count_as_activity() {
        let store = InMemorySessionStore::with_limits(4, Some(2));
        store.append("alice", Role::User, "a").await;
        store.append("bob", Role::User, "b").await;
        let _ = store.summarize("alice").await;

        store.append("carol", Role::User, "c").await;

        assert!(store.get_context("alice").await.is_empty());
        assert_eq!(texts(&store.get_context("bob").await), ["b"]);
    }

    #[tokio::test]
    async fn zero_session_cap_means_unbounded() {
        let store = InMemorySessionStore::with_limits(4, Some(0));
        for i in 0..100 {
            store.append(&format!("user-{i}"), Role::User, "hi").await;
        }
        assert_eq!(store.session_count().await, 100);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_appends_respect_bound_and_isolation() {
        let store = Arc::new(InMemorySessionStore::new(16));
        let mut handles = Vec::new();

        for task in 0..8 {
            let store = Arc::clone(&store);
            handles.push(tokio::spawn(async move {
                for i in 0..50 {
                    store
                        .append("alice", Role::User, &format!("alice {task}-{i}"))
                        .await;
                    store
                        .append("bob", Role::User, &format!("bob {task}-{i}"))
                        .await;
                }
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let alice = store.get_context("alice").await;
        let bob = store.get_context("bob").await;
        assert_eq!(alice.len(), 16);
        assert_eq!(bob.len(), 16);
        assert!(alice.iter().all(|t| t.text.starts_with("alice")));
        assert!(bob.iter().all(|t| t.text.starts_with("bob")));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_appends_below_bound_lose_nothing() {
        let store = Arc::new(InMemorySessionStore::new(1_000));
        let mut handles = Vec::new();

        for task in 0..10 {
            let store = Arc::clone(&store);
            handles.push(tokio::spawn(async move {
                for i in 0..20 {
                    store
                        .append("alice", Role::User, &format!("{task}-{i}"))
                        .await;
                }
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(store.get_context("alice").await.len(), 200);
    }
}
