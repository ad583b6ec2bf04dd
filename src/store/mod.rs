//! In-memory session registry.
//!
//! Tracks live and recently finished sessions with a TTL so operators can
//! inspect what the gateway has been doing without an external store.
//! Entries expire on their own; nothing here is durable.

use std::sync::Arc;
use std::time::{Duration, SystemTime};

use moka::future::Cache;
use serde::Serialize;

use crate::core::session::SessionOutcome;

/// A session's registry entry.
#[derive(Debug, Clone, Serialize)]
pub struct SessionRecord {
    pub session_id: String,
    pub conversation_id: String,
    /// Lifecycle state label, updated as the session progresses.
    pub state: String,
    pub backend: String,
    pub started_at: SystemTime,
    /// Final outcome label, present once the session ends.
    pub outcome: Option<String>,
}

/// TTL-bounded registry of sessions.
#[derive(Clone)]
pub struct SessionStore {
    cache: Arc<Cache<String, SessionRecord>>,
}

impl SessionStore {
    pub fn new(ttl_secs: u64) -> Self {
        let cache = Cache::builder()
            .time_to_live(Duration::from_secs(ttl_secs.max(1)))
            .max_capacity(10_000)
            .build();
        Self {
            cache: Arc::new(cache),
        }
    }

    /// Register a session at open time.
    pub async fn insert(&self, record: SessionRecord) {
        self.cache.insert(record.session_id.clone(), record).await;
    }

    /// Update the state label of a live session.
    pub async fn set_state(&self, session_id: &str, state: &str) {
        if let Some(mut record) = self.cache.get(session_id).await {
            record.state = state.to_string();
            self.cache.insert(session_id.to_string(), record).await;
        }
    }

    /// Record the final outcome at disconnect.
    pub async fn finish(&self, session_id: &str, outcome: &SessionOutcome) {
        if let Some(mut record) = self.cache.get(session_id).await {
            record.state = "closed".to_string();
            record.outcome = Some(
                outcome
                    .output_variables()
                    .get("CALL_OUTCOME")
                    .cloned()
                    .unwrap_or_default(),
            );
            self.cache.insert(session_id.to_string(), record).await;
        }
    }

    pub async fn get(&self, session_id: &str) -> Option<SessionRecord> {
        self.cache.get(session_id).await
    }

    /// Number of tracked sessions, live and recently finished. Approximate
    /// until pending cache maintenance runs.
    pub fn len(&self) -> u64 {
        self.cache.entry_count()
    }

    /// Flush pending cache maintenance so `len` is accurate.
    pub async fn run_pending_tasks(&self) {
        self.cache.run_pending_tasks().await;
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::session::{TerminationOutcome, UsageCounters};

    fn record(id: &str) -> SessionRecord {
        SessionRecord {
            session_id: id.to_string(),
            conversation_id: format!("conv-{id}"),
            state: "active".to_string(),
            backend: "openai".to_string(),
            started_at: SystemTime::now(),
            outcome: None,
        }
    }

    #[tokio::test]
    async fn test_insert_and_get() {
        let store = SessionStore::new(60);
        store.insert(record("s1")).await;
        let found = store.get("s1").await.unwrap();
        assert_eq!(found.conversation_id, "conv-s1");
        assert!(store.get("s2").await.is_none());
    }

    #[tokio::test]
    async fn test_state_update() {
        let store = SessionStore::new(60);
        store.insert(record("s1")).await;
        store.set_state("s1", "draining").await;
        assert_eq!(store.get("s1").await.unwrap().state, "draining");
        // Updating a missing session is a no-op
        store.set_state("s2", "draining").await;
        assert!(store.get("s2").await.is_none());
    }

    #[tokio::test]
    async fn test_finish_records_outcome() {
        let store = SessionStore::new(60);
        store.insert(record("s1")).await;
        let outcome = SessionOutcome {
            termination: TerminationOutcome::Success {
                summary: "done".to_string(),
            },
            usage: UsageCounters::default(),
            transcript: Vec::new(),
            duration: Duration::from_secs(30),
        };
        store.finish("s1", &outcome).await;
        let found = store.get("s1").await.unwrap();
        assert_eq!(found.state, "closed");
        assert_eq!(found.outcome.as_deref(), Some("SUCCESS"));
    }
}
