//! Conversation state store
//!
//! Owns per-user session state: slots, intent history, a bounded context
//! stack and bounded turn memory, counters and lifecycle. Sessions live in
//! an in-memory registry backed by an optional persistence collaborator;
//! sessions idle past the configured age are persisted then evicted.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration as StdDuration;
use tokio::sync::RwLock;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::config::EngineConfig;
use crate::error::{EngineError, EngineResult};
use crate::value_objects::{
    ContextFrame, IntentHistoryEntry, LifecycleStage, Slot, TurnRecord,
};

/// Per-user conversation session.
///
/// The session exclusively owns its slots, context stack and turn memory.
/// Persona state and suggestion history live with their own components so
/// they survive session eviction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    /// Owning user
    pub user_id: String,
    /// Unique id for this session instance
    pub session_id: Uuid,
    /// Current lifecycle stage
    pub lifecycle: LifecycleStage,
    /// Extracted slots, keyed by name
    pub slots: HashMap<String, Slot>,
    /// Bounded context stack, oldest evicted first
    pub context_stack: VecDeque<ContextFrame>,
    /// Bounded turn memory, oldest evicted first
    pub turn_memory: VecDeque<TurnRecord>,
    /// Append-only intent history
    pub intent_history: Vec<IntentHistoryEntry>,
    /// Completed turns
    pub turn_count: u32,
    /// Times the user asked for clarification
    pub clarification_requests: u32,
    /// Successfully resolved requests
    pub successful_resolutions: u32,
    /// When the session was created
    pub created_at: DateTime<Utc>,
    /// Last mutating activity
    pub last_activity_at: DateTime<Utc>,
}

impl Session {
    /// Create a fresh session for a user.
    pub fn new(user_id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            user_id: user_id.into(),
            session_id: Uuid::new_v4(),
            lifecycle: LifecycleStage::Initial,
            slots: HashMap::new(),
            context_stack: VecDeque::new(),
            turn_memory: VecDeque::new(),
            intent_history: Vec::new(),
            turn_count: 0,
            clarification_requests: 0,
            successful_resolutions: 0,
            created_at: now,
            last_activity_at: now,
        }
    }

    /// Append a turn, evicting the oldest when over `cap`.
    ///
    /// This is the single place `turn_count` is incremented.
    pub fn record_turn(&mut self, record: TurnRecord, cap: usize) {
        self.turn_memory.push_back(record);
        while self.turn_memory.len() > cap {
            self.turn_memory.pop_front();
        }
        self.turn_count += 1;
        self.last_activity_at = Utc::now();
    }

    /// Push a context frame stamped with the current turn number,
    /// evicting the oldest when over `cap`.
    pub fn push_context(&mut self, value: serde_json::Value, cap: usize) {
        self.context_stack.push_back(ContextFrame {
            turn_number: self.turn_count,
            timestamp: Utc::now(),
            value,
        });
        while self.context_stack.len() > cap {
            self.context_stack.pop_front();
        }
        self.last_activity_at = Utc::now();
    }

    /// Set or overwrite a slot.
    ///
    /// A weaker re-affirmation of the stored value refreshes its timestamp
    /// but keeps the stronger confidence and source.
    pub fn set_slot(&mut self, slot: Slot) {
        match self.slots.get_mut(&slot.name) {
            Some(existing)
                if existing.value == slot.value && existing.confidence >= slot.confidence =>
            {
                existing.timestamp = slot.timestamp;
            }
            _ => {
                self.slots.insert(slot.name.clone(), slot);
            }
        }
        self.last_activity_at = Utc::now();
    }

    /// Get a slot if it is still valid at `now`.
    pub fn get_slot(&self, name: &str, now: DateTime<Utc>, api_ttl_minutes: i64) -> Option<&Slot> {
        self.slots
            .get(name)
            .filter(|slot| slot.is_valid(now, api_ttl_minutes))
    }

    /// Append an intent history entry.
    pub fn record_intent(&mut self, entry: IntentHistoryEntry) {
        self.intent_history.push(entry);
    }

    /// The most recent `n` turns, oldest first.
    pub fn recent_turns(&self, n: usize) -> Vec<&TurnRecord> {
        let skip = self.turn_memory.len().saturating_sub(n);
        self.turn_memory.iter().skip(skip).collect()
    }

    /// Turns per minute since the session started.
    pub fn turns_per_minute(&self, now: DateTime<Utc>) -> f32 {
        let minutes = now
            .signed_duration_since(self.created_at)
            .num_seconds()
            .max(1) as f32
            / 60.0;
        self.turn_count as f32 / minutes
    }

    /// Whether the session has been idle longer than `max_age_hours`.
    pub fn is_expired(&self, now: DateTime<Utc>, max_age_hours: i64) -> bool {
        now.signed_duration_since(self.last_activity_at) > Duration::hours(max_age_hours)
    }
}

/// Persistence contract for session blobs.
///
/// Implementations may be backed by any cache/database combination; the
/// store treats them as at-least-once and best-effort. Retry and caching
/// policy is the implementor's concern.
#[async_trait::async_trait]
pub trait SessionRepository: Send + Sync {
    /// Load a session, `None` when the user has none persisted.
    async fn load(&self, user_id: &str) -> EngineResult<Option<Session>>;

    /// Persist a session, returning whether the write was accepted.
    async fn save(&self, user_id: &str, session: &Session) -> EngineResult<bool>;
}

/// In-memory repository used in tests and single-process hosts.
#[derive(Default)]
pub struct InMemorySessionRepository {
    sessions: RwLock<HashMap<String, Session>>,
}

impl InMemorySessionRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl SessionRepository for InMemorySessionRepository {
    async fn load(&self, user_id: &str) -> EngineResult<Option<Session>> {
        Ok(self.sessions.read().await.get(user_id).cloned())
    }

    async fn save(&self, user_id: &str, session: &Session) -> EngineResult<bool> {
        self.sessions
            .write()
            .await
            .insert(user_id.to_string(), session.clone());
        Ok(true)
    }
}

/// Aggregate statistics over the live session registry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionStats {
    pub active_sessions: usize,
    pub total_turns: u64,
    pub average_turn_count: f64,
}

/// In-memory session registry with a persistence backing.
pub struct SessionStore {
    registry: RwLock<HashMap<String, Session>>,
    repository: Arc<dyn SessionRepository>,
    config: EngineConfig,
}

impl SessionStore {
    pub fn new(repository: Arc<dyn SessionRepository>, config: EngineConfig) -> Self {
        Self {
            registry: RwLock::new(HashMap::new()),
            repository,
            config,
        }
    }

    /// Get the live session for a user, loading from persistence when the
    /// registry misses, or creating a fresh one.
    ///
    /// Persistence load is bounded by the configured timeout; on timeout
    /// or failure the user gets a cold-start session rather than a hang.
    pub async fn get_or_create(&self, user_id: &str) -> Session {
        if let Some(session) = self.registry.read().await.get(user_id) {
            return session.clone();
        }

        let loaded = self.load_bounded(user_id).await;
        let session = match loaded {
            Ok(Some(session)) => {
                debug!(user_id, "session restored from persistence");
                session
            }
            Ok(None) => Session::new(user_id),
            Err(err) => {
                warn!(user_id, error = %err, "session load failed, starting cold");
                Session::new(user_id)
            }
        };

        let mut registry = self.registry.write().await;
        registry
            .entry(user_id.to_string())
            .or_insert(session)
            .clone()
    }

    /// Replace the live session for a user.
    pub async fn put(&self, session: Session) {
        self.registry
            .write()
            .await
            .insert(session.user_id.clone(), session);
    }

    /// Record a completed turn for a user.
    pub async fn record_turn(
        &self,
        user_id: &str,
        user_message: &str,
        system_response: &str,
        metadata: HashMap<String, serde_json::Value>,
    ) {
        let mut registry = self.registry.write().await;
        let session = registry
            .entry(user_id.to_string())
            .or_insert_with(|| Session::new(user_id));
        session.record_turn(
            TurnRecord::new(user_message, system_response, metadata),
            self.config.turn_memory_cap,
        );
    }

    /// Push a context frame for a user.
    pub async fn push_context(&self, user_id: &str, value: serde_json::Value) {
        let mut registry = self.registry.write().await;
        let session = registry
            .entry(user_id.to_string())
            .or_insert_with(|| Session::new(user_id));
        session.push_context(value, self.config.context_stack_cap);
    }

    /// Set a slot on a user's session.
    pub async fn set_slot(&self, user_id: &str, slot: Slot) {
        let mut registry = self.registry.write().await;
        let session = registry
            .entry(user_id.to_string())
            .or_insert_with(|| Session::new(user_id));
        session.set_slot(slot);
    }

    /// Read a slot, applying the API-response validity window.
    pub async fn get_slot(&self, user_id: &str, name: &str) -> Option<Slot> {
        let registry = self.registry.read().await;
        registry.get(user_id).and_then(|session| {
            session
                .get_slot(name, Utc::now(), self.config.api_slot_ttl_minutes)
                .cloned()
        })
    }

    /// Persist then evict sessions idle longer than `max_age_hours`.
    ///
    /// Returns the number of evicted sessions. A failed save still evicts:
    /// the session is past its lifetime either way.
    pub async fn cleanup_inactive(&self, max_age_hours: i64) -> usize {
        let now = Utc::now();
        let expired: Vec<Session> = {
            let registry = self.registry.read().await;
            registry
                .values()
                .filter(|s| s.is_expired(now, max_age_hours))
                .cloned()
                .collect()
        };

        for session in &expired {
            if let Err(err) = self.save_bounded(&session.user_id, session).await {
                warn!(user_id = %session.user_id, error = %err, "save before eviction failed");
            }
        }

        let mut registry = self.registry.write().await;
        for session in &expired {
            registry.remove(&session.user_id);
        }
        expired.len()
    }

    /// Persist a user's live session, bounded by the configured timeout.
    pub async fn persist(&self, user_id: &str) -> EngineResult<bool> {
        let session = {
            let registry = self.registry.read().await;
            registry.get(user_id).cloned()
        };
        match session {
            Some(session) => self.save_bounded(user_id, &session).await,
            None => Ok(false),
        }
    }

    /// Statistics over the live registry.
    pub async fn stats(&self) -> SessionStats {
        let registry = self.registry.read().await;
        let total_turns: u64 = registry.values().map(|s| s.turn_count as u64).sum();
        let active = registry.len();
        SessionStats {
            active_sessions: active,
            total_turns,
            average_turn_count: if active == 0 {
                0.0
            } else {
                total_turns as f64 / active as f64
            },
        }
    }

    async fn load_bounded(&self, user_id: &str) -> EngineResult<Option<Session>> {
        let bound = StdDuration::from_millis(self.config.persistence_timeout_ms);
        match tokio::time::timeout(bound, self.repository.load(user_id)).await {
            Ok(result) => result,
            Err(_) => Err(EngineError::PersistenceUnavailable(format!(
                "load timed out after {}ms",
                self.config.persistence_timeout_ms
            ))),
        }
    }

    async fn save_bounded(&self, user_id: &str, session: &Session) -> EngineResult<bool> {
        let bound = StdDuration::from_millis(self.config.persistence_timeout_ms);
        match tokio::time::timeout(bound, self.repository.save(user_id, session)).await {
            Ok(result) => result,
            Err(_) => Err(EngineError::PersistenceUnavailable(format!(
                "save timed out after {}ms",
                self.config.persistence_timeout_ms
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value_objects::SlotSource;
    use serde_json::json;

    fn store() -> SessionStore {
        SessionStore::new(
            Arc::new(InMemorySessionRepository::new()),
            EngineConfig::default(),
        )
    }

    #[test]
    fn test_turn_memory_cap() {
        let mut session = Session::new("u1");
        for i in 0..80 {
            session.record_turn(
                TurnRecord::new(format!("msg {i}"), "ok", HashMap::new()),
                50,
            );
        }
        assert_eq!(session.turn_memory.len(), 50);
        assert_eq!(session.turn_count, 80);
        // Oldest evicted first
        assert_eq!(session.turn_memory.front().unwrap().user_message, "msg 30");
    }

    #[test]
    fn test_context_stack_cap() {
        let mut session = Session::new("u1");
        for i in 0..25 {
            session.push_context(json!({ "n": i }), 10);
        }
        assert_eq!(session.context_stack.len(), 10);
        assert_eq!(session.context_stack.front().unwrap().value["n"], 15);
    }

    #[test]
    fn test_set_slot_keeps_stronger_record_for_same_value() {
        let mut session = Session::new("u1");
        session.set_slot(Slot::new("topic", "defi", 0.8, SlotSource::UserInput));

        // A lower-confidence carry-forward of the same value refreshes the
        // timestamp without weakening the stored record
        let mut carried = Slot::new("topic", "defi", 0.6, SlotSource::ContextInference);
        carried.timestamp = Utc::now() + Duration::minutes(5);
        session.set_slot(carried.clone());
        let stored = session.slots.get("topic").unwrap();
        assert_eq!(stored.confidence, 0.8);
        assert_eq!(stored.source, SlotSource::UserInput);
        assert_eq!(stored.timestamp, carried.timestamp);

        // A different value replaces outright
        session.set_slot(Slot::new("topic", "nft", 0.6, SlotSource::ContextInference));
        assert_eq!(session.slots.get("topic").unwrap().value, "nft");
    }

    #[test]
    fn test_expiry() {
        let mut session = Session::new("u1");
        let now = Utc::now();
        session.last_activity_at = now - Duration::hours(25);
        assert!(session.is_expired(now, 24));
        session.last_activity_at = now - Duration::hours(23);
        assert!(!session.is_expired(now, 24));
    }

    #[tokio::test]
    async fn test_get_or_create_is_stable() {
        let store = store();
        let first = store.get_or_create("u1").await;
        let second = store.get_or_create("u1").await;
        assert_eq!(first.session_id, second.session_id);
    }

    #[tokio::test]
    async fn test_slot_roundtrip_with_expiry() {
        let store = store();
        store.get_or_create("u1").await;

        store
            .set_slot("u1", Slot::new("topic", "defi", 0.8, SlotSource::UserInput))
            .await;
        assert_eq!(store.get_slot("u1", "topic").await.unwrap().value, "defi");

        let mut stale = Slot::new("venue", "api hall", 0.9, SlotSource::ApiResponse);
        stale.timestamp = Utc::now() - Duration::minutes(61);
        store.set_slot("u1", stale).await;
        assert!(store.get_slot("u1", "venue").await.is_none());
    }

    #[tokio::test]
    async fn test_cleanup_persists_then_evicts() {
        let repo = Arc::new(InMemorySessionRepository::new());
        let store = SessionStore::new(repo.clone(), EngineConfig::default());

        let mut session = store.get_or_create("idle").await;
        session.last_activity_at = Utc::now() - Duration::hours(30);
        store.put(session).await;
        store.get_or_create("fresh").await;

        let evicted = store.cleanup_inactive(24).await;
        assert_eq!(evicted, 1);
        assert_eq!(store.stats().await.active_sessions, 1);

        // Evicted session was saved and is restorable
        let restored = repo.load("idle").await.unwrap();
        assert!(restored.is_some());
    }

    #[tokio::test]
    async fn test_record_turn_counts_once() {
        let store = store();
        store.get_or_create("u1").await;
        store.record_turn("u1", "hello", "hi", HashMap::new()).await;
        store.push_context("u1", json!({"k": "v"})).await;
        store
            .set_slot("u1", Slot::new("topic", "defi", 0.8, SlotSource::UserInput))
            .await;

        let session = store.get_or_create("u1").await;
        // Only record_turn increments the counter
        assert_eq!(session.turn_count, 1);
    }
}
