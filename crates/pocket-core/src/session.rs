//! Session Management
//!
//! Each session owns its conversation history and context store. The
//! manager is the only way to reach them. A query holds the session's
//! conversation lock for its whole duration, so one session never runs
//! two loops at once; facts and the exchange log sit behind a separate
//! short-lived lock.

use std::str::FromStr;
use std::sync::{Arc, Mutex as StdMutex, PoisonError};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;

use crate::context::{ContextProfile, ContextStore};
use crate::error::{AgentError, Result};
use crate::message::Conversation;

/// Unique session identifier
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(String);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn from_string(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A query and the answer it got, for display
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Exchange {
    pub query: String,
    pub response: String,
    pub timestamp: DateTime<Utc>,
}

/// Facts and exchange log of a session.
///
/// Guarded by a plain mutex that is never held across an await, so the
/// show/clear commands answer immediately even while a query runs.
#[derive(Debug)]
pub struct SessionState {
    /// Facts remembered from user text
    pub context: ContextStore,

    exchanges: Vec<Exchange>,

    /// History was cleared while the conversation was in use
    reset_pending: bool,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl SessionState {
    pub fn new(context: ContextStore) -> Self {
        let now = Utc::now();
        Self {
            context,
            exchanges: Vec::new(),
            reset_pending: false,
            created_at: now,
            updated_at: now,
        }
    }

    /// Update the activity timestamp
    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }

    pub fn record_exchange(&mut self, query: impl Into<String>, response: impl Into<String>) {
        self.exchanges.push(Exchange {
            query: query.into(),
            response: response.into(),
            timestamp: Utc::now(),
        });
        self.touch();
    }

    pub fn exchanges(&self) -> &[Exchange] {
        &self.exchanges
    }

    /// Up to `n` most recent exchanges, oldest first
    pub fn recent_exchanges(&self, n: usize) -> &[Exchange] {
        let start = self.exchanges.len().saturating_sub(n);
        &self.exchanges[start..]
    }

    /// Duration since creation
    pub fn duration(&self) -> chrono::Duration {
        self.updated_at - self.created_at
    }

    /// Take the pending conversation reset, if any
    pub fn take_reset(&mut self) -> bool {
        std::mem::take(&mut self.reset_pending)
    }
}

/// One live session: the model-facing conversation, held for a whole
/// query, and the short-lived [`SessionState`].
#[derive(Debug)]
pub struct Session {
    pub id: SessionId,
    conversation: Arc<Mutex<Conversation>>,
    state: StdMutex<SessionState>,
}

impl Session {
    fn new(id: SessionId, context: ContextStore) -> Self {
        Self {
            id,
            conversation: Arc::new(Mutex::new(Conversation::new())),
            state: StdMutex::new(SessionState::new(context)),
        }
    }

    /// Short critical section over facts and exchanges
    pub fn with_state<R>(&self, f: impl FnOnce(&mut SessionState) -> R) -> R {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut state)
    }

    /// Drop history; remembered context is kept.
    ///
    /// A conversation in use by a running query is reset once that query
    /// lets go of it.
    pub fn clear_history(&self) {
        let reset_now = match self.conversation.try_lock() {
            Ok(mut conversation) => {
                conversation.clear();
                true
            }
            Err(_) => false,
        };
        self.with_state(|state| {
            state.exchanges.clear();
            state.reset_pending = !reset_now;
            state.touch();
        });
    }
}

pub type SessionHandle = Arc<Session>;

/// Exclusive use of a session's conversation for one query
pub struct ActiveQuery {
    pub session: SessionHandle,
    pub conversation: OwnedMutexGuard<Conversation>,
}

impl ActiveQuery {
    fn new(session: SessionHandle, mut conversation: OwnedMutexGuard<Conversation>) -> Self {
        if session.with_state(SessionState::take_reset) {
            conversation.clear();
        }
        Self { session, conversation }
    }
}

/// What to do with a query for a session that is already busy
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConcurrencyPolicy {
    /// Wait for the running query to finish
    #[default]
    Queue,
    /// Fail immediately with `SessionBusy`
    Reject,
}

impl FromStr for ConcurrencyPolicy {
    type Err = AgentError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "queue" => Ok(Self::Queue),
            "reject" => Ok(Self::Reject),
            other => Err(AgentError::Config(format!(
                "unknown concurrency policy '{}' (expected queue or reject)",
                other
            ))),
        }
    }
}

/// Owns every live session
pub struct SessionManager {
    sessions: DashMap<SessionId, SessionHandle>,
    profile: Arc<ContextProfile>,
    policy: ConcurrencyPolicy,
}

impl SessionManager {
    pub fn new(profile: Arc<ContextProfile>, policy: ConcurrencyPolicy) -> Self {
        Self {
            sessions: DashMap::new(),
            profile,
            policy,
        }
    }

    pub fn policy(&self) -> ConcurrencyPolicy {
        self.policy
    }

    /// Existing session or a fresh one. Idempotent.
    pub fn get_or_create(&self, id: &SessionId) -> SessionHandle {
        self.sessions
            .entry(id.clone())
            .or_insert_with(|| {
                tracing::debug!(session_id = %id, "Creating session");
                Arc::new(Session::new(id.clone(), ContextStore::new(self.profile.clone())))
            })
            .clone()
    }

    /// Exclusive access to the conversation for one query, following the
    /// concurrency policy
    pub async fn acquire(&self, id: &SessionId) -> Result<ActiveQuery> {
        let session = self.get_or_create(id);
        let conversation = match self.policy {
            ConcurrencyPolicy::Queue => session.conversation.clone().lock_owned().await,
            ConcurrencyPolicy::Reject => session.conversation.clone().try_lock_owned().map_err(|_| {
                tracing::warn!(session_id = %id, "Rejecting query; session busy");
                AgentError::SessionBusy(id.to_string())
            })?,
        };
        Ok(ActiveQuery::new(session, conversation))
    }

    /// Drop a session entirely
    pub fn remove(&self, id: &SessionId) -> bool {
        let Some((_, session)) = self.sessions.remove(id) else {
            return false;
        };
        let active_secs = session.with_state(|state| state.duration().num_seconds());
        tracing::debug!(session_id = %id, active_secs, "Removed session");
        true
    }

    /// Exchange log; empty for unknown sessions
    pub fn history(&self, id: &SessionId) -> Vec<Exchange> {
        self.handle(id)
            .map(|session| session.with_state(|state| state.exchanges().to_vec()))
            .unwrap_or_default()
    }

    /// Up to `n` most recent exchanges, oldest first
    pub fn recent_history(&self, id: &SessionId, n: usize) -> Vec<Exchange> {
        self.handle(id)
            .map(|session| session.with_state(|state| state.recent_exchanges(n).to_vec()))
            .unwrap_or_default()
    }

    /// Reset history of an existing session
    pub fn clear(&self, id: &SessionId) {
        if let Some(session) = self.handle(id) {
            session.clear_history();
        }
    }

    pub fn contains(&self, id: &SessionId) -> bool {
        self.sessions.contains_key(id)
    }

    /// Number of live sessions
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    /// Check if empty
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    fn handle(&self, id: &SessionId) -> Option<SessionHandle> {
        self.sessions.get(id).map(|entry| entry.value().clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::Message;

    fn manager(policy: ConcurrencyPolicy) -> SessionManager {
        SessionManager::new(Arc::new(ContextProfile::new()), policy)
    }

    #[tokio::test]
    async fn test_get_or_create_is_idempotent() {
        let sessions = manager(ConcurrencyPolicy::Queue);
        let id = SessionId::new();

        let a = sessions.get_or_create(&id);
        a.with_state(|state| state.record_exchange("q", "r"));
        let b = sessions.get_or_create(&id);

        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(sessions.len(), 1);
        assert_eq!(sessions.history(&id).len(), 1);
    }

    #[tokio::test]
    async fn test_remove_starts_fresh() {
        let sessions = manager(ConcurrencyPolicy::Queue);
        let id = SessionId::from_string("ws-1");
        sessions.get_or_create(&id).with_state(|state| state.context.remember("k", "v"));

        assert!(sessions.remove(&id));
        assert!(!sessions.remove(&id));
        assert!(sessions.is_empty());

        let fresh = sessions.get_or_create(&id);
        assert!(fresh.with_state(|state| state.context.get("k").is_none()));
    }

    #[tokio::test]
    async fn test_sessions_are_isolated() {
        let sessions = manager(ConcurrencyPolicy::Queue);
        let (a, b) = (SessionId::new(), SessionId::new());
        sessions.get_or_create(&a).with_state(|state| state.context.remember("k", "a"));

        assert!(sessions.get_or_create(&b).with_state(|state| state.context.get("k").is_none()));
    }

    #[tokio::test]
    async fn test_clear_keeps_context() {
        let sessions = manager(ConcurrencyPolicy::Queue);
        let id = SessionId::new();
        sessions.get_or_create(&id).with_state(|state| {
            state.record_exchange("q", "r");
            state.context.remember("k", "v");
        });
        sessions.clear(&id);

        assert!(sessions.history(&id).is_empty());
        let kept = sessions.get_or_create(&id).with_state(|state| state.context.get("k").map(str::to_string));
        assert_eq!(kept.as_deref(), Some("v"));
    }

    #[tokio::test]
    async fn test_reject_policy() {
        let sessions = manager(ConcurrencyPolicy::Reject);
        let id = SessionId::new();

        let guard = sessions.acquire(&id).await.unwrap();
        assert!(matches!(sessions.acquire(&id).await, Err(AgentError::SessionBusy(_))));
        drop(guard);
        assert!(sessions.acquire(&id).await.is_ok());
    }

    #[tokio::test]
    async fn test_queue_policy_waits() {
        let sessions = Arc::new(manager(ConcurrencyPolicy::Queue));
        let id = SessionId::new();

        let guard = sessions.acquire(&id).await.unwrap();
        let waiter = {
            let sessions = sessions.clone();
            let id = id.clone();
            tokio::spawn(async move {
                let active = sessions.acquire(&id).await.unwrap();
                active.session.with_state(|state| state.record_exchange("second", "ok"));
            })
        };
        tokio::task::yield_now().await;
        assert!(!waiter.is_finished());

        drop(guard);
        waiter.await.unwrap();
        assert_eq!(sessions.history(&id)[0].query, "second");
    }

    #[tokio::test]
    async fn test_history_answers_while_conversation_is_held() {
        for policy in [ConcurrencyPolicy::Queue, ConcurrencyPolicy::Reject] {
            let sessions = manager(policy);
            let id = SessionId::new();
            sessions.get_or_create(&id).with_state(|state| state.record_exchange("q", "r"));

            let _running = sessions.acquire(&id).await.unwrap();
            assert_eq!(sessions.history(&id).len(), 1);
            assert_eq!(sessions.recent_history(&id, 5)[0].response, "r");
        }
    }

    #[tokio::test]
    async fn test_clear_during_query_resets_conversation_later() {
        let sessions = manager(ConcurrencyPolicy::Queue);
        let id = SessionId::new();
        {
            let mut active = sessions.acquire(&id).await.unwrap();
            active.conversation.push(Message::user("earlier"));
            active.session.with_state(|state| state.record_exchange("earlier", "ok"));

            sessions.clear(&id);
            assert!(sessions.history(&id).is_empty());
            assert_eq!(active.conversation.len(), 1);
        }

        let next = sessions.acquire(&id).await.unwrap();
        assert!(next.conversation.is_empty());
    }

    #[test]
    fn test_recent_exchanges() {
        let mut state = SessionState::new(ContextStore::default());
        for i in 0..4 {
            state.record_exchange(format!("q{}", i), "r");
        }
        let recent: Vec<&str> = state.recent_exchanges(2).iter().map(|e| e.query.as_str()).collect();
        assert_eq!(recent, vec!["q2", "q3"]);
        assert_eq!(state.recent_exchanges(10).len(), 4);
    }

    #[test]
    fn test_policy_from_str() {
        assert_eq!("Reject".parse::<ConcurrencyPolicy>().unwrap(), ConcurrencyPolicy::Reject);
        assert!("drop".parse::<ConcurrencyPolicy>().is_err());
    }
}
