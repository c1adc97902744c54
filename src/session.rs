//! Conversation state shared across workflow runs.
//!
//! A [`SessionContext`] is a cheap, clonable handle. History is append-only:
//! turns are never edited once recorded, so re-reading it always yields the
//! same prefix.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{FlowError, Result};
use crate::message::Message;

#[derive(Debug, Default)]
struct SessionState {
    turns: Vec<Message>,
    variables: Map<String, Value>,
}

#[derive(Debug)]
struct SessionInner {
    id: String,
    state: RwLock<SessionState>,
    running: AtomicBool,
}

#[derive(Debug, Clone)]
pub struct SessionContext {
    inner: Arc<SessionInner>,
}

/// Serializable copy of a session, for callers that keep conversations around.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub conversation_id: String,
    pub turns: Vec<Message>,
    #[serde(default)]
    pub variables: Map<String, Value>,
}

impl Default for SessionContext {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionContext {
    /// A fresh context with a random conversation id.
    pub fn new() -> Self {
        Self::with_id(uuid::Uuid::new_v4().to_string())
    }

    pub fn with_id(id: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(SessionInner {
                id: id.into(),
                state: RwLock::new(SessionState::default()),
                running: AtomicBool::new(false),
            }),
        }
    }

    pub fn restore(snapshot: SessionSnapshot) -> Self {
        Self {
            inner: Arc::new(SessionInner {
                id: snapshot.conversation_id,
                state: RwLock::new(SessionState {
                    turns: snapshot.turns,
                    variables: snapshot.variables,
                }),
                running: AtomicBool::new(false),
            }),
        }
    }

    pub fn conversation_id(&self) -> &str {
        &self.inner.id
    }

    pub fn append_turn(&self, turn: Message) {
        self.write().turns.push(turn);
    }

    /// Record several turns as one unit: readers see either none or all of them.
    pub fn append_turns(&self, turns: impl IntoIterator<Item = Message>) {
        let batch: Vec<Message> = turns.into_iter().collect();
        self.write().turns.extend(batch);
    }

    pub fn history(&self) -> Vec<Message> {
        self.read().turns.clone()
    }

    pub fn len(&self) -> usize {
        self.read().turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().turns.is_empty()
    }

    pub fn last_turn(&self) -> Option<Message> {
        self.read().turns.last().cloned()
    }

    pub fn get_variable(&self, key: &str) -> Option<Value> {
        self.read().variables.get(key).cloned()
    }

    pub fn set_variable(&self, key: impl Into<String>, value: Value) -> Option<Value> {
        self.write().variables.insert(key.into(), value)
    }

    pub fn variables(&self) -> Map<String, Value> {
        self.read().variables.clone()
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        let state = self.read();
        SessionSnapshot {
            conversation_id: self.inner.id.clone(),
            turns: state.turns.clone(),
            variables: state.variables.clone(),
        }
    }

    /// Claim the context for a single run. Fails fast if another run holds it.
    pub fn begin_run(&self) -> Result<RunLease> {
        self.inner
            .running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| FlowError::ConcurrentAccess(self.inner.id.clone()))?;
        Ok(RunLease {
            inner: Arc::clone(&self.inner),
        })
    }

    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::Acquire)
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, SessionState> {
        // Writers only push whole turns, so a poisoned guard still holds a consistent history.
        self.inner
            .state
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, SessionState> {
        self.inner
            .state
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Exclusive claim on a [`SessionContext`], released on drop.
#[derive(Debug)]
pub struct RunLease {
    inner: Arc<SessionInner>,
}

impl Drop for RunLease {
    fn drop(&mut self) {
        self.inner.running.store(false, Ordering::Release);
    }
}

/// Keyed collection of sessions, created lazily on first use.
#[derive(Debug, Default, Clone)]
pub struct SessionStore {
    sessions: Arc<Mutex<HashMap<String, SessionContext>>>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_or_create(&self, id: &str) -> SessionContext {
        self.lock()
            .entry(id.to_string())
            .or_insert_with(|| SessionContext::with_id(id))
            .clone()
    }

    pub fn get(&self, id: &str) -> Option<SessionContext> {
        self.lock().get(id).cloned()
    }

    pub fn insert(&self, context: SessionContext) -> Option<SessionContext> {
        self.lock()
            .insert(context.conversation_id().to_string(), context)
    }

    pub fn remove(&self, id: &str) -> Option<SessionContext> {
        self.lock().remove(id)
    }

    pub fn ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.lock().keys().cloned().collect();
        ids.sort();
        ids
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, SessionContext>> {
        self.sessions
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use serde_json::json;

    #[test]
    fn history_is_stable_across_reads() {
        let ctx = SessionContext::new();
        for i in 0..5 {
            ctx.append_turn(Message::user(format!("turn {i}")));
        }

        let first = ctx.history();
        for _ in 0..10 {
            assert_eq!(ctx.history(), first);
        }
        assert_eq!(first.len(), 5);
        assert_eq!(first[3].content, "turn 3");

        ctx.append_turn(Message::assistant("later"));
        assert_eq!(&ctx.history()[..5], first.as_slice());
    }

    #[test]
    fn stores_variables() {
        let ctx = SessionContext::with_id("c-1");
        assert_eq!(ctx.get_variable("name"), None);
        ctx.set_variable("name", json!("Bob"));
        assert_eq!(ctx.get_variable("name"), Some(json!("Bob")));
        assert_eq!(ctx.set_variable("name", json!("Alfred")), Some(json!("Bob")));
    }

    #[test]
    fn second_run_on_same_context_fails_fast() {
        let ctx = SessionContext::new();
        let lease = ctx.begin_run().unwrap();
        let err = ctx.clone().begin_run().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ConcurrentAccess);
        drop(lease);
        assert!(!ctx.is_running());
        assert!(ctx.begin_run().is_ok());
    }

    #[test]
    fn snapshot_round_trips_through_json() {
        let ctx = SessionContext::with_id("party");
        ctx.append_turn(Message::user("Prepare a formal menu for the party."));
        ctx.set_variable("occasion", json!("formal"));

        let raw = serde_json::to_string(&ctx.snapshot()).unwrap();
        let restored = SessionContext::restore(serde_json::from_str(&raw).unwrap());
        assert_eq!(restored.conversation_id(), "party");
        assert_eq!(restored.history(), ctx.history());
        assert_eq!(restored.get_variable("occasion"), Some(json!("formal")));
    }

    #[test]
    fn store_creates_sessions_on_first_use() {
        let store = SessionStore::new();
        let a = store.get_or_create("alpha");
        a.append_turn(Message::user("hello"));
        assert_eq!(store.get_or_create("alpha").len(), 1);
        assert!(store.get("beta").is_none());
        store.get_or_create("beta");
        assert_eq!(store.ids(), vec!["alpha", "beta"]);
        assert!(store.remove("alpha").is_some());
        assert_eq!(store.ids(), vec!["beta"]);
    }
}
