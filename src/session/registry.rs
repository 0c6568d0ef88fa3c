//! # Session Registry
//!
//! Process-wide table of live sessions keyed by session ID.
//!
//! ## Atomicity:
//! - `register` checks capacity and uniqueness and inserts under one write lock.
//! - `unregister` closes the session and removes it under the same write lock,
//!   so a concurrent `lookup` sees either an open registered session or nothing.
//! - In-flight pipeline tasks hold only the session ID and resolve it here
//!   right before writing; the registry is the sole owner of live sessions.

use crate::error::StreamError;
use crate::session::handle::{Session, SessionSummary};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

pub struct SessionRegistry {
    sessions: RwLock<HashMap<String, Arc<Session>>>,
    /// Adjustable at runtime through the config API
    capacity: AtomicUsize,
}

impl SessionRegistry {
    pub fn new(capacity: usize) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            capacity: AtomicUsize::new(capacity),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity.load(Ordering::SeqCst)
    }

    pub fn set_capacity(&self, capacity: usize) {
        self.capacity.store(capacity, Ordering::SeqCst);
    }

    /// Add a session.
    ///
    /// ## Returns:
    /// - **Ok(())**: session is now visible to `lookup`
    /// - **Err(DuplicateSession)**: the ID is already registered
    /// - **Err(CapacityReached)**: the registry is full
    pub fn register(&self, session: Arc<Session>) -> Result<(), StreamError> {
        let mut sessions = self.sessions.write();

        if sessions.contains_key(session.id()) {
            return Err(StreamError::DuplicateSession(session.id().to_string()));
        }

        let capacity = self.capacity();
        if sessions.len() >= capacity {
            return Err(StreamError::CapacityReached(capacity));
        }

        sessions.insert(session.id().to_string(), session);
        Ok(())
    }

    /// Close and remove a session. Returns `None` if it was not registered.
    pub fn unregister(&self, session_id: &str) -> Option<Arc<Session>> {
        let mut sessions = self.sessions.write();
        let session = sessions.remove(session_id)?;
        session.close();
        Some(session)
    }

    pub fn lookup(&self, session_id: &str) -> Option<Arc<Session>> {
        self.sessions.read().get(session_id).cloned()
    }

    /// Resolve a session and write to it, refusing if it is gone or closed.
    pub fn deliver(&self, session_id: &str, text: String) -> Result<(), StreamError> {
        let session = self
            .lookup(session_id)
            .ok_or_else(|| StreamError::SessionNotFound(session_id.to_string()))?;
        session.deliver(text)
    }

    pub fn len(&self) -> usize {
        self.sessions.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.read().is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.len() >= self.capacity()
    }

    pub fn summaries(&self) -> Vec<SessionSummary> {
        let mut summaries: Vec<SessionSummary> = self
            .sessions
            .read()
            .values()
            .map(|session| SessionSummary::from(session.as_ref()))
            .collect();
        summaries.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        summaries
    }
}
