//! # Session Handle
//!
//! One [`Session`] per WebSocket connection. A session owns the capability to
//! write text back to its client ([`TextSink`]) and guards every write with
//! its open/closed state.
//!
//! ## Lifecycle:
//! 1. **Connecting**: created, not yet registered
//! 2. **Open**: registered, accepting chunks and delivering results
//! 3. **Closed**: terminal, every write attempt is refused
//!
//! ## Liveness:
//! [`Session::deliver`] checks the state and writes while holding the state
//! lock, and [`Session::close`] takes the same lock. Once `close` returns, no
//! write can reach the transport.

use crate::error::StreamError;
use crate::transcription::ChunkCounter;
use actix_web::web::Bytes;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

/// Outbound text capability handed to a session by its transport.
///
/// Implementations must not block: the write happens under the session's
/// state lock.
pub trait TextSink: Send + Sync {
    fn send_text(&self, text: String) -> Result<(), StreamError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Connecting,
    Open,
    Closed,
}

/// How a session turns chunks into text frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionMode {
    /// One result per chunk, delivered in completion order
    Once,
    /// One de-duplicated, throttled stream over all chunks of the session
    Continuous,
    /// Word-by-word growing prefixes for each chunk
    Progressive,
}

impl SessionMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionMode::Once => "once",
            SessionMode::Continuous => "continuous",
            SessionMode::Progressive => "progressive",
        }
    }
}

impl fmt::Display for SessionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SessionMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "once" => Ok(SessionMode::Once),
            "continuous" | "stream" => Ok(SessionMode::Continuous),
            "progressive" => Ok(SessionMode::Progressive),
            other => Err(format!(
                "Unknown session mode '{}'. Expected once, continuous or progressive",
                other
            )),
        }
    }
}

pub struct Session {
    id: String,
    mode: SessionMode,
    state: Mutex<SessionState>,
    sink: Box<dyn TextSink>,
    counter: Arc<ChunkCounter>,
    /// Input side of the continuous-mode stream. Dropped on close, which ends the stream.
    feed: Mutex<Option<mpsc::Sender<Bytes>>>,
    created_at: DateTime<Utc>,
    chunks_received: AtomicU64,
}

impl Session {
    pub fn new(
        id: impl Into<String>,
        mode: SessionMode,
        sink: Box<dyn TextSink>,
        counter: Arc<ChunkCounter>,
    ) -> Self {
        Self {
            id: id.into(),
            mode,
            state: Mutex::new(SessionState::Connecting),
            sink,
            counter,
            feed: Mutex::new(None),
            created_at: Utc::now(),
            chunks_received: AtomicU64::new(0),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn mode(&self) -> SessionMode {
        self.mode
    }

    pub fn state(&self) -> SessionState {
        *self.state.lock()
    }

    pub fn is_open(&self) -> bool {
        self.state() == SessionState::Open
    }

    pub fn counter(&self) -> Arc<ChunkCounter> {
        self.counter.clone()
    }

    pub fn chunks_received(&self) -> u64 {
        self.chunks_received.load(Ordering::Relaxed)
    }

    pub fn record_chunk(&self) {
        self.chunks_received.fetch_add(1, Ordering::Relaxed);
    }

    /// Connecting → Open. Returns false if the session was not connecting.
    pub fn open(&self) -> bool {
        let mut state = self.state.lock();
        if *state != SessionState::Connecting {
            return false;
        }
        *state = SessionState::Open;
        true
    }

    /// Move to Closed. Returns false if the session was already closed.
    pub fn close(&self) -> bool {
        let mut state = self.state.lock();
        if *state == SessionState::Closed {
            return false;
        }
        *state = SessionState::Closed;
        self.feed.lock().take();
        true
    }

    /// Write `text` to the client if, and only if, the session is open.
    pub fn deliver(&self, text: String) -> Result<(), StreamError> {
        let state = self.state.lock();
        if *state != SessionState::Open {
            return Err(StreamError::SessionClosed(self.id.clone()));
        }
        self.sink.send_text(text)
    }

    pub fn attach_feed(&self, sender: mpsc::Sender<Bytes>) {
        *self.feed.lock() = Some(sender);
    }

    /// Push a chunk into the continuous-mode stream without waiting.
    pub fn feed(&self, chunk: Bytes) -> Result<(), StreamError> {
        let feed = self.feed.lock();
        let sender = feed
            .as_ref()
            .ok_or_else(|| StreamError::SessionClosed(self.id.clone()))?;
        sender.try_send(chunk).map_err(|err| match err {
            mpsc::error::TrySendError::Full(_) => {
                StreamError::Processing(format!("stream feed for session '{}' is full", self.id))
            }
            mpsc::error::TrySendError::Closed(_) => StreamError::SessionClosed(self.id.clone()),
        })
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("mode", &self.mode)
            .field("state", &self.state())
            .field("chunks_received", &self.chunks_received())
            .finish()
    }
}

/// Point-in-time view of a session for the HTTP API.
#[derive(Debug, Clone, Serialize)]
pub struct SessionSummary {
    pub session_id: String,
    pub mode: SessionMode,
    pub state: SessionState,
    pub chunks_received: u64,
    pub created_at: DateTime<Utc>,
}

impl From<&Session> for SessionSummary {
    fn from(session: &Session) -> Self {
        Self {
            session_id: session.id.clone(),
            mode: session.mode,
            state: session.state(),
            chunks_received: session.chunks_received(),
            created_at: session.created_at,
        }
    }
}
