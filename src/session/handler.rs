//! # Streaming Session Handler
//!
//! Drives the per-session lifecycle for any transport that can report
//! connect, binary chunk, close and error events and can hand over a
//! [`TextSink`].
//!
//! ## Event handling:
//! - **connect**: create the session, register it, open it, send the greeting
//! - **binary chunk**: hand the chunk to the pipeline on a worker task; the
//!   result is written only if the session is still open when it arrives.
//!   With all `max_in_flight` workers busy the chunk is rejected instead
//! - **close / error**: unregister and close (error differs only in logging)
//!
//! Chunks for sessions that are not open are ignored rather than failing the
//! connection.
//!
//! ## Ordering:
//! In `once` mode every chunk is processed independently, so results may
//! reach the client in a different order than the chunks were sent.

use crate::config::CounterScope;
use crate::error::StreamError;
use crate::session::handle::{Session, SessionMode, TextSink};
use crate::session::registry::SessionRegistry;
use crate::state::StreamMetrics;
use crate::transcription::{ChunkCounter, TranscriptionPipeline};
use actix_web::web::Bytes;
use futures_util::StreamExt;
use std::fmt;
use std::sync::Arc;
use tokio::sync::{mpsc, OwnedSemaphorePermit, Semaphore};
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Pending chunks a continuous-mode session may queue before new ones are dropped.
const FEED_CAPACITY: usize = 64;

#[derive(Clone)]
pub struct StreamingSessionHandler {
    registry: Arc<SessionRegistry>,
    pipeline: Arc<TranscriptionPipeline>,
    /// Worker pool bound: one permit per in-flight pipeline task
    workers: Arc<Semaphore>,
    counter_scope: CounterScope,
    greeting: String,
    metrics: Arc<StreamMetrics>,
}

impl StreamingSessionHandler {
    pub fn new(
        registry: Arc<SessionRegistry>,
        pipeline: Arc<TranscriptionPipeline>,
        max_in_flight: usize,
        counter_scope: CounterScope,
        greeting: impl Into<String>,
        metrics: Arc<StreamMetrics>,
    ) -> Self {
        Self {
            registry,
            pipeline,
            workers: Arc::new(Semaphore::new(max_in_flight)),
            counter_scope,
            greeting: greeting.into(),
            metrics,
        }
    }

    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    pub fn metrics(&self) -> &Arc<StreamMetrics> {
        &self.metrics
    }

    /// Register a new session and greet the client.
    ///
    /// On error nothing is registered and the transport should drop the
    /// connection.
    pub fn on_connect(
        &self,
        sink: Box<dyn TextSink>,
        mode: SessionMode,
    ) -> Result<Arc<Session>, StreamError> {
        let session_id = Uuid::new_v4().to_string();
        let counter = match self.counter_scope {
            CounterScope::Global => self.pipeline.shared_counter(),
            CounterScope::Session => Arc::new(ChunkCounter::new()),
        };
        let session = Arc::new(Session::new(session_id, mode, sink, counter));

        self.registry.register(session.clone())?;
        session.open();
        self.metrics.connection_opened();

        if mode == SessionMode::Continuous {
            self.start_continuous(&session);
        }

        info!(session_id = %session.id(), mode = %mode, "Client connected");

        if let Err(err) = session.deliver(self.greeting.clone()) {
            self.metrics.write_failed();
            warn!(session_id = %session.id(), error = %err, "Failed to send greeting");
        }

        Ok(session)
    }

    /// Accept one binary chunk. Never blocks on processing.
    pub fn on_binary(&self, session_id: &str, chunk: Bytes) {
        let session = match self.registry.lookup(session_id) {
            Some(session) if session.is_open() => session,
            _ => {
                self.metrics.chunk_ignored();
                debug!(
                    session_id = %session_id,
                    bytes = chunk.len(),
                    "Ignoring chunk for session that is not open"
                );
                return;
            }
        };

        session.record_chunk();
        self.metrics.chunk_received();
        debug!(session_id = %session_id, bytes = chunk.len(), "Received audio chunk");

        match session.mode() {
            SessionMode::Once => {
                if let Some(permit) = self.try_reserve_worker(session_id) {
                    self.spawn_once(&session, chunk, permit);
                }
            }
            SessionMode::Progressive => {
                if let Some(permit) = self.try_reserve_worker(session_id) {
                    self.spawn_progressive(&session, chunk, permit);
                }
            }
            SessionMode::Continuous => {
                if let Err(err) = session.feed(chunk) {
                    self.metrics.processing_failed();
                    warn!(session_id = %session_id, error = %err, "Dropping chunk");
                }
            }
        }
    }

    /// Clean up after an orderly close. Safe to call more than once.
    pub fn on_close(&self, session_id: &str, reason: Option<String>) {
        if self.registry.unregister(session_id).is_some() {
            self.metrics.connection_closed();
            info!(
                session_id = %session_id,
                reason = reason.as_deref().unwrap_or("none"),
                "Client disconnected"
            );
        } else {
            debug!(session_id = %session_id, "Close for session that is already gone");
        }
    }

    /// Clean up after a transport failure. Safe to call more than once.
    pub fn on_error(&self, session_id: &str, cause: &dyn fmt::Display) {
        error!(session_id = %session_id, error = %cause, "Transport error");
        if self.registry.unregister(session_id).is_some() {
            self.metrics.connection_failed();
        }
    }

    /// Take a worker permit without waiting. With every worker busy the chunk
    /// is rejected, so pending work never exceeds `max_in_flight` tasks.
    fn try_reserve_worker(&self, session_id: &str) -> Option<OwnedSemaphorePermit> {
        match self.workers.clone().try_acquire_owned() {
            Ok(permit) => Some(permit),
            Err(_) => {
                self.metrics.chunk_rejected();
                warn!(session_id = %session_id, "All pipeline workers busy, rejecting chunk");
                None
            }
        }
    }

    fn spawn_once(&self, session: &Session, chunk: Bytes, permit: OwnedSemaphorePermit) {
        let session_id = session.id().to_string();
        let counter = session.counter();
        let registry = self.registry.clone();
        let pipeline = self.pipeline.clone();
        let metrics = self.metrics.clone();

        tokio::spawn(async move {
            let _permit = permit;

            match pipeline.transcribe_once(&chunk, &counter).await {
                Ok(text) => {
                    deliver_result(&registry, &metrics, &session_id, text);
                }
                Err(err) => {
                    metrics.processing_failed();
                    error!(session_id = %session_id, error = %err, "Transcription error");
                }
            }
        });
    }

    fn spawn_progressive(&self, session: &Session, chunk: Bytes, permit: OwnedSemaphorePermit) {
        let session_id = session.id().to_string();
        let counter = session.counter();
        let registry = self.registry.clone();
        let pipeline = self.pipeline.clone();
        let metrics = self.metrics.clone();

        tokio::spawn(async move {
            let _permit = permit;

            let mut prefixes = pipeline.transcribe_progressive(&chunk, &counter);
            while let Some(prefix) = prefixes.next().await {
                if !deliver_result(&registry, &metrics, &session_id, prefix) {
                    break;
                }
            }
        });
    }

    /// One long-lived task per continuous session. It ends once the session
    /// closes, because closing drops the feed sender.
    fn start_continuous(&self, session: &Session) {
        let (tx, rx) = mpsc::channel(FEED_CAPACITY);
        session.attach_feed(tx);

        let session_id = session.id().to_string();
        let registry = self.registry.clone();
        let metrics = self.metrics.clone();
        let mut results = self
            .pipeline
            .transcribe_stream(ReceiverStream::new(rx), session.counter());

        tokio::spawn(async move {
            while let Some(text) = results.next().await {
                if !deliver_result(&registry, &metrics, &session_id, text) {
                    break;
                }
            }
            debug!(session_id = %session_id, "Continuous transcription ended");
        });
    }
}

/// Write a result if the session is still open.
///
/// Returns false when the session is gone, so callers can stop producing
/// further results for it. Write failures on a live session are logged and
/// do not stop the caller.
fn deliver_result(
    registry: &SessionRegistry,
    metrics: &StreamMetrics,
    session_id: &str,
    text: String,
) -> bool {
    match registry.deliver(session_id, text) {
        Ok(()) => {
            metrics.result_delivered();
            true
        }
        Err(StreamError::SessionClosed(_)) | Err(StreamError::SessionNotFound(_)) => {
            metrics.result_dropped();
            debug!(session_id = %session_id, "Session closed before result arrived, dropping it");
            false
        }
        Err(err) => {
            metrics.write_failed();
            warn!(session_id = %session_id, error = %err, "Error sending message");
            true
        }
    }
}
