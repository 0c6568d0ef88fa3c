//! # Application State Management
//!
//! Shared state handed to every HTTP handler and WebSocket actor.
//!
//! ## Thread Safety Pattern:
//! - Configuration and HTTP metrics sit behind `Arc<RwLock<T>>`: many readers,
//!   one writer.
//! - Streaming counters are plain atomics, since they are bumped from
//!   pipeline tasks on every chunk.
//! - The session handler is cheap to clone; all clones share one registry,
//!   pipeline and worker pool.

use crate::config::AppConfig;
use crate::session::{SessionRegistry, StreamingSessionHandler};
use crate::transcription::TranscriptionPipeline;
use parking_lot::RwLock;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

#[derive(Clone)]
pub struct AppState {
    /// Application configuration (partially updatable at runtime)
    pub config: Arc<RwLock<AppConfig>>,

    /// HTTP request metrics, updated by middleware
    pub metrics: Arc<RwLock<AppMetrics>>,

    /// Session lifecycle and pipeline entry point
    pub sessions: StreamingSessionHandler,

    pub start_time: Instant,
}

/// Metrics collected across all HTTP requests.
#[derive(Debug, Default, Clone)]
pub struct AppMetrics {
    pub request_count: u64,
    pub error_count: u64,
    /// Key: endpoint name (e.g., "GET /health")
    pub endpoint_metrics: HashMap<String, EndpointMetric>,
}

#[derive(Debug, Default, Clone)]
pub struct EndpointMetric {
    pub request_count: u64,
    pub total_duration_ms: u64,
    pub error_count: u64,
}

/// Counters for the streaming side of the service.
///
/// ## Result accounting:
/// Every pipeline result ends up in exactly one of `results_delivered`,
/// `results_dropped` (session closed first) or `write_failures`.
#[derive(Debug, Default)]
pub struct StreamMetrics {
    connections_opened: AtomicU64,
    connections_closed: AtomicU64,
    transport_errors: AtomicU64,
    chunks_received: AtomicU64,
    chunks_ignored: AtomicU64,
    chunks_rejected: AtomicU64,
    results_delivered: AtomicU64,
    results_dropped: AtomicU64,
    write_failures: AtomicU64,
    processing_failures: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, Serialize, PartialEq, Eq)]
pub struct StreamMetricsSnapshot {
    pub connections_opened: u64,
    pub connections_closed: u64,
    pub transport_errors: u64,
    pub chunks_received: u64,
    pub chunks_ignored: u64,
    /// Chunks refused because every pipeline worker was busy
    pub chunks_rejected: u64,
    pub results_delivered: u64,
    pub results_dropped: u64,
    pub write_failures: u64,
    pub processing_failures: u64,
}

impl StreamMetrics {
    pub fn connection_opened(&self) {
        self.connections_opened.fetch_add(1, Ordering::Relaxed);
    }

    pub fn connection_closed(&self) {
        self.connections_closed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn connection_failed(&self) {
        self.transport_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn chunk_received(&self) {
        self.chunks_received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn chunk_ignored(&self) {
        self.chunks_ignored.fetch_add(1, Ordering::Relaxed);
    }

    pub fn chunk_rejected(&self) {
        self.chunks_rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn result_delivered(&self) {
        self.results_delivered.fetch_add(1, Ordering::Relaxed);
    }

    pub fn result_dropped(&self) {
        self.results_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn write_failed(&self) {
        self.write_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn processing_failed(&self) {
        self.processing_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StreamMetricsSnapshot {
        StreamMetricsSnapshot {
            connections_opened: self.connections_opened.load(Ordering::Relaxed),
            connections_closed: self.connections_closed.load(Ordering::Relaxed),
            transport_errors: self.transport_errors.load(Ordering::Relaxed),
            chunks_received: self.chunks_received.load(Ordering::Relaxed),
            chunks_ignored: self.chunks_ignored.load(Ordering::Relaxed),
            chunks_rejected: self.chunks_rejected.load(Ordering::Relaxed),
            results_delivered: self.results_delivered.load(Ordering::Relaxed),
            results_dropped: self.results_dropped.load(Ordering::Relaxed),
            write_failures: self.write_failures.load(Ordering::Relaxed),
            processing_failures: self.processing_failures.load(Ordering::Relaxed),
        }
    }
}

impl AppState {
    /// Build the shared state: registry, pipeline and session handler are
    /// created once here and live for the whole process.
    pub fn new(config: AppConfig) -> Self {
        let registry = Arc::new(SessionRegistry::new(
            config.performance.max_concurrent_sessions,
        ));
        let pipeline = Arc::new(TranscriptionPipeline::new(config.pipeline.to_timing()));
        let sessions = StreamingSessionHandler::new(
            registry,
            pipeline,
            config.pipeline.max_in_flight,
            config.pipeline.counter_scope,
            config.websocket.greeting.clone(),
            Arc::new(StreamMetrics::default()),
        );

        Self {
            config: Arc::new(RwLock::new(config)),
            metrics: Arc::new(RwLock::new(AppMetrics::default())),
            sessions,
            start_time: Instant::now(),
        }
    }

    /// Clone of the current configuration, so the lock is released right away.
    pub fn get_config(&self) -> AppConfig {
        self.config.read().clone()
    }

    /// Replace the configuration after validating it, and push the session
    /// limit through to the registry.
    pub fn update_config(&self, new_config: AppConfig) -> Result<(), String> {
        new_config.validate().map_err(|e| e.to_string())?;

        self.sessions
            .registry()
            .set_capacity(new_config.performance.max_concurrent_sessions);
        *self.config.write() = new_config;
        Ok(())
    }

    pub fn registry(&self) -> &Arc<SessionRegistry> {
        self.sessions.registry()
    }

    pub fn stream_metrics(&self) -> StreamMetricsSnapshot {
        self.sessions.metrics().snapshot()
    }

    pub fn increment_request_count(&self) {
        self.metrics.write().request_count += 1;
    }

    pub fn increment_error_count(&self) {
        self.metrics.write().error_count += 1;
    }

    pub fn record_endpoint_request(&self, endpoint: &str, duration_ms: u64, is_error: bool) {
        let mut metrics = self.metrics.write();
        let endpoint_metric = metrics.endpoint_metrics.entry(endpoint.to_string()).or_default();

        endpoint_metric.request_count += 1;
        endpoint_metric.total_duration_ms += duration_ms;

        if is_error {
            endpoint_metric.error_count += 1;
        }
    }

    pub fn get_metrics_snapshot(&self) -> AppMetrics {
        self.metrics.read().clone()
    }

    pub fn get_uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }
}

impl EndpointMetric {
    pub fn average_duration_ms(&self) -> f64 {
        if self.request_count > 0 {
            self.total_duration_ms as f64 / self.request_count as f64
        } else {
            0.0
        }
    }

    pub fn error_rate(&self) -> f64 {
        if self.request_count > 0 {
            self.error_count as f64 / self.request_count as f64
        } else {
            0.0
        }
    }
}
