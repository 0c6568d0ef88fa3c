//! Route table shared by the server and the tests.

use crate::{handlers, health, websocket};
use actix_web::web;

/// Register every route. `ws_path` is the configured audio stream route.
pub fn configure(cfg: &mut web::ServiceConfig, ws_path: &str) {
    cfg.route(ws_path, web::get().to(websocket::audio_stream))
        .service(
            web::scope("/api/v1")
                .route("/health", web::get().to(health::health_check))
                .route("/metrics", web::get().to(health::detailed_metrics))
                .route("/config", web::get().to(handlers::get_config))
                .route("/config", web::put().to(handlers::update_config))
                .route("/sessions", web::get().to(handlers::list_sessions))
                .route("/sessions/{session_id}", web::get().to(handlers::get_session)),
        )
        // Also provide health check at root level for convenience
        .route("/health", web::get().to(health::health_check));
}
