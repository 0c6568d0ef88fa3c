use crate::{
    error::{AppError, AppResult},
    session::SessionSummary,
    state::AppState,
};
use actix_web::{web, HttpResponse};
use serde_json::json;

/// List every live session.
pub async fn list_sessions(state: web::Data<AppState>) -> AppResult<HttpResponse> {
    let registry = state.registry();
    let sessions = registry.summaries();

    Ok(HttpResponse::Ok().json(json!({
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "active_sessions": sessions.len(),
        "max_sessions": registry.capacity(),
        "sessions": sessions
    })))
}

pub async fn get_session(
    state: web::Data<AppState>,
    path: web::Path<String>,
) -> AppResult<HttpResponse> {
    let session_id = path.into_inner();
    let session = state
        .registry()
        .lookup(&session_id)
        .ok_or_else(|| AppError::NotFound(format!("Session '{}' not found", session_id)))?;

    Ok(HttpResponse::Ok().json(SessionSummary::from(session.as_ref())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use crate::session::SessionMode;
    use crate::session::handle::testing::channel_sink;
    use actix_web::{test, App};

    #[actix_web::test]
    async fn test_sessions_endpoints() {
        let state = AppState::new(AppConfig::default());
        let (sink, _rx) = channel_sink();
        let session = state.sessions.on_connect(sink, SessionMode::Progressive).unwrap();

        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(state.clone()))
                .route("/sessions", web::get().to(list_sessions))
                .route("/sessions/{session_id}", web::get().to(get_session)),
        )
        .await;

        let req = test::TestRequest::get().uri("/sessions").to_request();
        let body: serde_json::Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["active_sessions"], 1);
        assert_eq!(body["sessions"][0]["session_id"], session.id());
        assert_eq!(body["sessions"][0]["mode"], "progressive");
        assert_eq!(body["sessions"][0]["state"], "open");

        let req = test::TestRequest::get()
            .uri(&format!("/sessions/{}", session.id()))
            .to_request();
        let body: serde_json::Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["chunks_received"], 0);

        state.sessions.on_close(session.id(), None);

        let req = test::TestRequest::get()
            .uri(&format!("/sessions/{}", session.id()))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status().as_u16(), 404);
    }
}
