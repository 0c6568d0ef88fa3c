//! # WebSocket Audio Streaming Handler
//!
//! Binds the session handler to actix WebSocket connections. Clients connect
//! to the audio route (`/audio-stream` by default) and send binary audio
//! chunks; the server answers with plain text frames.
//!
//! ## WebSocket Protocol:
//! 1. **Connection**: optional `?mode=once|continuous|progressive`
//! 2. **Greeting**: the server sends exactly one text frame,
//!    `"Connected to transcription service"`
//! 3. **Audio Streaming**: each binary message is one chunk; fragmented
//!    messages are reassembled first (up to [`MAX_MESSAGE_BYTES`])
//! 4. **Transcription Results**: zero or more text frames per chunk, depending
//!    on the mode (zero if the session closed before the result was ready)
//! 5. **Close**: either side may close; text frames from the client close the
//!    connection with status 1003
//!
//! ## Actor Model:
//! Each connection is one actor. Pipeline tasks never touch the actor
//! directly: they write through an [`ActorSink`] which posts an
//! [`OutboundText`] message into the actor's mailbox.

use crate::config::WebSocketConfig;
use crate::error::{AppError, StreamError};
use crate::session::{SessionMode, StreamingSessionHandler, TextSink};
use crate::state::AppState;

use actix::prelude::*;
use actix_http::ws::Item;
use actix_web::web::{Bytes, BytesMut};
use actix_web::{web, HttpRequest, HttpResponse, Result as ActixResult};
use actix_web_actors::ws;
use parking_lot::Mutex;
use serde::Deserialize;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Largest reassembled binary message; bigger ones close the connection with 1009.
pub const MAX_MESSAGE_BYTES: usize = 256 * 1024;

/// Text frame queued for a connection.
#[derive(Message)]
#[rtype(result = "()")]
pub struct OutboundText(pub String);

/// [`TextSink`] backed by a WebSocket actor's mailbox.
pub struct ActorSink(Mutex<Recipient<OutboundText>>);

impl ActorSink {
    pub fn new(recipient: Recipient<OutboundText>) -> Self {
        Self(Mutex::new(recipient))
    }
}

impl TextSink for ActorSink {
    fn send_text(&self, text: String) -> Result<(), StreamError> {
        let recipient = self.0.lock();
        if !recipient.connected() {
            return Err(StreamError::TransportWrite(
                "WebSocket connection is closed".to_string(),
            ));
        }
        recipient.do_send(OutboundText(text));
        Ok(())
    }
}

/// Actor for one audio streaming connection.
pub struct AudioStreamSocket {
    sessions: StreamingSessionHandler,
    mode: SessionMode,
    /// Set once the session is registered; taken on close so cleanup runs once
    session_id: Option<String>,
    /// Binary message being reassembled from continuation frames
    fragments: Option<BytesMut>,
    heartbeat_interval: Duration,
    client_timeout: Duration,
    last_heartbeat: Instant,
}

impl AudioStreamSocket {
    pub fn new(
        sessions: StreamingSessionHandler,
        mode: SessionMode,
        config: &WebSocketConfig,
    ) -> Self {
        Self {
            sessions,
            mode,
            session_id: None,
            fragments: None,
            heartbeat_interval: config.heartbeat_interval(),
            client_timeout: config.client_timeout(),
            last_heartbeat: Instant::now(),
        }
    }

    fn start_heartbeat(&self, ctx: &mut ws::WebsocketContext<Self>) {
        ctx.run_interval(self.heartbeat_interval, |act, ctx| {
            if Instant::now().duration_since(act.last_heartbeat) > act.client_timeout {
                warn!("WebSocket heartbeat timeout, closing connection");
                if let Some(id) = act.session_id.take() {
                    let cause = StreamError::Transport("heartbeat timeout".to_string());
                    act.sessions.on_error(&id, &cause);
                }
                ctx.stop();
            } else {
                ctx.ping(b"");
            }
        });
    }

    fn dispatch_chunk(&mut self, data: Bytes) {
        self.last_heartbeat = Instant::now();
        match &self.session_id {
            Some(id) => self.sessions.on_binary(id, data),
            None => debug!(bytes = data.len(), "Ignoring chunk on unregistered connection"),
        }
    }

    fn reject_text(&mut self, ctx: &mut ws::WebsocketContext<Self>) {
        warn!("Received text frame on binary-only audio stream");
        self.close_with(
            ctx,
            Some(ws::CloseReason {
                code: ws::CloseCode::Unsupported,
                description: Some("Text messages not supported".to_string()),
            }),
        );
    }

    fn handle_fragment(&mut self, item: Item, ctx: &mut ws::WebsocketContext<Self>) {
        self.last_heartbeat = Instant::now();
        match item {
            Item::FirstText(_) => self.reject_text(ctx),
            Item::FirstBinary(data) => {
                if self.fragments.is_some() {
                    self.fail_fragment(
                        ctx,
                        ws::CloseCode::Protocol,
                        "Fragmented message already started",
                    );
                    return;
                }
                self.fragments = Some(BytesMut::new());
                self.append_fragment(&data, ctx);
            }
            Item::Continue(data) => {
                self.append_fragment(&data, ctx);
            }
            Item::Last(data) => {
                if self.append_fragment(&data, ctx) {
                    if let Some(message) = self.fragments.take() {
                        self.dispatch_chunk(message.freeze());
                    }
                }
            }
        }
    }

    /// Returns false if the connection was closed instead.
    fn append_fragment(&mut self, data: &[u8], ctx: &mut ws::WebsocketContext<Self>) -> bool {
        let Some(buffer) = self.fragments.as_mut() else {
            self.fail_fragment(
                ctx,
                ws::CloseCode::Protocol,
                "Continuation without a first frame",
            );
            return false;
        };

        if buffer.len() + data.len() <= MAX_MESSAGE_BYTES {
            buffer.extend_from_slice(data);
            return true;
        }

        self.fail_fragment(ctx, ws::CloseCode::Size, "Message too large");
        false
    }

    fn fail_fragment(
        &mut self,
        ctx: &mut ws::WebsocketContext<Self>,
        code: ws::CloseCode,
        description: &str,
    ) {
        warn!(bytes = self.fragments.as_ref().map_or(0, |b| b.len()), "{}", description);
        self.fragments = None;
        self.close_with(
            ctx,
            Some(ws::CloseReason {
                code,
                description: Some(description.to_string()),
            }),
        );
    }

    fn close_with(
        &mut self,
        ctx: &mut ws::WebsocketContext<Self>,
        reason: Option<ws::CloseReason>,
    ) {
        if let Some(id) = self.session_id.take() {
            let description = reason.as_ref().map(|r| match &r.description {
                Some(text) => format!("{:?}: {}", r.code, text),
                None => format!("{:?}", r.code),
            });
            self.sessions.on_close(&id, description);
        }
        ctx.close(reason);
        ctx.stop();
    }
}

impl Actor for AudioStreamSocket {
    type Context = ws::WebsocketContext<Self>;

    /// Connection established: register the session and greet the client.
    fn started(&mut self, ctx: &mut Self::Context) {
        let sink = ActorSink::new(ctx.address().recipient());

        match self.sessions.on_connect(Box::new(sink), self.mode) {
            Ok(session) => {
                self.session_id = Some(session.id().to_string());
                self.start_heartbeat(ctx);
            }
            Err(err) => {
                warn!(error = %err, "Refusing WebSocket session");
                ctx.close(Some(ws::CloseReason {
                    code: ws::CloseCode::Again,
                    description: Some(err.to_string()),
                }));
                ctx.stop();
            }
        }
    }

    /// Connection gone without a close frame (or after one): make sure the
    /// session is unregistered.
    fn stopped(&mut self, _ctx: &mut Self::Context) {
        if let Some(id) = self.session_id.take() {
            self.sessions
                .on_close(&id, Some("connection dropped".to_string()));
        }
        debug!("WebSocket actor stopped");
    }
}

impl StreamHandler<Result<ws::Message, ws::ProtocolError>> for AudioStreamSocket {
    fn handle(&mut self, msg: Result<ws::Message, ws::ProtocolError>, ctx: &mut Self::Context) {
        match msg {
            Ok(ws::Message::Binary(data)) => self.dispatch_chunk(data),
            Ok(ws::Message::Text(_)) => self.reject_text(ctx),
            Ok(ws::Message::Ping(data)) => {
                self.last_heartbeat = Instant::now();
                ctx.pong(&data);
            }
            Ok(ws::Message::Pong(_)) => {
                self.last_heartbeat = Instant::now();
            }
            Ok(ws::Message::Close(reason)) => {
                self.close_with(ctx, reason);
            }
            Ok(ws::Message::Continuation(item)) => self.handle_fragment(item, ctx),
            Ok(ws::Message::Nop) => {}
            Err(err) => {
                if let Some(id) = self.session_id.take() {
                    self.sessions.on_error(&id, &err);
                }
                ctx.stop();
            }
        }
    }
}

impl Handler<OutboundText> for AudioStreamSocket {
    type Result = ();

    fn handle(&mut self, msg: OutboundText, ctx: &mut Self::Context) {
        ctx.text(msg.0);
    }
}

#[derive(Debug, Deserialize)]
pub struct StreamQuery {
    pub mode: Option<String>,
}

/// WebSocket endpoint handler.
///
/// ## HTTP to WebSocket Upgrade:
/// Rejects the upgrade with 400 for an unknown `mode` and with 503 when the
/// session limit is reached; otherwise hands the connection to an
/// [`AudioStreamSocket`] actor.
pub async fn audio_stream(
    req: HttpRequest,
    stream: web::Payload,
    query: web::Query<StreamQuery>,
    app_state: web::Data<AppState>,
) -> ActixResult<HttpResponse> {
    let config = app_state.get_config();
    info!(
        "New WebSocket connection request from: {:?}",
        req.connection_info().peer_addr()
    );

    let mode = match query.mode.as_deref() {
        Some(mode) => mode.parse::<SessionMode>().map_err(AppError::BadRequest)?,
        None => config.websocket.default_mode,
    };

    let registry = app_state.registry();
    if registry.is_full() {
        return Err(AppError::from(StreamError::CapacityReached(registry.capacity())).into());
    }

    let socket = AudioStreamSocket::new(app_state.sessions.clone(), mode, &config.websocket);
    ws::start(socket, &req, stream)
}

#[cfg(test)]
mod tests {
    use crate::config::AppConfig;
    use crate::routes;
    use crate::state::AppState;
    use actix_web::{dev::ServerHandle, web, App, HttpServer};
    use futures_util::{SinkExt, StreamExt};
    use std::net::SocketAddr;
    use std::time::Duration;
    use tokio_tungstenite::tungstenite::protocol::frame::coding::{Data, OpCode};
    use tokio_tungstenite::tungstenite::protocol::frame::Frame;
    use tokio_tungstenite::tungstenite::{self, Message};
    use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

    type Client = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

    fn start_server(config: AppConfig) -> (AppState, SocketAddr, ServerHandle) {
        let state = AppState::new(config.clone());
        let app_state = state.clone();
        let ws_path = config.websocket.path.clone();

        let server = HttpServer::new(move || {
            App::new()
                .app_data(web::Data::new(app_state.clone()))
                .configure(|cfg| routes::configure(cfg, &ws_path))
        })
        .workers(1)
        .bind(("127.0.0.1", 0))
        .unwrap();

        let addr = server.addrs()[0];
        let server = server.run();
        let handle = server.handle();
        actix_web::rt::spawn(server);
        (state, addr, handle)
    }

    fn fast_config() -> AppConfig {
        let mut config = AppConfig::default();
        config.pipeline.once_delay_ms = 10;
        config.pipeline.stream_delay_ms = 5;
        config.pipeline.word_delay_ms = 5;
        config
    }

    async fn next_text(ws: &mut Client) -> String {
        loop {
            let msg = tokio::time::timeout(Duration::from_secs(3), ws.next())
                .await
                .expect("message within timeout")
                .expect("stream open")
                .expect("valid frame");
            match msg {
                Message::Text(text) => return text,
                Message::Ping(_) | Message::Pong(_) => continue,
                other => panic!("expected text frame, got {:?}", other),
            }
        }
    }

    async fn wait_until_empty(state: &AppState) {
        wait_until_empty_within(state, Duration::from_secs(2)).await
    }

    async fn wait_until_empty_within(state: &AppState, limit: Duration) {
        let deadline = tokio::time::Instant::now() + limit;
        while tokio::time::Instant::now() < deadline {
            if state.registry().is_empty() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        panic!("registry still holds {} sessions", state.registry().len());
    }

    fn fragment(len: usize, first: bool, last: bool) -> Message {
        let opcode = if first { Data::Binary } else { Data::Continue };
        Message::Frame(Frame::message(vec![0u8; len], OpCode::Data(opcode), last))
    }

    async fn expect_close_code(ws: &mut Client, expected: u16) {
        loop {
            let frame = tokio::time::timeout(Duration::from_secs(3), ws.next())
                .await
                .expect("close within timeout");
            match frame {
                Some(Ok(Message::Close(Some(close)))) => {
                    assert_eq!(u16::from(close.code), expected);
                    return;
                }
                Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) => continue,
                other => panic!("expected close frame, got {:?}", other),
            }
        }
    }

    #[actix_web::test]
    async fn test_end_to_end_once_mode() {
        let (state, addr, handle) = start_server(fast_config());

        let (mut ws, _resp) = connect_async(format!("ws://{}/audio-stream", addr))
            .await
            .expect("connect ok");

        assert_eq!(next_text(&mut ws).await, "Connected to transcription service");
        assert_eq!(state.registry().len(), 1);

        ws.send(Message::Binary(vec![0u8; 50])).await.unwrap();
        assert_eq!(next_text(&mut ws).await, "[Silence]");

        ws.send(Message::Binary(vec![0u8; 4000])).await.unwrap();
        assert_eq!(next_text(&mut ws).await, "Hello, this is");

        ws.close(None).await.unwrap();
        wait_until_empty(&state).await;
        assert_eq!(state.stream_metrics().connections_closed, 1);

        handle.stop(true).await;
    }

    #[actix_web::test]
    async fn test_continuous_mode_over_websocket() {
        let (state, addr, handle) = start_server(fast_config());

        let (mut ws, _resp) = connect_async(format!("ws://{}/audio-stream?mode=continuous", addr))
            .await
            .expect("connect ok");
        next_text(&mut ws).await;

        for len in [10usize, 20, 2000, 2100] {
            ws.send(Message::Binary(vec![1u8; len])).await.unwrap();
        }
        assert_eq!(next_text(&mut ws).await, "[Silence]");
        assert_eq!(next_text(&mut ws).await, "Hello");

        ws.close(None).await.unwrap();
        wait_until_empty(&state).await;
        handle.stop(true).await;
    }

    #[actix_web::test]
    async fn test_text_frame_closes_connection() {
        let (state, addr, handle) = start_server(fast_config());

        let (mut ws, _resp) = connect_async(format!("ws://{}/audio-stream", addr))
            .await
            .expect("connect ok");
        next_text(&mut ws).await;

        ws.send(Message::Text("hello".to_string())).await.unwrap();
        expect_close_code(&mut ws, 1003).await;

        wait_until_empty(&state).await;
        handle.stop(true).await;
    }

    #[actix_web::test]
    async fn test_upgrade_refused_at_capacity() {
        let mut config = fast_config();
        config.performance.max_concurrent_sessions = 1;
        let (_state, addr, handle) = start_server(config);

        let (mut first, _resp) = connect_async(format!("ws://{}/audio-stream", addr))
            .await
            .expect("first connect ok");
        next_text(&mut first).await;

        match connect_async(format!("ws://{}/audio-stream", addr)).await {
            Err(tungstenite::Error::Http(resp)) => assert_eq!(resp.status().as_u16(), 503),
            Err(other) => panic!("unexpected error {:?}", other),
            Ok(_) => panic!("second connection should be refused"),
        }

        handle.stop(true).await;
    }

    #[actix_web::test]
    async fn test_unknown_mode_rejected() {
        let (_state, addr, handle) = start_server(fast_config());

        match connect_async(format!("ws://{}/audio-stream?mode=batch", addr)).await {
            Err(tungstenite::Error::Http(resp)) => assert_eq!(resp.status().as_u16(), 400),
            Err(other) => panic!("unexpected error {:?}", other),
            Ok(_) => panic!("unknown mode should be rejected"),
        }

        handle.stop(true).await;
    }

    #[actix_web::test]
    async fn test_fragmented_binary_message_is_one_chunk() {
        let (state, addr, handle) = start_server(fast_config());

        let (mut ws, _resp) = connect_async(format!("ws://{}/audio-stream", addr))
            .await
            .expect("connect ok");
        next_text(&mut ws).await;

        // 200 bytes split in two frames lands in the "Listening..." band
        ws.send(fragment(100, true, false)).await.unwrap();
        ws.send(fragment(100, false, true)).await.unwrap();
        assert_eq!(next_text(&mut ws).await, "Listening...");

        // plain frames still work after reassembly
        ws.send(Message::Binary(vec![0u8; 10])).await.unwrap();
        assert_eq!(next_text(&mut ws).await, "[Silence]");

        assert_eq!(state.stream_metrics().chunks_received, 2);

        ws.close(None).await.unwrap();
        wait_until_empty(&state).await;
        handle.stop(true).await;
    }

    #[actix_web::test]
    async fn test_oversized_fragmented_message_closes_connection() {
        let (state, addr, handle) = start_server(fast_config());

        let (mut ws, _resp) = connect_async(format!("ws://{}/audio-stream", addr))
            .await
            .expect("connect ok");
        next_text(&mut ws).await;

        let parts = super::MAX_MESSAGE_BYTES / 60_000 + 1;
        for i in 0..parts {
            ws.send(fragment(60_000, i == 0, i + 1 == parts)).await.unwrap();
        }
        expect_close_code(&mut ws, 1009).await;

        wait_until_empty(&state).await;
        assert_eq!(state.stream_metrics().chunks_received, 0);
        handle.stop(true).await;
    }

    #[actix_web::test]
    async fn test_silent_client_is_dropped_after_timeout() {
        let mut config = fast_config();
        config.websocket.heartbeat_interval_secs = 1;
        config.websocket.client_timeout_secs = 2;
        let (state, addr, handle) = start_server(config);

        let (mut ws, _resp) = connect_async(format!("ws://{}/audio-stream", addr))
            .await
            .expect("connect ok");
        next_text(&mut ws).await;
        assert_eq!(state.registry().len(), 1);

        // Stop reading from here on, so pings go unanswered

        wait_until_empty_within(&state, Duration::from_secs(6)).await;

        let metrics = state.stream_metrics();
        assert_eq!(metrics.transport_errors, 1);
        assert_eq!(metrics.connections_closed, 0);

        drop(ws);
        handle.stop(true).await;
    }
}
