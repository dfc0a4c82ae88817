//! Shared fixtures for the integration suites: a fully wired server on
//! an ephemeral port plus thin WebSocket client helpers.

#![allow(dead_code)]

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use once_cell::sync::Lazy;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio::time::Duration;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use parlor_server::protocol::{GameType, Principal};
use parlor_server::rate_limit::RateLimitConfig;
use parlor_server::reliability::ReliabilityConfig;
use parlor_server::server::{CreateLobbyParams, GameServer, ServerSettings};
use parlor_server::telemetry::{RecordingTelemetry, TelemetrySink};
use parlor_server::{api, websocket};

/// One-time tracing init shared by every integration-test binary; a
/// second `try_init` would fail, so it lives behind a `Lazy`.
static TRACING: Lazy<()> = Lazy::new(|| {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_test_writer()
        .try_init();
});

pub struct TestApp {
    pub addr: SocketAddr,
    pub server: Arc<GameServer>,
    pub telemetry: Arc<RecordingTelemetry>,
}

pub fn test_settings() -> ServerSettings {
    ServerSettings {
        disconnect_grace: Duration::from_millis(100),
        guest_join_recheck: Duration::from_millis(5),
        rate_limit: RateLimitConfig {
            burst: 10,
            refill_per_second: 10.0,
        },
        ..ServerSettings::default()
    }
}

pub fn test_server_only() -> (Arc<GameServer>, Arc<RecordingTelemetry>) {
    Lazy::force(&TRACING);
    let telemetry = RecordingTelemetry::new();
    let server = GameServer::new(
        test_settings(),
        ReliabilityConfig::default(),
        "integration-test-secret",
        telemetry.clone() as Arc<dyn TelemetrySink>,
    );
    (server, telemetry)
}

/// Start the combined HTTP + WebSocket app on an ephemeral port.
pub async fn spawn_app() -> TestApp {
    let (server, telemetry) = test_server_only();
    let router = axum::Router::new()
        .merge(api::create_router())
        .merge(websocket::create_router())
        .with_state(server.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind test listener");
    let addr = listener.local_addr().expect("local addr");
    tokio::spawn(async move {
        let _ = axum::serve(listener, router).await;
    });

    TestApp {
        addr,
        server,
        telemetry,
    }
}

impl TestApp {
    pub fn http(&self, path: &str) -> String {
        format!("http://{}{path}", self.addr)
    }

    pub fn ws_url(&self) -> String {
        format!("ws://{}/ws", self.addr)
    }

    pub fn user_token(&self, id: &str, name: &str) -> String {
        self.server.identity().issue_realtime_token(id, name)
    }

    pub fn guest_token(&self, id: &str, name: &str) -> String {
        self.server
            .identity()
            .issue_guest_token(id, name, chrono::Duration::hours(1))
    }

    /// Seed a lobby with the given members already joined over the
    /// "HTTP" path.
    pub async fn seeded_lobby(
        &self,
        game_type: GameType,
        max_players: u8,
        members: &[Principal],
    ) -> String {
        let creator = &members[0];
        let lobby = self
            .server
            .create_lobby(
                creator,
                CreateLobbyParams {
                    name: "Integration".to_string(),
                    game_type,
                    max_players,
                    turn_timer_seconds: 60,
                    password: None,
                    code: None,
                },
            )
            .await
            .expect("create lobby");
        for member in members {
            self.server
                .join_lobby(&lobby.code, member, None)
                .await
                .expect("join lobby");
        }
        lobby.code
    }
}

pub type WsSink = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>;
pub type WsStream = SplitStream<WebSocketStream<MaybeTlsStream<TcpStream>>>;

pub struct WsClient {
    pub sink: WsSink,
    pub stream: WsStream,
}

impl WsClient {
    pub async fn connect(app: &TestApp) -> Self {
        let (ws, _) = connect_async(app.ws_url()).await.expect("ws connect");
        let (sink, stream) = ws.split();
        Self { sink, stream }
    }

    pub async fn send(&mut self, message: serde_json::Value) {
        self.sink
            .send(Message::Text(message.to_string().into()))
            .await
            .expect("ws send");
    }

    pub async fn authenticate(&mut self, token: &str) -> serde_json::Value {
        self.send(serde_json::json!({
            "type": "authenticate",
            "data": { "token": token },
        }))
        .await;
        self.recv().await
    }

    pub async fn join_lobby(&mut self, code: &str) -> serde_json::Value {
        self.send(serde_json::json!({
            "type": "join-lobby",
            "data": { "code": code },
        }))
        .await;
        self.recv().await
    }

    /// Next JSON frame, failing after two seconds.
    pub async fn recv(&mut self) -> serde_json::Value {
        self.try_recv(Duration::from_secs(2))
            .await
            .expect("expected a frame before timeout")
    }

    pub async fn try_recv(&mut self, wait: Duration) -> Option<serde_json::Value> {
        loop {
            let frame = tokio::time::timeout(wait, self.stream.next())
                .await
                .ok()??;
            match frame.ok()? {
                Message::Text(text) => {
                    return Some(serde_json::from_str(&text).expect("valid JSON frame"));
                }
                Message::Close(_) => return None,
                _ => continue,
            }
        }
    }

    /// Read frames until one matches `type`, discarding others.
    pub async fn recv_type(&mut self, message_type: &str) -> serde_json::Value {
        for _ in 0..50 {
            let frame = self.recv().await;
            if frame["type"] == message_type {
                return frame;
            }
        }
        panic!("never received frame of type {message_type}");
    }
}
