use std::net::SocketAddr;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use codeclash_core::net::messages::{ClientMessage, JoinMsg, ServerMessage, Status, SubmitMsg};
use codeclash_core::net::protocol::{decode_server_message, encode_client_message};
use codeclash_core::question::QuestionBank;

use codeclash_server::build_app;
use codeclash_server::config::ServerConfig;

pub type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

pub struct TestServer {
    pub addr: SocketAddr,
    _shutdown: tokio::task::JoinHandle<()>,
}

impl TestServer {
    /// Start a test server with the built-in questions and `max_players` seats.
    pub async fn new(max_players: usize) -> Self {
        let mut config = ServerConfig::default();
        config.game.max_players = max_players;
        Self::from_config(config, QuestionBank::builtin()).await
    }

    pub async fn from_config(config: ServerConfig, questions: QuestionBank) -> Self {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let (app, _state) = build_app(config, questions);

        let handle = tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        // Give the server a moment to start accepting
        tokio::time::sleep(Duration::from_millis(20)).await;

        Self {
            addr,
            _shutdown: handle,
        }
    }

    pub fn base_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub fn ws_url(&self) -> String {
        format!("ws://{}/ws", self.addr)
    }
}

/// Connect a WebSocket client to the given URL.
pub async fn ws_connect(url: &str) -> WsStream {
    let (stream, _) = tokio_tungstenite::connect_async(url).await.unwrap();
    stream
}

/// Send a raw text frame.
pub async fn ws_send_text(stream: &mut WsStream, text: &str) {
    stream.send(Message::text(text.to_string())).await.unwrap();
}

pub async fn ws_send_client_msg(stream: &mut WsStream, msg: &ClientMessage) {
    let encoded = encode_client_message(msg).unwrap();
    ws_send_text(stream, &encoded).await;
}

pub async fn ws_join(stream: &mut WsStream, name: &str) {
    let msg = ClientMessage::Join(JoinMsg {
        player_name: name.to_string(),
    });
    ws_send_client_msg(stream, &msg).await;
}

pub async fn ws_submit(stream: &mut WsStream, q_num: usize, code: &str) {
    let msg = ClientMessage::Submit(SubmitMsg {
        q_num,
        code: code.to_string(),
    });
    ws_send_client_msg(stream, &msg).await;
}

/// Read the next text frame (5s timeout).
pub async fn ws_read_text(stream: &mut WsStream) -> String {
    let deadline = Duration::from_secs(5);
    tokio::time::timeout(deadline, async {
        loop {
            match stream.next().await {
                Some(Ok(Message::Text(text))) => return text.as_str().to_string(),
                Some(Ok(Message::Close(_))) => panic!("WebSocket closed unexpectedly"),
                Some(Err(e)) => panic!("WebSocket error: {e}"),
                None => panic!("WebSocket stream ended"),
                _ => continue,
            }
        }
    })
    .await
    .expect("Timed out waiting for WebSocket message")
}

/// Read the next status (5s timeout).
pub async fn ws_read_status(stream: &mut WsStream) -> Status {
    let text = ws_read_text(stream).await;
    match decode_server_message(&text).unwrap() {
        ServerMessage::Status(status) => status,
    }
}

/// Try to read a status, returning None on timeout.
pub async fn ws_try_read_status(stream: &mut WsStream, timeout_ms: u64) -> Option<Status> {
    let deadline = Duration::from_millis(timeout_ms);
    tokio::time::timeout(deadline, ws_read_status(stream))
        .await
        .ok()
}

/// Wait for the server to close the socket (5s timeout).
pub async fn ws_expect_close(stream: &mut WsStream) {
    let deadline = Duration::from_secs(5);
    tokio::time::timeout(deadline, async {
        loop {
            match stream.next().await {
                Some(Ok(Message::Close(_))) | None | Some(Err(_)) => return,
                Some(Ok(Message::Text(text))) => panic!("Expected close, got: {text}"),
                _ => continue,
            }
        }
    })
    .await
    .expect("Timed out waiting for close");
}
