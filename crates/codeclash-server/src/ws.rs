use std::sync::Arc;
use std::sync::atomic::Ordering;

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{State, WebSocketUpgrade};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use codeclash_core::net::messages::ClientMessage;
use codeclash_core::net::protocol::decode_client_message;
use codeclash_core::player::ConnectionId;

use crate::registry::Outbound;
use crate::session::SessionEvent;
use crate::state::{AppState, ConnectionGuard};

pub async fn ws_handler(
    State(state): State<AppState>,
    ws: WebSocketUpgrade,
) -> Result<Response, StatusCode> {
    let max_ws = state.config.limits.max_ws_connections;
    let current = state.ws_connection_count.load(Ordering::Relaxed);
    if current >= max_ws {
        tracing::warn!(current, max = max_ws, "WS connection limit reached");
        return Err(StatusCode::SERVICE_UNAVAILABLE);
    }

    Ok(ws
        .on_upgrade(move |socket| handle_socket(socket, state))
        .into_response())
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let _guard = ConnectionGuard::new(Arc::clone(&state.ws_connection_count));
    let (ws_sender, mut ws_receiver) = socket.split();

    let (tx, rx) = mpsc::channel::<Outbound>(state.config.limits.player_message_buffer);
    let Some(conn) = state.session.connect(tx).await else {
        tracing::warn!("Session unavailable, dropping connection");
        return;
    };
    tracing::info!(conn = %conn, "Connection opened");

    let writer_done = CancellationToken::new();
    spawn_writer(ws_sender, rx, writer_done.clone());

    read_loop(&mut ws_receiver, &state, conn, &writer_done).await;

    state
        .session
        .dispatch(SessionEvent::Disconnect { conn })
        .await;
    tracing::info!(conn = %conn, "Connection closed");
}

/// Forward outbound frames to the socket. `done` is cancelled when the writer
/// exits, after a close frame or once the session drops the sender.
fn spawn_writer(
    mut ws_sender: SplitSink<WebSocket, Message>,
    mut rx: mpsc::Receiver<Outbound>,
    done: CancellationToken,
) {
    tokio::spawn(async move {
        let _done = done.drop_guard();
        while let Some(frame) = rx.recv().await {
            match frame {
                Outbound::Text(text) => {
                    if ws_sender.send(Message::Text(text)).await.is_err() {
                        break;
                    }
                },
                Outbound::Close => {
                    let _ = ws_sender.send(Message::Close(None)).await;
                    break;
                },
            }
        }
    });
}

/// Per-connection rate limiter (token bucket).
struct RateLimiter {
    tokens: f64,
    last_refill: tokio::time::Instant,
    max_tokens: f64,
    refill_rate: f64, // tokens per second
}

impl RateLimiter {
    fn new(max_tokens: f64, refill_rate: f64) -> Self {
        Self {
            tokens: max_tokens,
            last_refill: tokio::time::Instant::now(),
            max_tokens,
            refill_rate,
        }
    }

    /// Returns true if the message is allowed; false if rate-limited.
    fn allow(&mut self) -> bool {
        let now = tokio::time::Instant::now();
        let elapsed = now.duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * self.refill_rate).min(self.max_tokens);
        self.last_refill = now;

        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            true
        } else {
            false
        }
    }
}

async fn read_loop(
    ws_receiver: &mut SplitStream<WebSocket>,
    state: &AppState,
    conn: ConnectionId,
    writer_done: &CancellationToken,
) {
    let limits = &state.config.limits;
    let mut rate_limiter =
        RateLimiter::new(limits.ws_rate_limit_per_sec, limits.ws_rate_limit_per_sec);

    loop {
        let msg = tokio::select! {
            () = writer_done.cancelled() => break,
            msg = ws_receiver.next() => match msg {
                Some(Ok(msg)) => msg,
                _ => break,
            },
        };
        let text = match msg {
            Message::Text(t) => t,
            Message::Close(_) => break,
            Message::Binary(_) => {
                tracing::debug!(conn = %conn, "Dropped binary frame");
                continue;
            },
            _ => continue,
        };

        // Protocol errors drop the frame and keep the connection open.
        if !rate_limiter.allow() {
            tracing::warn!(conn = %conn, "Rate limited");
            continue;
        }
        if text.len() > limits.max_message_size {
            tracing::warn!(conn = %conn, size = text.len(), "Dropped oversized frame");
            continue;
        }

        let event = match decode_client_message(text.as_str()) {
            Ok(ClientMessage::Join(join)) => SessionEvent::Join {
                conn,
                display_name: join.player_name,
            },
            Ok(ClientMessage::Submit(submit)) => SessionEvent::Submit {
                conn,
                question_index: submit.q_num,
                code: submit.code,
            },
            Err(e) => {
                tracing::warn!(conn = %conn, error = %e, "Dropped malformed frame");
                continue;
            },
        };

        if !state.session.dispatch(event).await {
            break;
        }
    }
}
