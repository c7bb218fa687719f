//! WebSocket streams for job status and job logs.
//!
//! `/ws/jobs/status` relays every status transition. `/ws/jobs/{uuid}/logs`
//! sends a job's full log history followed by live entries. Both register
//! with the hub before the upgrade completes, so nothing emitted after the
//! handshake is missed. The registration is released when the connection
//! ends or when the upgrade never happens.

use axum::{
    body::Bytes,
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Path, State,
    },
    response::IntoResponse,
};
use futures::{SinkExt, StreamExt};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{interval_at, Instant};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::jobs::ApiError;
use crate::metrics::{WS_CONNECTIONS_ACTIVE, WS_CONNECTIONS_TOTAL, WS_MESSAGES_SENT, WS_PINGS_SENT};
use crate::state::AppState;

/// Status stream for every job.
pub async fn status_socket(
    State(state): State<Arc<AppState>>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    let subscription = state.service().subscribe_status();
    let heartbeat = state.ws_heartbeat();
    let observer = subscription.id;
    let release = Unsubscribe::new(move || {
        state.service().unsubscribe_status(observer);
    });

    ws.on_upgrade(move |socket| async move {
        relay(socket, subscription.events, heartbeat, "status").await;
        drop(release);
    })
}

/// Log stream for one job: history first, then live entries.
pub async fn log_socket(
    Path(uuid): Path<Uuid>,
    State(state): State<Arc<AppState>>,
    ws: WebSocketUpgrade,
) -> Result<impl IntoResponse, ApiError> {
    let (job, subscription) = state.service().subscribe_logs(&uuid)?;
    let heartbeat = state.ws_heartbeat();
    let observer = subscription.id;
    let release = Unsubscribe::new(move || {
        state.service().unsubscribe_logs(job.id, observer);
    });

    Ok(ws.on_upgrade(move |socket| async move {
        relay(socket, subscription.events, heartbeat, "logs").await;
        drop(release);
    }))
}

/// Runs a hub unsubscribe when dropped.
///
/// Held by the upgrade callback, so the observer is released after the
/// relay ends or, if the handshake fails, when axum drops the callback
/// unrun.
struct Unsubscribe<F: FnOnce()>(Option<F>);

impl<F: FnOnce()> Unsubscribe<F> {
    fn new(release: F) -> Self {
        Self(Some(release))
    }
}

impl<F: FnOnce()> Drop for Unsubscribe<F> {
    fn drop(&mut self) {
        if let Some(release) = self.0.take() {
            release();
        }
    }
}

/// Forward hub events to the client until it leaves.
///
/// Ends on a client Close, a receive or send error, or when the hub drops
/// the observer.
async fn relay<T: Serialize>(
    socket: WebSocket,
    mut events: mpsc::UnboundedReceiver<T>,
    heartbeat: Duration,
    channel: &'static str,
) {
    let (mut sender, mut receiver) = socket.split();
    let mut ping = interval_at(Instant::now() + heartbeat, heartbeat);

    WS_CONNECTIONS_TOTAL.with_label_values(&[channel]).inc();
    WS_CONNECTIONS_ACTIVE.inc();
    info!(channel, "WebSocket client connected");

    loop {
        tokio::select! {
            event = events.recv() => {
                let Some(event) = event else {
                    debug!(channel, "Hub closed the observer");
                    break;
                };
                let json = match serde_json::to_string(&event) {
                    Ok(json) => json,
                    Err(e) => {
                        error!("Failed to serialize {} event: {}", channel, e);
                        continue;
                    }
                };
                if sender.send(Message::Text(json.into())).await.is_err() {
                    debug!(channel, "WebSocket send failed, client disconnected");
                    break;
                }
                WS_MESSAGES_SENT.with_label_values(&[channel]).inc();
            }
            _ = ping.tick() => {
                if sender.send(Message::Ping(Bytes::new())).await.is_err() {
                    debug!(channel, "WebSocket ping failed, client disconnected");
                    break;
                }
                WS_PINGS_SENT.inc();
            }
            incoming = receiver.next() => {
                match incoming {
                    Some(Ok(Message::Close(_))) | None => {
                        debug!(channel, "WebSocket client closed");
                        break;
                    }
                    Some(Ok(Message::Text(text))) => {
                        debug!(channel, "Ignoring client message: {}", text.as_str());
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        warn!(channel, "WebSocket receive error: {}", e);
                        break;
                    }
                }
            }
        }
    }

    WS_CONNECTIONS_ACTIVE.dec();
    info!(channel, "WebSocket client disconnected");
}
