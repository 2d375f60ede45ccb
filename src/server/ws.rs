use axum::{
    extract::{
        Path, State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::IntoResponse,
};
use futures_util::{SinkExt, StreamExt, stream::SplitSink, stream::SplitStream};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

use super::api::SharedState;
use crate::events::{AgentEvent, EventKind, Subscription};

/// How often to send WebSocket Ping frames.
const PING_INTERVAL: Duration = Duration::from_secs(30);

/// How long to wait for a Pong response before considering the connection dead.
const PONG_TIMEOUT: Duration = Duration::from_secs(60);

// ── WebSocket handler ────────────────────────────────────────────────

/// Stream one run's events. The subscription is taken before the upgrade
/// completes, so nothing emitted after the request arrives is missed.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Path(run_id): Path<String>,
    State(state): State<SharedState>,
) -> impl IntoResponse {
    let subscription = state.orchestrator.subscribe(Some(&run_id));
    let run = state.orchestrator.get(&run_id);
    ws.on_upgrade(move |socket| async move {
        let (mut sender, receiver) = socket.split();
        match run {
            Err(e) => {
                let frame = serde_json::json!({"error": e.to_string()}).to_string();
                let _ = sender.send(Message::Text(frame.into())).await;
                let _ = sender.send(Message::Close(None)).await;
            }
            Ok(run) if run.status.is_terminal() => {
                debug!(run_id = %run_id, status = %run.status, "Run already finished, closing stream");
                let _ = sender.send(Message::Close(None)).await;
            }
            Ok(_) => run_socket_loop(sender, receiver, subscription).await,
        }
    })
}

/// JSON text for one event, and whether it ends the stream.
fn event_frame(event: &AgentEvent) -> Option<(String, bool)> {
    match serde_json::to_string(event) {
        Ok(json) => Some((json, event.kind == EventKind::RunEnd)),
        Err(e) => {
            warn!(run_id = %event.run_id, kind = %event.kind, error = %e, "Failed to serialize event");
            None
        }
    }
}

/// Core WebSocket loop with ping/pong keepalive.
///
/// Forwards the run's events until `run_end`, the client goes away, or no
/// Pong arrives within [`PONG_TIMEOUT`] of a Ping.
async fn run_socket_loop(
    mut sender: SplitSink<WebSocket, Message>,
    mut receiver: SplitStream<WebSocket>,
    mut subscription: Subscription,
) {
    let mut ping_interval = tokio::time::interval(PING_INTERVAL);
    // The first tick completes immediately.
    ping_interval.tick().await;

    let mut last_pong = Instant::now();
    let mut awaiting_pong = false;

    loop {
        tokio::select! {
            _ = ping_interval.tick() => {
                if awaiting_pong && last_pong.elapsed() > PONG_TIMEOUT {
                    debug!("WebSocket client stopped answering pings");
                    break;
                }
                if sender.send(Message::Ping(Default::default())).await.is_err() {
                    break;
                }
                awaiting_pong = true;
            }

            event = subscription.recv() => {
                let Some(event) = event else { break };
                let Some((json, last)) = event_frame(&event) else { continue };
                if sender.send(Message::Text(json.into())).await.is_err() {
                    break;
                }
                if last {
                    break;
                }
            }

            msg = receiver.next() => {
                match msg {
                    Some(Ok(Message::Pong(_))) => {
                        last_pong = Instant::now();
                        awaiting_pong = false;
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(_)) => break,
                }
            }
        }
    }

    if subscription.dropped() > 0 {
        warn!(
            subscriber = subscription.id(),
            dropped = subscription.dropped(),
            "WebSocket subscriber lagged and lost events"
        );
    }
    let _ = sender.send(Message::Close(None)).await;
}
