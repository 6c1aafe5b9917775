// =============================================================================
// WebSocket Handler — push-based full-state updates
// =============================================================================
//
// Every client receives `{type: "full_state", data: <snapshot>}` immediately
// on connect, again whenever the state version changes (checked every
// 500 ms), and `{type: "alert", data: <alert>}` whenever a webhook alert
// fans out. Ping frames get Pongs; anything else is ignored.
// =============================================================================

use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message, WebSocket},
        State, WebSocketUpgrade,
    },
    response::IntoResponse,
};
use futures_util::{SinkExt, StreamExt};
use tokio::time::{interval, Duration};
use tracing::{debug, info, warn};

use crate::app_state::AppState;

pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    info!("WebSocket connection accepted — upgrading");
    ws.on_upgrade(move |socket| handle_connection(socket, state))
}

async fn handle_connection(socket: WebSocket, state: Arc<AppState>) {
    let (mut sender, mut receiver) = socket.split();
    let mut alerts = state.alert_tx.subscribe();

    // Immediate full snapshot on connect.
    let mut last_sent_version = state.current_version();
    if send_full_state(&mut sender, &state).await.is_err() {
        warn!("failed to send initial WebSocket snapshot");
        return;
    }

    let mut push_interval = interval(Duration::from_millis(500));

    loop {
        tokio::select! {
            // ── Version poll: push a fresh snapshot on change ───────────
            _ = push_interval.tick() => {
                let current = state.current_version();
                if current != last_sent_version {
                    match send_full_state(&mut sender, &state).await {
                        Ok(()) => last_sent_version = current,
                        Err(e) => {
                            debug!(error = %e, "WebSocket send failed — disconnecting");
                            break;
                        }
                    }
                }
            }

            // ── Webhook alerts fan out immediately ──────────────────────
            alert = alerts.recv() => {
                match alert {
                    Ok(alert) => {
                        let frame = serde_json::json!({ "type": "alert", "data": alert });
                        if sender.send(Message::Text(frame.to_string())).await.is_err() {
                            break;
                        }
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                        debug!(missed = n, "WebSocket client lagged alert channel");
                    }
                    Err(_) => break,
                }
            }

            // ── Client frames ───────────────────────────────────────────
            msg = receiver.next() => {
                match msg {
                    Some(Ok(Message::Ping(data))) => {
                        if sender.send(Message::Pong(data)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        info!("WebSocket closed");
                        break;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        warn!(error = %e, "WebSocket receive error — disconnecting");
                        break;
                    }
                }
            }
        }
    }
}

async fn send_full_state<S>(sender: &mut S, state: &Arc<AppState>) -> Result<(), axum::Error>
where
    S: futures_util::Sink<Message, Error = axum::Error> + Unpin,
{
    state
        .ws_sequence
        .fetch_add(1, std::sync::atomic::Ordering::Relaxed);

    let snapshot = state.build_snapshot();
    let version = snapshot.state_version;
    let frame = serde_json::json!({ "type": "full_state", "data": snapshot });

    match serde_json::to_string(&frame) {
        Ok(json) => {
            sender.send(Message::Text(json)).await?;
            debug!(version, "WebSocket snapshot sent");
            Ok(())
        }
        Err(e) => {
            // Serialisation failure is not a transport failure.
            warn!(error = %e, "failed to serialise snapshot");
            Ok(())
        }
    }
}
