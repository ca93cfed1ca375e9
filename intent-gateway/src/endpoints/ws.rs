//! Live push channel: metrics every 5 s, health every 10 s, plus session
//! events as they happen. Everything stops when the socket closes.

use std::time::Duration;

use axum::{
    extract::{
        State, WebSocketUpgrade,
        ws::{Message, WebSocket},
    },
    response::Response,
};
use serde_json::json;

use crate::{app_state::AppState, metrics};

const METRICS_CADENCE: Duration = Duration::from_secs(5);
const HEALTH_CADENCE: Duration = Duration::from_secs(10);

pub async fn subscribe(
    State(state): State<AppState>,
    upgrade: WebSocketUpgrade,
) -> Response {
    upgrade.on_upgrade(move |socket| run(state, socket))
}

async fn run(state: AppState, mut socket: WebSocket) {
    metrics::connection_opened();
    let mut metrics_tick = tokio::time::interval(METRICS_CADENCE);
    let mut health_tick = tokio::time::interval(HEALTH_CADENCE);
    let mut session_events = state.0.sessions.subscribe();

    loop {
        let payload = tokio::select! {
            _ = metrics_tick.tick() => {
                let (hits, misses) = state.0.engine.cache_stats();
                json!({
                    "type": "metrics",
                    "data": state.0.router.metrics.summary(hits, misses),
                })
            }
            _ = health_tick.tick() => {
                json!({
                    "type": "health",
                    "data": state.0.registry.all_health().await,
                })
            }
            event = session_events.recv() => match event {
                Ok(event) => json!({"type": "session", "data": event}),
                // Lagged subscribers just skip ahead.
                Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => {
                    continue;
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => {
                    break;
                }
            },
            incoming = socket.recv() => match incoming {
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                // Inbound frames are ignored; this channel only pushes.
                Some(Ok(_)) => continue,
            },
        };

        let Ok(text) = serde_json::to_string(&payload) else {
            continue;
        };
        if socket.send(Message::Text(text.into())).await.is_err() {
            break;
        }
    }
    metrics::connection_closed();
    tracing::debug!("websocket subscriber disconnected");
}
