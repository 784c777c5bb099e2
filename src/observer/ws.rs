use axum::{
    extract::{
        Query, State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::IntoResponse,
};
use futures_util::{SinkExt, StreamExt, stream::SplitSink, stream::SplitStream};
use serde::Deserialize;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::Instant;
use tracing::{debug, warn};

use super::server::{DashboardFrame, SharedState};

/// How often to send WebSocket Ping frames to dashboards.
const PING_INTERVAL: Duration = Duration::from_secs(30);

/// How long to wait for a Pong before considering a dashboard dead.
const PONG_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, Default, Deserialize)]
pub struct ResearchQuery {
    #[serde(rename = "researchId")]
    pub research_id: Option<String>,
}

// ── Participant ingest ───────────────────────────────────────────────

pub async fn ingest_handler(
    ws: WebSocketUpgrade,
    Query(query): Query<ResearchQuery>,
    State(state): State<SharedState>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| run_ingest_loop(socket, state, query.research_id))
}

/// Decode each text frame as a monitoring event and hand it to the state.
async fn run_ingest_loop(mut socket: WebSocket, state: SharedState, research_id: Option<String>) {
    debug!(research_id = ?research_id, "participant connected");
    while let Some(msg) = socket.recv().await {
        match msg {
            Ok(Message::Text(text)) => {
                if let Err(e) = state.ingest(text.as_str(), research_id.as_deref()) {
                    warn!(error = %e, "skipping undecodable frame");
                }
            }
            Ok(Message::Close(frame)) => {
                debug!(code = ?frame.map(|f| f.code), "participant closed connection");
                break;
            }
            Ok(_) => {}
            Err(e) => {
                debug!(error = %e, "participant connection error");
                break;
            }
        }
    }
}

// ── Dashboards ───────────────────────────────────────────────────────

pub async fn dashboard_handler(
    ws: WebSocketUpgrade,
    Query(query): Query<ResearchQuery>,
    State(state): State<SharedState>,
) -> impl IntoResponse {
    let rx = state.subscribe();
    ws.on_upgrade(move |socket| {
        let (sender, receiver) = socket.split();
        run_dashboard_loop(sender, receiver, rx, query.research_id)
    })
}

/// Forward ingested events to one dashboard, with ping/pong keepalive.
///
/// When `research_id` is set only that research's events are forwarded. If
/// no Pong arrives within [`PONG_TIMEOUT`] of a Ping the loop exits.
async fn run_dashboard_loop(
    mut sender: SplitSink<WebSocket, Message>,
    mut receiver: SplitStream<WebSocket>,
    mut rx: broadcast::Receiver<DashboardFrame>,
    research_id: Option<String>,
) {
    let mut ping_interval = tokio::time::interval(PING_INTERVAL);
    // First tick completes immediately.
    ping_interval.tick().await;

    let mut last_pong = Instant::now();
    let mut awaiting_pong = false;

    loop {
        tokio::select! {
            _ = ping_interval.tick() => {
                if awaiting_pong && last_pong.elapsed() > PONG_TIMEOUT {
                    debug!("dashboard missed pong; closing");
                    break;
                }
                if sender.send(Message::Ping(Default::default())).await.is_err() {
                    break;
                }
                awaiting_pong = true;
            }

            result = rx.recv() => {
                match result {
                    Ok(frame) => {
                        if research_id.as_deref().is_some_and(|id| id != frame.research_id) {
                            continue;
                        }
                        if sender.send(Message::Text(frame.payload.into())).await.is_err() {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                    Err(broadcast::error::RecvError::Lagged(missed)) => {
                        warn!(missed, "dashboard lagging; events skipped");
                        continue;
                    }
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

    let _ = sender.send(Message::Close(None)).await;
}
