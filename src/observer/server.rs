use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use anyhow::{Context, Result};
use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
};
use serde::Serialize;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tower_http::cors::CorsLayer;
use tracing::{debug, info, warn};

use super::board::{MonitoringBoard, ResearchSnapshot};
use super::ws;
use crate::monitor::events::MonitoringEvent;

/// Observer listen address.
#[derive(Debug, Clone)]
pub struct ObserverConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ObserverConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 4180,
        }
    }
}

/// One ingested event, as forwarded to dashboards.
#[derive(Debug, Clone)]
pub struct DashboardFrame {
    pub research_id: String,
    pub payload: String,
}

// ── Shared state ─────────────────────────────────────────────────────

pub struct ObserverState {
    boards: Mutex<HashMap<String, MonitoringBoard>>,
    dashboard_tx: broadcast::Sender<DashboardFrame>,
    ingested: AtomicU64,
}

pub type SharedState = Arc<ObserverState>;

impl Default for ObserverState {
    fn default() -> Self {
        Self::new()
    }
}

impl ObserverState {
    pub fn new() -> Self {
        let (dashboard_tx, _rx) = broadcast::channel(256);
        Self {
            boards: Mutex::new(HashMap::new()),
            dashboard_tx,
            ingested: AtomicU64::new(0),
        }
    }

    fn boards(&self) -> MutexGuard<'_, HashMap<String, MonitoringBoard>> {
        match self.boards.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<DashboardFrame> {
        self.dashboard_tx.subscribe()
    }

    /// Decode a frame, fold it into its research board and forward it to
    /// dashboards. Frames for a research other than `expected_research`
    /// (when given) are refused.
    pub fn ingest(
        &self,
        frame: &str,
        expected_research: Option<&str>,
    ) -> Result<MonitoringEvent, serde_json::Error> {
        let event: MonitoringEvent = serde_json::from_str(frame)?;
        let research_id = event.research_id().to_string();
        if expected_research.is_some_and(|expected| expected != research_id) {
            warn!(
                expected = ?expected_research,
                found = %research_id,
                "event for another research on this connection; ignored"
            );
            return Ok(event);
        }

        self.boards()
            .entry(research_id.clone())
            .or_insert_with(|| MonitoringBoard::new(research_id.clone()))
            .apply(&event);
        self.ingested.fetch_add(1, Ordering::Relaxed);
        debug!(
            research_id = %research_id,
            participant_id = %event.participant_id(),
            event_type = %event.kind(),
            "event ingested"
        );

        // No dashboards connected is fine.
        let _ = self.dashboard_tx.send(DashboardFrame {
            research_id,
            payload: frame.to_string(),
        });
        Ok(event)
    }

    pub fn snapshot(&self, research_id: &str) -> Option<ResearchSnapshot> {
        self.boards().get(research_id).map(MonitoringBoard::snapshot)
    }

    pub fn ingested(&self) -> u64 {
        self.ingested.load(Ordering::Relaxed)
    }
}

// ── Error handling ───────────────────────────────────────────────────

pub enum ApiError {
    NotFound(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
        };
        (status, Json(serde_json::json!({"error": message}))).into_response()
    }
}

// ── Router ───────────────────────────────────────────────────────────

#[derive(Serialize)]
struct Health {
    status: &'static str,
    ingested: u64,
}

pub fn build_router(state: SharedState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/api/research/{research_id}", get(get_research))
        .route("/ws", get(ws::ingest_handler))
        .route("/ws/dashboard", get(ws::dashboard_handler))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn health_check(State(state): State<SharedState>) -> impl IntoResponse {
    Json(Health {
        status: "ok",
        ingested: state.ingested(),
    })
}

async fn get_research(
    State(state): State<SharedState>,
    Path(research_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    match state.snapshot(&research_id) {
        Some(snapshot) => Ok(Json(snapshot)),
        None => Err(ApiError::NotFound(format!(
            "No monitoring data for research {}",
            research_id
        ))),
    }
}

/// Serve on an already-bound listener until `shutdown` resolves.
pub async fn serve<F>(listener: TcpListener, state: SharedState, shutdown: F) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    axum::serve(listener, build_router(state))
        .with_graceful_shutdown(shutdown)
        .await
        .context("Observer server error")
}

/// Bind and run the observer until Ctrl-C.
pub async fn start_observer(config: ObserverConfig) -> Result<()> {
    let addr = format!("{}:{}", config.host, config.port);
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;
    let local_addr = listener.local_addr()?;
    info!(%local_addr, "observer listening");
    println!("Observer running at http://{}", local_addr);
    println!("  participants: ws://{}/ws", local_addr);
    println!("  dashboards:   ws://{}/ws/dashboard", local_addr);

    serve(listener, Arc::new(ObserverState::new()), shutdown_signal()).await?;

    println!("Observer shut down gracefully.");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "failed to listen for Ctrl-C");
        std::future::pending::<()>().await;
    }
    info!("shutting down observer");
}
