//! Reference observer: the dashboard backend participant sessions report to.
//!
//! - `GET /ws` ingests participant events (optional `?researchId=` scope)
//! - `GET /ws/dashboard` streams every ingested event to dashboards
//! - `GET /api/research/{research_id}` returns the aggregated board
//! - `GET /health`

pub mod board;
pub mod server;
pub mod ws;

pub use board::{MonitoringBoard, ParticipantStatus, ParticipantSummary, ResearchSnapshot};
pub use server::{ObserverConfig, ObserverState, SharedState, build_router, serve, start_observer};
