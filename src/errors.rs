//! Typed error hierarchy for stepwatch.
//!
//! Four enums cover the subsystems:
//! - `ProgressError`: step list and navigation precondition failures
//! - `SourceError`: authoritative response store query failures
//! - `TransportError`: observer connection failures
//! - `MonitorError`: event pipeline failures surfaced to callers

use thiserror::Error;

/// Errors from the step-progress subsystem.
#[derive(Debug, Error)]
pub enum ProgressError {
    #[error("Step list must contain at least one step")]
    EmptyStepList,

    #[error("Duplicate step key '{key}' in step list")]
    DuplicateStepKey { key: String },

    #[error("Step '{key}' is not part of this session")]
    UnknownStep { key: String },

    #[error("Step '{key}' is not reachable yet")]
    StepLocked { key: String },
}

/// Errors from querying the authoritative response store.
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("Response store request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Response store returned status {status}")]
    Status { status: u16 },

    #[error("Failed to decode response store payload: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("Failed to read responses from {path}: {source}")]
    Io {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Errors from the observer transport.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Failed to connect to observer: {0}")]
    Connect(String),

    #[error("Failed to send frame: {0}")]
    Send(String),

    #[error("Connection closed")]
    Closed,
}

/// Errors from the event delivery pipeline.
#[derive(Debug, Error)]
pub enum MonitorError {
    #[error("Monitoring session is missing a {field}")]
    MissingIdentity { field: &'static str },

    #[error("Event scoped to {found} emitted on session {expected}")]
    ScopeMismatch { expected: String, found: String },

    #[error("Connection supervisor has stopped")]
    SupervisorStopped,

    #[error("Failed to serialize monitoring event: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error(transparent)]
    Transport(#[from] TransportError),
}
