//! Monitoring events sent to the observer.
//!
//! Wire format is an adjacently tagged record, `{"type": "...", "data": {...}}`,
//! with camelCase field names inside `data`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::errors::MonitorError;

/// `(research_id, participant_id)` pair every event and all delivery state
/// is scoped by.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionScope {
    pub research_id: String,
    pub participant_id: String,
}

impl SessionScope {
    /// Build a scope, rejecting blank identifiers.
    pub fn new(
        research_id: impl Into<String>,
        participant_id: impl Into<String>,
    ) -> Result<Self, MonitorError> {
        let research_id = research_id.into();
        let participant_id = participant_id.into();
        if research_id.trim().is_empty() {
            return Err(MonitorError::MissingIdentity {
                field: "research id",
            });
        }
        if participant_id.trim().is_empty() {
            return Err(MonitorError::MissingIdentity {
                field: "participant id",
            });
        }
        Ok(Self {
            research_id,
            participant_id,
        })
    }

    /// Common event fields stamped with the current time.
    pub fn meta_now(&self) -> EventMeta {
        self.meta_at(Utc::now())
    }

    pub fn meta_at(&self, timestamp: DateTime<Utc>) -> EventMeta {
        EventMeta {
            research_id: self.research_id.clone(),
            participant_id: self.participant_id.clone(),
            timestamp,
        }
    }
}

impl std::fmt::Display for SessionScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.research_id, self.participant_id)
    }
}

/// Fields carried by every event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventMeta {
    pub research_id: String,
    pub participant_id: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectData {
    #[serde(flatten)]
    pub meta: EventMeta,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginData {
    #[serde(flatten)]
    pub meta: EventMeta,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepProgressData {
    #[serde(flatten)]
    pub meta: EventMeta,
    pub step_name: String,
    pub step_number: u32,
    pub total_steps: u32,
    /// 0-100
    pub progress: u8,
    /// Seconds spent so far
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseSavedData {
    #[serde(flatten)]
    pub meta: EventMeta,
    pub question_key: String,
    #[serde(default)]
    pub response: serde_json::Value,
    pub step_number: u32,
    pub total_steps: u32,
    pub progress: u8,
}

/// Why a participant was screened out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DisqualificationKind {
    Demographics,
    Quota,
    Manual,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DisqualifiedData {
    #[serde(flatten)]
    pub meta: EventMeta,
    pub reason: String,
    #[serde(default)]
    pub demographic_data: BTreeMap<String, String>,
    pub disqualification_type: DisqualificationKind,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuotaExceededData {
    #[serde(flatten)]
    pub meta: EventMeta,
    pub quota_type: String,
    pub quota_value: String,
    pub current_count: u32,
    pub max_quota: u32,
    #[serde(default)]
    pub demographic_data: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletedData {
    #[serde(flatten)]
    pub meta: EventMeta,
    /// Seconds from login to completion
    pub total_duration: u64,
    pub responses_count: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorData {
    #[serde(flatten)]
    pub meta: EventMeta,
    pub error: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step_name: Option<String>,
}

/// Closed set of progress events a participant session reports.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum MonitoringEvent {
    #[serde(rename = "MONITORING_CONNECT")]
    Connect(ConnectData),
    #[serde(rename = "PARTICIPANT_LOGIN")]
    Login(LoginData),
    #[serde(rename = "PARTICIPANT_STEP")]
    StepProgress(StepProgressData),
    #[serde(rename = "PARTICIPANT_RESPONSE_SAVED")]
    ResponseSaved(ResponseSavedData),
    #[serde(rename = "PARTICIPANT_DISQUALIFIED")]
    Disqualified(DisqualifiedData),
    #[serde(rename = "PARTICIPANT_QUOTA_EXCEEDED")]
    QuotaExceeded(QuotaExceededData),
    #[serde(rename = "PARTICIPANT_COMPLETED")]
    Completed(CompletedData),
    #[serde(rename = "PARTICIPANT_ERROR")]
    Error(ErrorData),
}

/// Discriminant of a [`MonitoringEvent`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EventKind {
    Connect,
    Login,
    StepProgress,
    ResponseSaved,
    Disqualified,
    QuotaExceeded,
    Completed,
    Error,
}

impl EventKind {
    /// Wire name, as found in the `type` field.
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Connect => "MONITORING_CONNECT",
            EventKind::Login => "PARTICIPANT_LOGIN",
            EventKind::StepProgress => "PARTICIPANT_STEP",
            EventKind::ResponseSaved => "PARTICIPANT_RESPONSE_SAVED",
            EventKind::Disqualified => "PARTICIPANT_DISQUALIFIED",
            EventKind::QuotaExceeded => "PARTICIPANT_QUOTA_EXCEEDED",
            EventKind::Completed => "PARTICIPANT_COMPLETED",
            EventKind::Error => "PARTICIPANT_ERROR",
        }
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl MonitoringEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            MonitoringEvent::Connect(_) => EventKind::Connect,
            MonitoringEvent::Login(_) => EventKind::Login,
            MonitoringEvent::StepProgress(_) => EventKind::StepProgress,
            MonitoringEvent::ResponseSaved(_) => EventKind::ResponseSaved,
            MonitoringEvent::Disqualified(_) => EventKind::Disqualified,
            MonitoringEvent::QuotaExceeded(_) => EventKind::QuotaExceeded,
            MonitoringEvent::Completed(_) => EventKind::Completed,
            MonitoringEvent::Error(_) => EventKind::Error,
        }
    }

    pub fn meta(&self) -> &EventMeta {
        match self {
            MonitoringEvent::Connect(d) => &d.meta,
            MonitoringEvent::Login(d) => &d.meta,
            MonitoringEvent::StepProgress(d) => &d.meta,
            MonitoringEvent::ResponseSaved(d) => &d.meta,
            MonitoringEvent::Disqualified(d) => &d.meta,
            MonitoringEvent::QuotaExceeded(d) => &d.meta,
            MonitoringEvent::Completed(d) => &d.meta,
            MonitoringEvent::Error(d) => &d.meta,
        }
    }

    pub fn research_id(&self) -> &str {
        &self.meta().research_id
    }

    pub fn participant_id(&self) -> &str {
        &self.meta().participant_id
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.meta().timestamp
    }

    /// Whether the event belongs to the given session.
    pub fn is_in_scope(&self, scope: &SessionScope) -> bool {
        let meta = self.meta();
        meta.research_id == scope.research_id && meta.participant_id == scope.participant_id
    }

    /// Secondary component of the debounce key, so updates for different
    /// steps or questions never collapse into each other.
    pub fn secondary_key(&self) -> &str {
        match self {
            MonitoringEvent::StepProgress(d) => &d.step_name,
            MonitoringEvent::ResponseSaved(d) => &d.question_key,
            _ => "default",
        }
    }

    /// Session-connect event sent right after the transport comes up.
    pub fn connect(scope: &SessionScope) -> Self {
        MonitoringEvent::Connect(ConnectData {
            meta: scope.meta_now(),
        })
    }

    pub fn to_json(&self) -> Result<String, MonitorError> {
        Ok(serde_json::to_string(self)?)
    }
}
