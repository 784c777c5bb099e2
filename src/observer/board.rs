//! Per-research aggregation of ingested monitoring events.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::monitor::events::MonitoringEvent;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParticipantStatus {
    InProgress,
    Completed,
    Disqualified,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuotaInfo {
    pub quota_type: String,
    pub quota_value: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParticipantSummary {
    pub participant_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    pub status: ParticipantStatus,
    pub progress: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_step: Option<String>,
    pub last_activity: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub disqualification_reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quota_exceeded: Option<QuotaInfo>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub responses_count: Option<u32>,
}

impl ParticipantSummary {
    fn new(participant_id: &str, at: DateTime<Utc>) -> Self {
        Self {
            participant_id: participant_id.to_string(),
            email: None,
            status: ParticipantStatus::InProgress,
            progress: 0,
            current_step: None,
            last_activity: at,
            duration: None,
            disqualification_reason: None,
            quota_exceeded: None,
            responses_count: None,
        }
    }
}

/// What `GET /api/research/{id}` returns.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResearchSnapshot {
    pub research_id: String,
    pub participants: Vec<ParticipantSummary>,
    pub total_participants: usize,
    pub active_participants: usize,
    pub completed_participants: usize,
    pub disqualified_participants: usize,
    pub average_progress: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_update: Option<DateTime<Utc>>,
}

/// Live participant table for one research, in first-seen order.
#[derive(Debug, Clone)]
pub struct MonitoringBoard {
    research_id: String,
    participants: Vec<ParticipantSummary>,
    last_update: Option<DateTime<Utc>>,
}

impl MonitoringBoard {
    pub fn new(research_id: impl Into<String>) -> Self {
        Self {
            research_id: research_id.into(),
            participants: Vec::new(),
            last_update: None,
        }
    }

    pub fn research_id(&self) -> &str {
        &self.research_id
    }

    pub fn participant(&self, participant_id: &str) -> Option<&ParticipantSummary> {
        self.participants
            .iter()
            .find(|p| p.participant_id == participant_id)
    }

    fn entry(&mut self, participant_id: &str, at: DateTime<Utc>) -> &mut ParticipantSummary {
        let index = match self
            .participants
            .iter()
            .position(|p| p.participant_id == participant_id)
        {
            Some(index) => index,
            None => {
                self.participants
                    .push(ParticipantSummary::new(participant_id, at));
                self.participants.len() - 1
            }
        };
        &mut self.participants[index]
    }

    /// Fold one event into the table. Returns `false` for events that do
    /// not describe a participant (connect) or belong to another research.
    pub fn apply(&mut self, event: &MonitoringEvent) -> bool {
        if event.research_id() != self.research_id {
            return false;
        }
        let at = event.timestamp();
        let participant = match event {
            MonitoringEvent::Connect(_) => return false,
            MonitoringEvent::Login(d) => {
                let p = self.entry(&d.meta.participant_id, at);
                p.status = ParticipantStatus::InProgress;
                if d.email.is_some() {
                    p.email = d.email.clone();
                }
                p
            }
            MonitoringEvent::StepProgress(d) => {
                let p = self.entry(&d.meta.participant_id, at);
                p.current_step = Some(d.step_name.clone());
                p.progress = d.progress.min(100);
                p.duration = d.duration;
                p
            }
            MonitoringEvent::ResponseSaved(d) => {
                let p = self.entry(&d.meta.participant_id, at);
                p.progress = d.progress.min(100);
                p
            }
            MonitoringEvent::Disqualified(d) => {
                let p = self.entry(&d.meta.participant_id, at);
                p.status = ParticipantStatus::Disqualified;
                p.disqualification_reason = Some(d.reason.clone());
                p
            }
            MonitoringEvent::QuotaExceeded(d) => {
                let p = self.entry(&d.meta.participant_id, at);
                p.status = ParticipantStatus::Disqualified;
                p.disqualification_reason =
                    Some(format!("Quota exceeded: {} - {}", d.quota_type, d.quota_value));
                p.quota_exceeded = Some(QuotaInfo {
                    quota_type: d.quota_type.clone(),
                    quota_value: d.quota_value.clone(),
                });
                p
            }
            MonitoringEvent::Completed(d) => {
                let p = self.entry(&d.meta.participant_id, at);
                p.status = ParticipantStatus::Completed;
                p.progress = 100;
                p.duration = Some(d.total_duration);
                p.responses_count = Some(d.responses_count);
                p
            }
            MonitoringEvent::Error(d) => {
                let p = self.entry(&d.meta.participant_id, at);
                p.status = ParticipantStatus::Error;
                if let Some(step) = &d.step_name {
                    p.current_step = Some(step.clone());
                }
                p
            }
        };
        if at > participant.last_activity {
            participant.last_activity = at;
        }
        self.last_update = Some(self.last_update.map_or(at, |last| last.max(at)));
        true
    }

    fn count(&self, status: ParticipantStatus) -> usize {
        self.participants.iter().filter(|p| p.status == status).count()
    }

    pub fn average_progress(&self) -> f64 {
        if self.participants.is_empty() {
            return 0.0;
        }
        let sum: u32 = self.participants.iter().map(|p| u32::from(p.progress)).sum();
        f64::from(sum) / self.participants.len() as f64
    }

    pub fn snapshot(&self) -> ResearchSnapshot {
        ResearchSnapshot {
            research_id: self.research_id.clone(),
            participants: self.participants.clone(),
            total_participants: self.participants.len(),
            active_participants: self.count(ParticipantStatus::InProgress),
            completed_participants: self.count(ParticipantStatus::Completed),
            disqualified_participants: self.count(ParticipantStatus::Disqualified),
            average_progress: self.average_progress(),
            last_update: self.last_update,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::monitor::events::{
        CompletedData, DisqualificationKind, DisqualifiedData, LoginData, QuotaExceededData,
        SessionScope, StepProgressData,
    };
    use chrono::TimeZone;

    fn at(second: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, second).unwrap()
    }

    fn scope(participant: &str) -> SessionScope {
        SessionScope::new("r1", participant).unwrap()
    }

    fn login(participant: &str, second: u32) -> MonitoringEvent {
        MonitoringEvent::Login(LoginData {
            meta: scope(participant).meta_at(at(second)),
            email: Some(format!("{participant}@example.com")),
            user_agent: None,
        })
    }

    fn step(participant: &str, progress: u8, second: u32) -> MonitoringEvent {
        MonitoringEvent::StepProgress(StepProgressData {
            meta: scope(participant).meta_at(at(second)),
            step_name: "csat".to_string(),
            step_number: 2,
            total_steps: 4,
            progress,
            duration: Some(30),
        })
    }

    #[test]
    fn test_login_then_progress_updates_participant() {
        let mut board = MonitoringBoard::new("r1");
        assert!(board.apply(&login("p1", 0)));
        assert!(board.apply(&step("p1", 50, 5)));

        let p = board.participant("p1").unwrap();
        assert_eq!(p.status, ParticipantStatus::InProgress);
        assert_eq!(p.progress, 50);
        assert_eq!(p.current_step.as_deref(), Some("csat"));
        assert_eq!(p.email.as_deref(), Some("p1@example.com"));
        assert_eq!(p.last_activity, at(5));
    }

    #[test]
    fn test_totals_and_average() {
        let mut board = MonitoringBoard::new("r1");
        board.apply(&login("p1", 0));
        board.apply(&login("p2", 1));
        board.apply(&login("p3", 2));
        board.apply(&step("p1", 50, 3));
        board.apply(&MonitoringEvent::Completed(CompletedData {
            meta: scope("p2").meta_at(at(4)),
            total_duration: 300,
            responses_count: 4,
        }));
        board.apply(&MonitoringEvent::Disqualified(DisqualifiedData {
            meta: scope("p3").meta_at(at(5)),
            reason: "age".to_string(),
            demographic_data: Default::default(),
            disqualification_type: DisqualificationKind::Demographics,
        }));

        let snapshot = board.snapshot();
        assert_eq!(snapshot.total_participants, 3);
        assert_eq!(snapshot.active_participants, 1);
        assert_eq!(snapshot.completed_participants, 1);
        assert_eq!(snapshot.disqualified_participants, 1);
        assert!((snapshot.average_progress - 50.0).abs() < f64::EPSILON);
        assert_eq!(snapshot.last_update, Some(at(5)));
    }

    #[test]
    fn test_quota_exceeded_disqualifies_with_reason() {
        let mut board = MonitoringBoard::new("r1");
        board.apply(&MonitoringEvent::QuotaExceeded(QuotaExceededData {
            meta: scope("p1").meta_at(at(0)),
            quota_type: "age".to_string(),
            quota_value: "18-24".to_string(),
            current_count: 50,
            max_quota: 50,
            demographic_data: Default::default(),
        }));
        let p = board.participant("p1").unwrap();
        assert_eq!(p.status, ParticipantStatus::Disqualified);
        assert_eq!(
            p.disqualification_reason.as_deref(),
            Some("Quota exceeded: age - 18-24")
        );
    }

    #[test]
    fn test_other_research_and_connect_are_ignored() {
        let mut board = MonitoringBoard::new("r1");
        let other = SessionScope::new("r2", "p1").unwrap();
        assert!(!board.apply(&MonitoringEvent::connect(&scope("p1"))));
        assert!(!board.apply(&MonitoringEvent::connect(&other)));
        assert_eq!(board.snapshot().total_participants, 0);
        assert_eq!(board.snapshot().average_progress, 0.0);
    }

    #[test]
    fn test_out_of_order_event_does_not_rewind_activity() {
        let mut board = MonitoringBoard::new("r1");
        board.apply(&step("p1", 60, 10));
        board.apply(&step("p1", 40, 5));
        assert_eq!(board.participant("p1").unwrap().last_activity, at(10));
    }

    #[test]
    fn test_snapshot_serializes_camel_case() {
        let mut board = MonitoringBoard::new("r1");
        board.apply(&login("p1", 0));
        let json = serde_json::to_value(board.snapshot()).unwrap();
        assert_eq!(json["researchId"], "r1");
        assert_eq!(json["totalParticipants"], 1);
        assert_eq!(json["participants"][0]["status"], "in_progress");
    }
}
