//! Owner of the tracker inputs for one participant session.

use tracing::{debug, warn};

use super::facts::FactCache;
use super::source::ResponseSource;
use super::step::{Step, StepList};
use super::tracker::StepProgressTracker;
use crate::errors::ProgressError;

/// Result of a refresh against the authoritative store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshOutcome {
    /// Snapshot applied; carries the number of answered records
    Applied { answered: usize },
    /// Query failed; last-known facts were kept
    Retained,
}

/// Step list, response facts and current step for one participant.
#[derive(Debug, Clone)]
pub struct StepSession {
    research_id: String,
    participant_id: String,
    steps: StepList,
    facts: FactCache,
    current: String,
}

impl StepSession {
    /// Start a session on the initial step (the first step, as no facts exist yet).
    pub fn new(
        research_id: impl Into<String>,
        participant_id: impl Into<String>,
        steps: StepList,
    ) -> Self {
        let facts = FactCache::new();
        let current = StepProgressTracker::new(&steps, &facts, None)
            .initial_step()
            .map(|s| s.key.clone())
            .unwrap_or_default();
        Self {
            research_id: research_id.into(),
            participant_id: participant_id.into(),
            steps,
            facts,
            current,
        }
    }

    pub fn research_id(&self) -> &str {
        &self.research_id
    }

    pub fn participant_id(&self) -> &str {
        &self.participant_id
    }

    pub fn steps(&self) -> &StepList {
        &self.steps
    }

    pub fn facts(&self) -> &FactCache {
        &self.facts
    }

    /// Tracker view over the current inputs.
    pub fn tracker(&self) -> StepProgressTracker<'_> {
        StepProgressTracker::new(&self.steps, &self.facts, Some(self.current.as_str()))
    }

    pub fn current_step(&self) -> &Step {
        self.steps
            .get(self.current_index())
            .unwrap_or_else(|| self.steps.head())
    }

    pub fn current_index(&self) -> usize {
        self.steps.position(&self.current).unwrap_or(0)
    }

    /// Record a successful local save for a step.
    pub fn record_saved(&mut self, step_key: &str) -> Result<(), ProgressError> {
        if !self.steps.contains(step_key) {
            return Err(ProgressError::UnknownStep {
                key: step_key.to_string(),
            });
        }
        if self.facts.record_local(step_key) {
            debug!(step = step_key, "recorded local-optimistic response");
        }
        Ok(())
    }

    /// Query the authoritative store and reconcile.
    ///
    /// On failure the last-known facts are kept. The current step is kept
    /// unless it is no longer part of the step order.
    pub async fn refresh(&mut self, source: &dyn ResponseSource) -> RefreshOutcome {
        match source
            .fetch_responses(&self.research_id, &self.participant_id)
            .await
        {
            Ok(records) => {
                let answered = records.len();
                self.facts
                    .apply_server_snapshot(records.into_iter().map(|r| r.step_key));
                self.ensure_current_is_valid();
                debug!(
                    research_id = %self.research_id,
                    participant_id = %self.participant_id,
                    answered,
                    "applied response snapshot"
                );
                RefreshOutcome::Applied { answered }
            }
            Err(e) => {
                warn!(
                    research_id = %self.research_id,
                    participant_id = %self.participant_id,
                    error = %e,
                    "response store query failed; keeping last-known facts"
                );
                RefreshOutcome::Retained
            }
        }
    }

    fn ensure_current_is_valid(&mut self) {
        if self.steps.contains(&self.current) {
            return;
        }
        let initial = self.tracker().initial_step().map(|s| s.key.clone());
        if let Some(key) = initial {
            self.current = key;
        }
    }

    /// Jump to a step the participant is allowed to reach.
    pub fn navigate_to(&mut self, step_key: &str) -> Result<&Step, ProgressError> {
        let index = self
            .steps
            .position(step_key)
            .ok_or_else(|| ProgressError::UnknownStep {
                key: step_key.to_string(),
            })?;
        if !self.tracker().can_access_step(index) {
            return Err(ProgressError::StepLocked {
                key: step_key.to_string(),
            });
        }
        self.current = step_key.to_string();
        Ok(self.current_step())
    }

    /// Move to the next step in order.
    ///
    /// Returns `Ok(None)` on the last step.
    pub fn advance(&mut self) -> Result<Option<&Step>, ProgressError> {
        let Some(next) = self.tracker().next_step().map(|s| s.key.clone()) else {
            return Ok(None);
        };
        self.navigate_to(&next).map(Some)
    }

    /// Put the participant on the computed initial step.
    pub fn resume(&mut self) -> &Step {
        let initial = self.tracker().initial_step().map(|s| s.key.clone());
        if let Some(key) = initial {
            self.current = key;
        }
        self.current_step()
    }
}
