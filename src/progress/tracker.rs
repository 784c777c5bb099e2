//! Per-step state derived from the step order, known facts and the current step.
//!
//! Everything here is a pure function of its inputs and is recomputed on
//! every query, so there is no incremental state to drift.

use serde::{Deserialize, Serialize};

use super::facts::FactCache;
use super::step::{Step, StepList};

/// Display state of a single step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepState {
    /// The step the participant is on
    Active,
    /// Answered, revisitable
    Completed,
    /// Not reachable yet
    Disabled,
    /// Reachable but neither current nor answered
    Available,
}

impl std::fmt::Display for StepState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StepState::Active => write!(f, "active"),
            StepState::Completed => write!(f, "completed"),
            StepState::Disabled => write!(f, "disabled"),
            StepState::Available => write!(f, "available"),
        }
    }
}

/// Derived per-step information. Never persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepStateInfo {
    pub state: StepState,
    pub has_response: bool,
    pub can_access: bool,
    pub is_current_step: bool,
}

/// Read-only view over the tracker inputs.
#[derive(Debug, Clone, Copy)]
pub struct StepProgressTracker<'a> {
    steps: &'a StepList,
    facts: &'a FactCache,
    current: Option<&'a str>,
}

impl<'a> StepProgressTracker<'a> {
    pub fn new(steps: &'a StepList, facts: &'a FactCache, current: Option<&'a str>) -> Self {
        Self {
            steps,
            facts,
            current,
        }
    }

    /// Whether a step has a response from either source.
    pub fn has_response(&self, step_key: &str) -> bool {
        self.facts.has_response(step_key)
    }

    fn has_response_at(&self, index: usize) -> bool {
        self.steps
            .get(index)
            .is_some_and(|step| self.has_response(&step.key))
    }

    /// Index 0 is always reachable; any other step is reachable when it or
    /// its immediate predecessor has a response. Out-of-range is unreachable.
    pub fn can_access_step(&self, index: usize) -> bool {
        if index >= self.steps.len() {
            return false;
        }
        index == 0 || self.has_response_at(index) || self.has_response_at(index - 1)
    }

    /// State of the step at `index`, or `None` when out of range.
    ///
    /// Priority: current step, then answered, then unreachable, else available.
    pub fn step_state(&self, index: usize) -> Option<StepStateInfo> {
        let step = self.steps.get(index)?;
        let has_response = self.has_response(&step.key);
        let can_access = self.can_access_step(index);
        let is_current_step = self.current == Some(step.key.as_str());

        let state = if is_current_step {
            StepState::Active
        } else if has_response {
            StepState::Completed
        } else if !can_access {
            StepState::Disabled
        } else {
            StepState::Available
        };

        Some(StepStateInfo {
            state,
            has_response,
            can_access,
            is_current_step,
        })
    }

    /// State of every step, in order.
    pub fn states(&self) -> Vec<(&'a Step, StepStateInfo)> {
        self.steps
            .iter()
            .enumerate()
            .filter_map(|(i, step)| self.step_state(i).map(|info| (step, info)))
            .collect()
    }

    /// Where a participant should land when the session (re)starts.
    ///
    /// First step when nothing is answered, otherwise the first unanswered
    /// step, otherwise the last step.
    pub fn initial_step(&self) -> Option<&'a Step> {
        if !self.facts.any_answered() {
            return self.steps.first();
        }
        self.steps
            .iter()
            .find(|step| !self.has_response(&step.key))
            .or_else(|| self.steps.last())
    }

    /// The step after the current one, or `None` on the last step.
    pub fn next_step(&self) -> Option<&'a Step> {
        let index = self.current.and_then(|key| self.steps.position(key))?;
        self.steps.get(index + 1)
    }

    /// Number of answered steps in this step list.
    pub fn completed_count(&self) -> usize {
        self.steps
            .iter()
            .filter(|step| self.has_response(&step.key))
            .count()
    }

    /// Rounded completion percentage (0-100).
    pub fn progress_percent(&self) -> u8 {
        let total = self.steps.len();
        if total == 0 {
            return 0;
        }
        let percent = (self.completed_count() as f64 / total as f64) * 100.0;
        percent.round().clamp(0.0, 100.0) as u8
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn steps(keys: &[&str]) -> StepList {
        StepList::from_keys(keys.iter().copied()).unwrap()
    }

    fn facts(answered: &[&str]) -> FactCache {
        let mut cache = FactCache::new();
        for key in answered {
            cache.record_local(key);
        }
        cache
    }

    #[test]
    fn test_example_scenario_abc() {
        let list = steps(&["A", "B", "C"]);
        let cache = facts(&["A"]);
        let tracker = StepProgressTracker::new(&list, &cache, Some("B"));

        assert_eq!(tracker.step_state(0).unwrap().state, StepState::Completed);
        assert_eq!(tracker.step_state(1).unwrap().state, StepState::Active);
        assert_eq!(tracker.step_state(2).unwrap().state, StepState::Disabled);
        assert!(!tracker.can_access_step(2));
    }

    #[test]
    fn test_prefix_reachability_for_every_k() {
        let keys = ["s0", "s1", "s2", "s3", "s4"];
        let list = steps(&keys);
        for k in 0..=keys.len() {
            let cache = facts(&keys[..k]);
            let tracker = StepProgressTracker::new(&list, &cache, None);
            for i in 0..keys.len() {
                assert_eq!(
                    tracker.can_access_step(i),
                    i <= k,
                    "k={} i={} expected reachability {}",
                    k,
                    i,
                    i <= k
                );
            }
        }
    }

    #[test]
    fn test_answered_steps_stay_revisitable_past_a_gap() {
        let list = steps(&["A", "B", "C", "D"]);
        let cache = facts(&["A", "C"]);
        let tracker = StepProgressTracker::new(&list, &cache, Some("B"));
        assert!(tracker.can_access_step(2));
        assert!(tracker.can_access_step(3));
        assert_eq!(tracker.step_state(2).unwrap().state, StepState::Completed);
        assert_eq!(tracker.step_state(3).unwrap().state, StepState::Available);
    }

    #[test]
    fn test_exactly_one_active_step() {
        let list = steps(&["A", "B", "C", "D"]);
        let cache = facts(&["A", "B", "C", "D"]);
        for current in ["A", "B", "C", "D"] {
            let tracker = StepProgressTracker::new(&list, &cache, Some(current));
            let active = tracker
                .states()
                .iter()
                .filter(|(_, info)| info.state == StepState::Active)
                .count();
            assert_eq!(active, 1);
        }
    }

    #[test]
    fn test_current_step_wins_over_completed() {
        let list = steps(&["A", "B"]);
        let cache = facts(&["A"]);
        let tracker = StepProgressTracker::new(&list, &cache, Some("A"));
        let info = tracker.step_state(0).unwrap();
        assert_eq!(info.state, StepState::Active);
        assert!(info.has_response);
        assert!(info.is_current_step);
    }

    #[test]
    fn test_initial_step_rules() {
        let list = steps(&["A", "B", "C"]);

        let none = FactCache::new();
        let tracker = StepProgressTracker::new(&list, &none, None);
        assert_eq!(tracker.initial_step().unwrap().key, "A");

        let partial = facts(&["A", "B"]);
        let tracker = StepProgressTracker::new(&list, &partial, None);
        assert_eq!(tracker.initial_step().unwrap().key, "C");

        let all = facts(&["A", "B", "C"]);
        let tracker = StepProgressTracker::new(&list, &all, None);
        assert_eq!(tracker.initial_step().unwrap().key, "C");
    }

    #[test]
    fn test_next_step() {
        let list = steps(&["A", "B", "C"]);
        let cache = FactCache::new();
        assert_eq!(
            StepProgressTracker::new(&list, &cache, Some("A"))
                .next_step()
                .unwrap()
                .key,
            "B"
        );
        assert!(
            StepProgressTracker::new(&list, &cache, Some("C"))
                .next_step()
                .is_none()
        );
        assert!(
            StepProgressTracker::new(&list, &cache, Some("zzz"))
                .next_step()
                .is_none()
        );
    }

    #[test]
    fn test_out_of_range_index() {
        let list = steps(&["A"]);
        let cache = FactCache::new();
        let tracker = StepProgressTracker::new(&list, &cache, Some("A"));
        assert!(!tracker.can_access_step(1));
        assert!(tracker.step_state(1).is_none());
    }

    #[test]
    fn test_progress_percent_rounds() {
        let list = steps(&["A", "B", "C"]);
        let cache = facts(&["A"]);
        let tracker = StepProgressTracker::new(&list, &cache, None);
        assert_eq!(tracker.completed_count(), 1);
        assert_eq!(tracker.progress_percent(), 33);

        let cache = facts(&["A", "B"]);
        let tracker = StepProgressTracker::new(&list, &cache, None);
        assert_eq!(tracker.progress_percent(), 67);
    }

    #[test]
    fn test_facts_for_unknown_keys_do_not_count() {
        let list = steps(&["A", "B"]);
        let cache = facts(&["other"]);
        let tracker = StepProgressTracker::new(&list, &cache, None);
        assert_eq!(tracker.completed_count(), 0);
        // A fact exists, so the "no facts" shortcut is skipped, but the first
        // unanswered step is still A.
        assert_eq!(tracker.initial_step().unwrap().key, "A");
    }

    #[test]
    fn test_state_info_serializes_camel_case() {
        let info = StepStateInfo {
            state: StepState::Disabled,
            has_response: false,
            can_access: false,
            is_current_step: false,
        };
        let json = serde_json::to_string(&info).unwrap();
        assert!(json.contains("\"state\":\"disabled\""));
        assert!(json.contains("\"canAccess\":false"));
        assert!(json.contains("\"isCurrentStep\":false"));
    }
}
