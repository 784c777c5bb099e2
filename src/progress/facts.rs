//! Response facts: which steps are known to be answered, and by whom.

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

/// Where a response fact came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FactSource {
    /// Confirmed by the authoritative response store
    Server,
    /// Written immediately after a successful local save
    LocalOptimistic,
}

/// A boolean record that a step has (or has not) been answered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResponseFact {
    pub step_key: String,
    pub has_response: bool,
    pub source: FactSource,
}

impl ResponseFact {
    pub fn server(step_key: impl Into<String>) -> Self {
        Self {
            step_key: step_key.into(),
            has_response: true,
            source: FactSource::Server,
        }
    }

    pub fn local(step_key: impl Into<String>) -> Self {
        Self {
            step_key: step_key.into(),
            has_response: true,
            source: FactSource::LocalOptimistic,
        }
    }
}

/// One fact per step key, with server facts taking precedence.
///
/// A local-optimistic fact never replaces a server fact for the same key; a
/// server fact always replaces whatever was there.
#[derive(Debug, Clone, Default)]
pub struct FactCache {
    facts: HashMap<String, ResponseFact>,
}

impl FactCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a fact, applying source precedence.
    ///
    /// Returns `true` if the cache changed.
    pub fn record(&mut self, fact: ResponseFact) -> bool {
        if fact.source == FactSource::LocalOptimistic
            && self
                .facts
                .get(&fact.step_key)
                .is_some_and(|existing| existing.source == FactSource::Server)
        {
            return false;
        }
        match self.facts.get(&fact.step_key) {
            Some(existing) if *existing == fact => false,
            _ => {
                self.facts.insert(fact.step_key.clone(), fact);
                true
            }
        }
    }

    /// Record a local-optimistic "answered" fact for a step.
    pub fn record_local(&mut self, step_key: &str) -> bool {
        self.record(ResponseFact::local(step_key))
    }

    /// Replace the server view with a fresh snapshot of answered keys.
    ///
    /// Every key in the snapshot becomes a server fact. Server facts from a
    /// previous snapshot that are absent now are dropped; local-optimistic
    /// facts the server has not caught up with yet survive.
    pub fn apply_server_snapshot<I, S>(&mut self, answered: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let answered: HashSet<String> = answered.into_iter().map(Into::into).collect();
        self.facts
            .retain(|key, fact| fact.source != FactSource::Server || answered.contains(key));
        for key in answered {
            self.record(ResponseFact::server(key));
        }
    }

    /// Whether the step is known to be answered.
    pub fn has_response(&self, step_key: &str) -> bool {
        self.facts
            .get(step_key)
            .is_some_and(|fact| fact.has_response)
    }

    pub fn get(&self, step_key: &str) -> Option<&ResponseFact> {
        self.facts.get(step_key)
    }

    pub fn is_empty(&self) -> bool {
        self.facts.is_empty()
    }

    pub fn len(&self) -> usize {
        self.facts.len()
    }

    /// True if at least one fact marks a step as answered.
    pub fn any_answered(&self) -> bool {
        self.facts.values().any(|f| f.has_response)
    }

    pub fn clear(&mut self) {
        self.facts.clear();
    }
}
