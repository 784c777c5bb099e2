//! Ordered step list for a participant session.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;

use anyhow::Context;

use crate::errors::ProgressError;

/// One unit of a multi-step participant flow.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Step {
    /// Stable, unique key
    pub key: String,
    /// Human-readable title
    #[serde(default)]
    pub title: String,
}

impl Step {
    pub fn new(key: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            title: title.into(),
        }
    }
}

/// Immutable, ordered list of steps with unique keys.
///
/// Order is positional; every reachability decision is computed against it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepList {
    steps: Vec<Step>,
}

/// On-disk step file format.
#[derive(Debug, Deserialize)]
struct StepFile {
    #[serde(default)]
    steps: Vec<Step>,
}

impl StepList {
    /// Build a step list, rejecting empty lists and duplicate keys.
    pub fn new(steps: Vec<Step>) -> Result<Self, ProgressError> {
        if steps.is_empty() {
            return Err(ProgressError::EmptyStepList);
        }
        let mut seen = HashSet::with_capacity(steps.len());
        for step in &steps {
            if !seen.insert(step.key.as_str()) {
                return Err(ProgressError::DuplicateStepKey {
                    key: step.key.clone(),
                });
            }
        }
        Ok(Self { steps })
    }

    /// Convenience constructor from bare keys; titles default to the key.
    pub fn from_keys<I, S>(keys: I) -> Result<Self, ProgressError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let steps = keys
            .into_iter()
            .map(|k| {
                let key = k.into();
                Step::new(key.clone(), key)
            })
            .collect();
        Self::new(steps)
    }

    /// Load a step list from a TOML file with `[[steps]]` tables.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read step file: {}", path.display()))?;
        Self::parse(&content)
    }

    /// Parse a step list from TOML.
    pub fn parse(content: &str) -> anyhow::Result<Self> {
        let file: StepFile = toml::from_str(content).context("Failed to parse step file")?;
        let mut steps = file.steps;
        for step in &mut steps {
            if step.title.is_empty() {
                step.title = step.key.clone();
            }
        }
        Ok(Self::new(steps)?)
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Step> {
        self.steps.get(index)
    }

    /// First step; a `StepList` is never empty.
    pub fn head(&self) -> &Step {
        &self.steps[0]
    }

    pub fn first(&self) -> Option<&Step> {
        self.steps.first()
    }

    pub fn last(&self) -> Option<&Step> {
        self.steps.last()
    }

    /// Position of a step key in the order.
    pub fn position(&self, key: &str) -> Option<usize> {
        self.steps.iter().position(|s| s.key == key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.position(key).is_some()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Step> {
        self.steps.iter()
    }
}

impl<'a> IntoIterator for &'a StepList {
    type Item = &'a Step;
    type IntoIter = std::slice::Iter<'a, Step>;

    fn into_iter(self) -> Self::IntoIter {
        self.steps.iter()
    }
}
