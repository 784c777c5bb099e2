//! `stepwatch status`: per-step state table for a step file.

use anyhow::{Result, bail};
use serde::Serialize;
use std::path::Path;

use stepwatch::progress::{FactCache, StepList, StepProgressTracker, StepState, StepStateInfo};

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StepRow {
    pub key: String,
    pub title: String,
    #[serde(flatten)]
    pub info: StepStateInfo,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusReport {
    pub current_step: Option<String>,
    pub completed: usize,
    pub total: usize,
    pub progress: u8,
    pub steps: Vec<StepRow>,
}

/// Run the tracker over the answered keys. Unknown keys are rejected.
pub fn build_report(
    steps: &StepList,
    answered: &[String],
    current: Option<&str>,
) -> Result<StatusReport> {
    for key in answered {
        if !steps.contains(key) {
            bail!("Answered step '{}' is not in the step file", key);
        }
    }
    if let Some(key) = current
        && !steps.contains(key)
    {
        bail!("Current step '{}' is not in the step file", key);
    }

    let mut facts = FactCache::new();
    facts.apply_server_snapshot(answered.iter().cloned());

    let current_key = match current {
        Some(key) => Some(key.to_string()),
        None => StepProgressTracker::new(steps, &facts, None)
            .initial_step()
            .map(|s| s.key.clone()),
    };
    let tracker = StepProgressTracker::new(steps, &facts, current_key.as_deref());

    let rows = tracker
        .states()
        .into_iter()
        .map(|(step, info)| StepRow {
            key: step.key.clone(),
            title: step.title.clone(),
            info,
        })
        .collect();

    Ok(StatusReport {
        current_step: current_key.clone(),
        completed: tracker.completed_count(),
        total: steps.len(),
        progress: tracker.progress_percent(),
        steps: rows,
    })
}

pub fn cmd_status(
    steps_path: &Path,
    answered: &[String],
    current: Option<&str>,
    json: bool,
) -> Result<()> {
    let steps = StepList::load(steps_path)?;
    let report = build_report(&steps, answered, current)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    println!();
    println!("{}", console::style("Step Progress").bold().cyan());
    println!("=============");
    println!();
    for (i, row) in report.steps.iter().enumerate() {
        let marker = if row.info.is_current_step { ">" } else { " " };
        println!(
            "{} {:>3}. {:<24} {}",
            marker,
            i + 1,
            row.key,
            styled_state(row.info.state)
        );
    }
    println!();
    println!(
        "Completed: {}/{} ({}%)",
        report.completed, report.total, report.progress
    );
    if let Some(current) = &report.current_step {
        println!("Current:   {}", current);
    }
    println!();
    Ok(())
}

fn styled_state(state: StepState) -> console::StyledObject<String> {
    let label = state.to_string();
    match state {
        StepState::Active => console::style(label).cyan().bold(),
        StepState::Completed => console::style(label).green(),
        StepState::Disabled => console::style(label).dim(),
        StepState::Available => console::style(label),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn steps() -> StepList {
        StepList::from_keys(["a", "b", "c", "d"]).unwrap()
    }

    #[test]
    fn test_report_defaults_current_to_initial_step() {
        let report = build_report(&steps(), &["a".to_string()], None).unwrap();
        assert_eq!(report.current_step.as_deref(), Some("b"));
        assert_eq!(report.completed, 1);
        assert_eq!(report.progress, 25);

        let states: Vec<_> = report.steps.iter().map(|r| r.info.state).collect();
        assert_eq!(
            states,
            vec![
                StepState::Completed,
                StepState::Active,
                StepState::Disabled,
                StepState::Disabled
            ]
        );
    }

    #[test]
    fn test_report_rejects_unknown_keys() {
        assert!(build_report(&steps(), &["zz".to_string()], None).is_err());
        assert!(build_report(&steps(), &[], Some("zz")).is_err());
    }

    #[test]
    fn test_report_json_shape() {
        let report = build_report(&steps(), &[], Some("a")).unwrap();
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["currentStep"], "a");
        assert_eq!(json["steps"][0]["state"], "active");
        assert_eq!(json["steps"][1]["canAccess"], false);
    }
}
