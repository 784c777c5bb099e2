//! `stepwatch simulate`: drive one participant through a step list.
//!
//! Every step is saved locally, optionally reconciled against the response
//! store, and reported to the observer. Monitoring failures are logged and
//! never stop the walk.

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, warn};

use stepwatch::config::StepwatchConfig;
use stepwatch::errors::MonitorError;
use stepwatch::monitor::{
    EmitOutcome, EventDeliveryPipeline, MemoryTransport, SessionScope, Transport, WsTransport,
};
use stepwatch::progress::{HttpResponseSource, RefreshOutcome, StepList, StepSession};

/// Extra time allowed for delivery after the longest debounce window.
const SETTLE_GRACE: Duration = Duration::from_secs(5);

pub struct SimulateArgs {
    pub steps: PathBuf,
    pub research: String,
    pub participant: Option<String>,
    pub answer_delay_ms: u64,
    pub dry_run: bool,
    pub observer_url: Option<String>,
    pub responses_url: Option<String>,
}

pub async fn cmd_simulate(config_path: Option<&Path>, args: SimulateArgs) -> Result<()> {
    let config = StepwatchConfig::with_cli_args(
        config_path,
        args.observer_url.clone(),
        args.responses_url.clone(),
    )?;
    for warning in config.validate() {
        warn!(%warning, "configuration warning");
    }

    let participant = args
        .participant
        .clone()
        .unwrap_or_else(|| format!("sim-{}", uuid::Uuid::new_v4()));
    let steps = StepList::load(&args.steps)?;
    let total = steps.len() as u32;
    let scope = SessionScope::new(args.research.as_str(), participant.as_str())?;
    let mut session = StepSession::new(args.research.as_str(), participant.as_str(), steps);

    let memory = args.dry_run.then(MemoryTransport::new);
    let transport: Arc<dyn Transport> = match &memory {
        Some(memory) => Arc::new(memory.clone()),
        None => Arc::new(
            WsTransport::new(config.observer_url()).with_connect_timeout(config.connect_timeout()),
        ),
    };
    let settings = config.delivery_settings();
    let mut pipeline = EventDeliveryPipeline::start(scope, transport, settings)?;

    let source = match config.responses_url() {
        Some(url) => Some(
            HttpResponseSource::new(url, config.toml.response_timeout())
                .context("Failed to build response store client")?,
        ),
        None => None,
    };
    if let Some(source) = &source {
        if let RefreshOutcome::Applied { answered } = session.refresh(source).await {
            info!(answered, "resuming from response store");
        }
        session.resume();
    }

    println!();
    println!(
        "{} {} / {}",
        console::style("Simulating").bold().cyan(),
        args.research,
        participant
    );
    if args.dry_run {
        println!("{}", console::style("(dry run: frames stay in memory)").dim());
    } else {
        println!("Observer: {}", config.observer_url());
    }
    println!();

    report(
        "login",
        pipeline
            .participant_login(None, Some(format!("stepwatch/{}", env!("CARGO_PKG_VERSION"))))
            .await,
    );

    let started = Instant::now();
    let delay = Duration::from_millis(args.answer_delay_ms);
    loop {
        let step = session.current_step().clone();
        let step_number = session.current_index() as u32 + 1;
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        session.record_saved(&step.key)?;
        let progress = session.tracker().progress_percent();
        report(
            "response saved",
            pipeline
                .response_saved(
                    &step.key,
                    serde_json::json!({ "simulated": true }),
                    step_number,
                    total,
                    progress,
                )
                .await,
        );
        report(
            "step progress",
            pipeline
                .participant_step(
                    &step.key,
                    step_number,
                    total,
                    progress,
                    Some(started.elapsed().as_secs()),
                )
                .await,
        );
        println!(
            "  {} {:>3}/{} {:<24} {:>3}%",
            console::style("✓").green(),
            step_number,
            total,
            step.key,
            progress
        );

        if let Some(source) = &source {
            session.refresh(source).await;
        }
        if session.advance()?.is_none() {
            break;
        }
    }

    let responses = session.tracker().completed_count() as u32;
    report(
        "completed",
        pipeline
            .participant_completed(started.elapsed().as_secs(), responses)
            .await,
    );

    let window = settings
        .step_progress_debounce
        .max(settings.response_saved_debounce);
    if !pipeline.settle(window + SETTLE_GRACE).await {
        warn!(
            queue_len = pipeline.queue_len(),
            pending = pipeline.pending_debounced(),
            "observer did not take every event before shutdown"
        );
    }
    let discarded = pipeline.shutdown("participant finished").await?;

    println!();
    println!(
        "Completed {} of {} steps ({}%).",
        responses,
        total,
        session.tracker().progress_percent()
    );
    if discarded > 0 {
        println!(
            "{} {} queued events were not delivered",
            console::style("⚠").yellow(),
            discarded
        );
    }

    if let Some(memory) = memory {
        println!();
        println!("Frames:");
        for frame in memory.frames() {
            println!("{}", frame);
        }
    }
    println!();
    Ok(())
}

fn report(what: &str, result: Result<EmitOutcome, MonitorError>) {
    match result {
        Ok(EmitOutcome::Dropped) => warn!(event = what, "event dropped by full queue"),
        Ok(_) => {}
        Err(e) => warn!(event = what, error = %e, "failed to report event"),
    }
}
