//! Configuration view and validation commands: `stepwatch config`.

use anyhow::Result;
use std::path::Path;

use stepwatch::config::{StepwatchConfig, StepwatchToml};
use stepwatch::monitor::OverflowPolicy;

use super::super::ConfigCommands;

pub fn cmd_config(explicit: Option<&Path>, command: Option<ConfigCommands>) -> Result<()> {
    let config_path = explicit
        .map(Path::to_path_buf)
        .unwrap_or_else(StepwatchConfig::default_path);

    match command {
        None | Some(ConfigCommands::Show) => {
            println!();
            println!("Stepwatch Configuration");
            println!("=======================");
            println!();

            if config_path.exists() {
                println!("Config file: {}", config_path.display());
            } else {
                println!("No stepwatch.toml found at {}", config_path.display());
                println!("Using defaults. Run 'stepwatch config init' to create one.");
            }
            println!();

            let config = StepwatchConfig::load(config_path.exists().then_some(&*config_path))?;
            print_toml(&config.toml);

            println!("Effective values (with env overrides):");
            println!("  observer.url = \"{}\"", config.observer_url());
            match config.responses_url() {
                Some(url) => println!("  responses.base_url = \"{}\"", url),
                None => println!("  responses.base_url = (none)"),
            }
            println!();
        }
        Some(ConfigCommands::Validate) => {
            println!();
            println!("Validating configuration...");
            println!();

            if !config_path.exists() {
                println!("No stepwatch.toml found. Using defaults (valid).");
                return Ok(());
            }

            let toml = StepwatchToml::load(&config_path)?;
            let warnings = toml.validate();

            if warnings.is_empty() {
                println!("Configuration is valid.");
            } else {
                println!("Configuration warnings:");
                for warning in warnings {
                    println!("  - {}", warning);
                }
            }
            println!();
        }
        Some(ConfigCommands::Init) => {
            if config_path.exists() {
                println!("stepwatch.toml already exists at {}", config_path.display());
                println!("Delete it first if you want to recreate it.");
                return Ok(());
            }

            StepwatchToml::default().save(&config_path)?;

            println!("Created stepwatch.toml at {}", config_path.display());
            println!();
            println!("You can now customize:");
            println!("  - [observer] url, connect_timeout_ms");
            println!("  - [responses] base_url, timeout_ms");
            println!("  - [delivery] debounce windows, dedup_capacity, min_progress_delta");
            println!("  - [backoff] and [queue] reconnect and offline queue limits");
            println!();
        }
    }

    Ok(())
}

fn print_toml(toml: &StepwatchToml) {
    println!("[observer]");
    println!("  url = \"{}\"", toml.observer.url);
    println!("  connect_timeout_ms = {}", toml.observer.connect_timeout_ms);
    println!();

    println!("[responses]");
    if let Some(url) = &toml.responses.base_url {
        println!("  base_url = \"{}\"", url);
    }
    println!("  timeout_ms = {}", toml.responses.timeout_ms);
    println!();

    println!("[delivery]");
    println!(
        "  step_progress_debounce_ms = {}",
        toml.delivery.step_progress_debounce_ms
    );
    println!(
        "  response_saved_debounce_ms = {}",
        toml.delivery.response_saved_debounce_ms
    );
    println!("  dedup_capacity = {}", toml.delivery.dedup_capacity);
    println!("  min_progress_delta = {}", toml.delivery.min_progress_delta);
    println!();

    println!("[backoff]");
    println!("  base_ms = {}", toml.backoff.base_ms);
    println!("  max_ms = {}", toml.backoff.max_ms);
    println!(
        "  queue_pressure_step = {}",
        toml.backoff.queue_pressure_step
    );
    println!();

    println!("[queue]");
    println!("  max_len = {}", toml.queue.max_len);
    let overflow = match toml.queue.overflow {
        OverflowPolicy::DropOldest => "drop_oldest",
        OverflowPolicy::RejectNew => "reject_new",
    };
    println!("  overflow = \"{}\"", overflow);
    println!();
}
