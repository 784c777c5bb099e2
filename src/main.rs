use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use stepwatch::telemetry::{self, LogFormat};

mod cmd;

#[derive(Parser)]
#[command(name = "stepwatch")]
#[command(
    version,
    about = "Step-progress tracking and live monitoring for participant sessions"
)]
pub struct Cli {
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Log output format
    #[arg(long, value_enum, default_value_t = LogFormat::Pretty, global = true)]
    pub log_format: LogFormat,

    /// Path to stepwatch.toml. Defaults to .stepwatch/stepwatch.toml
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the reference observer (participant ingest + dashboards)
    Observe {
        #[arg(long, default_value = "4180")]
        port: u16,
        #[arg(long, default_value = "127.0.0.1")]
        host: String,
    },
    /// Walk a simulated participant through a step list, reporting progress
    Simulate {
        /// Step file (TOML with [[steps]] entries)
        #[arg(long)]
        steps: PathBuf,
        #[arg(long)]
        research: String,
        /// Participant id. Defaults to a fresh `sim-<uuid>`
        #[arg(long)]
        participant: Option<String>,
        /// Pause between answers, in milliseconds
        #[arg(long, default_value = "0")]
        answer_delay_ms: u64,
        /// Deliver to an in-memory transport and print the frames
        #[arg(long)]
        dry_run: bool,
        /// Observer WebSocket URL. Overrides stepwatch.toml and the environment
        #[arg(long)]
        observer_url: Option<String>,
        /// Response store base URL. Overrides stepwatch.toml and the environment
        #[arg(long)]
        responses_url: Option<String>,
    },
    /// Print the per-step state table for a set of answered steps
    Status {
        #[arg(long)]
        steps: PathBuf,
        /// Answered step keys, comma separated
        #[arg(long, value_delimiter = ',')]
        answered: Vec<String>,
        /// Current step key. Defaults to the computed initial step
        #[arg(long)]
        current: Option<String>,
        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },
    /// View, validate or create configuration
    Config {
        #[command(subcommand)]
        command: Option<ConfigCommands>,
    },
}

#[derive(Subcommand, Clone)]
pub enum ConfigCommands {
    /// Show the effective configuration
    Show,
    /// Check the configuration for problems
    Validate,
    /// Write a default stepwatch.toml
    Init,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    telemetry::init(cli.verbose, cli.log_format);

    match &cli.command {
        Commands::Observe { port, host } => cmd::cmd_observe(host, *port).await?,
        Commands::Simulate {
            steps,
            research,
            participant,
            answer_delay_ms,
            dry_run,
            observer_url,
            responses_url,
        } => {
            let args = cmd::SimulateArgs {
                steps: steps.clone(),
                research: research.clone(),
                participant: participant.clone(),
                answer_delay_ms: *answer_delay_ms,
                dry_run: *dry_run,
                observer_url: observer_url.clone(),
                responses_url: responses_url.clone(),
            };
            cmd::cmd_simulate(cli.config.as_deref(), args).await?
        }
        Commands::Status {
            steps,
            answered,
            current,
            json,
        } => cmd::cmd_status(steps, answered, current.as_deref(), *json)?,
        Commands::Config { command } => cmd::cmd_config(cli.config.as_deref(), command.clone())?,
    }

    Ok(())
}
