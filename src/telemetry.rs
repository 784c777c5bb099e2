//! `tracing` subscriber setup.
//!
//! Logs go to stderr so that command output on stdout stays clean.

use serde::{Deserialize, Serialize};
use tracing::Level;
use tracing_subscriber::layer::{Layer, SubscriberExt};
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Registry};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Directive used when `RUST_LOG` is not set.
pub fn default_directive(verbose: bool) -> String {
    let level = if verbose { Level::DEBUG } else { Level::INFO };
    format!("stepwatch={}", level.to_string().to_lowercase())
}

fn build_filter(verbose: bool) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directive(verbose)))
}

fn build_layer(format: LogFormat) -> Box<dyn Layer<Registry> + Send + Sync> {
    match format {
        LogFormat::Pretty => Box::new(
            tracing_subscriber::fmt::layer()
                .compact()
                .with_writer(std::io::stderr)
                .with_target(false),
        ),
        LogFormat::Json => Box::new(
            tracing_subscriber::fmt::layer()
                .json()
                .with_writer(std::io::stderr)
                .with_target(true)
                .with_current_span(true)
                .with_span_list(true),
        ),
    }
}

/// Install the global subscriber. Later calls are no-ops, so tests can
/// call this freely.
pub fn init(verbose: bool, format: LogFormat) {
    let _ = tracing_subscriber::registry()
        .with(build_layer(format))
        .with(build_filter(verbose))
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_directive() {
        assert_eq!(default_directive(false), "stepwatch=info");
        assert_eq!(default_directive(true), "stepwatch=debug");
    }

    #[test]
    fn test_init_twice_is_harmless() {
        init(false, LogFormat::Pretty);
        init(true, LogFormat::Json);
    }
}
