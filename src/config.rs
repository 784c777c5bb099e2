//! Layered configuration for stepwatch.
//!
//! Settings are read from `.stepwatch/stepwatch.toml` (or `--config`), then
//! environment variables, then CLI flags; later layers win.
//!
//! # Configuration File Format
//!
//! ```toml
//! [observer]
//! url = "ws://127.0.0.1:4180/ws"
//! connect_timeout_ms = 10000
//!
//! [responses]
//! base_url = "http://127.0.0.1:4000/api"
//! timeout_ms = 5000
//!
//! [delivery]
//! step_progress_debounce_ms = 2000
//! response_saved_debounce_ms = 500
//! dedup_capacity = 50
//! min_progress_delta = 0
//!
//! [backoff]
//! base_ms = 5000
//! max_ms = 30000
//! queue_pressure_step = 10
//!
//! [queue]
//! max_len = 0              # 0 = unbounded
//! overflow = "drop_oldest" # or "reject_new"
//! ```

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::monitor::backoff::BackoffPolicy;
use crate::monitor::pipeline::DeliverySettings;
use crate::monitor::supervisor::{OverflowPolicy, QueueLimit, SupervisorConfig};

pub const CONFIG_DIR: &str = ".stepwatch";
pub const CONFIG_FILE: &str = "stepwatch.toml";

pub const ENV_OBSERVER_URL: &str = "STEPWATCH_OBSERVER_URL";
pub const ENV_RESPONSES_URL: &str = "STEPWATCH_RESPONSES_URL";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObserverSection {
    /// WebSocket ingest endpoint of the observer
    #[serde(default = "default_observer_url")]
    pub url: String,
    /// Limit on the WebSocket handshake; a stalled attempt counts as failed
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
}

fn default_observer_url() -> String {
    "ws://127.0.0.1:4180/ws".to_string()
}

fn default_connect_timeout_ms() -> u64 {
    10_000
}

impl Default for ObserverSection {
    fn default() -> Self {
        Self {
            url: default_observer_url(),
            connect_timeout_ms: default_connect_timeout_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponsesSection {
    /// Base URL of the response store; unset means no remote source
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_timeout_ms() -> u64 {
    5_000
}

impl Default for ResponsesSection {
    fn default() -> Self {
        Self {
            base_url: None,
            timeout_ms: default_timeout_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliverySection {
    #[serde(default = "default_step_progress_debounce_ms")]
    pub step_progress_debounce_ms: u64,
    #[serde(default = "default_response_saved_debounce_ms")]
    pub response_saved_debounce_ms: u64,
    #[serde(default = "default_dedup_capacity")]
    pub dedup_capacity: usize,
    /// Smallest progress change on the same step worth reporting (0 = all)
    #[serde(default)]
    pub min_progress_delta: u8,
}

fn default_step_progress_debounce_ms() -> u64 {
    2_000
}

fn default_response_saved_debounce_ms() -> u64 {
    500
}

fn default_dedup_capacity() -> usize {
    crate::monitor::dedup::DEFAULT_DEDUP_CAPACITY
}

impl Default for DeliverySection {
    fn default() -> Self {
        Self {
            step_progress_debounce_ms: default_step_progress_debounce_ms(),
            response_saved_debounce_ms: default_response_saved_debounce_ms(),
            dedup_capacity: default_dedup_capacity(),
            min_progress_delta: 0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackoffSection {
    #[serde(default = "default_base_ms")]
    pub base_ms: u64,
    #[serde(default = "default_max_ms")]
    pub max_ms: u64,
    #[serde(default = "default_queue_pressure_step")]
    pub queue_pressure_step: usize,
}

fn default_base_ms() -> u64 {
    5_000
}

fn default_max_ms() -> u64 {
    30_000
}

fn default_queue_pressure_step() -> usize {
    10
}

impl Default for BackoffSection {
    fn default() -> Self {
        Self {
            base_ms: default_base_ms(),
            max_ms: default_max_ms(),
            queue_pressure_step: default_queue_pressure_step(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QueueSection {
    #[serde(default)]
    pub max_len: usize,
    #[serde(default)]
    pub overflow: OverflowPolicy,
}

/// Contents of `stepwatch.toml`. Every field has a default.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StepwatchToml {
    #[serde(default)]
    pub observer: ObserverSection,
    #[serde(default)]
    pub responses: ResponsesSection,
    #[serde(default)]
    pub delivery: DeliverySection,
    #[serde(default)]
    pub backoff: BackoffSection,
    #[serde(default)]
    pub queue: QueueSection,
}

impl StepwatchToml {
    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse stepwatch.toml")
    }

    /// Load `stepwatch.toml` from `config_dir`, or defaults if it is absent.
    pub fn load_or_default(config_dir: &Path) -> Result<Self> {
        let config_path = config_dir.join(CONFIG_FILE);
        if config_path.exists() {
            Self::load(&config_path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let content =
            toml::to_string_pretty(self).context("Failed to serialize stepwatch.toml")?;
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;
        Ok(())
    }

    /// Overlay environment variables, looked up through `var`.
    pub fn apply_env<F>(&mut self, var: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = var(ENV_OBSERVER_URL).filter(|v| !v.trim().is_empty()) {
            self.observer.url = url;
        }
        if let Some(url) = var(ENV_RESPONSES_URL).filter(|v| !v.trim().is_empty()) {
            self.responses.base_url = Some(url);
        }
    }

    pub fn backoff_policy(&self) -> BackoffPolicy {
        BackoffPolicy {
            base: Duration::from_millis(self.backoff.base_ms),
            max: Duration::from_millis(self.backoff.max_ms),
            queue_pressure_step: self.backoff.queue_pressure_step,
        }
    }

    pub fn delivery_settings(&self) -> DeliverySettings {
        DeliverySettings {
            step_progress_debounce: Duration::from_millis(self.delivery.step_progress_debounce_ms),
            response_saved_debounce: Duration::from_millis(
                self.delivery.response_saved_debounce_ms,
            ),
            dedup_capacity: self.delivery.dedup_capacity,
            min_progress_delta: self.delivery.min_progress_delta,
            supervisor: SupervisorConfig {
                backoff: self.backoff_policy(),
                queue: QueueLimit {
                    max_len: self.queue.max_len,
                    overflow: self.queue.overflow,
                },
            },
        }
    }

    pub fn response_timeout(&self) -> Duration {
        Duration::from_millis(self.responses.timeout_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.observer.connect_timeout_ms)
    }

    /// Human-readable problems; an empty list means the file is sane.
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();

        let url = self.observer.url.as_str();
        if !(url.starts_with("ws://") || url.starts_with("wss://")) {
            warnings.push(format!(
                "observer.url '{}' should start with ws:// or wss://",
                url
            ));
        }
        if self.observer.connect_timeout_ms == 0 {
            warnings.push(
                "observer.connect_timeout_ms is 0; every connection attempt will time out"
                    .to_string(),
            );
        }

        if let Some(base) = &self.responses.base_url
            && !(base.starts_with("http://") || base.starts_with("https://"))
        {
            warnings.push(format!(
                "responses.base_url '{}' should start with http:// or https://",
                base
            ));
        }
        if self.responses.timeout_ms == 0 {
            warnings.push("responses.timeout_ms is 0; every request will time out".to_string());
        }

        if self.delivery.dedup_capacity == 0 {
            warnings.push(
                "delivery.dedup_capacity is 0; a window of 1 will be used instead".to_string(),
            );
        }
        if self.delivery.min_progress_delta > 100 {
            warnings.push(format!(
                "delivery.min_progress_delta {} exceeds 100; step progress will never be reported twice for a step",
                self.delivery.min_progress_delta
            ));
        }

        if self.backoff.base_ms == 0 {
            warnings.push("backoff.base_ms is 0; reconnects will spin".to_string());
        }
        if self.backoff.max_ms < self.backoff.base_ms {
            warnings.push(format!(
                "backoff.max_ms ({}) is below backoff.base_ms ({})",
                self.backoff.max_ms, self.backoff.base_ms
            ));
        }

        warnings
    }
}

/// Resolved configuration: file, then environment, then CLI overrides.
#[derive(Debug, Clone)]
pub struct StepwatchConfig {
    /// File the settings came from, if any
    pub source: Option<PathBuf>,
    pub toml: StepwatchToml,
}

impl StepwatchConfig {
    /// Path used when `--config` is not given.
    pub fn default_path() -> PathBuf {
        Path::new(CONFIG_DIR).join(CONFIG_FILE)
    }

    /// Read an explicit file (which must exist) or the default location.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let (source, mut toml) = match explicit {
            Some(path) => (Some(path.to_path_buf()), StepwatchToml::load(path)?),
            None => {
                let path = Self::default_path();
                if path.exists() {
                    let toml = StepwatchToml::load(&path)?;
                    (Some(path), toml)
                } else {
                    (None, StepwatchToml::default())
                }
            }
        };
        toml.apply_env(|key| std::env::var(key).ok());
        Ok(Self { source, toml })
    }

    pub fn with_cli_args(
        explicit: Option<&Path>,
        observer_url: Option<String>,
        responses_url: Option<String>,
    ) -> Result<Self> {
        let mut config = Self::load(explicit)?;
        if let Some(url) = observer_url {
            config.toml.observer.url = url;
        }
        if let Some(url) = responses_url {
            config.toml.responses.base_url = Some(url);
        }
        Ok(config)
    }

    pub fn observer_url(&self) -> &str {
        &self.toml.observer.url
    }

    pub fn responses_url(&self) -> Option<&str> {
        self.toml.responses.base_url.as_deref()
    }

    pub fn delivery_settings(&self) -> DeliverySettings {
        self.toml.delivery_settings()
    }

    pub fn connect_timeout(&self) -> Duration {
        self.toml.connect_timeout()
    }

    pub fn validate(&self) -> Vec<String> {
        self.toml.validate()
    }
}
