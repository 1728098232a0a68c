//! Configuration schema for config.toml
//!
//! Every field is optional; command-line flags take precedence over the file.

use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

use crate::retry::Cadence;

/// Default cap on concurrent stack workers per region.
pub const DEFAULT_WORKERS: usize = 50;
/// Name of the per-region bootstrap stack.
pub const DEFAULT_BOOTSTRAP_STACK: &str = "stackfleet-bootstrap";

/// Root configuration structure for config.toml
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Settings {
    /// Credentials profile used for every region session
    #[serde(default)]
    pub profile: Option<String>,

    /// Service role assumed by the control plane for stack operations
    #[serde(default)]
    pub role: Option<String>,

    /// Concurrent stack workers per region in parallel mode
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// Values file, relative to the manifest's directory unless absolute
    #[serde(default = "default_values_file")]
    pub values_file: String,

    /// Where `diff` writes its document
    #[serde(default = "default_diff_output")]
    pub diff_output: PathBuf,

    #[serde(default = "default_bootstrap_stack")]
    pub bootstrap_stack: String,

    #[serde(default)]
    pub polling: PollingSettings,
}

/// Polling interval overrides, in seconds.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct PollingSettings {
    #[serde(default)]
    pub stack_status: Option<u64>,
    #[serde(default)]
    pub run: Option<u64>,
    #[serde(default)]
    pub submit: Option<u64>,
    #[serde(default)]
    pub change_set: Option<u64>,
    /// Ceiling of one polling loop, in hours.
    #[serde(default)]
    pub deadline_hours: Option<u64>,
}

fn default_workers() -> usize {
    DEFAULT_WORKERS
}

fn default_values_file() -> String {
    "values.json".to_string()
}

fn default_diff_output() -> PathBuf {
    PathBuf::from("diff.json")
}

fn default_bootstrap_stack() -> String {
    DEFAULT_BOOTSTRAP_STACK.to_string()
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            profile: None,
            role: None,
            workers: default_workers(),
            values_file: default_values_file(),
            diff_output: default_diff_output(),
            bootstrap_stack: default_bootstrap_stack(),
            polling: PollingSettings::default(),
        }
    }
}

impl Settings {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.workers == 0 {
            anyhow::bail!("workers must be at least 1");
        }
        if self.bootstrap_stack.trim().is_empty() {
            anyhow::bail!("bootstrap_stack must not be empty");
        }
        self.polling.validate()
    }
}

impl PollingSettings {
    fn validate(&self) -> anyhow::Result<()> {
        if self.deadline_hours == Some(0) {
            anyhow::bail!("polling.deadline_hours must be at least 1");
        }
        Ok(())
    }

    /// Default cadence with the configured overrides applied.
    pub fn cadence(&self) -> Cadence {
        let mut cadence = Cadence::default();
        if let Some(secs) = self.stack_status {
            cadence.stack_status = Duration::from_secs(secs);
        }
        if let Some(secs) = self.run {
            cadence.run = Duration::from_secs(secs);
        }
        if let Some(secs) = self.submit {
            cadence.submit = Duration::from_secs(secs);
        }
        if let Some(secs) = self.change_set {
            cadence.change_set = Duration::from_secs(secs);
        }
        if let Some(hours) = self.deadline_hours {
            cadence.deadline = Duration::from_secs(hours * 60 * 60);
        }
        cadence
    }
}
