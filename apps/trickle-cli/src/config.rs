//! CLI configuration.
//!
//! Sources, lowest precedence first: built-in defaults, an optional JSON
//! file, `TRICKLE_*` environment variables, then command-line flags
//! (applied by `main`).

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use serde::{Deserialize, Serialize};
use trickle_transfer::TransferSettings;

pub const ENV_UPLOAD_DIR: &str = "TRICKLE_UPLOAD_DIR";
pub const ENV_DEFAULT_RATE: &str = "TRICKLE_DEFAULT_RATE";

/// On-disk config format. Every key is optional.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ConfigFile {
    #[serde(default)]
    upload_dir: Option<PathBuf>,
    #[serde(default)]
    default_rate: Option<i64>,
    #[serde(default)]
    chunk_size: Option<usize>,
    #[serde(default)]
    sample_interval_ms: Option<u64>,
    #[serde(default)]
    progress_interval_ms: Option<u64>,
}

/// Resolved CLI configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct CliConfig {
    pub upload_dir: PathBuf,
    pub default_rate: i64,
    pub chunk_size: usize,
    pub sample_interval: Duration,
    pub progress_interval: Duration,
}

impl Default for CliConfig {
    fn default() -> Self {
        let settings = TransferSettings::default();
        Self {
            upload_dir: PathBuf::from("uploads"),
            default_rate: settings.default_rate,
            chunk_size: settings.chunk_size,
            sample_interval: settings.sample_interval,
            progress_interval: Duration::from_secs(1),
        }
    }
}

impl CliConfig {
    /// Loads configuration from a JSON file over the defaults.
    ///
    /// A missing file is an error; a malformed one is logged and ignored.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config {}", path.display()))?;
        let mut config = Self::default();
        match serde_json::from_str::<ConfigFile>(&content) {
            Ok(file) => config.merge(file),
            Err(e) => tracing::warn!(
                path = %path.display(),
                error = %e,
                "failed to parse config, using defaults"
            ),
        }
        Ok(config)
    }

    fn merge(&mut self, file: ConfigFile) {
        if let Some(dir) = file.upload_dir.filter(|d| !d.as_os_str().is_empty()) {
            self.upload_dir = dir;
        }
        if let Some(rate) = file.default_rate {
            self.default_rate = rate;
        }
        if let Some(size) = file.chunk_size.filter(|&s| s > 0) {
            self.chunk_size = size;
        }
        if let Some(ms) = file.sample_interval_ms.filter(|&ms| ms > 0) {
            self.sample_interval = Duration::from_millis(ms);
        }
        if let Some(ms) = file.progress_interval_ms.filter(|&ms| ms > 0) {
            self.progress_interval = Duration::from_millis(ms);
        }
    }

    /// Applies `TRICKLE_*` overrides read through `lookup`.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(dir) = lookup(ENV_UPLOAD_DIR).filter(|d| !d.is_empty()) {
            self.upload_dir = PathBuf::from(dir);
        }
        if let Some(raw) = lookup(ENV_DEFAULT_RATE) {
            match raw.trim().parse::<i64>() {
                Ok(rate) => self.default_rate = rate,
                Err(_) => tracing::warn!(
                    var = ENV_DEFAULT_RATE,
                    value = %raw,
                    "ignoring invalid rate override"
                ),
            }
        }
    }

    /// Settings handed to the transfer registry.
    pub fn settings(&self) -> TransferSettings {
        TransferSettings {
            chunk_size: self.chunk_size,
            default_rate: self.default_rate,
            sample_interval: self.sample_interval,
            ..Default::default()
        }
    }
}
