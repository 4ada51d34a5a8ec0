use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::retention::RetentionPolicy;
use crate::store::{DEFAULT_LOCK_TIMEOUT, validate_name};

/// How the drift report is written to stdout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReportFormat {
    /// Unified-diff style text.
    #[default]
    Text,
    /// One JSON object.
    Json,
}

/// The single, immutable configuration of one run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DriftConfig {
    #[serde(default = "default_mongo_uri")]
    pub mongo_uri: String,
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    #[serde(default = "default_context_lines")]
    pub context_lines: usize,
    #[serde(default = "default_keep_versions")]
    pub keep_versions: u64,
    #[serde(default = "default_name")]
    pub name: String,
    #[serde(default)]
    pub no_diff: bool,
    #[serde(default = "default_sample_timeout_secs")]
    pub sample_timeout_secs: u64,
    #[serde(default = "default_lock_timeout_ms")]
    pub lock_timeout_ms: u64,
    #[serde(default)]
    pub format: ReportFormat,
}

impl Default for DriftConfig {
    fn default() -> Self {
        Self {
            mongo_uri: default_mongo_uri(),
            data_dir: default_data_dir(),
            context_lines: default_context_lines(),
            keep_versions: default_keep_versions(),
            name: default_name(),
            no_diff: false,
            sample_timeout_secs: default_sample_timeout_secs(),
            lock_timeout_ms: default_lock_timeout_ms(),
            format: ReportFormat::default(),
        }
    }
}

impl DriftConfig {
    #[must_use]
    pub const fn sample_timeout(&self) -> Duration {
        Duration::from_secs(self.sample_timeout_secs)
    }

    #[must_use]
    pub const fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms)
    }

    #[must_use]
    pub const fn retention(&self) -> RetentionPolicy {
        RetentionPolicy::keep_last(self.keep_versions)
    }

    /// Check values that serde cannot.
    ///
    /// # Errors
    ///
    /// Returns an error naming the first invalid field.
    pub fn validate(&self) -> Result<()> {
        validate_name(&self.name).context("invalid --name")?;
        if self.sample_timeout_secs == 0 {
            bail!("sample timeout must be at least 1 second");
        }
        if self.mongo_uri.trim().is_empty() {
            bail!("mongo URI is empty");
        }
        Ok(())
    }
}

fn default_mongo_uri() -> String {
    "mongodb://localhost:27017".to_string()
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("./tmp")
}

const fn default_context_lines() -> usize {
    2
}

const fn default_keep_versions() -> u64 {
    100
}

fn default_name() -> String {
    "mongodb".to_string()
}

const fn default_sample_timeout_secs() -> u64 {
    10
}

#[allow(clippy::cast_possible_truncation)]
const fn default_lock_timeout_ms() -> u64 {
    DEFAULT_LOCK_TIMEOUT.as_millis() as u64
}

/// Values given on the command line. `None` leaves the file/default value.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConfigOverrides {
    pub mongo_uri: Option<String>,
    pub data_dir: Option<PathBuf>,
    pub context_lines: Option<usize>,
    pub keep_versions: Option<u64>,
    pub name: Option<String>,
    pub no_diff: bool,
    pub sample_timeout_secs: Option<u64>,
    pub json: bool,
}

impl ConfigOverrides {
    fn apply(self, mut config: DriftConfig) -> DriftConfig {
        if let Some(uri) = self.mongo_uri {
            config.mongo_uri = uri;
        }
        if let Some(dir) = self.data_dir {
            config.data_dir = dir;
        }
        if let Some(n) = self.context_lines {
            config.context_lines = n;
        }
        if let Some(n) = self.keep_versions {
            config.keep_versions = n;
        }
        if let Some(name) = self.name {
            config.name = name;
        }
        if let Some(secs) = self.sample_timeout_secs {
            config.sample_timeout_secs = secs;
        }
        config.no_diff |= self.no_diff;
        if self.json {
            config.format = ReportFormat::Json;
        }
        config
    }
}

/// `<config_dir>/mongodrift/config.toml`, if the platform has a config dir.
#[must_use]
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("mongodrift").join("config.toml"))
}

/// Read and parse a TOML config file.
///
/// # Errors
///
/// Returns an error if the file cannot be read or parsed.
pub fn load_config_file(path: &Path) -> Result<DriftConfig> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;

    toml::from_str::<DriftConfig>(&content)
        .with_context(|| format!("Failed to parse {}", path.display()))
}

/// Build the run configuration: defaults, then the config file, then flags.
///
/// An explicit `config_path` must exist. Without one, the default location
/// is used when present.
///
/// # Errors
///
/// Returns an error if the config file is unreadable or the merged result
/// fails validation.
pub fn resolve_config(
    config_path: Option<&Path>,
    overrides: ConfigOverrides,
) -> Result<DriftConfig> {
    let base = match config_path {
        Some(path) => load_config_file(path)?,
        None => match default_config_path() {
            Some(path) if path.exists() => load_config_file(&path)?,
            _ => DriftConfig::default(),
        },
    };

    let config = overrides.apply(base);
    config.validate()?;
    Ok(config)
}
