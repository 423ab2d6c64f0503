use crate::core::planner::{DEFAULT_MAX_BATCH, DEFAULT_MIN_BATCH};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_BASE_URL: &str = "https://us-central1-washmobilepay.cloudfunctions.net";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub schedule: ScheduleSettings,
    pub http: HttpSettings,
    pub paths: PathSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScheduleSettings {
    pub interval_minutes: u64,
    pub max_concurrent: usize,
    pub min_batch: usize,
}

impl Default for ScheduleSettings {
    fn default() -> Self {
        Self {
            interval_minutes: 15,
            max_concurrent: DEFAULT_MAX_BATCH,
            min_batch: DEFAULT_MIN_BATCH,
        }
    }
}

impl ScheduleSettings {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_minutes.saturating_mul(60))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpSettings {
    pub base_url: String,
    pub request_timeout_secs: u64,
}

impl Default for HttpSettings {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            request_timeout_secs: 30,
        }
    }
}

impl HttpSettings {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PathSettings {
    pub data_dir: PathBuf,
    pub log_dir: PathBuf,
}

impl Default for PathSettings {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
            log_dir: PathBuf::from("logs"),
        }
    }
}

impl Settings {
    pub fn config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("washwatch").join("config.toml"))
    }

    /// Loads `explicit` if given (it must exist), otherwise the default
    /// config path if present, otherwise defaults.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let path = match explicit {
            Some(path) => path.to_path_buf(),
            None => match Self::config_path() {
                Some(path) if path.exists() => path,
                _ => {
                    tracing::debug!("Config file not found, using defaults");
                    return Ok(Self::default());
                }
            },
        };

        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let settings: Settings = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        tracing::debug!(?path, "Loaded config");
        Ok(settings)
    }

    pub fn validate(&self) -> Result<()> {
        if self.schedule.interval_minutes == 0 {
            anyhow::bail!("schedule.interval_minutes must be at least 1");
        }
        if self.schedule.max_concurrent == 0 {
            anyhow::bail!("schedule.max_concurrent must be at least 1");
        }
        if self.http.request_timeout_secs == 0 {
            anyhow::bail!("http.request_timeout_secs must be at least 1");
        }
        if self.http.base_url.trim().is_empty() {
            anyhow::bail!("http.base_url must not be empty");
        }
        Ok(())
    }
}
