use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::gateway::PollSettings;
use crate::secrets::SecretSource;
use crate::telemetry::LogFormat;

pub const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";
pub const DEFAULT_API_KEY_ENV_VAR: &str = "GEMINI_API_KEY";

/// Top-level studio configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StudioConfig {
    pub version: String,

    /// Archive file; `~/.atelier/data/atelier.db` when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub database_path: Option<PathBuf>,

    /// Where downloaded videos are written. Videos are kept inline when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media_directory: Option<PathBuf>,

    #[serde(default)]
    pub api: ApiConfig,

    #[serde(default)]
    pub polling: PollingConfig,

    #[serde(default)]
    pub jobs: JobsConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Default for StudioConfig {
    fn default() -> Self {
        Self {
            version: "1.0".to_string(),
            database_path: None,
            media_directory: None,
            api: ApiConfig::default(),
            polling: PollingConfig::default(),
            jobs: JobsConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl StudioConfig {
    /// Configured archive path, falling back to the per-user default.
    pub fn resolved_database_path(&self) -> Option<PathBuf> {
        self.database_path
            .clone()
            .or_else(crate::db::default_database_path)
    }
}

/// Generation service access.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ApiConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key_file: Option<String>,

    #[serde(default = "default_api_key_env_var")]
    pub api_key_env_var: Option<String>,

    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

fn default_base_url() -> String {
    DEFAULT_BASE_URL.to_string()
}

fn default_api_key_env_var() -> Option<String> {
    Some(DEFAULT_API_KEY_ENV_VAR.to_string())
}

fn default_request_timeout_secs() -> u64 {
    120
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            api_key: None,
            api_key_file: None,
            api_key_env_var: default_api_key_env_var(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

impl ApiConfig {
    pub fn key_source(&self) -> SecretSource<'_> {
        SecretSource {
            direct: self.api_key.as_deref(),
            file: self.api_key_file.as_deref(),
            env_var: self.api_key_env_var.as_deref(),
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

/// Video operation polling.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PollingConfig {
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,

    /// Consecutive failed polls tolerated per job. Unlimited when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_consecutive_failures: Option<u32>,
}

fn default_interval_secs() -> u64 {
    10
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_interval_secs(),
            max_consecutive_failures: None,
        }
    }
}

impl PollingConfig {
    pub fn settings(&self) -> PollSettings {
        PollSettings {
            interval: Duration::from_secs(self.interval_secs),
            max_consecutive_failures: self.max_consecutive_failures,
        }
    }
}

/// Job panel behavior.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct JobsConfig {
    /// How long finished image and edit jobs stay listed.
    #[serde(default = "default_image_removal_delay_ms")]
    pub image_removal_delay_ms: u64,

    /// How long finished video jobs stay listed.
    #[serde(default = "default_video_removal_delay_ms")]
    pub video_removal_delay_ms: u64,

    /// Buffered events per subscriber before the slowest one lags.
    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,
}

fn default_image_removal_delay_ms() -> u64 {
    4000
}

fn default_video_removal_delay_ms() -> u64 {
    5000
}

fn default_event_capacity() -> usize {
    100
}

impl Default for JobsConfig {
    fn default() -> Self {
        Self {
            image_removal_delay_ms: default_image_removal_delay_ms(),
            video_removal_delay_ms: default_video_removal_delay_ms(),
            event_capacity: default_event_capacity(),
        }
    }
}

impl JobsConfig {
    pub fn image_removal_delay(&self) -> Duration {
        Duration::from_millis(self.image_removal_delay_ms)
    }

    pub fn video_removal_delay(&self) -> Duration {
        Duration::from_millis(self.video_removal_delay_ms)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct LoggingConfig {
    #[serde(default)]
    pub format: LogFormat,
}
