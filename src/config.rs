use std::path::PathBuf;

use thiserror::Error;

use crate::scheduler::DEFAULT_CONCURRENT_UPLOADS;
use crate::storage::Settings;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

#[derive(Debug, Clone, Default)]
pub struct Config {
    pub agent: AgentConfig,
    pub remote: RemoteConfig,
    pub uploads: UploadConfig,
}

#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// Listen address for the control surface
    pub bind_address: String,
    pub data_dir: String,
    /// Selects the state file, so several environments can share a data directory.
    pub environment: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteBackend {
    Http,
    Local,
}

#[derive(Debug, Clone)]
pub struct RemoteConfig {
    pub backend: RemoteBackend,
    pub api_host: String,
    pub transfer_host: String,
    /// Required when backend is http
    pub access_token: Option<String>,
    /// Directory for the local backend
    pub local_path: String,
}

#[derive(Debug, Clone)]
pub struct UploadConfig {
    pub concurrent_uploads: usize,
    pub upload_images: Option<bool>,
    pub upload_video: Option<bool>,
    pub upload_raw: Option<bool>,
    /// One-shot mode watches the given directory instead of uploading it once.
    pub watch: bool,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            bind_address: "127.0.0.1:7111".to_string(),
            data_dir: "./data".to_string(),
            environment: "production".to_string(),
        }
    }
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            backend: RemoteBackend::Http,
            api_host: "http://localhost".to_string(),
            transfer_host: "http://localhost".to_string(),
            access_token: None,
            local_path: "./remote".to_string(),
        }
    }
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            concurrent_uploads: DEFAULT_CONCURRENT_UPLOADS,
            upload_images: None,
            upload_video: None,
            upload_raw: None,
            watch: false,
        }
    }
}

fn env_flag(name: &str) -> Option<bool> {
    std::env::var(name)
        .ok()
        .map(|v| matches!(v.trim().to_lowercase().as_str(), "true" | "1" | "yes"))
}

impl Config {
    /// Load configuration from environment variables.
    pub fn load() -> Result<Self, ConfigError> {
        let defaults = RemoteConfig::default();

        let bind_address =
            std::env::var("BIND_ADDRESS").unwrap_or_else(|_| "127.0.0.1:7111".to_string());

        let data_dir = std::env::var("DATA_DIR").unwrap_or_else(|_| "./data".to_string());

        let environment =
            std::env::var("ENVIRONMENT").unwrap_or_else(|_| "production".to_string());

        let concurrent_uploads = match std::env::var("CONCURRENT_UPLOADS") {
            Ok(raw) => raw.trim().parse().map_err(|_| {
                ConfigError::ValidationError(format!(
                    "CONCURRENT_UPLOADS must be a positive integer, got {raw:?}"
                ))
            })?,
            Err(_) => DEFAULT_CONCURRENT_UPLOADS,
        };

        let backend = match std::env::var("REMOTE_BACKEND")
            .unwrap_or_else(|_| "http".to_string())
            .to_lowercase()
            .as_str()
        {
            "local" => RemoteBackend::Local,
            _ => RemoteBackend::Http,
        };

        let api_host = std::env::var("API_HOST").unwrap_or(defaults.api_host);
        let transfer_host = std::env::var("TRANSFER_HOST").unwrap_or(defaults.transfer_host);
        let access_token = std::env::var("ACCESS_TOKEN")
            .ok()
            .filter(|t| !t.trim().is_empty());
        let local_path = std::env::var("LOCAL_REMOTE_PATH").unwrap_or(defaults.local_path);

        let config = Config {
            agent: AgentConfig {
                bind_address,
                data_dir,
                environment,
            },
            remote: RemoteConfig {
                backend,
                api_host,
                transfer_host,
                access_token,
                local_path,
            },
            uploads: UploadConfig {
                concurrent_uploads,
                upload_images: env_flag("UPLOAD_IMAGES"),
                upload_video: env_flag("UPLOAD_VIDEO"),
                upload_raw: env_flag("UPLOAD_RAW"),
                watch: env_flag("WATCH").unwrap_or(false),
            },
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.uploads.concurrent_uploads == 0 {
            return Err(ConfigError::ValidationError(
                "CONCURRENT_UPLOADS must be at least 1".to_string(),
            ));
        }

        if self.agent.environment.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "ENVIRONMENT cannot be empty".to_string(),
            ));
        }

        if self.remote.backend == RemoteBackend::Http && self.remote.access_token.is_none() {
            return Err(ConfigError::ValidationError(
                "ACCESS_TOKEN is required when REMOTE_BACKEND=http".to_string(),
            ));
        }

        Ok(())
    }

    /// Path of the persisted state for this environment.
    pub fn state_file(&self) -> PathBuf {
        PathBuf::from(&self.agent.data_dir).join(format!("state_{}.msgpack", self.agent.environment))
    }

    /// Apply the configured media class overrides. Returns whether anything changed.
    pub fn apply_overrides(&self, settings: &mut Settings) -> bool {
        let before = settings.clone();
        if let Some(images) = self.uploads.upload_images {
            settings.upload_images = images;
        }
        if let Some(video) = self.uploads.upload_video {
            settings.upload_video = video;
        }
        if let Some(raw) = self.uploads.upload_raw {
            settings.upload_raw = raw;
        }
        *settings != before
    }
}
