//! Application configuration

use crate::AppError;
use app_fs::DEFAULT_MAX_CHUNKS;
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable that overrides the configured storage root
pub const ROOT_ENV: &str = "QLOUD_ROOT";

/// Main application configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub storage: StorageConfig,
    pub upload: UploadConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Custom storage root; `<cwd>/Qloud` when unset
    pub root: Option<PathBuf>,
    /// Maximum results returned by search-as-you-type
    pub search_limit: usize,
    /// Maximum same-kind files listed next to an opened file
    pub gallery_limit: usize,
    /// URL prefix under which files are served by the static layer
    pub media_url_prefix: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            root: None,
            search_limit: 10,
            gallery_limit: 500,
            media_url_prefix: "/media".to_string(),
        }
    }
}

impl StorageConfig {
    /// Effective storage root: `QLOUD_ROOT`, then `root`, then `<cwd>/Qloud`
    pub fn root_dir(&self) -> PathBuf {
        self.root_dir_with(std::env::var_os(ROOT_ENV))
    }

    fn root_dir_with(&self, env_override: Option<OsString>) -> PathBuf {
        let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));

        let configured = env_override
            .filter(|v| !v.is_empty())
            .map(PathBuf::from)
            .or_else(|| self.root.clone());

        match configured {
            Some(root) if root.is_absolute() => root,
            Some(root) => cwd.join(root),
            None => cwd.join("Qloud"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UploadConfig {
    /// Idle time after which an unfinished upload is discarded
    pub session_ttl_secs: u64,
    /// Largest chunk count a client may declare for one file
    pub max_chunks: u32,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            session_ttl_secs: 24 * 60 * 60,
            max_chunks: DEFAULT_MAX_CHUNKS,
        }
    }
}

impl UploadConfig {
    pub fn session_ttl(&self) -> Duration {
        Duration::from_secs(self.session_ttl_secs)
    }
}

impl AppConfig {
    /// Reject settings the file system layer cannot run with
    pub fn validate(&self) -> Result<(), AppError> {
        if self.upload.max_chunks == 0 {
            return Err(AppError::Config("upload.max_chunks must be at least 1".to_string()));
        }
        Ok(())
    }

    /// Load configuration from the default location
    pub fn load() -> anyhow::Result<Self> {
        Self::load_from(&Self::config_path())
    }

    /// Load configuration from `path`, falling back to defaults if it is missing
    pub fn load_from(path: &Path) -> anyhow::Result<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path)?;
            let config: Self = toml::from_str(&content)?;
            tracing::info!("Configuration loaded from {:?}", path);
            Ok(config)
        } else {
            tracing::info!("Using default configuration");
            Ok(Self::default())
        }
    }

    /// Save configuration to the default location
    pub fn save(&self) -> anyhow::Result<()> {
        self.save_to(&Self::config_path())
    }

    pub fn save_to(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;

        tracing::info!("Configuration saved to {:?}", path);
        Ok(())
    }

    /// Get the configuration file path
    pub fn config_path() -> PathBuf {
        ProjectDirs::from("com", "Qloud", "Qloud")
            .map(|dirs| dirs.config_dir().join("config.toml"))
            .unwrap_or_else(|| PathBuf::from("./config.toml"))
    }
}
