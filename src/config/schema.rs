use anyhow::{bail, Context, Result};
use directories::UserDirs;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Default backend base URL (local development server).
const DEFAULT_API_URL: &str = "http://localhost:8000";

/// Default per-request timeout for the HTTP adapters.
const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Log filter used when neither `RUST_LOG` nor `log_level` says otherwise.
pub const DEFAULT_LOG_LEVEL: &str = "chartdesk=info";

/// Top-level configuration, loaded from `~/.chartdesk/config.toml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Path the config was read from (not serialized).
    #[serde(skip)]
    pub config_path: PathBuf,

    #[serde(default)]
    pub api: ApiConfig,

    #[serde(default)]
    pub storage: StorageConfig,

    /// `tracing` env-filter directive used when `RUST_LOG` is unset.
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

/// Backend connection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_api_url")]
    pub base_url: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

/// Durable key-value store settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// "file", "sqlite" or "memory".
    #[serde(default = "default_backend")]
    pub backend: String,
    /// Directory holding the store. Defaults to `~/.chartdesk/data`.
    #[serde(default)]
    pub data_dir: Option<PathBuf>,
}

fn default_api_url() -> String {
    DEFAULT_API_URL.to_string()
}

fn default_timeout_secs() -> u64 {
    DEFAULT_TIMEOUT_SECS
}

fn default_backend() -> String {
    "file".to_string()
}

fn default_log_level() -> String {
    DEFAULT_LOG_LEVEL.to_string()
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: default_api_url(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            data_dir: None,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            config_path: PathBuf::new(),
            api: ApiConfig::default(),
            storage: StorageConfig::default(),
            log_level: default_log_level(),
        }
    }
}

impl StorageConfig {
    /// Resolve the data directory, falling back to `<home>/.chartdesk/data`.
    pub fn resolved_data_dir(&self) -> PathBuf {
        if let Some(ref dir) = self.data_dir {
            return dir.clone();
        }
        chartdesk_home().join("data")
    }
}

/// `~/.chartdesk`, or `./.chartdesk` when no home directory can be found.
pub fn chartdesk_home() -> PathBuf {
    UserDirs::new()
        .map(|u| u.home_dir().join(".chartdesk"))
        .unwrap_or_else(|| PathBuf::from(".chartdesk"))
}

impl Config {
    /// Load the config from the default location, then apply env overrides.
    pub fn load_or_init() -> Result<Self> {
        let path = chartdesk_home().join("config.toml");
        let mut config = Self::load_from(&path)?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Read a TOML file. A missing file yields the defaults.
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            tracing::debug!(path = %path.display(), "No config file, using defaults");
            return Ok(Self {
                config_path: path.to_path_buf(),
                ..Self::default()
            });
        }
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config: {}", path.display()))?;
        let mut config: Config = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config: {}", path.display()))?;
        config.config_path = path.to_path_buf();
        Ok(config)
    }

    /// `CHARTDESK_API_URL` and `CHARTDESK_DATA_DIR` win over the file.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(url) = std::env::var("CHARTDESK_API_URL") {
            if !url.trim().is_empty() {
                self.api.base_url = url.trim().to_string();
            }
        }
        if let Ok(dir) = std::env::var("CHARTDESK_DATA_DIR") {
            if !dir.trim().is_empty() {
                self.storage.data_dir = Some(PathBuf::from(dir.trim()));
            }
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.api.base_url.trim().is_empty() {
            bail!("api.base_url cannot be empty");
        }
        if self.api.timeout_secs == 0 {
            bail!("api.timeout_secs must be greater than zero");
        }
        match self.storage.backend.as_str() {
            "file" | "sqlite" | "memory" => Ok(()),
            other => bail!(
                "Unknown storage backend '{other}'. Supported values: file, sqlite, memory"
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn missing_file_yields_defaults() {
        let tmp = TempDir::new().unwrap();
        let config = Config::load_from(&tmp.path().join("config.toml")).unwrap();
        assert_eq!(config.api.base_url, "http://localhost:8000");
        assert_eq!(config.api.timeout_secs, 30);
        assert_eq!(config.storage.backend, "file");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn partial_file_keeps_remaining_defaults() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("config.toml");
        std::fs::write(
            &path,
            "[api]\nbase_url = \"https://records.example.org\"\n\n[storage]\nbackend = \"sqlite\"\n",
        )
        .unwrap();

        let config = Config::load_from(&path).unwrap();
        assert_eq!(config.api.base_url, "https://records.example.org");
        assert_eq!(config.api.timeout_secs, 30);
        assert_eq!(config.storage.backend, "sqlite");
        assert_eq!(config.log_level, "chartdesk=info");
        assert_eq!(config.config_path, path);
    }

    #[test]
    fn malformed_file_is_an_error() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("config.toml");
        std::fs::write(&path, "[api\nbase_url = ").unwrap();

        let err = Config::load_from(&path).unwrap_err();
        assert!(err.to_string().contains("Failed to parse config"));
    }

    #[test]
    fn validate_rejects_unknown_backend() {
        let mut config = Config::default();
        config.storage.backend = "redis".into();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("Unknown storage backend"));
    }

    #[test]
    fn validate_rejects_zero_timeout() {
        let mut config = Config::default();
        config.api.timeout_secs = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn validate_rejects_empty_base_url() {
        let mut config = Config::default();
        config.api.base_url = "  ".into();
        assert!(config.validate().is_err());
    }

    #[test]
    fn explicit_data_dir_wins() {
        let storage = StorageConfig {
            backend: "file".into(),
            data_dir: Some(PathBuf::from("/var/lib/chartdesk")),
        };
        assert_eq!(
            storage.resolved_data_dir(),
            PathBuf::from("/var/lib/chartdesk")
        );
    }
}
