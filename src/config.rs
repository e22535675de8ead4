use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

const APP_DIR: &str = "habitquest";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("invalid config {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
}

/// Which task backend the store talks to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    /// The HabitQuest REST API at `api_url`.
    Remote,
    /// In-process backend persisted to `db_path`.
    #[default]
    Local,
}

/// Settings from `config.toml`, overlaid with environment variables.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub backend: Backend,
    #[serde(default = "default_api_url")]
    pub api_url: String,
    /// Bearer token sent to the remote API.
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
    /// How often the terminal UI re-syncs with the backend.
    #[serde(default = "default_refresh_interval")]
    pub refresh_interval_secs: u64,
    /// How far ahead the local backend generates instances of recurring
    /// tasks with no end date.
    #[serde(default = "default_horizon")]
    pub expansion_horizon_days: u32,
    /// Task file for the local backend.
    #[serde(default)]
    pub db_path: Option<PathBuf>,
}

fn default_api_url() -> String {
    "http://localhost:3000".to_string()
}

fn default_request_timeout() -> u64 {
    30
}

fn default_refresh_interval() -> u64 {
    300
}

fn default_horizon() -> u32 {
    90
}

impl Default for Config {
    fn default() -> Self {
        Config {
            backend: Backend::default(),
            api_url: default_api_url(),
            token: None,
            request_timeout_secs: default_request_timeout(),
            refresh_interval_secs: default_refresh_interval(),
            expansion_horizon_days: default_horizon(),
            db_path: None,
        }
    }
}

impl Config {
    /// Loads the config file (explicit path, or the default location) and
    /// applies environment overrides. A missing file yields defaults.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let path = path.map(Path::to_path_buf).or_else(default_config_path);
        let mut config = match path {
            Some(path) if path.exists() => Self::from_file(&path)?,
            _ => Config::default(),
        };
        config.apply_env(|key| std::env::var(key).ok());
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        debug!(path = %path.display(), "loaded config");
        toml::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// `HABITQUEST_API_URL` also switches the backend to remote.
    pub fn apply_env(&mut self, var: impl Fn(&str) -> Option<String>) {
        if let Some(url) = var("HABITQUEST_API_URL") {
            self.api_url = url;
            self.backend = Backend::Remote;
        }
        if let Some(token) = var("HABITQUEST_TOKEN") {
            self.token = Some(token);
        }
        if let Some(db) = var("HABITQUEST_DB") {
            self.db_path = Some(PathBuf::from(db));
        }
    }

    /// Task file for the local backend: `db_path`, or
    /// `~/.local/share/habitquest/tasks.json` (platform data dir).
    pub fn local_db_path(&self) -> PathBuf {
        self.db_path.clone().unwrap_or_else(|| data_dir().join("tasks.json"))
    }
}

/// `~/.config/habitquest/config.toml` on Linux.
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|p| p.join(APP_DIR).join("config.toml"))
}

/// Per-user data directory, `./` when the platform has none.
pub fn data_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(APP_DIR)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn partial_file_keeps_defaults() {
        let config: Config = toml::from_str(
            r#"
backend = "remote"
api_url = "https://quest.example.com"
"#,
        )
        .unwrap();
        assert_eq!(config.backend, Backend::Remote);
        assert_eq!(config.api_url, "https://quest.example.com");
        assert_eq!(config.refresh_interval_secs, 300);
        assert_eq!(config.expansion_horizon_days, 90);
    }

    #[test]
    fn env_overrides_file() {
        let mut config = Config::default();
        config.apply_env(|key| match key {
            "HABITQUEST_API_URL" => Some("http://10.0.0.2:3000".to_string()),
            "HABITQUEST_DB" => Some("/tmp/q.json".to_string()),
            _ => None,
        });
        assert_eq!(config.backend, Backend::Remote);
        assert_eq!(config.local_db_path(), PathBuf::from("/tmp/q.json"));
        assert_eq!(config.token, None);
    }

    #[test]
    fn malformed_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "backend = 12").unwrap();
        assert!(matches!(Config::from_file(&path), Err(ConfigError::Parse { .. })));
    }
}
