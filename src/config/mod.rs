use anyhow::{Context, Result};
use directories::UserDirs;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;

// ── Client config ─────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Path to config.toml - computed from home, not serialized
    #[serde(skip)]
    pub config_path: PathBuf,
    /// Directory holding config and credential files - computed, not serialized
    #[serde(skip)]
    pub state_dir: PathBuf,

    /// Base URL of the document-chat server.
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Overall timeout for plain (non-streaming) requests, in seconds.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    /// Connect timeout for all requests, in seconds.
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
}

fn default_base_url() -> String {
    "http://localhost:8000".to_string()
}

fn default_request_timeout_secs() -> u64 {
    30
}

fn default_connect_timeout_secs() -> u64 {
    10
}

impl Default for Config {
    fn default() -> Self {
        Self {
            config_path: PathBuf::new(),
            state_dir: PathBuf::new(),
            base_url: default_base_url(),
            request_timeout_secs: default_request_timeout_secs(),
            connect_timeout_secs: default_connect_timeout_secs(),
        }
    }
}

impl Config {
    /// Load `~/.shelfchat/config.toml`, creating it with defaults on first run.
    pub fn load_or_init() -> Result<Self> {
        let home = UserDirs::new()
            .map(|u| u.home_dir().to_path_buf())
            .context("Could not find home directory")?;
        Self::load_from_dir(home.join(".shelfchat"))
    }

    /// Load config rooted at an explicit state directory (tests use a tempdir).
    pub fn load_from_dir(state_dir: PathBuf) -> Result<Self> {
        let config_path = state_dir.join("config.toml");

        if !state_dir.exists() {
            fs::create_dir_all(&state_dir).context("Failed to create .shelfchat directory")?;
        }

        if config_path.exists() {
            let contents =
                fs::read_to_string(&config_path).context("Failed to read config file")?;
            let mut config: Config =
                toml::from_str(&contents).context("Failed to parse config file")?;
            config.config_path = config_path;
            config.state_dir = state_dir;
            config.apply_env_overrides();
            Ok(config)
        } else {
            let mut config = Config::default();
            config.config_path = config_path;
            config.state_dir = state_dir;
            config.save()?;
            config.apply_env_overrides();
            Ok(config)
        }
    }

    /// Apply environment variable overrides to config.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(url) = std::env::var("SHELFCHAT_BASE_URL") {
            if !url.is_empty() {
                self.base_url = url;
            }
        }
    }

    pub fn save(&self) -> Result<()> {
        let contents = toml::to_string_pretty(self).context("Failed to serialize config")?;
        fs::write(&self.config_path, contents)
            .with_context(|| format!("Failed to write {}", self.config_path.display()))?;
        Ok(())
    }

    /// Where session cookies are persisted between invocations.
    pub fn credentials_path(&self) -> PathBuf {
        self.state_dir.join("credentials.json")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_run_writes_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load_from_dir(dir.path().join("state")).unwrap();
        assert_eq!(config.base_url, "http://localhost:8000");
        assert!(config.config_path.exists());
    }

    #[test]
    fn saved_config_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::load_from_dir(dir.path().to_path_buf()).unwrap();
        config.base_url = "https://chat.example.org".to_string();
        config.save().unwrap();

        let reloaded = Config::load_from_dir(dir.path().to_path_buf()).unwrap();
        assert_eq!(reloaded.base_url, "https://chat.example.org");
        assert_eq!(reloaded.request_timeout_secs, 30);
    }

    #[test]
    fn credentials_path_lives_in_state_dir() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load_from_dir(dir.path().to_path_buf()).unwrap();
        assert_eq!(
            config.credentials_path(),
            dir.path().join("credentials.json")
        );
    }
}
