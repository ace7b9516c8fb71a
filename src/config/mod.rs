//! Global configuration.
//!
//! Uses XDG-compliant paths:
//! - Config: ~/.config/lmm/config.yaml, ~/.config/lmm/games.yaml
//! - Data: ~/.local/share/lmm/

mod paths;

pub use paths::Paths;

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use tokio::fs;

/// Link strategy used when materializing a mod's files.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LinkMethod {
    #[default]
    Symlink,
    Hardlink,
    Copy,
}

/// `config.yaml` — process-wide defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub default_game: Option<String>,

    /// Global cache root override; a game's own `cache_path` wins if set.
    pub cache_path: Option<PathBuf>,

    /// Default hook timeout in seconds.
    pub hook_timeout_secs: u64,

    #[serde(skip)]
    pub paths: Paths,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            default_game: None,
            cache_path: None,
            hook_timeout_secs: 60,
            paths: Paths::new(),
        }
    }
}

impl Config {
    pub fn hook_timeout(&self) -> Duration {
        Duration::from_secs(self.hook_timeout_secs)
    }

    /// Load `config.yaml`, writing a default file on first run.
    pub async fn load() -> Result<Self> {
        let paths = Paths::new();
        let config_path = paths.config_file();

        let mut config = if config_path.exists() {
            let content = fs::read_to_string(&config_path).await?;
            serde_yaml::from_str(&content)
                .map_err(|e| Error::Io(std::io::Error::other(e.to_string())))?
        } else {
            let config = Config::default();
            config.save().await?;
            config
        };

        config.paths = paths;
        Ok(config)
    }

    pub async fn save(&self) -> Result<()> {
        let config_path = self.paths.config_file();
        if let Some(parent) = config_path.parent() {
            fs::create_dir_all(parent).await?;
        }
        let content = serde_yaml::to_string(self)
            .map_err(|e| Error::Io(std::io::Error::other(e.to_string())))?;
        fs::write(&config_path, content).await?;
        Ok(())
    }

    /// Effective cache root for a game: its own override, else the global
    /// override, else the XDG default.
    pub fn cache_root_for(&self, game: &crate::game::Game) -> PathBuf {
        game.cache_path
            .clone()
            .or_else(|| self.cache_path.clone())
            .unwrap_or_else(|| self.paths.default_cache_dir())
    }
}
