//! Declarative game registry. Games are never auto-detected: they are
//! declared once in `games.yaml` and read back verbatim.

use crate::config::{LinkMethod, Paths};
use crate::error::{Error, Result};
use crate::hooks::HookConfig;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use tokio::fs;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Game {
    pub id: String,
    pub name: String,
    pub install_path: PathBuf,
    pub mod_path: PathBuf,

    #[serde(default)]
    pub link_method: LinkMethod,

    /// `source name -> that source's game id` (e.g. `nexus -> skyrimspecialedition`).
    #[serde(default)]
    pub sources: HashMap<String, String>,

    /// Per-game cache root override.
    #[serde(default)]
    pub cache_path: Option<PathBuf>,

    /// External programs to run at each named hook point (§4.7).
    #[serde(default)]
    pub hooks: HookConfig,
}

impl Game {
    pub fn source_game_id(&self, source: &str) -> Option<&str> {
        self.sources.get(source).map(String::as_str)
    }
}

/// `games.yaml`: map of game id -> declaration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GamesConfig {
    #[serde(default)]
    games: HashMap<String, Game>,
}

impl GamesConfig {
    pub async fn load(paths: &Paths) -> Result<Self> {
        let path = paths.games_file();
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = fs::read_to_string(&path).await?;
        serde_yaml::from_str(&content).map_err(|e| Error::Io(std::io::Error::other(e.to_string())))
    }

    pub async fn save(&self, paths: &Paths) -> Result<()> {
        if let Some(parent) = paths.games_file().parent() {
            fs::create_dir_all(parent).await?;
        }
        let content = serde_yaml::to_string(self)
            .map_err(|e| Error::Io(std::io::Error::other(e.to_string())))?;
        fs::write(paths.games_file(), content).await?;
        Ok(())
    }

    pub fn get(&self, id: &str) -> Result<&Game> {
        self.games
            .get(id)
            .ok_or_else(|| Error::not_found(format!("game '{id}' is not declared")))
    }

    pub fn list(&self) -> Vec<&Game> {
        let mut games: Vec<_> = self.games.values().collect();
        games.sort_by(|a, b| a.id.cmp(&b.id));
        games
    }

    pub fn upsert(&mut self, game: Game) {
        self.games.insert(game.id.clone(), game);
    }

    pub fn remove(&mut self, id: &str) -> bool {
        self.games.remove(id).is_some()
    }
}
