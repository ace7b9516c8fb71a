//! The engine's single entry point: one `Service` per invocation, owning
//! every handle the rest of the crate needs and nothing else. No
//! process-wide statics; a CLI front-end constructs one of these per run.

use crate::cache::CacheStore;
use crate::config::{Config, Paths};
use crate::error::{Error, Result};
use crate::game::GamesConfig;
use crate::hooks::HookRunner;
use crate::ledger::Ledger;
use crate::profile::ProfileManager;
use crate::source::SourceAdapter;
use std::collections::HashMap;
use std::sync::Arc;

pub struct Service {
    pub config: Config,
    pub games: GamesConfig,
    pub ledger: Ledger,
    pub profiles: ProfileManager,
    pub hooks: HookRunner,
    sources: HashMap<String, Box<dyn SourceAdapter>>,
}

impl Service {
    /// Loads config, games, and the ledger from the XDG-resolved paths,
    /// registering `sources` by their own `name()`.
    pub async fn load(sources: Vec<Box<dyn SourceAdapter>>) -> Result<Self> {
        let config = Config::load().await?;
        config.paths.ensure_dirs()?;
        let games = GamesConfig::load(&config.paths).await?;
        let ledger = Ledger::open(&config.paths.ledger_file())?;
        let profiles = ProfileManager::new(Arc::new(config.paths.clone()));
        let hooks = HookRunner::new(config.hook_timeout());

        let mut by_name = HashMap::new();
        for source in sources {
            by_name.insert(source.name().to_string(), source);
        }

        Ok(Self {
            config,
            games,
            ledger,
            profiles,
            hooks,
            sources: by_name,
        })
    }

    pub fn paths(&self) -> &Paths {
        &self.config.paths
    }

    pub fn cache_for(&self, game_id: &str) -> Result<CacheStore> {
        let game = self.games.get(game_id)?;
        Ok(CacheStore::new(self.config.cache_root_for(game)))
    }

    pub fn source(&self, name: &str) -> Result<&dyn SourceAdapter> {
        self.sources
            .get(name)
            .map(|s| s.as_ref())
            .ok_or_else(|| Error::not_found(format!("source adapter '{name}' is not registered")))
    }

    pub fn source_names(&self) -> Vec<&str> {
        let mut names: Vec<_> = self.sources.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn sources_as_slice(&self) -> Vec<&dyn SourceAdapter> {
        self.sources.values().map(|s| s.as_ref()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cache_for_uses_the_games_own_override_first() {
        let tmp = tempfile::tempdir().unwrap();
        let paths = Paths::for_base(tmp.path().to_path_buf());
        let mut config = Config::default();
        config.paths = paths.clone();
        config.cache_path = Some(tmp.path().join("global-cache"));

        let mut games = GamesConfig::default();
        games.upsert(crate::game::Game {
            id: "g".into(),
            name: "G".into(),
            install_path: tmp.path().join("g"),
            mod_path: tmp.path().join("g/Data"),
            link_method: crate::config::LinkMethod::Symlink,
            sources: Default::default(),
            cache_path: Some(tmp.path().join("per-game-cache")),
            hooks: crate::hooks::HookConfig::default(),
        });

        let root = config.cache_root_for(games.get("g").unwrap());
        assert_eq!(root, tmp.path().join("per-game-cache"));
    }
}
