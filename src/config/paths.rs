//! XDG-compliant path management.

use directories::ProjectDirs;
use std::path::PathBuf;

/// Resolves all on-disk locations the engine touches, using the XDG base
/// directory specification. All of config/games/profiles/lock live under
/// `config_dir()`; the ledger and cache default under `data_dir()`.
#[derive(Debug, Clone)]
pub struct Paths {
    config_dir: PathBuf,
    data_dir: PathBuf,
}

impl Default for Paths {
    fn default() -> Self {
        Self::new()
    }
}

impl Paths {
    pub fn new() -> Self {
        let dirs =
            ProjectDirs::from("", "", "lmm").expect("failed to determine project directories");
        Self {
            config_dir: dirs.config_dir().to_path_buf(),
            data_dir: dirs.data_dir().to_path_buf(),
        }
    }

    /// Builds a `Paths` rooted at an arbitrary directory, bypassing XDG
    /// resolution. Used by tests that need an isolated, disposable tree.
    pub fn for_base(base: PathBuf) -> Self {
        Self {
            config_dir: base.join("config"),
            data_dir: base.join("data"),
        }
    }

    // ========== Config ==========

    /// Config directory: ~/.config/lmm/
    pub fn config_dir(&self) -> PathBuf {
        self.config_dir.clone()
    }

    pub fn config_file(&self) -> PathBuf {
        self.config_dir().join("config.yaml")
    }

    pub fn games_file(&self) -> PathBuf {
        self.config_dir().join("games.yaml")
    }

    pub fn profiles_dir(&self) -> PathBuf {
        self.config_dir().join("profiles")
    }

    pub fn game_profiles_dir(&self, game_id: &str) -> PathBuf {
        self.profiles_dir().join(game_id)
    }

    pub fn profile_file(&self, game_id: &str, name: &str) -> PathBuf {
        self.game_profiles_dir(game_id).join(format!("{name}.yaml"))
    }

    pub fn default_profile_marker(&self, game_id: &str) -> PathBuf {
        self.game_profiles_dir(game_id).join("default")
    }

    /// Advisory lock file held for the duration of write-bearing commands.
    pub fn lock_file(&self) -> PathBuf {
        self.config_dir().join(".lock")
    }

    // ========== Data ==========

    /// Data directory: ~/.local/share/lmm/
    pub fn data_dir(&self) -> PathBuf {
        self.data_dir.clone()
    }

    pub fn ledger_file(&self) -> PathBuf {
        self.data_dir().join("ledger.db")
    }

    /// Default cache root: ~/.local/share/lmm/cache/ (overridable per-game
    /// or globally via `Config::cache_path`).
    pub fn default_cache_dir(&self) -> PathBuf {
        self.data_dir().join("cache")
    }

    pub fn ensure_dirs(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(self.config_dir())?;
        std::fs::create_dir_all(self.profiles_dir())?;
        std::fs::create_dir_all(self.data_dir())?;
        std::fs::create_dir_all(self.default_cache_dir())?;
        Ok(())
    }
}
