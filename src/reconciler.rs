//! Drives current ledger state toward a profile's declared mod set.
//!
//! Plan computation follows the mods the profile no longer wants
//! (disable), mods it still wants whose cache entry is intact (enable),
//! and mods that need a fresh download (install). Execution runs those
//! three phases in order and never aborts a phase early: one mod's
//! failure is recorded and the rest of the phase still runs.

use crate::cache::CacheStore;
use crate::cancel::CancelToken;
use crate::error::{Error, Result};
use crate::game::Game;
use crate::hooks::{HookConfig, HookContext, HookPoint, HookRunner};
use crate::installer::Installer;
use crate::ledger::{InstalledMod, Ledger};
use crate::profile::{ModReference, Profile};
use crate::source::SourceAdapter;
use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
use base64::Engine;
use std::collections::HashSet;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcilePlan {
    pub disable: Vec<(String, String)>,
    pub enable: Vec<ModReference>,
    pub install: Vec<ModReference>,
}

#[derive(Debug, Clone)]
pub struct ReconcileFailure {
    pub source: String,
    pub mod_id: String,
    pub message: String,
}

#[derive(Debug, Clone, Default)]
pub struct ReconcileReport {
    pub disabled: usize,
    pub enabled: usize,
    pub installed: usize,
    pub failures: Vec<ReconcileFailure>,
}

impl ReconcileReport {
    pub fn is_success(&self) -> bool {
        self.failures.is_empty()
    }
}

pub struct Reconciler<'a> {
    cache: &'a CacheStore,
    ledger: &'a Ledger,
    hooks: &'a HookRunner,
}

impl<'a> Reconciler<'a> {
    pub fn new(cache: &'a CacheStore, ledger: &'a Ledger, hooks: &'a HookRunner) -> Self {
        Self { cache, ledger, hooks }
    }

    /// Computes the three-phase plan without touching the filesystem.
    ///
    /// `I`, the mods the ledger currently tracks for this `(game, profile)`,
    /// is read in full (enabled and disabled records alike): the disable
    /// phase only ever acts on the enabled subset, but the enable phase
    /// needs to see records the ledger already knows are disabled so it
    /// can tell "redeploy from cache" apart from "needs a fresh download".
    pub fn plan(&self, game_id: &str, profile: &Profile) -> Result<ReconcilePlan> {
        let tracked = self.ledger.list_installed_mods(game_id, &profile.name)?;
        let tracked_by_key: std::collections::HashMap<(String, String), &InstalledMod> =
            tracked.iter().map(|m| ((m.source.clone(), m.mod_id.clone()), m)).collect();

        let target_keys: HashSet<(String, String)> =
            profile.mods.iter().map(|m| (m.source.clone(), m.mod_id.clone())).collect();

        let mut plan = ReconcilePlan::default();

        for m in &tracked {
            let key = (m.source.clone(), m.mod_id.clone());
            if m.enabled && !target_keys.contains(&key) {
                plan.disable.push(key);
            }
        }

        for reference in &profile.mods {
            let key = (reference.source.clone(), reference.mod_id.clone());
            match tracked_by_key.get(&key) {
                Some(record) if !record.enabled => {
                    if self.cache.exists(game_id, &reference.source, &reference.mod_id, &reference.version) {
                        plan.enable.push(reference.clone());
                    } else {
                        plan.install.push(reference.clone());
                    }
                }
                Some(record) if record.version != reference.version => {
                    plan.install.push(reference.clone());
                }
                Some(_) => {
                    // Already enabled at the target version: nothing to do.
                }
                None => plan.install.push(reference.clone()),
            }
        }

        Ok(plan)
    }

    /// Executes a plan against `(game, profile)`. Phases run
    /// Disable -> Enable -> Install; within Install, mods are processed in
    /// the order they appear in `plan.install` (the profile's declared
    /// order). A mod's failure does not stop the rest of its phase.
    pub async fn execute(
        &self,
        game: &Game,
        profile: &Profile,
        source_adapters: &[&(dyn SourceAdapter)],
        hook_config: &HookConfig,
        plan: &ReconcilePlan,
        force_hooks: bool,
        cancel: &CancelToken,
    ) -> Result<ReconcileReport> {
        let mut report = ReconcileReport::default();
        let installer = Installer::new(self.cache, self.ledger);

        let is_install_run = !plan.enable.is_empty() || !plan.install.is_empty();
        let is_uninstall_run = !plan.disable.is_empty();

        let base_ctx = HookContext {
            game_id: game.id.clone(),
            game_path: game.install_path.clone(),
            mod_path: game.mod_path.clone(),
            mod_id: None,
            mod_name: None,
            mod_version: None,
        };

        if is_uninstall_run {
            self.hooks
                .run(hook_config, HookPoint::UninstallBeforeAll, &base_ctx, force_hooks)
                .await?;
        }

        for (source, mod_id) in &plan.disable {
            if cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }
            let source_game_id = game.source_game_id(source).unwrap_or(&game.id);
            let adapter = source_adapters.iter().find(|a| a.name() == *source);
            let mod_name = match adapter {
                Some(adapter) => adapter.get_mod(source_game_id, mod_id).await.ok().map(|m| m.name),
                None => None,
            };
            let ctx = each_ctx(&base_ctx, source, mod_id, mod_name.as_deref(), None);
            if let Err(e) = self.hooks.run(hook_config, HookPoint::UninstallBeforeEach, &ctx, force_hooks).await {
                report.failures.push(ReconcileFailure { source: source.clone(), mod_id: mod_id.clone(), message: e.to_string() });
                continue;
            }
            match installer.uninstall(&game.id, &profile.name, source, mod_id, &game.mod_path) {
                Ok(_) => {
                    if let Some(mut record) = self.ledger.get_installed_mod(&game.id, &profile.name, source, mod_id)? {
                        record.enabled = false;
                        self.ledger.upsert_installed_mod(&record)?;
                    }
                    report.disabled += 1;
                }
                Err(e) => {
                    report.failures.push(ReconcileFailure { source: source.clone(), mod_id: mod_id.clone(), message: e.to_string() });
                    continue;
                }
            }
            self.hooks.run(hook_config, HookPoint::UninstallAfterEach, &ctx, force_hooks).await?;
        }

        if is_uninstall_run {
            self.hooks.run(hook_config, HookPoint::UninstallAfterAll, &base_ctx, force_hooks).await?;
        }

        if is_install_run {
            self.hooks.run(hook_config, HookPoint::InstallBeforeAll, &base_ctx, force_hooks).await?;
        }

        for reference in &plan.enable {
            if cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }
            if let Err(e) = self
                .redeploy_from_cache(&installer, game, profile, reference, hook_config, force_hooks, cancel)
                .await
            {
                report.failures.push(ReconcileFailure {
                    source: reference.source.clone(),
                    mod_id: reference.mod_id.clone(),
                    message: e.to_string(),
                });
                continue;
            }
            report.enabled += 1;
        }

        for reference in &plan.install {
            if cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }
            let adapter = source_adapters.iter().find(|a| a.name() == reference.source);
            let Some(adapter) = adapter else {
                report.failures.push(ReconcileFailure {
                    source: reference.source.clone(),
                    mod_id: reference.mod_id.clone(),
                    message: format!("no source adapter registered for '{}'", reference.source),
                });
                continue;
            };

            match self
                .fetch_and_install(*adapter, &installer, game, profile, reference, hook_config, force_hooks, cancel)
                .await
            {
                Ok(()) => report.installed += 1,
                Err(e) => report.failures.push(ReconcileFailure {
                    source: reference.source.clone(),
                    mod_id: reference.mod_id.clone(),
                    message: e.to_string(),
                }),
            }
        }

        if is_install_run {
            self.hooks.run(hook_config, HookPoint::InstallAfterAll, &base_ctx, force_hooks).await?;
        }

        write_overrides(game, profile)?;

        Ok(report)
    }

    #[allow(clippy::too_many_arguments)]
    async fn redeploy_from_cache(
        &self,
        installer: &Installer<'_>,
        game: &Game,
        profile: &Profile,
        reference: &ModReference,
        hook_config: &HookConfig,
        force_hooks: bool,
        cancel: &CancelToken,
    ) -> Result<()> {
        // No adapter is consulted here; this path only replays what is
        // already on disk for a mod that is merely being re-enabled, so
        // mod_name stays unpopulated rather than taking on a network call.
        let ctx = each_ctx(
            &HookContext {
                game_id: game.id.clone(),
                game_path: game.install_path.clone(),
                mod_path: game.mod_path.clone(),
                mod_id: None,
                mod_name: None,
                mod_version: None,
            },
            &reference.source,
            &reference.mod_id,
            None,
            Some(&reference.version),
        );
        self.hooks.run(hook_config, HookPoint::InstallBeforeEach, &ctx, force_hooks).await?;
        installer.install(
            &game.id,
            &profile.name,
            &reference.source,
            &reference.mod_id,
            &reference.version,
            &reference.file_ids,
            &game.mod_path,
            profile.link_method,
            cancel,
        )?;
        self.hooks.run(hook_config, HookPoint::InstallAfterEach, &ctx, force_hooks).await?;
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    async fn fetch_and_install(
        &self,
        adapter: &dyn SourceAdapter,
        installer: &Installer<'_>,
        game: &Game,
        profile: &Profile,
        reference: &ModReference,
        hook_config: &HookConfig,
        force_hooks: bool,
        cancel: &CancelToken,
    ) -> Result<()> {
        let source_game_id = game.source_game_id(&reference.source).unwrap_or(&game.id);
        let mod_name = adapter.get_mod(source_game_id, &reference.mod_id).await.ok().map(|m| m.name);
        let ctx = each_ctx(
            &HookContext {
                game_id: game.id.clone(),
                game_path: game.install_path.clone(),
                mod_path: game.mod_path.clone(),
                mod_id: None,
                mod_name: None,
                mod_version: None,
            },
            &reference.source,
            &reference.mod_id,
            mod_name.as_deref(),
            Some(&reference.version),
        );
        self.hooks.run(hook_config, HookPoint::InstallBeforeEach, &ctx, force_hooks).await?;

        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }

        if !self.cache.exists(&game.id, &reference.source, &reference.mod_id, &reference.version) {
            let available = adapter.list_files(source_game_id, &reference.mod_id).await?;
            let wanted: HashSet<&str> = reference.file_ids.iter().map(String::as_str).collect();
            let mut chosen: Vec<_> = available.iter().filter(|f| wanted.contains(f.file_id.as_str())).collect();
            if chosen.is_empty() {
                if !wanted.is_empty() {
                    tracing::warn!(
                        game = %game.id, source = %reference.source, mod_id = %reference.mod_id,
                        "none of the recorded file ids are still listed, falling back to primary file"
                    );
                }
                chosen = available.iter().filter(|f| f.is_primary).collect();
            }
            if chosen.is_empty() {
                chosen = available.iter().collect();
            }
            let Some(file) = chosen.into_iter().next() else {
                return Err(Error::not_found(format!("{} has no downloadable files", reference.mod_id)));
            };

            let scratch = self.cache.download_scratch_path(&game.id, &reference.mod_id, &file.file_id)?;
            let download_result = adapter.download(source_game_id, &reference.mod_id, &file.file_id, &scratch).await;
            let download_result = download_result.and_then(|_| self.cache.put(
                &game.id,
                &reference.source,
                &reference.mod_id,
                &reference.version,
                &scratch,
            ));
            let _ = std::fs::remove_file(&scratch);
            download_result?;
        }

        installer.install(
            &game.id,
            &profile.name,
            &reference.source,
            &reference.mod_id,
            &reference.version,
            &reference.file_ids,
            &game.mod_path,
            profile.link_method,
            cancel,
        )?;

        self.hooks.run(hook_config, HookPoint::InstallAfterEach, &ctx, force_hooks).await?;
        Ok(())
    }
}

/// Writes a profile's config overrides under the game's install path,
/// overwriting whatever is already at that relative path. Run after the
/// three reconcile phases so the newly-active profile's overrides always
/// win on collision (spec's switch semantics).
fn write_overrides(game: &Game, profile: &Profile) -> Result<()> {
    for (relative_path, content) in &profile.overrides {
        let dst = game.install_path.join(relative_path);
        if let Some(parent) = dst.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let bytes = BASE64_STANDARD.decode(content).unwrap_or_else(|_| content.clone().into_bytes());
        std::fs::write(&dst, bytes)?;
    }
    Ok(())
}

fn each_ctx(
    base: &HookContext,
    source: &str,
    mod_id: &str,
    mod_name: Option<&str>,
    mod_version: Option<&str>,
) -> HookContext {
    HookContext {
        game_id: base.game_id.clone(),
        game_path: base.game_path.clone(),
        mod_path: base.mod_path.clone(),
        mod_id: Some(format!("{source}:{mod_id}")),
        mod_name: mod_name.map(str::to_string),
        mod_version: mod_version.map(str::to_string),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LinkMethod;
    use crate::hooks::HookRunner;
    use crate::ledger::LinkMethodCode;
    use async_trait::async_trait;
    use std::io::Write;
    use std::path::Path;
    use std::time::Duration;

    fn zip_archive(dir: &Path, entries: &[(&str, &str)]) -> std::path::PathBuf {
        let path = dir.join("mod.zip");
        let file = std::fs::File::create(&path).unwrap();
        let mut writer = zip::ZipWriter::new(file);
        let options = zip::write::SimpleFileOptions::default().compression_method(zip::CompressionMethod::Stored);
        for (name, content) in entries {
            writer.start_file(*name, options).unwrap();
            writer.write_all(content.as_bytes()).unwrap();
        }
        writer.finish().unwrap();
        path
    }

    fn sample_game() -> Game {
        Game {
            id: "g".into(),
            name: "Game".into(),
            install_path: std::path::PathBuf::from("/games/g"),
            mod_path: std::path::PathBuf::from("/games/g/Data"),
            link_method: LinkMethod::Symlink,
            sources: Default::default(),
            cache_path: None,
            hooks: crate::hooks::HookConfig::default(),
        }
    }

    struct StubSource {
        name: String,
        archive: std::path::PathBuf,
        file_id: String,
    }

    #[async_trait]
    impl SourceAdapter for StubSource {
        fn name(&self) -> &str {
            &self.name
        }

        async fn search(&self, _game_id: &str, _query: &str, _offset: u64, _count: u64) -> Result<crate::source::SearchResult> {
            unimplemented!()
        }

        async fn get_mod(&self, _game_id: &str, mod_id: &str) -> Result<crate::source::ModMetadata> {
            Ok(crate::source::ModMetadata {
                id: mod_id.to_string(),
                source_id: self.name.clone(),
                name: format!("mod-{mod_id}"),
                version: "1.0".into(),
                author: None,
                summary: None,
                category: None,
                source_url: None,
                picture_url: None,
            })
        }

        async fn list_files(&self, _game_id: &str, _mod_id: &str) -> Result<Vec<crate::source::ModFile>> {
            Ok(vec![crate::source::ModFile {
                file_id: self.file_id.clone(),
                name: "main".into(),
                version: "1.0".into(),
                is_primary: true,
            }])
        }

        async fn download(&self, _game_id: &str, _mod_id: &str, _file_id: &str, dest: &Path) -> Result<u64> {
            std::fs::copy(&self.archive, dest)?;
            Ok(std::fs::metadata(dest)?.len())
        }

        async fn list_dependencies(&self, _game_id: &str, _mod_id: &str) -> Result<Vec<String>> {
            Ok(Vec::new())
        }
    }

    #[test]
    fn plan_installs_mods_not_yet_tracked() {
        let tmp = tempfile::tempdir().unwrap();
        let cache = CacheStore::new(tmp.path().join("cache"));
        let ledger = Ledger::open_in_memory().unwrap();
        let hooks = HookRunner::new(Duration::from_secs(5));
        let reconciler = Reconciler::new(&cache, &ledger, &hooks);

        let mut profile = Profile::new("default", "g");
        profile.upsert_mod(ModReference { source: "nexus".into(), mod_id: "1".into(), version: "1.0".into(), file_ids: vec![] });

        let plan = reconciler.plan("g", &profile).unwrap();
        assert_eq!(plan.install.len(), 1);
        assert!(plan.enable.is_empty());
        assert!(plan.disable.is_empty());
    }

    #[test]
    fn plan_disables_mods_no_longer_in_profile() {
        let tmp = tempfile::tempdir().unwrap();
        let cache = CacheStore::new(tmp.path().join("cache"));
        let ledger = Ledger::open_in_memory().unwrap();
        ledger
            .upsert_installed_mod(&InstalledMod {
                game: "g".into(),
                profile: "default".into(),
                source: "nexus".into(),
                mod_id: "9".into(),
                version: "1.0".into(),
                enabled: true,
                deployed: true,
                link_method: LinkMethodCode::Symlink,
                file_ids: vec![],
                previous_version: None,
            })
            .unwrap();
        let hooks = HookRunner::new(Duration::from_secs(5));
        let reconciler = Reconciler::new(&cache, &ledger, &hooks);

        let profile = Profile::new("default", "g");
        let plan = reconciler.plan("g", &profile).unwrap();
        assert_eq!(plan.disable, vec![("nexus".to_string(), "9".to_string())]);
    }

    #[test]
    fn plan_enables_disabled_mod_with_intact_cache() {
        let tmp = tempfile::tempdir().unwrap();
        let cache = CacheStore::new(tmp.path().join("cache"));
        let archive = zip_archive(tmp.path(), &[("a.esp", "1")]);
        cache.put("g", "nexus", "1", "1.0", &archive).unwrap();
        let ledger = Ledger::open_in_memory().unwrap();
        ledger
            .upsert_installed_mod(&InstalledMod {
                game: "g".into(),
                profile: "default".into(),
                source: "nexus".into(),
                mod_id: "1".into(),
                version: "1.0".into(),
                enabled: false,
                deployed: false,
                link_method: LinkMethodCode::Symlink,
                file_ids: vec![],
                previous_version: None,
            })
            .unwrap();
        let hooks = HookRunner::new(Duration::from_secs(5));
        let reconciler = Reconciler::new(&cache, &ledger, &hooks);

        let mut profile = Profile::new("default", "g");
        profile.upsert_mod(ModReference { source: "nexus".into(), mod_id: "1".into(), version: "1.0".into(), file_ids: vec![] });
        let plan = reconciler.plan("g", &profile).unwrap();
        assert_eq!(plan.enable.len(), 1);
        assert!(plan.install.is_empty());
    }

    #[tokio::test]
    async fn execute_runs_install_phase_and_downloads_missing_mods() {
        let tmp = tempfile::tempdir().unwrap();
        let cache = CacheStore::new(tmp.path().join("cache"));
        let ledger = Ledger::open_in_memory().unwrap();
        let hooks = HookRunner::new(Duration::from_secs(5));
        let reconciler = Reconciler::new(&cache, &ledger, &hooks);
        let game = sample_game();
        std::fs::create_dir_all(&game.mod_path).unwrap();

        let archive = zip_archive(tmp.path(), &[("a.esp", "1")]);
        let stub = StubSource { name: "nexus".into(), archive, file_id: "main".into() };

        let mut profile = Profile::new("default", "g");
        profile.upsert_mod(ModReference { source: "nexus".into(), mod_id: "1".into(), version: "1.0".into(), file_ids: vec![] });

        let plan = reconciler.plan("g", &profile).unwrap();
        let hook_config = HookConfig::default();
        let cancel = CancelToken::new();
        let adapters: Vec<&(dyn SourceAdapter)> = vec![&stub];
        let report = reconciler
            .execute(&game, &profile, &adapters, &hook_config, &plan, false, &cancel)
            .await
            .unwrap();

        assert_eq!(report.installed, 1);
        assert!(report.is_success());
        assert!(game.mod_path.join("a.esp").exists());
    }

    #[tokio::test]
    async fn execute_accumulates_failures_without_aborting_the_phase() {
        let tmp = tempfile::tempdir().unwrap();
        let cache = CacheStore::new(tmp.path().join("cache"));
        let ledger = Ledger::open_in_memory().unwrap();
        let hooks = HookRunner::new(Duration::from_secs(5));
        let reconciler = Reconciler::new(&cache, &ledger, &hooks);
        let game = sample_game();
        std::fs::create_dir_all(&game.mod_path).unwrap();

        let archive = zip_archive(tmp.path(), &[("a.esp", "1")]);
        let stub = StubSource { name: "nexus".into(), archive, file_id: "main".into() };

        let mut profile = Profile::new("default", "g");
        profile.upsert_mod(ModReference { source: "nexus".into(), mod_id: "1".into(), version: "1.0".into(), file_ids: vec![] });
        profile.upsert_mod(ModReference { source: "unregistered".into(), mod_id: "2".into(), version: "1.0".into(), file_ids: vec![] });

        let plan = reconciler.plan("g", &profile).unwrap();
        let hook_config = HookConfig::default();
        let cancel = CancelToken::new();
        let adapters: Vec<&(dyn SourceAdapter)> = vec![&stub];
        let report = reconciler
            .execute(&game, &profile, &adapters, &hook_config, &plan, false, &cancel)
            .await
            .unwrap();

        assert_eq!(report.installed, 1);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].mod_id, "2");
    }

    #[tokio::test]
    async fn execute_writes_profile_overrides_under_install_path() {
        let tmp = tempfile::tempdir().unwrap();
        let cache = CacheStore::new(tmp.path().join("cache"));
        let ledger = Ledger::open_in_memory().unwrap();
        let hooks = HookRunner::new(Duration::from_secs(5));
        let reconciler = Reconciler::new(&cache, &ledger, &hooks);

        let mut game = sample_game();
        game.install_path = tmp.path().join("install");
        game.mod_path = game.install_path.join("Data");
        std::fs::create_dir_all(&game.mod_path).unwrap();

        let mut profile = Profile::new("default", "g");
        profile.overrides.insert("config/ini.cfg".to_string(), "plain text content".to_string());
        profile.overrides.insert(
            "config/encoded.cfg".to_string(),
            base64::engine::general_purpose::STANDARD.encode("decoded content"),
        );

        let plan = reconciler.plan("g", &profile).unwrap();
        let hook_config = HookConfig::default();
        let cancel = CancelToken::new();
        let no_adapters: Vec<&(dyn SourceAdapter)> = Vec::new();
        reconciler
            .execute(&game, &profile, &no_adapters, &hook_config, &plan, false, &cancel)
            .await
            .unwrap();

        assert_eq!(
            std::fs::read_to_string(game.install_path.join("config/ini.cfg")).unwrap(),
            "plain text content"
        );
        assert_eq!(
            std::fs::read_to_string(game.install_path.join("config/encoded.cfg")).unwrap(),
            "decoded content"
        );
    }
}
