//! Install/uninstall a single mod against one `(game, profile)`, keeping the
//! ownership ledger and the filesystem in lockstep.

use crate::cache::CacheStore;
use crate::cancel::CancelToken;
use crate::config::LinkMethod;
use crate::error::{Error, Result};
use crate::ledger::{self, InstalledMod, Ledger, LinkMethodCode};
use crate::linker;
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConflictPreview {
    pub relative_path: String,
    pub current_owner: (String, String),
}

pub struct Installer<'a> {
    cache: &'a CacheStore,
    ledger: &'a Ledger,
}

impl<'a> Installer<'a> {
    pub fn new(cache: &'a CacheStore, ledger: &'a Ledger) -> Self {
        Self { cache, ledger }
    }

    /// Previews files this mod would write whose current owner (per the
    /// ledger) is some other mod.
    pub fn get_conflicts(
        &self,
        game: &str,
        profile: &str,
        source: &str,
        mod_id: &str,
        version: &str,
    ) -> Result<Vec<ConflictPreview>> {
        let files = self.cache.list_files(game, source, mod_id, version)?;
        let mut conflicts = Vec::new();
        for relative_path in files {
            if let Some(owner) = self.ledger.get_owner(game, profile, &relative_path)? {
                if owner.0 != source || owner.1 != mod_id {
                    conflicts.push(ConflictPreview {
                        relative_path,
                        current_owner: owner,
                    });
                }
            }
        }
        Ok(conflicts)
    }

    /// Deploys every file a cache entry holds into `mod_path`, transferring
    /// ownership away from any other current owner. All ledger writes for
    /// this call happen in one transaction; on error (including
    /// cancellation observed mid-loop) the transaction rolls back and files
    /// already linked this call are best-effort removed.
    ///
    /// `file_ids` is the set of file ids this install should be recorded
    /// against; an empty slice keeps whatever file ids were already on
    /// record for this mod (a caller that didn't resolve new ones, e.g. a
    /// cache-only redeploy). A `version` that differs from the previously
    /// recorded one is kept as `previous_version` for one-step rollback.
    #[allow(clippy::too_many_arguments)]
    pub fn install(
        &self,
        game: &str,
        profile: &str,
        source: &str,
        mod_id: &str,
        version: &str,
        file_ids: &[String],
        mod_path: &Path,
        method: LinkMethod,
        cancel: &CancelToken,
    ) -> Result<usize> {
        let files = self.cache.list_files(game, source, mod_id, version)?;
        let mut linked = Vec::new();
        let previous = self.ledger.get_installed_mod(game, profile, source, mod_id)?;
        let recorded_file_ids = if file_ids.is_empty() {
            previous.as_ref().map(|m| m.file_ids.clone()).unwrap_or_default()
        } else {
            file_ids.to_vec()
        };
        let previous_version = previous
            .as_ref()
            .filter(|m| m.version != version)
            .map(|m| m.version.clone());

        let result = self.ledger.with_transaction(|tx| {
            for relative_path in &files {
                if cancel.is_cancelled() {
                    return Err(Error::Cancelled);
                }

                let dst = mod_path.join(relative_path);
                let src = self.cache.file_path(game, source, mod_id, version, relative_path);

                if let Some((owner_source, owner_mod)) = ledger::get_owner_tx(tx, game, profile, relative_path)? {
                    if owner_source != source || owner_mod != mod_id {
                        linker::unlink(&dst, mod_path).ok();
                    }
                }

                linker::link(method, &src, &dst)?;
                linked.push(dst.clone());

                ledger::set_owner_tx(tx, game, profile, relative_path, source, mod_id, method.into())?;
            }

            let record = InstalledMod {
                game: game.to_string(),
                profile: profile.to_string(),
                source: source.to_string(),
                mod_id: mod_id.to_string(),
                version: version.to_string(),
                enabled: true,
                deployed: true,
                link_method: LinkMethodCode::from(method),
                file_ids: recorded_file_ids.clone(),
                previous_version: previous_version.clone(),
            };
            ledger::upsert_installed_mod_tx(tx, &record)?;
            Ok(())
        });

        if let Err(e) = result {
            for dst in &linked {
                linker::unlink(dst, mod_path).ok();
            }
            return Err(e);
        }

        Ok(files.len())
    }

    /// Removes every file this mod owns in the ledger, deletes its ledger
    /// rows, and prunes emptied ancestor directories.
    pub fn uninstall(&self, game: &str, profile: &str, source: &str, mod_id: &str, mod_path: &Path) -> Result<usize> {
        let files = self.ledger.get_files_for_mod(game, profile, source, mod_id)?;
        for relative_path in &files {
            let dst = mod_path.join(relative_path);
            linker::unlink(&dst, mod_path)?;
        }
        self.ledger.delete_files_for_mod(game, profile, source, mod_id)?;

        if let Some(mut record) = self.ledger.get_installed_mod(game, profile, source, mod_id)? {
            record.deployed = false;
            self.ledger.upsert_installed_mod(&record)?;
        }

        Ok(files.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn zip_archive(dir: &Path, entries: &[(&str, &str)]) -> std::path::PathBuf {
        let path = dir.join("mod.zip");
        let file = std::fs::File::create(&path).unwrap();
        let mut writer = zip::ZipWriter::new(file);
        let options =
            zip::write::SimpleFileOptions::default().compression_method(zip::CompressionMethod::Stored);
        for (name, content) in entries {
            writer.start_file(*name, options).unwrap();
            writer.write_all(content.as_bytes()).unwrap();
        }
        writer.finish().unwrap();
        path
    }

    fn setup() -> (tempfile::TempDir, CacheStore, Ledger, std::path::PathBuf) {
        let tmp = tempfile::tempdir().unwrap();
        let cache = CacheStore::new(tmp.path().join("cache"));
        let ledger = Ledger::open_in_memory().unwrap();
        let mod_path = tmp.path().join("game/Data");
        std::fs::create_dir_all(&mod_path).unwrap();
        (tmp, cache, ledger, mod_path)
    }

    #[test]
    fn install_deploys_all_cache_files_and_records_ownership() {
        let (tmp, cache, ledger, mod_path) = setup();
        let archive = zip_archive(tmp.path(), &[("a.esp", "1"), ("textures/b.dds", "2")]);
        cache.put("g", "nexus", "1", "1.0", &archive).unwrap();

        let installer = Installer::new(&cache, &ledger);
        let count = installer
            .install(
                "g", "default", "nexus", "1", "1.0", &[], &mod_path, LinkMethod::Symlink,
                &CancelToken::new(),
            )
            .unwrap();

        assert_eq!(count, 2);
        assert!(mod_path.join("a.esp").exists());
        assert!(mod_path.join("textures/b.dds").exists());
        assert_eq!(
            ledger.get_owner("g", "default", "a.esp").unwrap(),
            Some(("nexus".to_string(), "1".to_string()))
        );
    }

    #[test]
    fn install_transfers_ownership_from_a_conflicting_mod() {
        let (tmp, cache, ledger, mod_path) = setup();
        let archive1 = zip_archive(tmp.path(), &[("shared.esp", "from-one")]);
        cache.put("g", "nexus", "1", "1.0", &archive1).unwrap();
        let installer = Installer::new(&cache, &ledger);
        installer
            .install(
                "g", "default", "nexus", "1", "1.0", &[], &mod_path, LinkMethod::Symlink,
                &CancelToken::new(),
            )
            .unwrap();

        let archive2_dir = tmp.path().join("other");
        std::fs::create_dir_all(&archive2_dir).unwrap();
        let archive2 = zip_archive(&archive2_dir, &[("shared.esp", "from-two")]);
        cache.put("g", "nexus", "2", "1.0", &archive2).unwrap();
        installer
            .install(
                "g", "default", "nexus", "2", "1.0", &[], &mod_path, LinkMethod::Symlink,
                &CancelToken::new(),
            )
            .unwrap();

        assert_eq!(
            ledger.get_owner("g", "default", "shared.esp").unwrap(),
            Some(("nexus".to_string(), "2".to_string()))
        );
    }

    #[test]
    fn uninstall_removes_files_and_ledger_rows() {
        let (tmp, cache, ledger, mod_path) = setup();
        let archive = zip_archive(tmp.path(), &[("a.esp", "1")]);
        cache.put("g", "nexus", "1", "1.0", &archive).unwrap();
        let installer = Installer::new(&cache, &ledger);
        installer
            .install(
                "g", "default", "nexus", "1", "1.0", &[], &mod_path, LinkMethod::Symlink,
                &CancelToken::new(),
            )
            .unwrap();

        let removed = installer.uninstall("g", "default", "nexus", "1", &mod_path).unwrap();
        assert_eq!(removed, 1);
        assert!(std::fs::symlink_metadata(mod_path.join("a.esp")).is_err());
        assert_eq!(ledger.get_owner("g", "default", "a.esp").unwrap(), None);
    }

    #[test]
    fn get_conflicts_reports_files_owned_by_another_mod() {
        let (tmp, cache, ledger, mod_path) = setup();
        let archive1 = zip_archive(tmp.path(), &[("shared.esp", "1")]);
        cache.put("g", "nexus", "1", "1.0", &archive1).unwrap();
        let installer = Installer::new(&cache, &ledger);
        installer
            .install(
                "g", "default", "nexus", "1", "1.0", &[], &mod_path, LinkMethod::Symlink,
                &CancelToken::new(),
            )
            .unwrap();

        let archive2_dir = tmp.path().join("other");
        std::fs::create_dir_all(&archive2_dir).unwrap();
        let archive2 = zip_archive(&archive2_dir, &[("shared.esp", "2")]);
        cache.put("g", "nexus", "2", "1.0", &archive2).unwrap();

        let conflicts = installer.get_conflicts("g", "default", "nexus", "2", "1.0").unwrap();
        assert_eq!(conflicts.len(), 1);
        assert_eq!(conflicts[0].relative_path, "shared.esp");
        assert_eq!(conflicts[0].current_owner, ("nexus".to_string(), "1".to_string()));
    }

    #[test]
    fn install_records_file_ids_and_previous_version_on_upgrade() {
        let (tmp, cache, ledger, mod_path) = setup();
        let archive1 = zip_archive(tmp.path(), &[("a.esp", "1")]);
        cache.put("g", "nexus", "1", "1.0", &archive1).unwrap();
        let installer = Installer::new(&cache, &ledger);
        installer
            .install(
                "g", "default", "nexus", "1", "1.0",
                &["main".to_string()], &mod_path, LinkMethod::Symlink, &CancelToken::new(),
            )
            .unwrap();

        let archive2 = zip_archive(tmp.path(), &[("a.esp", "2")]);
        cache.put("g", "nexus", "1", "2.0", &archive2).unwrap();
        installer
            .install(
                "g", "default", "nexus", "1", "2.0",
                &["main".to_string(), "optional".to_string()], &mod_path, LinkMethod::Symlink,
                &CancelToken::new(),
            )
            .unwrap();

        let record = ledger.get_installed_mod("g", "default", "nexus", "1").unwrap().unwrap();
        assert_eq!(record.file_ids, vec!["main".to_string(), "optional".to_string()]);
        assert_eq!(record.previous_version, Some("1.0".to_string()));
    }

    #[test]
    fn install_stops_mid_mod_when_cancelled_and_unlinks_what_it_linked() {
        let (tmp, cache, ledger, mod_path) = setup();
        let entries: Vec<(String, String)> =
            (0..10).map(|i| (format!("file{i}.esp"), i.to_string())).collect();
        let entry_refs: Vec<(&str, &str)> =
            entries.iter().map(|(n, c)| (n.as_str(), c.as_str())).collect();
        let archive = zip_archive(tmp.path(), &entry_refs);
        cache.put("g", "nexus", "1", "1.0", &archive).unwrap();

        let installer = Installer::new(&cache, &ledger);
        let cancel = CancelToken::new();
        cancel.cancel();
        let result = installer.install(
            "g", "default", "nexus", "1", "1.0", &[], &mod_path, LinkMethod::Symlink, &cancel,
        );

        assert!(result.is_err());
        for (name, _) in &entries {
            assert!(std::fs::symlink_metadata(mod_path.join(name)).is_err());
        }
        assert_eq!(ledger.get_installed_mod("g", "default", "nexus", "1").unwrap(), None);
    }
}
