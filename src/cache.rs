//! Content-addressed extracted-archive cache.
//!
//! Layout: `<cache_root>/<game_id>/<source_id>/<mod_id>/<version>/<tree>`.
//! `put` extracts into a temporary sibling directory and renames it into
//! place atomically, so a reader never observes a half-extracted entry.

use crate::archive;
use crate::error::{Error, Result};
use std::path::PathBuf;

pub struct CacheStore {
    root: PathBuf,
}

impl CacheStore {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    fn entry_dir(&self, game: &str, source: &str, mod_id: &str, version: &str) -> PathBuf {
        self.root.join(game).join(source).join(mod_id).join(version)
    }

    /// True iff the keyed directory exists and contains at least one file.
    pub fn exists(&self, game: &str, source: &str, mod_id: &str, version: &str) -> bool {
        let dir = self.entry_dir(game, source, mod_id, version);
        dir.is_dir() && has_any_file(&dir)
    }

    /// Recursive, sorted, forward-slash-normalized file listing.
    pub fn list_files(
        &self,
        game: &str,
        source: &str,
        mod_id: &str,
        version: &str,
    ) -> Result<Vec<String>> {
        let dir = self.entry_dir(game, source, mod_id, version);
        if !dir.is_dir() {
            return Err(Error::CacheCorrupt(format!("{} missing", dir.display())));
        }
        let mut files = Vec::new();
        for entry in walkdir::WalkDir::new(&dir) {
            let entry = entry.map_err(|e| Error::Io(std::io::Error::other(e.to_string())))?;
            if entry.file_type().is_file() {
                let relative = entry.path().strip_prefix(&dir).unwrap();
                files.push(relative.to_string_lossy().replace('\\', "/"));
            }
        }
        if files.is_empty() {
            return Err(Error::CacheCorrupt(format!("{} is empty", dir.display())));
        }
        files.sort();
        Ok(files)
    }

    /// Extracts `archive_path` into the keyed cache entry, replacing any
    /// prior entry atomically. Returns the number of files extracted.
    pub fn put(
        &self,
        game: &str,
        source: &str,
        mod_id: &str,
        version: &str,
        archive_path: &std::path::Path,
    ) -> Result<usize> {
        let dest = self.entry_dir(game, source, mod_id, version);
        let parent = dest.parent().expect("entry dir always has a parent");
        std::fs::create_dir_all(parent)?;

        let tmp = parent.join(format!(
            ".tmp-{}-{}",
            version,
            std::process::id()
        ));
        if tmp.exists() {
            std::fs::remove_dir_all(&tmp)?;
        }
        std::fs::create_dir_all(&tmp)?;

        let count = match archive::extract(archive_path, &tmp) {
            Ok(count) => count,
            Err(e) => {
                let _ = std::fs::remove_dir_all(&tmp);
                tracing::warn!(game, source, mod_id, version, error = %e, "extraction failed");
                return Err(e);
            }
        };

        if dest.exists() {
            std::fs::remove_dir_all(&dest)?;
        }
        std::fs::rename(&tmp, &dest)?;

        tracing::info!(game, source, mod_id, version, files = count, "cache entry populated");
        Ok(count)
    }

    pub fn delete(&self, game: &str, source: &str, mod_id: &str, version: &str) -> Result<()> {
        let dir = self.entry_dir(game, source, mod_id, version);
        if dir.exists() {
            std::fs::remove_dir_all(&dir)?;
        }
        Ok(())
    }

    /// Lists every `(game, source, mod_id, version)` key this store
    /// currently holds a directory for, by walking the cache root's fixed
    /// four-level layout. Used by cache garbage collection.
    pub fn all_entries(&self) -> Result<Vec<(String, String, String, String)>> {
        let mut entries = Vec::new();
        if !self.root.is_dir() {
            return Ok(entries);
        }
        for game_dir in list_dirs(&self.root)? {
            let game = dir_name(&game_dir);
            if game == ".downloads" {
                continue;
            }
            for source_dir in list_dirs(&game_dir)? {
                let source = dir_name(&source_dir);
                for mod_dir in list_dirs(&source_dir)? {
                    let mod_id = dir_name(&mod_dir);
                    for version_dir in list_dirs(&mod_dir)? {
                        entries.push((game.clone(), source.clone(), mod_id.clone(), dir_name(&version_dir)));
                    }
                }
            }
        }
        Ok(entries)
    }

    pub fn file_path(
        &self,
        game: &str,
        source: &str,
        mod_id: &str,
        version: &str,
        relative: &str,
    ) -> PathBuf {
        self.entry_dir(game, source, mod_id, version).join(relative)
    }

    /// A throwaway path under the cache root for a source adapter to
    /// download an archive into before it is handed to `put`. The caller
    /// is responsible for removing it once extraction succeeds or fails.
    pub fn download_scratch_path(&self, game: &str, mod_id: &str, file_id: &str) -> Result<PathBuf> {
        let dir = self.root.join(".downloads");
        std::fs::create_dir_all(&dir)?;
        Ok(dir.join(format!("{game}-{mod_id}-{file_id}-{}.part", std::process::id())))
    }
}

fn has_any_file(dir: &std::path::Path) -> bool {
    walkdir::WalkDir::new(dir)
        .into_iter()
        .filter_map(|e| e.ok())
        .any(|e| e.file_type().is_file())
}

fn list_dirs(dir: &std::path::Path) -> Result<Vec<PathBuf>> {
    let mut dirs = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        if entry.file_type()?.is_dir() {
            dirs.push(entry.path());
        }
    }
    Ok(dirs)
}

fn dir_name(path: &std::path::Path) -> String {
    path.file_name().unwrap().to_string_lossy().into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn zip_archive(dir: &std::path::Path, entries: &[(&str, &str)]) -> PathBuf {
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

    #[test]
    fn put_then_exists_and_list_files() {
        let tmp = tempfile::tempdir().unwrap();
        let archive = zip_archive(tmp.path(), &[("textures/a.dds", "x"), ("meshes/b.nif", "y")]);
        let store = CacheStore::new(tmp.path().join("cache"));

        assert!(!store.exists("skyrimse", "nexus", "100", "1.0"));
        let count = store.put("skyrimse", "nexus", "100", "1.0", &archive).unwrap();
        assert_eq!(count, 2);
        assert!(store.exists("skyrimse", "nexus", "100", "1.0"));

        let files = store.list_files("skyrimse", "nexus", "100", "1.0").unwrap();
        assert_eq!(files, vec!["meshes/b.nif".to_string(), "textures/a.dds".to_string()]);
    }

    #[test]
    fn put_replaces_existing_entry_atomically() {
        let tmp = tempfile::tempdir().unwrap();
        let store = CacheStore::new(tmp.path().join("cache"));

        let first = zip_archive(tmp.path(), &[("old.txt", "1")]);
        store.put("g", "s", "m", "1.0", &first).unwrap();

        let second = zip_archive(tmp.path(), &[("new.txt", "2")]);
        store.put("g", "s", "m", "1.0", &second).unwrap();

        let files = store.list_files("g", "s", "m", "1.0").unwrap();
        assert_eq!(files, vec!["new.txt".to_string()]);
    }

    #[test]
    fn put_rejects_path_escaping_entries_and_leaves_no_partial_dir() {
        let tmp = tempfile::tempdir().unwrap();
        let archive = zip_archive(tmp.path(), &[("ok.txt", "1"), ("../escape.txt", "2")]);
        let store = CacheStore::new(tmp.path().join("cache"));

        let result = store.put("g", "s", "m", "1.0", &archive);
        assert!(result.is_err());
        assert!(!store.exists("g", "s", "m", "1.0"));
    }

    #[test]
    fn put_rejects_absolute_entries_and_leaves_no_partial_dir() {
        let tmp = tempfile::tempdir().unwrap();
        let archive = zip_archive(tmp.path(), &[("ok.txt", "1"), ("/etc/passwd", "2")]);
        let store = CacheStore::new(tmp.path().join("cache"));

        let result = store.put("g", "s", "m", "1.0", &archive);
        assert!(result.is_err());
        assert!(!store.exists("g", "s", "m", "1.0"));
    }

    #[test]
    fn all_entries_lists_every_stored_key_and_skips_the_downloads_scratch_dir() {
        let tmp = tempfile::tempdir().unwrap();
        let store = CacheStore::new(tmp.path().join("cache"));
        let archive = zip_archive(tmp.path(), &[("a.esp", "1")]);
        store.put("g", "nexus", "1", "1.0", &archive).unwrap();
        store.put("g", "nexus", "2", "1.0", &archive).unwrap();
        store.download_scratch_path("g", "3", "main").unwrap();

        let mut entries = store.all_entries().unwrap();
        entries.sort();
        assert_eq!(
            entries,
            vec![
                ("g".to_string(), "nexus".to_string(), "1".to_string(), "1.0".to_string()),
                ("g".to_string(), "nexus".to_string(), "2".to_string(), "1.0".to_string()),
            ]
        );
    }

    #[test]
    fn empty_directory_is_treated_as_corrupt() {
        let tmp = tempfile::tempdir().unwrap();
        let store = CacheStore::new(tmp.path().join("cache"));
        std::fs::create_dir_all(store.entry_dir("g", "s", "m", "1.0")).unwrap();

        assert!(!store.exists("g", "s", "m", "1.0"));
        assert!(store.list_files("g", "s", "m", "1.0").is_err());
    }
}
