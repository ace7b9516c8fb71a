//! Archive extraction (zip, 7z, rar) with strict path-escape rejection.

use crate::error::{Error, Result};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveFormat {
    Zip,
    SevenZip,
    Rar,
    Unknown,
}

impl ArchiveFormat {
    pub fn from_path(path: &Path) -> Self {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_lowercase())
            .unwrap_or_default();

        match ext.as_str() {
            "zip" => Self::Zip,
            "7z" => Self::SevenZip,
            "rar" => Self::Rar,
            _ => Self::Unknown,
        }
    }

    fn from_magic_bytes(archive: &Path) -> Result<Self> {
        let bytes = std::fs::read(archive)?;
        if bytes.starts_with(&[0x50, 0x4B]) {
            Ok(Self::Zip)
        } else if bytes.starts_with(&[0x37, 0x7A, 0xBC, 0xAF]) {
            Ok(Self::SevenZip)
        } else if bytes.starts_with(&[0x52, 0x61, 0x72, 0x21]) {
            Ok(Self::Rar)
        } else {
            Err(Error::not_found(format!(
                "{}: unrecognized archive format",
                archive.display()
            )))
        }
    }
}

/// Extracts `archive` into `dest`, which must already exist and be empty.
/// Any entry whose normalized relative path escapes `dest` fails the whole
/// extraction and `dest` is removed before returning, so callers never
/// observe a partial tree.
pub fn extract(archive: &Path, dest: &Path) -> Result<usize> {
    let format = match ArchiveFormat::from_path(archive) {
        ArchiveFormat::Unknown => ArchiveFormat::from_magic_bytes(archive)?,
        f => f,
    };

    let result = match format {
        ArchiveFormat::Zip => extract_zip(archive, dest),
        ArchiveFormat::SevenZip => extract_7z(archive, dest),
        ArchiveFormat::Rar => extract_rar(archive, dest),
        ArchiveFormat::Unknown => unreachable!(),
    };

    if result.is_err() {
        let _ = std::fs::remove_dir_all(dest);
    }
    result
}

/// Normalizes an archive entry name to a `dest`-relative path, rejecting any
/// entry that contains a `..` component or is absolute.
fn safe_relative_path(entry_name: &str) -> Result<PathBuf> {
    let normalized = entry_name.replace('\\', "/");
    if normalized.starts_with('/') {
        return Err(Error::PathEscape(entry_name.to_string()));
    }
    let mut out = PathBuf::new();
    for part in normalized.split('/') {
        if part.is_empty() || part == "." {
            continue;
        }
        if part == ".." {
            return Err(Error::PathEscape(entry_name.to_string()));
        }
        out.push(part);
    }
    Ok(out)
}

fn extract_zip(archive: &Path, dest: &Path) -> Result<usize> {
    let file = std::fs::File::open(archive)?;
    let mut zip =
        zip::ZipArchive::new(file).map_err(|e| Error::Io(std::io::Error::other(e.to_string())))?;

    let mut extracted = 0;
    for i in 0..zip.len() {
        let mut entry = zip
            .by_index(i)
            .map_err(|e| Error::Io(std::io::Error::other(e.to_string())))?;
        let relative = safe_relative_path(entry.name())?;
        if relative.as_os_str().is_empty() {
            continue;
        }
        let outpath = dest.join(&relative);

        if entry.is_dir() {
            std::fs::create_dir_all(&outpath)?;
            continue;
        }

        if let Some(parent) = outpath.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut outfile = std::fs::File::create(&outpath)?;
        std::io::copy(&mut entry, &mut outfile)?;
        extracted += 1;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            if let Some(mode) = entry.unix_mode() {
                std::fs::set_permissions(&outpath, std::fs::Permissions::from_mode(mode))?;
            }
        }
    }

    Ok(extracted)
}

fn extract_7z(archive: &Path, dest: &Path) -> Result<usize> {
    // sevenz_rust validates entry paths itself and refuses absolute/`..`
    // paths; walk the result afterward purely to count regular files and
    // to re-check in case a future version of the crate relaxes that.
    sevenz_rust::decompress_file(archive, dest)
        .map_err(|e| Error::Io(std::io::Error::other(e.to_string())))?;

    let mut count = 0;
    for entry in walkdir::WalkDir::new(dest) {
        let entry = entry?;
        let relative = entry
            .path()
            .strip_prefix(dest)
            .unwrap_or(entry.path());
        if relative
            .components()
            .any(|c| matches!(c, std::path::Component::ParentDir))
        {
            return Err(Error::PathEscape(relative.display().to_string()));
        }
        if entry.file_type().is_file() {
            count += 1;
        }
    }
    Ok(count)
}

fn extract_rar(archive: &Path, dest: &Path) -> Result<usize> {
    if which::which("unrar").is_err() {
        return Err(Error::Io(std::io::Error::other(
            "rar extraction requires the 'unrar' binary to be installed",
        )));
    }

    let output = std::process::Command::new("unrar")
        .args(["x", "-o+", "-y"])
        .arg(archive)
        .arg(dest)
        .output()?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(Error::Io(std::io::Error::other(format!(
            "unrar failed: {stderr}"
        ))));
    }

    let mut count = 0;
    for entry in walkdir::WalkDir::new(dest) {
        let entry = entry?;
        if entry.file_type().is_file() {
            count += 1;
        }
    }
    Ok(count)
}

impl From<walkdir::Error> for Error {
    fn from(e: walkdir::Error) -> Self {
        Error::Io(std::io::Error::other(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_detection_is_case_insensitive() {
        assert_eq!(ArchiveFormat::from_path(Path::new("mod.zip")), ArchiveFormat::Zip);
        assert_eq!(ArchiveFormat::from_path(Path::new("mod.ZIP")), ArchiveFormat::Zip);
        assert_eq!(ArchiveFormat::from_path(Path::new("mod.7z")), ArchiveFormat::SevenZip);
        assert_eq!(ArchiveFormat::from_path(Path::new("mod.rar")), ArchiveFormat::Rar);
    }

    #[test]
    fn safe_relative_path_normalizes_separators_and_dots() {
        assert_eq!(
            safe_relative_path("foo/bar/baz.esp").unwrap(),
            PathBuf::from("foo/bar/baz.esp")
        );
        assert_eq!(
            safe_relative_path("foo\\bar\\baz.esp").unwrap(),
            PathBuf::from("foo/bar/baz.esp")
        );
        assert_eq!(
            safe_relative_path("./foo/./bar").unwrap(),
            PathBuf::from("foo/bar")
        );
    }

    #[test]
    fn safe_relative_path_rejects_parent_dir_escape() {
        let err = safe_relative_path("../../../etc/passwd").unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::PathEscape);
    }

    #[test]
    fn safe_relative_path_rejects_absolute_entries() {
        let err = safe_relative_path("/etc/passwd").unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::PathEscape);
    }
}
