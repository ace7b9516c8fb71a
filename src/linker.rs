//! Materializes one cache file at one destination path, and its inverse.

use crate::config::LinkMethod;
use crate::error::{Error, Result};
use std::os::unix::fs::symlink;
use std::path::Path;

/// Creates `dst` as a materialization of `src` under `method`. Parent
/// directories are created as needed with mode 0755. A `dst` that already
/// matches the intended result (same symlink target, same inode, or
/// present under `copy`) is left alone.
pub fn link(method: LinkMethod, src: &Path, dst: &Path) -> Result<()> {
    if let Some(parent) = dst.parent() {
        std::fs::create_dir_all(parent)?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(parent, std::fs::Permissions::from_mode(0o755))?;
        }
    }

    match method {
        LinkMethod::Symlink => link_symlink(src, dst),
        LinkMethod::Hardlink => link_hardlink(src, dst),
        LinkMethod::Copy => link_copy(src, dst),
    }
}

fn link_symlink(src: &Path, dst: &Path) -> Result<()> {
    if let Ok(existing) = std::fs::read_link(dst) {
        if existing == src {
            return Ok(());
        }
    }
    remove_existing(dst)?;
    symlink(src, dst)?;
    Ok(())
}

fn link_hardlink(src: &Path, dst: &Path) -> Result<()> {
    if let (Ok(src_meta), Ok(dst_meta)) = (std::fs::metadata(src), std::fs::metadata(dst)) {
        use std::os::unix::fs::MetadataExt;
        if src_meta.ino() == dst_meta.ino() && src_meta.dev() == dst_meta.dev() {
            return Ok(());
        }
    }
    remove_existing(dst)?;

    match std::fs::hard_link(src, dst) {
        Ok(()) => Ok(()),
        Err(e) if e.raw_os_error() == Some(libc_exdev()) => Err(Error::CrossDeviceLink(format!(
            "{} -> {}",
            src.display(),
            dst.display()
        ))),
        Err(e) => Err(e.into()),
    }
}

fn link_copy(src: &Path, dst: &Path) -> Result<()> {
    remove_existing(dst)?;
    std::fs::copy(src, dst)?;
    let mode = std::fs::metadata(src)?.permissions();
    std::fs::set_permissions(dst, mode)?;
    Ok(())
}

fn remove_existing(dst: &Path) -> Result<()> {
    if std::fs::symlink_metadata(dst).is_ok() {
        std::fs::remove_file(dst)?;
    }
    Ok(())
}

/// `EXDEV`, the errno hardlink() returns across filesystems. Hard-coded
/// rather than pulled from the `libc` crate, which this workspace doesn't
/// otherwise depend on.
fn libc_exdev() -> i32 {
    18
}

/// Removes `dst` (file, symlink, or hardlink) and prunes now-empty ancestor
/// directories up to, but not including, `stop_at`.
pub fn unlink(dst: &Path, stop_at: &Path) -> Result<()> {
    if std::fs::symlink_metadata(dst).is_ok() {
        std::fs::remove_file(dst)?;
    }

    let mut dir = dst.parent().map(Path::to_path_buf);
    while let Some(d) = dir {
        if d == stop_at || !d.starts_with(stop_at) {
            break;
        }
        match std::fs::remove_dir(&d) {
            Ok(()) => dir = d.parent().map(Path::to_path_buf),
            Err(_) => break,
        }
    }
    Ok(())
}
