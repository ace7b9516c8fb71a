//! Advisory exclusive lock over the config directory, held for the
//! duration of any write-bearing command. Two concurrent invocations
//! against the same config directory are not supported; the second one
//! fails fast rather than racing the first.

use crate::error::{Error, Result};
use lockfile::Lockfile;
use std::path::Path;

/// Held for the lifetime of the value; dropping it releases the lock.
pub struct ConfigLock(#[allow(dead_code)] Lockfile);

impl ConfigLock {
    pub fn acquire(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        Lockfile::create(path)
            .map(Self)
            .map_err(|e| Error::Conflict(format!("another instance holds the config lock: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn acquire_then_release_allows_reacquire() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join(".lock");
        {
            let _lock = ConfigLock::acquire(&path).unwrap();
            assert!(ConfigLock::acquire(&path).is_err());
        }
        assert!(ConfigLock::acquire(&path).is_ok());
    }
}
