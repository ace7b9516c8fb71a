//! Row types for the ownership ledger.

use rusqlite::Row;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkMethodCode {
    Symlink,
    Hardlink,
    Copy,
}

impl LinkMethodCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Symlink => "symlink",
            Self::Hardlink => "hardlink",
            Self::Copy => "copy",
        }
    }

    pub fn from_str(s: &str) -> Self {
        match s {
            "hardlink" => Self::Hardlink,
            "copy" => Self::Copy,
            _ => Self::Symlink,
        }
    }
}

impl From<crate::config::LinkMethod> for LinkMethodCode {
    fn from(m: crate::config::LinkMethod) -> Self {
        match m {
            crate::config::LinkMethod::Symlink => Self::Symlink,
            crate::config::LinkMethod::Hardlink => Self::Hardlink,
            crate::config::LinkMethod::Copy => Self::Copy,
        }
    }
}

impl From<LinkMethodCode> for crate::config::LinkMethod {
    fn from(m: LinkMethodCode) -> Self {
        match m {
            LinkMethodCode::Symlink => crate::config::LinkMethod::Symlink,
            LinkMethodCode::Hardlink => crate::config::LinkMethod::Hardlink,
            LinkMethodCode::Copy => crate::config::LinkMethod::Copy,
        }
    }
}

/// One row of the ownership ledger: `relative_path` is owned by
/// `(source, mod_id)` under the strategy it was deployed with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeployedFile {
    pub game: String,
    pub profile: String,
    pub relative_path: String,
    pub source: String,
    pub mod_id: String,
    pub link_method: LinkMethodCode,
}

impl DeployedFile {
    pub fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(Self {
            game: row.get("game")?,
            profile: row.get("profile")?,
            relative_path: row.get("relative_path")?,
            source: row.get("source")?,
            mod_id: row.get("mod_id")?,
            link_method: LinkMethodCode::from_str(&row.get::<_, String>("link_method")?),
        })
    }
}

/// Per-`(game, profile, source, mod_id)` install record. Survives across
/// individual deployments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstalledMod {
    pub game: String,
    pub profile: String,
    pub source: String,
    pub mod_id: String,
    pub version: String,
    pub enabled: bool,
    pub deployed: bool,
    pub link_method: LinkMethodCode,
    pub file_ids: Vec<String>,
    pub previous_version: Option<String>,
}

impl InstalledMod {
    pub fn from_row(row: &Row) -> rusqlite::Result<Self> {
        let file_ids_raw: String = row.get("file_ids")?;
        Ok(Self {
            game: row.get("game")?,
            profile: row.get("profile")?,
            source: row.get("source")?,
            mod_id: row.get("mod_id")?,
            version: row.get("version")?,
            enabled: row.get::<_, i64>("enabled")? != 0,
            deployed: row.get::<_, i64>("deployed")? != 0,
            link_method: LinkMethodCode::from_str(&row.get::<_, String>("link_method")?),
            file_ids: if file_ids_raw.is_empty() {
                Vec::new()
            } else {
                file_ids_raw.split(',').map(String::from).collect()
            },
            previous_version: row.get("previous_version")?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileChecksum {
    pub game: String,
    pub profile: String,
    pub source: String,
    pub mod_id: String,
    pub file_id: String,
    pub checksum: String,
}

impl FileChecksum {
    pub fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(Self {
            game: row.get("game")?,
            profile: row.get("profile")?,
            source: row.get("source")?,
            mod_id: row.get("mod_id")?,
            file_id: row.get("file_id")?,
            checksum: row.get("checksum")?,
        })
    }
}
