//! Source adapters: the only part of the engine allowed to speak to a
//! remote catalog. The core calls this trait and never touches HTTP itself.

pub mod nexus;

use crate::error::Result;
use async_trait::async_trait;
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModMetadata {
    pub id: String,
    pub source_id: String,
    pub name: String,
    pub version: String,
    pub author: Option<String>,
    pub summary: Option<String>,
    pub category: Option<String>,
    pub source_url: Option<String>,
    pub picture_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModFile {
    pub file_id: String,
    pub name: String,
    pub version: String,
    pub is_primary: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchResult {
    pub mods: Vec<ModMetadata>,
    pub total_count: u64,
}

/// Capability set a remote catalog must expose. The core never depends on
/// anything beyond this trait; `source::nexus::NexusAdapter` is the
/// reference implementation used for integration tests.
#[async_trait]
pub trait SourceAdapter: Send + Sync {
    /// Stable identifier for this source, used as the `source` column of
    /// every ledger row and cache path produced from its content.
    fn name(&self) -> &str;

    async fn search(&self, game_id: &str, query: &str, offset: u64, count: u64) -> Result<SearchResult>;

    async fn get_mod(&self, game_id: &str, mod_id: &str) -> Result<ModMetadata>;

    async fn list_files(&self, game_id: &str, mod_id: &str) -> Result<Vec<ModFile>>;

    /// Streams the archive for `file_id` to `dest`, returning its byte size.
    async fn download(&self, game_id: &str, mod_id: &str, file_id: &str, dest: &Path) -> Result<u64>;

    async fn list_dependencies(&self, game_id: &str, mod_id: &str) -> Result<Vec<String>>;
}
