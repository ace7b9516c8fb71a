//! Profile documents: the declarative, round-trip-stable YAML schema a
//! reconciliation target is read from.

mod manager;

pub use manager::ProfileManager;

use crate::config::LinkMethod;
use serde::{Deserialize, Serialize};
use serde_yaml::Value;
use std::collections::BTreeMap;

/// `{source, mod_id, version, file_ids}` — one entry in a profile's
/// ordered mod list. Order is significant: later entries win conflicts
/// (§4.6 of the deployment model).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModReference {
    pub source: String,
    pub mod_id: String,
    pub version: String,
    #[serde(default)]
    pub file_ids: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Profile {
    pub name: String,
    pub game_id: String,
    #[serde(default)]
    pub link_method: LinkMethod,
    #[serde(default)]
    pub is_default: bool,
    #[serde(default)]
    pub overrides: BTreeMap<String, String>,
    #[serde(default)]
    pub mods: Vec<ModReference>,

    /// Any top-level keys this implementation doesn't model, preserved so
    /// round-tripping a document written by a newer version doesn't drop
    /// data.
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl Profile {
    pub fn new(name: impl Into<String>, game_id: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            game_id: game_id.into(),
            link_method: LinkMethod::default(),
            is_default: false,
            overrides: BTreeMap::new(),
            mods: Vec::new(),
            extra: BTreeMap::new(),
        }
    }

    /// Replaces the reference for `(source, mod_id)` if present, keeping
    /// its prior position; otherwise appends.
    pub fn upsert_mod(&mut self, reference: ModReference) {
        if let Some(existing) = self
            .mods
            .iter_mut()
            .find(|m| m.source == reference.source && m.mod_id == reference.mod_id)
        {
            *existing = reference;
        } else {
            self.mods.push(reference);
        }
    }

    pub fn remove_mod(&mut self, source: &str, mod_id: &str) -> bool {
        let before = self.mods.len();
        self.mods.retain(|m| !(m.source == source && m.mod_id == mod_id));
        self.mods.len() != before
    }

    pub fn to_yaml(&self) -> crate::error::Result<String> {
        serde_yaml::to_string(self).map_err(|e| crate::error::Error::Io(std::io::Error::other(e.to_string())))
    }

    pub fn from_yaml(content: &str) -> crate::error::Result<Self> {
        serde_yaml::from_str(content).map_err(|e| crate::error::Error::Io(std::io::Error::other(e.to_string())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn upsert_mod_appends_new_and_replaces_existing_in_place() {
        let mut profile = Profile::new("default", "skyrimse");
        profile.upsert_mod(ModReference {
            source: "nexus".into(),
            mod_id: "1".into(),
            version: "1.0".into(),
            file_ids: vec!["a".into()],
        });
        profile.upsert_mod(ModReference {
            source: "nexus".into(),
            mod_id: "2".into(),
            version: "1.0".into(),
            file_ids: vec![],
        });
        profile.upsert_mod(ModReference {
            source: "nexus".into(),
            mod_id: "1".into(),
            version: "2.0".into(),
            file_ids: vec!["b".into()],
        });

        assert_eq!(profile.mods.len(), 2);
        assert_eq!(profile.mods[0].mod_id, "1");
        assert_eq!(profile.mods[0].version, "2.0");
        assert_eq!(profile.mods[1].mod_id, "2");
    }

    #[test]
    fn round_trip_preserves_unknown_top_level_keys() {
        let yaml = "name: default\ngame_id: skyrimse\nlink_method: symlink\nis_default: false\nfuture_field: 42\nmods: []\n";
        let profile = Profile::from_yaml(yaml).unwrap();
        assert_eq!(
            profile.extra.get("future_field"),
            Some(&Value::Number(42i64.into()))
        );
        let back = profile.to_yaml().unwrap();
        assert!(back.contains("future_field"));
    }

    #[test]
    fn mods_order_is_preserved_through_yaml_round_trip() {
        let mut profile = Profile::new("default", "skyrimse");
        profile.upsert_mod(ModReference { source: "nexus".into(), mod_id: "3".into(), version: "1".into(), file_ids: vec![] });
        profile.upsert_mod(ModReference { source: "nexus".into(), mod_id: "1".into(), version: "1".into(), file_ids: vec![] });
        let yaml = profile.to_yaml().unwrap();
        let back = Profile::from_yaml(&yaml).unwrap();
        let ids: Vec<_> = back.mods.iter().map(|m| m.mod_id.as_str()).collect();
        assert_eq!(ids, vec!["3", "1"]);
    }
}
