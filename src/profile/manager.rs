//! Profile CRUD over the config directory's `profiles/<game>/<name>.yaml`
//! documents.

use super::{ModReference, Profile};
use crate::config::Paths;
use crate::error::{Error, Result};
use std::sync::Arc;

pub struct ProfileManager {
    paths: Arc<Paths>,
}

impl ProfileManager {
    pub fn new(paths: Arc<Paths>) -> Self {
        Self { paths }
    }

    pub async fn list(&self, game_id: &str) -> Result<Vec<Profile>> {
        let dir = self.paths.game_profiles_dir(game_id);
        if !dir.exists() {
            return Ok(Vec::new());
        }
        let mut profiles = Vec::new();
        let mut entries = tokio::fs::read_dir(&dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("yaml") {
                continue;
            }
            let content = tokio::fs::read_to_string(&path).await?;
            profiles.push(Profile::from_yaml(&content)?);
        }
        profiles.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(profiles)
    }

    pub async fn get(&self, game_id: &str, name: &str) -> Result<Profile> {
        let path = self.paths.profile_file(game_id, name);
        if !path.exists() {
            return Err(Error::not_found(format!("profile '{name}' for game '{game_id}'")));
        }
        let content = tokio::fs::read_to_string(&path).await?;
        Profile::from_yaml(&content)
    }

    pub async fn create(&self, game_id: &str, name: &str) -> Result<Profile> {
        let path = self.paths.profile_file(game_id, name);
        if path.exists() {
            return Err(Error::conflict(format!("profile '{name}' already exists")));
        }
        let profile = Profile::new(name, game_id);
        self.save(&profile).await?;
        Ok(profile)
    }

    pub async fn delete(&self, game_id: &str, name: &str) -> Result<()> {
        let path = self.paths.profile_file(game_id, name);
        if path.exists() {
            tokio::fs::remove_file(&path).await?;
        }
        let marker = self.paths.default_profile_marker(game_id);
        if marker.exists() {
            if let Ok(default_name) = tokio::fs::read_to_string(&marker).await {
                if default_name.trim() == name {
                    tokio::fs::remove_file(&marker).await?;
                }
            }
        }
        Ok(())
    }

    pub async fn save(&self, profile: &Profile) -> Result<()> {
        let dir = self.paths.game_profiles_dir(&profile.game_id);
        tokio::fs::create_dir_all(&dir).await?;
        let path = self.paths.profile_file(&profile.game_id, &profile.name);
        tokio::fs::write(&path, profile.to_yaml()?).await?;
        Ok(())
    }

    pub async fn upsert_mod(&self, game_id: &str, name: &str, reference: ModReference) -> Result<Profile> {
        let mut profile = self.get(game_id, name).await?;
        profile.upsert_mod(reference);
        self.save(&profile).await?;
        Ok(profile)
    }

    pub async fn remove_mod(&self, game_id: &str, name: &str, source: &str, mod_id: &str) -> Result<Profile> {
        let mut profile = self.get(game_id, name).await?;
        profile.remove_mod(source, mod_id);
        self.save(&profile).await?;
        Ok(profile)
    }

    pub async fn set_default(&self, game_id: &str, name: &str) -> Result<()> {
        if self.get(game_id, name).await.is_err() {
            return Err(Error::not_found(format!("profile '{name}' for game '{game_id}'")));
        }
        let dir = self.paths.game_profiles_dir(game_id);
        tokio::fs::create_dir_all(&dir).await?;
        tokio::fs::write(self.paths.default_profile_marker(game_id), name).await?;
        Ok(())
    }

    pub async fn default_profile(&self, game_id: &str) -> Result<Option<String>> {
        let marker = self.paths.default_profile_marker(game_id);
        if !marker.exists() {
            return Ok(None);
        }
        Ok(Some(tokio::fs::read_to_string(&marker).await?.trim().to_string()))
    }

    pub fn export(&self, profile: &Profile) -> Result<String> {
        profile.to_yaml()
    }

    pub async fn import(&self, game_id: &str, content: &str) -> Result<Profile> {
        let mut profile = Profile::from_yaml(content)?;
        profile.game_id = game_id.to_string();
        let path = self.paths.profile_file(game_id, &profile.name);
        if path.exists() {
            let mut suffix = 2;
            while self.paths.profile_file(game_id, &format!("{}-{}", profile.name, suffix)).exists() {
                suffix += 1;
            }
            profile.name = format!("{}-{}", profile.name, suffix);
        }
        self.save(&profile).await?;
        Ok(profile)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager(base: std::path::PathBuf) -> ProfileManager {
        ProfileManager::new(Arc::new(Paths::for_base(base)))
    }

    #[tokio::test]
    async fn create_then_get_round_trips() {
        let tmp = tempfile::tempdir().unwrap();
        let manager = manager(tmp.path().to_path_buf());

        manager.create("skyrimse", "default").await.unwrap();
        let profile = manager.get("skyrimse", "default").await.unwrap();
        assert_eq!(profile.name, "default");
        manager.delete("skyrimse", "default").await.unwrap();
    }

    #[tokio::test]
    async fn set_default_requires_existing_profile() {
        let tmp = tempfile::tempdir().unwrap();
        let manager = manager(tmp.path().to_path_buf());

        assert!(manager.set_default("skyrimse", "missing").await.is_err());
        manager.create("skyrimse", "default").await.unwrap();
        manager.set_default("skyrimse", "default").await.unwrap();
        assert_eq!(manager.default_profile("skyrimse").await.unwrap(), Some("default".to_string()));
        manager.delete("skyrimse", "default").await.unwrap();
    }
}
