use anyhow::{Result, Context};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::fs;
use tracing::{debug, info};

/// Main configuration structure
#[derive(Debug, Serialize, Deserialize, Clone, Default)]
#[serde(default)]
pub struct ServiceConfig {
    pub scraper: ScraperSettings,
    pub storage: StorageSettings,
}

/// Crawl engine settings
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct ScraperSettings {
    pub task_workers: usize,        // Tasks processed concurrently
    pub link_workers: usize,        // Concurrent link fetches per task
    pub page_timeout_secs: u64,     // Root page fetch timeout
    pub link_timeout_secs: u64,     // Per-link fetch timeout
    pub subscriber_buffer: usize,   // States a listener may lag behind before being dropped
    pub user_agent: String,
}

/// Task storage settings
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct StorageSettings {
    pub storage_type: String, // "memory"
}

impl Default for ScraperSettings {
    fn default() -> Self {
        Self {
            task_workers: 3,
            link_workers: 15,
            page_timeout_secs: 10,
            link_timeout_secs: 5,
            subscriber_buffer: 256,
            user_agent: format!("page-seeker/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            storage_type: "memory".to_string(),
        }
    }
}

impl ServiceConfig {
    /// Get the path to the config directory. Directories are created on save.
    fn config_dir() -> PathBuf {
        match directories::ProjectDirs::from("com", "page-seeker", "page-seeker") {
            Some(proj_dirs) => proj_dirs.config_dir().to_path_buf(),
            None => PathBuf::from("./config"),
        }
    }

    /// Load the default configuration
    pub fn load_default() -> Result<Self> {
        let config_dir = Self::config_dir();
        let config_path = config_dir.join("default.yaml");

        if config_path.exists() {
            Self::load_from_file(&config_path)
        } else {
            // Create and save the default configuration
            info!("Default configuration not found. Creating...");
            let config = Self::default();
            config.save_as_default()?;
            Ok(config)
        }
    }

    /// Load a configuration profile
    pub fn load_profile(profile: &str) -> Result<Self> {
        let config_dir = Self::config_dir();
        let profile_path = config_dir.join("profiles").join(format!("{}.yaml", profile));

        if profile_path.exists() {
            Self::load_from_file(&profile_path)
        } else {
            anyhow::bail!("Profile '{}' not found", profile)
        }
    }

    /// Load configuration from a file
    fn load_from_file(path: &Path) -> Result<Self> {
        debug!("Loading configuration from: {}", path.display());
        let contents = fs::read_to_string(path)
            .context(format!("Failed to read configuration file: {}", path.display()))?;

        let config: Self = serde_yaml::from_str(&contents)
            .context(format!("Failed to parse configuration file: {}", path.display()))?;

        Ok(config)
    }

    /// Save the configuration as the default
    pub fn save_as_default(&self) -> Result<()> {
        let config_dir = Self::config_dir();
        let config_path = config_dir.join("default.yaml");

        self.save_to_file(&config_path)
    }

    /// Save the configuration as a profile
    pub fn save_as_profile(&self, profile: &str) -> Result<()> {
        let profiles_dir = Self::config_dir().join("profiles");
        let profile_path = profiles_dir.join(format!("{}.yaml", profile));
        self.save_to_file(&profile_path)
    }

    /// Save the configuration to a file
    fn save_to_file(&self, path: &Path) -> Result<()> {
        debug!("Saving configuration to: {}", path.display());

        // Create parent directory if it doesn't exist
        if let Some(parent) = path.parent() {
            if !parent.exists() {
                fs::create_dir_all(parent)
                    .context(format!("Failed to create directory: {}", parent.display()))?;
            }
        }

        let contents = serde_yaml::to_string(self)
            .context("Failed to serialize configuration")?;

        fs::write(path, contents)
            .context(format!("Failed to write configuration file: {}", path.display()))?;

        Ok(())
    }

    /// List all available profiles
    pub fn list_profiles() -> Result<Vec<String>> {
        let profiles_dir = Self::config_dir().join("profiles");

        if !profiles_dir.exists() {
            return Ok(vec![]);
        }

        let mut profiles = Vec::new();

        for entry in fs::read_dir(profiles_dir)? {
            let path = entry?.path();

            if path.is_file() && path.extension().map_or(false, |ext| ext == "yaml") {
                if let Some(name) = path.file_stem().and_then(|stem| stem.to_str()) {
                    profiles.push(name.to_string());
                }
            }
        }

        profiles.sort();
        Ok(profiles)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scratch_file(name: &str) -> PathBuf {
        std::env::temp_dir()
            .join(format!("page-seeker-test-{}", std::process::id()))
            .join(name)
    }

    #[test]
    fn test_defaults() {
        let config = ServiceConfig::default();
        assert_eq!(config.scraper.task_workers, 3);
        assert_eq!(config.scraper.link_workers, 15);
        assert_eq!(config.scraper.page_timeout_secs, 10);
        assert_eq!(config.scraper.link_timeout_secs, 5);
        assert_eq!(config.storage.storage_type, "memory");
    }

    #[test]
    fn test_partial_yaml_uses_defaults() {
        let config: ServiceConfig = serde_yaml::from_str("scraper:\n  link_workers: 4\n").unwrap();
        assert_eq!(config.scraper.link_workers, 4);
        assert_eq!(config.scraper.task_workers, 3);
        assert_eq!(config.storage.storage_type, "memory");
    }

    #[test]
    fn test_save_and_load_file() {
        let path = scratch_file("profile.yaml");
        let mut config = ServiceConfig::default();
        config.scraper.task_workers = 8;

        config.save_to_file(&path).unwrap();
        let loaded = ServiceConfig::load_from_file(&path).unwrap();
        assert_eq!(loaded.scraper.task_workers, 8);

        let _ = fs::remove_dir_all(path.parent().unwrap());
    }

    #[test]
    fn test_config_dir_has_no_side_effects() {
        let dir = ServiceConfig::config_dir();
        let existed = dir.join("profiles").exists();

        ServiceConfig::config_dir();
        assert_eq!(dir.join("profiles").exists(), existed);
    }

    #[test]
    fn test_load_missing_file_fails() {
        assert!(ServiceConfig::load_from_file(&scratch_file("missing.yaml")).is_err());
    }
}
