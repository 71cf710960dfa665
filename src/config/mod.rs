//! Configuration management for multipush

pub mod schema;

pub use schema::{Config, DriverKind};

use crate::error::{Outcome, PublishError};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, info};

/// File name looked up in the working directory and its ancestors
pub const LOCAL_CONFIG_NAME: &str = "multipush.toml";

/// Configuration manager
pub struct ConfigManager {
    config_path: PathBuf,
}

impl ConfigManager {
    /// Create a new config manager with default path
    pub fn new() -> Self {
        Self {
            config_path: Self::default_config_path(),
        }
    }

    /// Create a config manager with a custom path
    pub fn with_path(path: PathBuf) -> Self {
        Self { config_path: path }
    }

    /// Get the default config file path
    pub fn default_config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("multipush")
            .join("config.toml")
    }

    /// Walk up from `start` looking for a project-local `multipush.toml`
    pub fn find_local_config(start: &Path) -> Option<PathBuf> {
        start
            .ancestors()
            .map(|dir| dir.join(LOCAL_CONFIG_NAME))
            .find(|candidate| candidate.is_file())
    }

    /// Load configuration, falling back to defaults when the file is missing
    pub async fn load(&self) -> Outcome<Config> {
        if !self.config_path.exists() {
            debug!("Config file not found, using defaults");
            return Ok(Config::default());
        }

        self.load_from_file(&self.config_path).await
    }

    /// Load and validate configuration from a specific file
    pub async fn load_from_file(&self, path: &Path) -> Outcome<Config> {
        let content = fs::read_to_string(path)
            .await
            .map_err(|e| PublishError::io(format!("reading config from {}", path.display()), e))?;

        let config: Config = toml::from_str(&content).map_err(|e| PublishError::ConfigInvalid {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        validate(&config).map_err(|reason| PublishError::ConfigInvalid {
            path: path.to_path_buf(),
            reason,
        })?;

        debug!("Loaded config from {}", path.display());
        Ok(config)
    }

    /// Save configuration to file
    pub async fn save(&self, config: &Config) -> Outcome<()> {
        self.ensure_config_dir().await?;

        let content = toml::to_string_pretty(config)?;
        fs::write(&self.config_path, content).await.map_err(|e| {
            PublishError::io(
                format!("writing config to {}", self.config_path.display()),
                e,
            )
        })?;

        info!("Configuration saved to {}", self.config_path.display());
        Ok(())
    }

    /// Ensure the config directory exists
    async fn ensure_config_dir(&self) -> Outcome<()> {
        if let Some(parent) = self.config_path.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| PublishError::ConfigDirCreate {
                    path: parent.to_path_buf(),
                    source: e,
                })?;
        }
        Ok(())
    }

    /// Get the config file path
    pub fn path(&self) -> &Path {
        &self.config_path
    }
}

impl Default for ConfigManager {
    fn default() -> Self {
        Self::new()
    }
}

/// Reject configurations no run could succeed with
pub fn validate(config: &Config) -> Result<(), String> {
    if config.build.image.trim().is_empty() {
        return Err("build.image must not be empty".to_string());
    }

    if config.build.image.contains('@') || last_segment_has_tag(&config.build.image) {
        return Err("build.image must not carry a tag or digest".to_string());
    }

    if config.build.platforms.is_empty() {
        return Err("build.platforms must list at least one platform".to_string());
    }

    let mut seen = HashSet::new();
    for platform in &config.build.platforms {
        if !seen.insert(platform) {
            return Err(format!("build.platforms lists {} twice", platform));
        }
    }

    crate::trigger::validate_tag(&config.build.floating_tag)
        .map_err(|e| format!("build.floating_tag: {}", e))?;

    if !config.host.skip && (config.host.min_swap_gb == 0 || config.host.image_store_size_gb == 0)
    {
        return Err("host sizes must be greater than zero".to_string());
    }

    if config.registry.max_auth_attempts == 0 {
        return Err("registry.max_auth_attempts must be at least 1".to_string());
    }

    Ok(())
}

fn last_segment_has_tag(image: &str) -> bool {
    image
        .rsplit('/')
        .next()
        .map(|segment| segment.contains(':'))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::Platform;
    use tempfile::TempDir;

    #[tokio::test]
    async fn load_default_when_missing() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("nonexistent.toml");
        let manager = ConfigManager::with_path(path);

        let config = manager.load().await.unwrap();
        assert_eq!(config.builder.name, "multipush");
    }

    #[tokio::test]
    async fn save_and_load_roundtrip() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("config.toml");
        let manager = ConfigManager::with_path(path);

        let mut config = Config::default();
        config.build.image = "ghcr.io/acme/app".to_string();

        manager.save(&config).await.unwrap();
        let loaded = manager.load().await.unwrap();

        assert_eq!(loaded.build.image, "ghcr.io/acme/app");
    }

    #[tokio::test]
    async fn invalid_file_reports_path() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("config.toml");
        std::fs::write(&path, "[build]\nplatforms = []\n").unwrap();

        let err = ConfigManager::with_path(path.clone())
            .load()
            .await
            .unwrap_err();
        match err {
            PublishError::ConfigInvalid { path: p, reason } => {
                assert_eq!(p, path);
                assert!(reason.contains("at least one platform"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn find_local_config_walks_up() {
        let temp = TempDir::new().unwrap();
        let nested = temp.path().join("a").join("b");
        std::fs::create_dir_all(&nested).unwrap();
        std::fs::write(temp.path().join(LOCAL_CONFIG_NAME), "").unwrap();

        let found = ConfigManager::find_local_config(&nested).unwrap();
        assert_eq!(found, temp.path().join(LOCAL_CONFIG_NAME));
    }

    #[test]
    fn validate_rejects_duplicate_platforms() {
        let mut config = Config::default();
        config.build.platforms = vec![Platform::Amd64, Platform::Amd64];
        assert!(validate(&config).unwrap_err().contains("twice"));
    }

    #[test]
    fn validate_rejects_tagged_image() {
        let mut config = Config::default();
        config.build.image = "ghcr.io/acme/app:edge".to_string();
        assert!(validate(&config).is_err());

        config.build.image = "localhost:5000/acme/app".to_string();
        assert!(validate(&config).is_ok());
    }

    #[test]
    fn validate_allows_zero_sizes_when_skipped() {
        let mut config = Config::default();
        config.host.min_swap_gb = 0;
        assert!(validate(&config).is_err());

        config.host.skip = true;
        assert!(validate(&config).is_ok());
    }
}
