//! Configuration schema for multipush
//!
//! Every run parameter lives here: platforms, tags, host sizing, builder,
//! registry and cache location. The record is loaded once and handed to each
//! stage; nothing downstream reads the process environment.

use crate::platform::Platform;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Root configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// General settings
    pub general: GeneralConfig,

    /// What to build and how to tag it
    pub build: BuildConfig,

    /// Host provisioning
    pub host: HostConfig,

    /// Cross-architecture emulation
    pub emulation: EmulationConfig,

    /// Build engine instance
    pub builder: BuilderConfig,

    /// Target registry
    pub registry: RegistryConfig,

    /// Build cache
    pub cache: CacheConfig,
}

/// General application settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Log format: "text" or "json"
    pub log_format: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_format: "text".to_string(),
        }
    }
}

/// Image build settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BuildConfig {
    /// Repository path without tag (e.g. "docker.io/eqlabs/pathfinder")
    pub image: String,

    /// Build context directory
    pub context: PathBuf,

    /// Dockerfile path
    pub dockerfile: PathBuf,

    /// Platforms in publish order
    pub platforms: Vec<Platform>,

    /// Floating alias moved on every successful publish
    pub floating_tag: String,

    /// Pattern a pushed reference must match to trigger a run
    pub tag_pattern: String,
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            image: "docker.io/eqlabs/pathfinder".to_string(),
            context: PathBuf::from("."),
            dockerfile: PathBuf::from("Dockerfile"),
            platforms: Platform::all().to_vec(),
            floating_tag: "latest".to_string(),
            tag_pattern: "v*".to_string(),
        }
    }
}

/// Host provisioning settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HostConfig {
    /// Skip provisioning entirely (developer machines)
    pub skip: bool,

    /// Minimum swap in GB
    pub min_swap_gb: u32,

    /// Size of the tmpfs image store in GB
    pub image_store_size_gb: u32,

    /// Swap file created when more swap is needed
    pub swap_file: PathBuf,

    /// Where the build engine keeps its images
    pub image_store_path: PathBuf,

    /// Service restarted after remounting the image store
    pub daemon_service: String,

    /// Prefix host commands with sudo when not running as root
    pub use_sudo: bool,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            skip: false,
            min_swap_gb: 10,
            image_store_size_gb: 10,
            swap_file: PathBuf::from("/swapfile"),
            image_store_path: PathBuf::from("/var/lib/docker"),
            daemon_service: "docker".to_string(),
            use_sudo: true,
        }
    }
}

/// Emulation settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmulationConfig {
    /// Image that registers binfmt handlers
    pub installer_image: String,
}

impl Default for EmulationConfig {
    fn default() -> Self {
        Self {
            installer_image: "tonistiigi/binfmt:latest".to_string(),
        }
    }
}

/// Build engine driver
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DriverKind {
    DockerContainer,
    Docker,
    Kubernetes,
    Remote,
}

impl DriverKind {
    /// Name used by `docker buildx create --driver`
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::DockerContainer => "docker-container",
            Self::Docker => "docker",
            Self::Kubernetes => "kubernetes",
            Self::Remote => "remote",
        }
    }

    /// Parse the `Driver:` field of `docker buildx inspect`
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim() {
            "docker-container" => Some(Self::DockerContainer),
            "docker" => Some(Self::Docker),
            "kubernetes" => Some(Self::Kubernetes),
            "remote" => Some(Self::Remote),
            _ => None,
        }
    }
}

impl std::fmt::Display for DriverKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Builder instance settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BuilderConfig {
    /// Builder instance name
    pub name: String,

    /// Driver the instance must use
    pub driver: DriverKind,
}

impl Default for BuilderConfig {
    fn default() -> Self {
        Self {
            name: "multipush".to_string(),
            driver: DriverKind::DockerContainer,
        }
    }
}

/// Registry settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    /// Registry host to log in to
    pub host: String,

    /// Environment variable holding the registry username
    pub username_env: String,

    /// Environment variable holding the access token
    pub token_env: String,

    /// Login attempts when the registry rate limits us
    pub max_auth_attempts: u32,

    /// First retry delay in milliseconds, doubled per attempt
    pub auth_backoff_ms: u64,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            host: "docker.io".to_string(),
            username_env: "DOCKERHUB_USERNAME".to_string(),
            token_env: "DOCKERHUB_TOKEN".to_string(),
            max_auth_attempts: 4,
            auth_backoff_ms: 2_000,
        }
    }
}

/// Cache configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Cache store root
    pub dir: PathBuf,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            dir: dirs::cache_dir()
                .unwrap_or_else(|| PathBuf::from("/tmp"))
                .join("multipush")
                .join("buildx"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_serializes() {
        let config = Config::default();
        let toml = toml::to_string_pretty(&config).unwrap();
        assert!(toml.contains("[build]"));
        assert!(toml.contains("[host]"));
        assert!(toml.contains("[registry]"));
    }

    #[test]
    fn config_deserializes_empty() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.build.floating_tag, "latest");
        assert_eq!(config.host.min_swap_gb, 10);
        assert_eq!(config.host.image_store_size_gb, 10);
        assert_eq!(
            config.build.platforms,
            vec![Platform::Armv7, Platform::Aarch64, Platform::Amd64]
        );
    }

    #[test]
    fn config_deserializes_partial() {
        let toml = r#"
            [build]
            image = "ghcr.io/acme/app"
            platforms = ["amd64", "aarch64"]

            [builder]
            driver = "kubernetes"
        "#;
        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.build.image, "ghcr.io/acme/app");
        assert_eq!(
            config.build.platforms,
            vec![Platform::Amd64, Platform::Aarch64]
        );
        assert_eq!(config.builder.driver, DriverKind::Kubernetes);
        assert_eq!(config.build.tag_pattern, "v*"); // default preserved
    }

    #[test]
    fn driver_kind_round_trips_buildx_names() {
        for driver in [
            DriverKind::DockerContainer,
            DriverKind::Docker,
            DriverKind::Kubernetes,
            DriverKind::Remote,
        ] {
            assert_eq!(DriverKind::parse(driver.as_str()), Some(driver));
        }
        assert_eq!(DriverKind::parse("podman"), None);
    }
}
