//! Build engine abstraction
//!
//! The narrow interface multipush drives: emulation handlers, builder
//! instances, registry login, single-platform builds and pushes. The docker
//! CLI implementation lives in [`super::docker`]; tests script their own.

use crate::config::DriverKind;
use crate::credentials::Credential;
use crate::error::{AuthError, BuildError, BuilderError, EmulationError, Outcome, PushError};
use crate::platform::Platform;
use async_trait::async_trait;
use std::path::PathBuf;

/// What `buildx inspect` tells us about a builder instance
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuilderInfo {
    pub name: String,
    pub driver: Option<DriverKind>,
    pub platforms: Vec<Platform>,
    pub buildkit_version: Option<String>,
}

/// One single-platform build
#[derive(Debug, Clone)]
pub struct BuildInvocation {
    /// Builder instance to run on
    pub builder: String,
    pub platform: Platform,
    pub context: PathBuf,
    pub dockerfile: PathBuf,
    /// Platform-qualified local reference the image is loaded under
    pub local_ref: String,
    /// Committed caches to read from, most specific first
    pub cache_from: Vec<PathBuf>,
    /// Staging directory to export the cache to, if any
    pub cache_to: Option<PathBuf>,
}

/// A built image loaded into the engine's local store
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuiltImage {
    pub local_ref: String,
    /// Image config digest reported by the builder
    pub image_id: String,
}

/// Abstract build engine interface
#[async_trait]
pub trait BuildEngine: Send + Sync {
    /// Fail early when the engine's tooling is missing
    async fn ensure_available(&self) -> Outcome<()>;

    /// Platforms the host can currently execute (natively or emulated)
    async fn supported_platforms(&self, installer_image: &str)
        -> Result<Vec<Platform>, EmulationError>;

    /// Register emulation handlers for `platforms`
    async fn install_emulators(
        &self,
        installer_image: &str,
        platforms: &[Platform],
    ) -> Result<(), EmulationError>;

    /// Inspect a builder instance; `None` when it does not exist
    async fn inspect_builder(&self, name: &str) -> Result<Option<BuilderInfo>, BuilderError>;

    /// Create a builder instance
    async fn create_builder(&self, name: &str, driver: DriverKind) -> Result<(), BuilderError>;

    /// Log in to a registry for the rest of the run
    async fn login(&self, registry: &str, credential: &Credential) -> Result<(), AuthError>;

    /// Build one platform and load the result locally.
    ///
    /// Every output line is handed to `on_output` as it arrives.
    async fn build(
        &self,
        invocation: &BuildInvocation,
        on_output: &(dyn Fn(String) + Send + Sync),
    ) -> Result<BuiltImage, BuildError>;

    /// Tag `local_ref` as `target` and push it; returns the registry digest
    async fn push(&self, local_ref: &str, target: &str) -> Result<String, PushError>;

    /// Get the human-readable engine name for display
    fn engine_name(&self) -> &'static str;
}
