//! Error types for multipush
//!
//! Stage errors (provisioning, emulation, builder, auth) abort a run and are
//! wrapped by [`PublishError`]. Build and push errors are per-platform and end
//! up in that platform's report entry instead of propagating.

use crate::platform::Platform;
use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for multipush operations
pub type Outcome<T> = Result<T, PublishError>;

/// Host provisioning failures. Always fatal: a half-provisioned host is not
/// safe to build on.
#[derive(Error, Debug)]
pub enum ProvisionError {
    #[error("Failed to allocate {size_gb} GB swap at {path}: {reason}")]
    Swap {
        path: PathBuf,
        size_gb: u32,
        reason: String,
    },

    #[error("Failed to mount {size_gb} GB image store at {path}: {reason}")]
    Mount {
        path: PathBuf,
        size_gb: u32,
        reason: String,
    },

    #[error("Failed to restart {service}: {reason}")]
    DaemonRestart { service: String, reason: String },

    #[error("Failed to inspect host: {0}")]
    Inspect(String),
}

/// Emulation registration failures
#[derive(Error, Debug)]
pub enum EmulationError {
    #[error("Emulation installer failed: {0}")]
    Installer(String),

    #[error("Could not register emulation for: {}", format_platforms(.0))]
    Unsupported(Vec<Platform>),
}

/// Builder acquisition failures
#[derive(Error, Debug)]
pub enum BuilderError {
    #[error("Failed to create builder {name}: {reason}")]
    Create { name: String, reason: String },

    #[error("Builder {name} uses driver {actual}, expected {expected}")]
    DriverMismatch {
        name: String,
        expected: String,
        actual: String,
    },

    #[error("Builder {name} does not support: {}", format_platforms(.missing))]
    MissingPlatforms {
        name: String,
        missing: Vec<Platform>,
    },

    #[error("Failed to inspect builder {name}: {reason}")]
    Inspect { name: String, reason: String },
}

/// Why a registry login was refused
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthFailure {
    InvalidCredentials,
    Network,
    RateLimited,
}

impl std::fmt::Display for AuthFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidCredentials => write!(f, "invalid credentials"),
            Self::Network => write!(f, "network error"),
            Self::RateLimited => write!(f, "rate limited"),
        }
    }
}

/// Registry authentication failure
#[derive(Error, Debug)]
#[error("Registry login to {registry} failed ({reason}): {detail}")]
pub struct AuthError {
    pub registry: String,
    pub reason: AuthFailure,
    pub detail: String,
}

impl AuthError {
    /// Only rate limiting is worth retrying; bad credentials stay bad.
    pub fn is_retryable(&self) -> bool {
        self.reason == AuthFailure::RateLimited
    }
}

/// Per-platform build failure
#[derive(Error, Debug)]
pub enum BuildError {
    #[error("Build for {platform} failed (exit code {code}):\n{output}")]
    Failed {
        platform: Platform,
        code: i32,
        output: String,
    },

    #[error("Build for {platform} produced no image digest: {reason}")]
    MissingDigest { platform: Platform, reason: String },

    #[error("Could not launch build for {platform}: {source}")]
    Spawn {
        platform: Platform,
        #[source]
        source: std::io::Error,
    },
}

/// Per-platform push failure
#[derive(Error, Debug)]
pub enum PushError {
    #[error("Failed to tag {source_ref} as {target}: {reason}")]
    Tag {
        source_ref: String,
        target: String,
        reason: String,
    },

    #[error("Push of {target} failed: {reason}")]
    Rejected { target: String, reason: String },

    #[error("Push of {target} reported no digest")]
    MissingDigest { target: String },
}

/// Cache store failures
#[derive(Error, Debug)]
pub enum CacheError {
    #[error("Cache IO error: {context}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid cache key: {0}")]
    InvalidKey(String),
}

impl CacheError {
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }
}

/// All errors that can abort a multipush command
#[derive(Error, Debug)]
pub enum PublishError {
    // Stage errors
    #[error(transparent)]
    Provision(#[from] ProvisionError),

    #[error(transparent)]
    Emulation(#[from] EmulationError),

    #[error(transparent)]
    Builder(#[from] BuilderError),

    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error(transparent)]
    Cache(#[from] CacheError),

    // Trigger errors
    #[error("No trigger reference given. Pass --ref or run from a tag push")]
    MissingTrigger,

    #[error("Reference {reference} does not match tag pattern {pattern}")]
    TriggerMismatch { reference: String, pattern: String },

    #[error("Invalid image tag {tag}: {reason}")]
    InvalidTag { tag: String, reason: String },

    // Credential errors
    #[error("Registry credential {0} is not set")]
    CredentialMissing(String),

    // Configuration errors
    #[error("Invalid configuration at {path}: {reason}")]
    ConfigInvalid { path: PathBuf, reason: String },

    #[error("Failed to create config directory {path}: {source}")]
    ConfigDirCreate {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // Environment errors
    #[error("Required CLI not found: {name}. {hint}")]
    CliNotFound { name: String, hint: String },

    // IO errors
    #[error("IO error: {context}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    // Process errors
    #[error("Command failed: {command}")]
    CommandFailed {
        command: String,
        #[source]
        source: std::io::Error,
    },

    // Serialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    // General errors
    #[error("{0}")]
    User(String),
}

impl PublishError {
    /// Create an IO error with context
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    /// Create a command failed error
    pub fn command_failed(command: impl Into<String>, source: std::io::Error) -> Self {
        Self::CommandFailed {
            command: command.into(),
            source,
        }
    }

    /// Check if error is retryable
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Auth(e) => e.is_retryable(),
            _ => false,
        }
    }

    /// Get actionable hint for the error
    pub fn hint(&self) -> Option<&'static str> {
        match self {
            Self::MissingTrigger => Some("Run: multipush publish --ref v1.2.3"),
            Self::CredentialMissing(_) => {
                Some("Export the variables named in [registry] username_env / token_env")
            }
            Self::Auth(e) if e.reason == AuthFailure::InvalidCredentials => {
                Some("Check the registry username and access token")
            }
            Self::Auth(e) if e.reason == AuthFailure::RateLimited => {
                Some("Raise [registry] max_auth_attempts or retry later")
            }
            Self::Emulation(_) => Some("Run with a privileged docker daemon or drop the platform"),
            Self::Provision(_) => Some("Set [host] skip = true on machines you do not own"),
            Self::CliNotFound { .. } => Some("Install Docker with the buildx plugin"),
            _ => None,
        }
    }
}

fn format_platforms(platforms: &[Platform]) -> String {
    platforms
        .iter()
        .map(|p| p.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display() {
        let err = PublishError::MissingTrigger;
        assert!(err.to_string().contains("No trigger reference"));
    }

    #[test]
    fn error_hint() {
        let err = PublishError::MissingTrigger;
        assert_eq!(err.hint(), Some("Run: multipush publish --ref v1.2.3"));
    }

    #[test]
    fn only_rate_limited_auth_is_retryable() {
        let limited = PublishError::from(AuthError {
            registry: "ghcr.io".to_string(),
            reason: AuthFailure::RateLimited,
            detail: "toomanyrequests".to_string(),
        });
        let invalid = PublishError::from(AuthError {
            registry: "ghcr.io".to_string(),
            reason: AuthFailure::InvalidCredentials,
            detail: "unauthorized".to_string(),
        });

        assert!(limited.is_retryable());
        assert!(!invalid.is_retryable());
        assert!(!PublishError::MissingTrigger.is_retryable());
    }

    #[test]
    fn emulation_error_lists_platforms() {
        let err = EmulationError::Unsupported(vec![Platform::Armv7, Platform::Aarch64]);
        assert_eq!(
            err.to_string(),
            "Could not register emulation for: linux/arm/v7, linux/arm64"
        );
    }
}
