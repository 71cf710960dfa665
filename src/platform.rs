//! Target platforms
//!
//! The three architectures multipush knows how to build, with the names each
//! external tool expects (buildx platform strings, binfmt emulator names,
//! cache key slugs).

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A target CPU architecture / OS pair
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    /// linux/arm/v7
    Armv7,
    /// linux/arm64
    Aarch64,
    /// linux/amd64
    Amd64,
}

impl Platform {
    /// All platforms in canonical publish order
    pub fn all() -> &'static [Self] {
        &[Self::Armv7, Self::Aarch64, Self::Amd64]
    }

    /// The `--platform` value understood by buildx
    pub fn docker_platform(&self) -> &'static str {
        match self {
            Self::Armv7 => "linux/arm/v7",
            Self::Aarch64 => "linux/arm64",
            Self::Amd64 => "linux/amd64",
        }
    }

    /// Emulator name accepted by `tonistiigi/binfmt --install`
    pub fn emulator(&self) -> &'static str {
        match self {
            Self::Armv7 => "arm",
            Self::Aarch64 => "arm64",
            Self::Amd64 => "amd64",
        }
    }

    /// Filesystem and tag safe identifier
    pub fn slug(&self) -> &'static str {
        match self {
            Self::Armv7 => "armv7",
            Self::Aarch64 => "aarch64",
            Self::Amd64 => "amd64",
        }
    }

    /// Map a `uname -m` style machine name to a platform
    pub fn from_machine(machine: &str) -> Option<Self> {
        match machine {
            "x86_64" | "amd64" => Some(Self::Amd64),
            "aarch64" | "arm64" => Some(Self::Aarch64),
            "armv7l" | "armv7" | "armhf" | "arm" => Some(Self::Armv7),
            _ => None,
        }
    }

    /// The platform of the machine this binary was compiled for
    pub fn native() -> Option<Self> {
        Self::from_machine(std::env::consts::ARCH)
    }

    /// Parse a buildx platform string such as `linux/arm/v7`
    pub fn from_docker_platform(s: &str) -> Option<Self> {
        match s.trim() {
            "linux/arm/v7" => Some(Self::Armv7),
            "linux/arm64" | "linux/arm64/v8" => Some(Self::Aarch64),
            "linux/amd64" => Some(Self::Amd64),
            _ => None,
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.docker_platform())
    }
}

impl FromStr for Platform {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_docker_platform(s)
            .or_else(|| Self::from_machine(s))
            .ok_or_else(|| format!("unknown platform: {}", s))
    }
}
