//! Platform-qualified cache keys

use crate::error::CacheError;
use crate::platform::Platform;
use serde::{Serialize, Serializer};
use std::fmt;

/// Identifies one platform's cache index inside a [`super::CacheStore`].
///
/// The scope is derived from the image repository so that several images can
/// share one store without reading each other's indexes. Blobs are still
/// shared across every key by digest.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey {
    scope: String,
    platform: Platform,
}

impl CacheKey {
    /// Build a key for `image` (a repository path) and `platform`
    pub fn new(image: &str, platform: Platform) -> Self {
        Self {
            scope: scope_for_image(image),
            platform,
        }
    }

    /// Parse a key back from its directory name (`<scope>.<platform>`)
    pub fn parse(s: &str) -> Result<Self, CacheError> {
        let (scope, platform) = s
            .rsplit_once('.')
            .ok_or_else(|| CacheError::InvalidKey(s.to_string()))?;

        let platform = Platform::all()
            .iter()
            .copied()
            .find(|p| p.slug() == platform)
            .ok_or_else(|| CacheError::InvalidKey(s.to_string()))?;

        if scope.is_empty() || !scope.chars().all(is_scope_char) {
            return Err(CacheError::InvalidKey(s.to_string()));
        }

        Ok(Self {
            scope: scope.to_string(),
            platform,
        })
    }

    pub fn scope(&self) -> &str {
        &self.scope
    }

    pub fn platform(&self) -> Platform {
        self.platform
    }

    /// The same image scope under another platform
    pub fn for_platform(&self, platform: Platform) -> Self {
        Self {
            scope: self.scope.clone(),
            platform,
        }
    }
}

impl Serialize for CacheKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.scope, self.platform.slug())
    }
}

fn is_scope_char(c: char) -> bool {
    c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' || c == '_'
}

/// Flatten a repository path into a directory-safe scope.
/// `docker.io/eqlabs/pathfinder` becomes `docker-io-eqlabs-pathfinder`.
fn scope_for_image(image: &str) -> String {
    let mut scope = String::with_capacity(image.len());
    for c in image.trim().chars() {
        let c = c.to_ascii_lowercase();
        if is_scope_char(c) {
            scope.push(c);
        } else if !scope.ends_with('-') {
            scope.push('-');
        }
    }

    let scope = scope.trim_matches('-').to_string();
    if scope.is_empty() {
        "default".to_string()
    } else {
        scope
    }
}
