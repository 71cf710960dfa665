//! Run triggers and the tag set derived from them
//!
//! A run is started either by a pushed reference matching the configured tag
//! pattern or by a manual invocation. Either way the reference name becomes
//! the immutable image tag; the floating alias comes from configuration.

use crate::error::{Outcome, PublishError};
use serde::Serialize;
use std::fmt;

/// Maximum length of an OCI tag
const MAX_TAG_LEN: usize = 128;

/// What started the run
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "reference", rename_all = "lowercase")]
pub enum Trigger {
    /// A pushed version-control reference matching the tag pattern
    Tag(String),
    /// An explicit manual invocation
    Manual(String),
}

impl Trigger {
    /// Build a trigger from a raw reference, stripping `refs/tags/` and
    /// `refs/heads/` prefixes and validating the result as an image tag.
    ///
    /// Tag triggers must match `pattern`; manual triggers only need to be a
    /// valid tag.
    pub fn from_ref(raw: &str, manual: bool, pattern: &str) -> Outcome<Self> {
        let reference = raw
            .trim()
            .strip_prefix("refs/tags/")
            .or_else(|| raw.trim().strip_prefix("refs/heads/"))
            .unwrap_or(raw.trim());

        if reference.is_empty() {
            return Err(PublishError::MissingTrigger);
        }

        validate_tag(reference)?;

        if manual {
            return Ok(Self::Manual(reference.to_string()));
        }

        if !glob_match(pattern, reference) {
            return Err(PublishError::TriggerMismatch {
                reference: reference.to_string(),
                pattern: pattern.to_string(),
            });
        }

        Ok(Self::Tag(reference.to_string()))
    }

    /// The reference name threaded through as the immutable tag
    pub fn reference(&self) -> &str {
        match self {
            Self::Tag(r) | Self::Manual(r) => r,
        }
    }
}

impl fmt::Display for Trigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Tag(r) => write!(f, "tag {}", r),
            Self::Manual(r) => write!(f, "manual ({})", r),
        }
    }
}

/// The tags applied to every image of a run: one floating alias and one
/// immutable tag equal to the trigger reference.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TagSet {
    floating: String,
    immutable: String,
}

impl TagSet {
    pub fn new(floating: impl Into<String>, immutable: impl Into<String>) -> Outcome<Self> {
        let floating = floating.into();
        let immutable = immutable.into();

        validate_tag(&floating)?;
        validate_tag(&immutable)?;

        if floating == immutable {
            return Err(PublishError::InvalidTag {
                tag: immutable,
                reason: "immutable tag must differ from the floating alias".to_string(),
            });
        }

        Ok(Self {
            floating,
            immutable,
        })
    }

    /// The tag set for a trigger
    pub fn for_trigger(floating: &str, trigger: &Trigger) -> Outcome<Self> {
        Self::new(floating, trigger.reference())
    }

    /// The floating alias (normally `latest`)
    pub fn floating(&self) -> &str {
        &self.floating
    }

    /// The immutable version tag
    pub fn immutable(&self) -> &str {
        &self.immutable
    }

    /// Both tags, immutable first
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        [self.immutable.as_str(), self.floating.as_str()].into_iter()
    }
}

/// Check a string against the OCI tag grammar `[A-Za-z0-9_][A-Za-z0-9_.-]{0,127}`
pub fn validate_tag(tag: &str) -> Outcome<()> {
    let invalid = |reason: &str| PublishError::InvalidTag {
        tag: tag.to_string(),
        reason: reason.to_string(),
    };

    let mut chars = tag.chars();
    match chars.next() {
        None => return Err(invalid("tag is empty")),
        Some(c) if !(c.is_ascii_alphanumeric() || c == '_') => {
            return Err(invalid("must start with a letter, digit or underscore"))
        }
        Some(_) => {}
    }

    if tag.len() > MAX_TAG_LEN {
        return Err(invalid("longer than 128 characters"));
    }

    if !chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-')) {
        return Err(invalid("only letters, digits, '_', '.' and '-' are allowed"));
    }

    Ok(())
}

/// Minimal glob matching where `*` matches any run of characters
pub fn glob_match(pattern: &str, text: &str) -> bool {
    let p: Vec<char> = pattern.chars().collect();
    let t: Vec<char> = text.chars().collect();

    let (mut pi, mut ti) = (0, 0);
    let mut star: Option<usize> = None;
    let mut mark = 0;

    while ti < t.len() {
        if pi < p.len() && p[pi] == '*' {
            star = Some(pi);
            mark = ti;
            pi += 1;
        } else if pi < p.len() && p[pi] == t[ti] {
            pi += 1;
            ti += 1;
        } else if let Some(s) = star {
            pi = s + 1;
            mark += 1;
            ti = mark;
        } else {
            return false;
        }
    }

    p[pi..].iter().all(|&c| c == '*')
}
