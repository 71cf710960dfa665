//! Command implementations

pub mod cache;
pub mod config;
pub mod plan;
pub mod publish;

pub use cache::execute as cache;
pub use config::execute as config;
pub use plan::execute as plan;
pub use publish::execute as publish;

use crate::error::{Outcome, PublishError};
use crate::trigger::Trigger;
use tracing::debug;

/// Work out what started this run.
///
/// An explicit `--ref` wins; otherwise the CI reference variables are used.
/// A `workflow_dispatch` event counts as a manual trigger.
pub(crate) fn resolve_trigger<F>(
    reference: Option<String>,
    manual: bool,
    pattern: &str,
    lookup: F,
) -> Outcome<Trigger>
where
    F: Fn(&str) -> Option<String>,
{
    let non_empty = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

    let raw = reference
        .or_else(|| non_empty("GITHUB_REF_NAME"))
        .or_else(|| non_empty("GITHUB_REF"))
        .ok_or(PublishError::MissingTrigger)?;

    let manual = manual
        || non_empty("GITHUB_EVENT_NAME").as_deref() == Some("workflow_dispatch");

    debug!("Resolved trigger reference {} (manual: {})", raw, manual);
    Trigger::from_ref(&raw, manual, pattern)
}

/// Trigger resolution against the real process environment
pub(crate) fn resolve_trigger_from_env(
    reference: Option<String>,
    manual: bool,
    pattern: &str,
) -> Outcome<Trigger> {
    resolve_trigger(reference, manual, pattern, |name| std::env::var(name).ok())
}
