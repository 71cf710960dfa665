//! Run report
//!
//! One entry per requested platform plus the aggregate. Because tags are
//! shared across platforms, the report also names the platform whose image
//! the floating and immutable tags point at once the run is over; consumers
//! should check that before trusting `latest`.

use crate::error::{Outcome, PublishError};
use crate::orchestrator::PublishResult;
use crate::platform::Platform;
use crate::trigger::{TagSet, Trigger};
use crate::ui::{self, UiContext};
use chrono::{DateTime, Utc};
use console::style;
use serde::Serialize;
use std::path::Path;
use std::process::ExitCode;

/// Everything a finished run has to say
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub trigger: Trigger,
    pub image: String,
    pub tags: TagSet,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    /// Platform the floating tag ended at, if any platform pushed it
    pub floating_owner: Option<Platform>,
    /// Platform the immutable tag ended at, if any platform pushed it
    pub immutable_owner: Option<Platform>,
    pub succeeded: bool,
    pub results: Vec<PublishResult>,
}

impl RunReport {
    pub fn new(
        trigger: Trigger,
        image: impl Into<String>,
        tags: TagSet,
        started_at: DateTime<Utc>,
        results: Vec<PublishResult>,
    ) -> Self {
        let image = image.into();
        let floating_owner = last_pusher(&results, &image, tags.floating());
        let immutable_owner = last_pusher(&results, &image, tags.immutable());
        let succeeded = !results.is_empty() && results.iter().all(|r| r.success);

        Self {
            trigger,
            image,
            tags,
            started_at,
            finished_at: Utc::now(),
            floating_owner,
            immutable_owner,
            succeeded,
            results,
        }
    }

    /// True only when every platform succeeded
    pub fn succeeded(&self) -> bool {
        self.succeeded
    }

    pub fn failed_platforms(&self) -> Vec<Platform> {
        self.results
            .iter()
            .filter(|r| !r.success)
            .map(|r| r.platform)
            .collect()
    }

    /// Process exit code: the OR of every platform's failure
    pub fn exit_code(&self) -> ExitCode {
        if self.succeeded() {
            ExitCode::SUCCESS
        } else {
            ExitCode::FAILURE
        }
    }

    /// Platform whose digest a pushed tag ends at after this run
    pub fn tag_owner(&self, tag: &str) -> Option<Platform> {
        last_pusher(&self.results, &self.image, tag)
    }

    /// `(label, state)` lines describing where the tags ended up. The two
    /// tags share a line only when they point at the same platform.
    pub fn tag_summary(&self) -> Vec<(String, String)> {
        let state = |owner: Option<Platform>, verb: &str| match owner {
            Some(platform) => format!("{} at {}", verb, platform.docker_platform()),
            None => "not moved".to_string(),
        };

        let floating = self.tags.floating();
        let immutable = self.tags.immutable();
        if self.floating_owner.is_some() && self.floating_owner == self.immutable_owner {
            return vec![(
                format!("{} and {}", floating, immutable),
                state(self.floating_owner, "point"),
            )];
        }
        vec![
            (floating.to_string(), state(self.floating_owner, "points")),
            (immutable.to_string(), state(self.immutable_owner, "points")),
        ]
    }

    pub fn duration_secs(&self) -> i64 {
        (self.finished_at - self.started_at).num_seconds()
    }

    /// Write the report as pretty JSON
    pub async fn write_json(&self, path: &Path) -> Outcome<()> {
        let content = serde_json::to_string_pretty(self)?;
        tokio::fs::write(path, content)
            .await
            .map_err(|e| PublishError::io(format!("writing report to {}", path.display()), e))
    }

    /// Per-platform table plus the aggregate
    pub fn print(&self, ctx: &UiContext) {
        println!();
        println!(
            "{:<14} {:<8} {:<6} {:<20} {}",
            style("PLATFORM").bold(),
            style("STATUS").bold(),
            style("CACHE").bold(),
            style("DIGEST").bold(),
            style("TAGS / ERROR").bold()
        );

        for result in &self.results {
            let status = if result.success {
                style("ok").green()
            } else {
                style("failed").red()
            };
            let digest = result
                .image_digest
                .as_deref()
                .map(short_digest)
                .unwrap_or("-");
            let detail = match &result.error_detail {
                Some(e) => e.lines().next().unwrap_or("").to_string(),
                None => result
                    .pushed_tags
                    .iter()
                    .map(|t| t.rsplit(':').next().unwrap_or(t))
                    .collect::<Vec<_>>()
                    .join(", "),
            };

            println!(
                "{:<14} {:<8} {:<6} {:<20} {}",
                result.platform.docker_platform(),
                status,
                if result.cache_hit { "hit" } else { "miss" },
                digest,
                detail
            );
        }
        println!();

        for (label, state) in self.tag_summary() {
            ui::key_value(ctx, &label, &state);
        }
        ui::key_value(ctx, "Duration", &format!("{}s", self.duration_secs()));

        if self.succeeded() {
            ui::outro_success(
                ctx,
                &format!("Published {} platforms of {}", self.results.len(), self.image),
            );
        } else {
            let failed: Vec<String> = self
                .failed_platforms()
                .iter()
                .map(|p| p.to_string())
                .collect();
            ui::outro_error(ctx, &format!("Failed platforms: {}", failed.join(", ")));
        }
    }
}

/// Last platform in run order that pushed `image:tag`
fn last_pusher(results: &[PublishResult], image: &str, tag: &str) -> Option<Platform> {
    let reference = format!("{}:{}", image, tag);
    results
        .iter()
        .rev()
        .find(|r| r.pushed_tags.contains(&reference))
        .map(|r| r.platform)
}

/// `sha256:0123456789ab` style prefix
fn short_digest(digest: &str) -> &str {
    let end = digest
        .char_indices()
        .nth("sha256:".len() + 12)
        .map(|(i, _)| i)
        .unwrap_or(digest.len());
    &digest[..end]
}
