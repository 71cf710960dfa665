//! Multi-architecture build orchestration
//!
//! Platforms are built one after another in configured order, each as its
//! own single-platform build on the shared builder. Every build reads its
//! platform's cache plus whatever the other platforms have committed so
//! far, and commits whatever it exported afterwards, whether or not it
//! succeeded.
//!
//! Tags carry no platform, so the platforms of a run overwrite each other in
//! the registry. The immutable tag is pushed as each platform finishes; the
//! floating tag is held back until every platform has been attempted and is
//! then pushed for the successful ones in order. It moves once per run and
//! ends at the last successful platform, which the run report names.

use crate::cache::{CacheKey, CacheStore};
use crate::config::schema::BuildConfig;
use crate::engine::{BuildEngine, BuildInvocation};
use crate::platform::Platform;
use crate::stages::{AuthSession, BuilderHandle};
use crate::trigger::TagSet;
use crate::ui::{self, BuildProgress, UiContext};
use serde::Serialize;
use std::path::PathBuf;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Registry namespace for images that only exist in the local store
const LOCAL_NAMESPACE: &str = "multipush.local";

/// One platform's build, ephemeral for a run
#[derive(Debug, Clone, Serialize)]
pub struct BuildRequest {
    /// Repository the tags are pushed to
    pub image: String,
    pub source_context: PathBuf,
    pub dockerfile: PathBuf,
    pub platform: Platform,
    pub tags: TagSet,
    pub cache_key: CacheKey,
}

impl BuildRequest {
    /// Platform-qualified name the image is loaded under before tagging
    pub fn local_ref(&self) -> String {
        format!(
            "{}/{}:{}-{}",
            LOCAL_NAMESPACE,
            self.cache_key.scope(),
            self.tags.immutable(),
            self.platform.slug()
        )
    }

    /// Fully qualified reference for one of the request's tags
    pub fn target(&self, tag: &str) -> String {
        format!("{}:{}", self.image, tag)
    }
}

/// One request per configured platform, in configured order
pub fn plan_requests(build: &BuildConfig, tags: &TagSet) -> Vec<BuildRequest> {
    build
        .platforms
        .iter()
        .map(|&platform| BuildRequest {
            image: build.image.clone(),
            source_context: build.context.clone(),
            dockerfile: build.dockerfile.clone(),
            platform,
            tags: tags.clone(),
            cache_key: CacheKey::new(&build.image, platform),
        })
        .collect()
}

/// Outcome of one platform
#[derive(Debug, Clone, Serialize)]
pub struct PublishResult {
    pub platform: Platform,
    pub success: bool,
    /// Registry digest of the pushed image
    pub image_digest: Option<String>,
    /// Fully qualified references pushed for this platform
    pub pushed_tags: Vec<String>,
    pub error_detail: Option<String>,
    /// Whether the platform's own committed cache was offered to the build
    pub cache_hit: bool,
    pub elapsed_ms: u64,
}

impl PublishResult {
    fn failed(&mut self, detail: impl Into<String>) {
        self.success = false;
        self.error_detail = Some(detail.into());
    }
}

/// Drives the per-platform build, tag and push sequence
pub struct Orchestrator<'a> {
    engine: &'a dyn BuildEngine,
    cache: &'a CacheStore,
    ui: &'a UiContext,
}

impl<'a> Orchestrator<'a> {
    pub fn new(engine: &'a dyn BuildEngine, cache: &'a CacheStore, ui: &'a UiContext) -> Self {
        Self { engine, cache, ui }
    }

    /// Build and publish every request. Returns exactly one result per
    /// request, in request order; a failed platform never stops the next.
    pub async fn build_and_publish(
        &self,
        requests: &[BuildRequest],
        builder: &BuilderHandle,
        session: &AuthSession,
    ) -> Vec<PublishResult> {
        debug!(
            "Publishing {} platforms on builder {} as {}@{}",
            requests.len(),
            builder.name,
            session.username,
            session.registry
        );

        let mut results = Vec::with_capacity(requests.len());
        for request in requests {
            results.push(self.publish_one(request, builder).await);
        }

        self.push_floating(requests, &mut results).await;
        results
    }

    /// Build one platform and push its immutable tag
    async fn publish_one(&self, request: &BuildRequest, builder: &BuilderHandle) -> PublishResult {
        let started = Instant::now();
        let platform = request.platform;

        let cache_from = match self.cache.sources(&request.cache_key).await {
            Ok(sources) => sources,
            Err(e) => {
                warn!("Cache lookup for {} failed, building cold: {}", platform, e);
                Vec::new()
            }
        };
        let staging = match self.cache.stage(&request.cache_key).await {
            Ok(staging) => Some(staging),
            Err(e) => {
                warn!("Cache export for {} disabled: {}", platform, e);
                None
            }
        };

        let mut result = PublishResult {
            platform,
            success: true,
            image_digest: None,
            pushed_tags: Vec::new(),
            error_detail: None,
            cache_hit: cache_from
                .first()
                .is_some_and(|source| source.key == request.cache_key),
            elapsed_ms: 0,
        };

        let invocation = BuildInvocation {
            builder: builder.name.clone(),
            platform,
            context: request.source_context.clone(),
            dockerfile: request.dockerfile.clone(),
            local_ref: request.local_ref(),
            cache_from: cache_from.into_iter().map(|s| s.path).collect(),
            cache_to: staging.as_ref().map(|s| s.path.clone()),
        };

        let progress = BuildProgress::new(self.ui, platform.docker_platform());
        let built = self
            .engine
            .build(&invocation, &|line: String| progress.on_line(line))
            .await;
        progress.finish();

        // Partial exports are worth keeping, so commit before looking at
        // the build result
        if let Some(staging) = staging {
            if let Err(e) = self.cache.put(staging).await {
                warn!("Cache commit for {} failed: {}", platform, e);
            }
        }

        match built {
            Ok(image) => {
                debug!("Built {} as {} ({})", platform, image.local_ref, image.image_id);
                let target = request.target(request.tags.immutable());
                match self.engine.push(&invocation.local_ref, &target).await {
                    Ok(digest) => {
                        info!("Pushed {} ({})", target, digest);
                        result.image_digest = Some(digest);
                        result.pushed_tags.push(target);
                    }
                    Err(e) => result.failed(e.to_string()),
                }
            }
            Err(e) => result.failed(e.to_string()),
        }

        result.elapsed_ms = started.elapsed().as_millis() as u64;
        match &result.error_detail {
            None => ui::step_ok_detail(
                self.ui,
                &format!("{} published", platform),
                result.image_digest.as_deref().unwrap_or("no digest"),
            ),
            Some(detail) => ui::step_error_detail(
                self.ui,
                &format!("{} failed", platform),
                detail.lines().next().unwrap_or(detail),
            ),
        }
        result
    }

    /// Push the floating tag for every successful platform, in order
    async fn push_floating(&self, requests: &[BuildRequest], results: &mut [PublishResult]) {
        for (request, result) in requests.iter().zip(results.iter_mut()) {
            if !result.success {
                continue;
            }

            let target = request.target(request.tags.floating());
            match self.engine.push(&request.local_ref(), &target).await {
                Ok(digest) => {
                    if result.image_digest.as_deref() != Some(digest.as_str()) {
                        warn!(
                            "{} pushed as {} but {} reported {}",
                            request.platform,
                            result.image_digest.as_deref().unwrap_or("-"),
                            target,
                            digest
                        );
                    }
                    info!("Moved {} to {}", target, request.platform);
                    result.pushed_tags.push(target);
                }
                Err(e) => {
                    ui::step_error_detail(
                        self.ui,
                        &format!("{} floating tag", request.platform),
                        &e.to_string(),
                    );
                    result.failed(e.to_string());
                }
            }
        }
    }
}
