//! The publish run, stage by stage
//!
//! ```text
//! provision -> emulation -> builder -> login -> build/push per platform
//! ```
//!
//! Everything before the per-platform loop is fatal: a failure returns
//! `Err` and no platform is attempted. Inside the loop failures are
//! recorded per platform and never stop the run.

use crate::cache::CacheStore;
use crate::config::Config;
use crate::credentials::Credential;
use crate::engine::{BuildEngine, HostSystem};
use crate::error::Outcome;
use crate::orchestrator::{plan_requests, BuildRequest, Orchestrator};
use crate::platform::Platform;
use crate::report::RunReport;
use crate::stages::{self, MountAction, RetryPolicy};
use crate::trigger::{TagSet, Trigger};
use crate::ui::{self, TaskSpinner, UiContext};
use chrono::Utc;
use tracing::{debug, info};

/// Everything a run talks to
pub struct RunContext<'a> {
    pub config: &'a Config,
    pub host: &'a dyn HostSystem,
    pub engine: &'a dyn BuildEngine,
    pub ui: &'a UiContext,
    /// Architecture of the machine running the builds
    pub native: Option<Platform>,
}

/// Resolve the build requests a trigger produces, without side effects
pub fn plan(config: &Config, trigger: &Trigger) -> Outcome<Vec<BuildRequest>> {
    let tags = TagSet::for_trigger(&config.build.floating_tag, trigger)?;
    Ok(plan_requests(&config.build, &tags))
}

/// Run the whole publish for `trigger`
pub async fn run(
    ctx: &RunContext<'_>,
    trigger: Trigger,
    credential: &Credential,
) -> Outcome<RunReport> {
    let config = ctx.config;
    let started_at = Utc::now();
    let tags = TagSet::for_trigger(&config.build.floating_tag, &trigger)?;
    let requests = plan_requests(&config.build, &tags);

    ui::intro(
        ctx.ui,
        &format!("Publishing {} ({})", config.build.image, trigger),
    );

    ctx.engine.ensure_available().await?;
    debug!("Build engine: {}", ctx.engine.engine_name());

    let mut spinner = TaskSpinner::new(ctx.ui);

    // 1. Host
    if config.host.skip {
        ui::step_info(ctx.ui, "Host provisioning skipped");
    } else {
        spinner.start("Provisioning swap and image store...");
        match stages::provision(ctx.host, &config.host).await {
            Ok(summary) => {
                let mount = match summary.mount {
                    MountAction::Mounted => "mounted",
                    MountAction::Remounted => "resized",
                    MountAction::Unchanged => "unchanged",
                };
                spinner.stop(&format!(
                    "Host ready (swap +{} GB, image store {})",
                    summary.swap_added_gb.unwrap_or(0),
                    mount
                ));
            }
            Err(e) => {
                spinner.stop_error("Host provisioning failed");
                return Err(e.into());
            }
        }
    }

    // 2. Emulation
    spinner.start("Registering emulation...");
    match stages::register_emulation(
        ctx.engine,
        &config.emulation.installer_image,
        &config.build.platforms,
        ctx.native,
    )
    .await
    {
        Ok(installed) if installed.is_empty() => spinner.stop("Emulation already in place"),
        Ok(installed) => {
            let names: Vec<String> = installed.iter().map(|p| p.to_string()).collect();
            spinner.stop(&format!("Emulation installed for {}", names.join(", ")));
        }
        Err(e) => {
            spinner.stop_error("Emulation registration failed");
            return Err(e.into());
        }
    }

    // 3. Builder
    spinner.start("Acquiring builder...");
    let builder =
        match stages::acquire_builder(ctx.engine, &config.builder, &config.build.platforms).await {
            Ok(builder) => {
                spinner.stop(&format!(
                    "Builder {} ({}, buildkit {})",
                    builder.name,
                    builder.driver,
                    builder.buildkit_version.as_deref().unwrap_or("unknown")
                ));
                builder
            }
            Err(e) => {
                spinner.stop_error("Builder unavailable");
                return Err(e.into());
            }
        };

    // 4. Registry
    spinner.start(&format!("Logging in to {}...", config.registry.host));
    let session = match stages::authenticate_with_retry(
        ctx.engine,
        &config.registry.host,
        credential,
        RetryPolicy::from_config(&config.registry),
    )
    .await
    {
        Ok(session) => {
            spinner.stop(&format!(
                "Logged in to {} as {}",
                session.registry, session.username
            ));
            session
        }
        Err(e) => {
            spinner.stop_error("Registry login failed");
            return Err(e.into());
        }
    };

    // 5. Platforms
    let cache = CacheStore::open(&config.cache.dir).await?;
    debug!("Cache store at {}", cache.root().display());

    ui::section(ctx.ui, "Building");
    let results = Orchestrator::new(ctx.engine, &cache, ctx.ui)
        .build_and_publish(&requests, &builder, &session)
        .await;

    let report = RunReport::new(trigger, &config.build.image, tags, started_at, results);
    info!(
        "Run finished: {} of {} platforms published",
        report.results.iter().filter(|r| r.success).count(),
        report.results.len()
    );
    Ok(report)
}
