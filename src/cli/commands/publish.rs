//! Publish command - the full provision, build and push run

use super::resolve_trigger_from_env;
use crate::cli::args::PublishArgs;
use crate::config::Config;
use crate::credentials::Credential;
use crate::engine::{DockerEngine, LinuxHost};
use crate::error::Outcome;
use crate::pipeline::{self, RunContext};
use crate::platform::Platform;
use crate::ui::{self, UiContext};
use std::process::ExitCode;

/// Execute the publish command
pub async fn execute(args: PublishArgs, config: &Config) -> Outcome<ExitCode> {
    let trigger =
        resolve_trigger_from_env(args.reference, args.manual, &config.build.tag_pattern)?;
    let credential = Credential::from_env(&config.registry)?;

    let ui_ctx = UiContext::detect();
    let host = LinuxHost::detect(config.host.use_sudo).await;
    let engine = DockerEngine::new()?;

    let ctx = RunContext {
        config,
        host: &host,
        engine: &engine,
        ui: &ui_ctx,
        native: Platform::native(),
    };

    let report = pipeline::run(&ctx, trigger, &credential).await?;
    report.print(&ui_ctx);

    if let Some(path) = args.report {
        report.write_json(&path).await?;
        ui::step_info(&ui_ctx, &format!("Report written to {}", path.display()));
    }

    Ok(report.exit_code())
}
