//! Plan command - show the builds a trigger resolves to

use super::resolve_trigger_from_env;
use crate::cli::args::{OutputFormat, PlanArgs};
use crate::config::Config;
use crate::error::Outcome;
use crate::orchestrator::BuildRequest;
use crate::pipeline;
use console::style;

/// Execute the plan command
pub async fn execute(args: PlanArgs, config: &Config) -> Outcome<()> {
    let trigger =
        resolve_trigger_from_env(args.reference, args.manual, &config.build.tag_pattern)?;
    let requests = pipeline::plan(config, &trigger)?;

    match args.format {
        OutputFormat::Table => print_plan_table(&trigger.to_string(), &requests),
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&requests)?),
        OutputFormat::Plain => {
            for request in &requests {
                for tag in request.tags.iter() {
                    println!("{} {}", request.platform.docker_platform(), request.target(tag));
                }
            }
        }
    }

    Ok(())
}

fn print_plan_table(trigger: &str, requests: &[BuildRequest]) {
    println!("Trigger: {}", style(trigger).cyan());
    println!();
    println!("{:<4} {:<14} {:<40} {}", "#", "PLATFORM", "CACHE KEY", "TAGS");
    println!("{}", "-".repeat(90));

    for (i, request) in requests.iter().enumerate() {
        let tags: Vec<&str> = request.tags.iter().collect();
        println!(
            "{:<4} {:<14} {:<40} {}",
            i + 1,
            request.platform.docker_platform(),
            request.cache_key.to_string(),
            tags.join(", ")
        );
    }

    if let Some(last) = requests.last() {
        println!();
        println!(
            "{} {} and {} will point at {} once every platform succeeds",
            style("Note:").yellow(),
            last.target(last.tags.floating()),
            last.tags.immutable(),
            last.platform.docker_platform()
        );
    }
}
