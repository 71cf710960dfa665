//! Progress indicators with CI fallback

use super::context::UiContext;
use console::style;
use indicatif::{ProgressBar, ProgressStyle};

/// A task spinner with CI fallback
pub struct TaskSpinner {
    spinner: Option<cliclack::ProgressBar>,
    interactive: bool,
}

impl TaskSpinner {
    pub fn new(ctx: &UiContext) -> Self {
        Self {
            spinner: None,
            interactive: ctx.use_fancy_output(),
        }
    }

    /// Start the spinner with a message
    pub fn start(&mut self, message: &str) {
        if self.interactive {
            let spinner = cliclack::spinner();
            spinner.start(message);
            self.spinner = Some(spinner);
        } else {
            println!("{} {}", style("...").dim(), message);
        }
    }

    /// Stop with success message
    pub fn stop(&mut self, message: &str) {
        if let Some(spinner) = self.spinner.take() {
            spinner.stop(message);
        } else if self.interactive {
            println!("{} {}", style("✓").green(), message);
        } else {
            println!("{} {}", style("[OK]").green(), message);
        }
    }

    /// Stop with error message
    pub fn stop_error(&mut self, message: &str) {
        if let Some(spinner) = self.spinner.take() {
            spinner.error(message);
        } else if self.interactive {
            println!("{} {}", style("✗").red(), message);
        } else {
            println!("{} {}", style("[FAIL]").red(), message);
        }
    }
}

/// Progress bar for one platform build.
///
/// Follows buildx `--progress plain` output. Step lines look like
/// `#7 [builder 3/9] RUN cargo build --release`; everything else only
/// updates the bar message.
pub struct BuildProgress {
    bar: Option<ProgressBar>,
}

impl BuildProgress {
    /// Shows an indicatif bar in interactive mode, plain text in CI.
    pub fn new(ctx: &UiContext, label: &str) -> Self {
        let bar = if ctx.use_fancy_output() {
            let bar = ProgressBar::new(0);
            let style = ProgressStyle::default_bar()
                .template("  {spinner:.cyan} Building {prefix}  {bar:20.cyan/dim} {pos}/{len} {msg:.dim}  {elapsed:.dim}")
                .map(|s| s.tick_chars("⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏ ").progress_chars("━╸─"))
                .unwrap_or_else(|_| ProgressStyle::default_bar());
            bar.set_style(style);
            bar.set_prefix(label.to_string());
            bar.enable_steady_tick(std::time::Duration::from_millis(120));
            Some(bar)
        } else {
            println!("Building {}...", label);
            None
        };
        Self { bar }
    }

    /// Process a build output line
    pub fn on_line(&self, line: String) {
        if let Some(step) = parse_step_line(&line) {
            if let Some(ref bar) = self.bar {
                // Multi-stage builds restart the count per stage
                bar.set_length(step.total);
                bar.set_position(step.index);
                bar.set_message(step.instruction.to_string());
            } else {
                println!("  [{}/{}] {}", step.index, step.total, step.instruction);
            }
        } else if let Some(ref bar) = self.bar {
            let trimmed = strip_vertex(line.trim());
            if !trimmed.is_empty() && !is_build_noise(trimmed) {
                let display = if trimmed.chars().count() > 60 {
                    format!("{}...", trimmed.chars().take(57).collect::<String>())
                } else {
                    trimmed.to_string()
                };
                bar.set_message(display);
            }
        }
    }

    /// Finish and clear the progress bar.
    pub fn finish(&self) {
        if let Some(ref bar) = self.bar {
            bar.disable_steady_tick();
            bar.finish_and_clear();
        }
    }
}

/// A Dockerfile step announced by buildx
#[derive(Debug, PartialEq, Eq)]
struct Step<'a> {
    index: u64,
    total: u64,
    instruction: &'a str,
}

/// Parse `#N [stage i/n] INSTRUCTION` (stage name optional)
fn parse_step_line(line: &str) -> Option<Step<'_>> {
    let rest = line.strip_prefix('#')?;
    let (vertex, rest) = rest.split_once(' ')?;
    if vertex.is_empty() || !vertex.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }

    let rest = rest.strip_prefix('[')?;
    let (bracket, instruction) = rest.split_once(']')?;
    let counter = bracket.split_whitespace().last()?;
    let (index, total) = counter.split_once('/')?;

    Some(Step {
        index: index.parse().ok()?,
        total: total.parse().ok()?,
        instruction: instruction.trim(),
    })
}

/// Drop the `#N ` vertex prefix buildx puts on every line
fn strip_vertex(line: &str) -> &str {
    match line.strip_prefix('#').and_then(|r| r.split_once(' ')) {
        Some((vertex, rest)) if vertex.chars().all(|c| c.is_ascii_digit()) => rest.trim(),
        _ => line,
    }
}

/// Bookkeeping lines that say nothing about progress
fn is_build_noise(line: &str) -> bool {
    line.starts_with("DONE")
        || line.starts_with("CACHED")
        || line.starts_with("sha256:")
        || line.starts_with("transferring")
        || line.starts_with("resolve ")
}
