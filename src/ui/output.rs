//! Step and banner output
//!
//! Interactive terminals get cliclack's gutter; everything else gets one
//! plain line per event with a bracketed marker, which reads well in CI logs.

use super::context::UiContext;
use console::{style, StyledObject};

/// Kind of step line
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mark {
    Ok,
    Warn,
    Fail,
    Info,
}

impl Mark {
    fn plain(self) -> StyledObject<&'static str> {
        match self {
            Self::Ok => style("[OK]").green(),
            Self::Warn => style("[WARN]").yellow(),
            Self::Fail => style("[FAIL]").red(),
            Self::Info => style("[INFO]").blue(),
        }
    }
}

fn step(ctx: &UiContext, mark: Mark, line: String) {
    if !ctx.use_fancy_output() {
        println!("  {} {}", mark.plain(), line);
        return;
    }

    let _ = match mark {
        Mark::Ok => cliclack::log::success(line),
        Mark::Warn => cliclack::log::warning(line),
        Mark::Fail => cliclack::log::error(line),
        Mark::Info => cliclack::log::info(line),
    };
}

/// Run banner
pub fn intro(ctx: &UiContext, title: &str) {
    if ctx.use_fancy_output() {
        let _ = cliclack::intro(style(title).blue().bold());
    } else {
        println!("{}", style(title).blue().bold());
        println!();
    }
}

pub fn outro_success(ctx: &UiContext, message: &str) {
    outro(ctx, Mark::Ok, message);
}

pub fn outro_error(ctx: &UiContext, message: &str) {
    outro(ctx, Mark::Fail, message);
}

fn outro(ctx: &UiContext, mark: Mark, message: &str) {
    if ctx.use_fancy_output() {
        let styled = match mark {
            Mark::Ok => style(message).green().bold(),
            _ => style(message).red().bold(),
        };
        let _ = cliclack::outro(styled);
    } else {
        println!();
        println!("{} {}", mark.plain(), message);
    }
}

/// Section header between groups of steps
pub fn section(ctx: &UiContext, title: &str) {
    println!();
    if ctx.use_fancy_output() {
        let _ = cliclack::log::info(style(title).bold());
    } else {
        println!("{}", style(title).bold());
    }
}

pub fn step_ok_detail(ctx: &UiContext, message: &str, detail: &str) {
    step(ctx, Mark::Ok, format!("{} ({})", message, style(detail).dim()));
}

pub fn step_warn_hint(ctx: &UiContext, message: &str, hint: &str) {
    step(ctx, Mark::Warn, format!("{} - {}", message, style(hint).dim()));
}

pub fn step_error_detail(ctx: &UiContext, message: &str, detail: &str) {
    step(ctx, Mark::Fail, format!("{}: {}", message, detail));
}

pub fn step_info(ctx: &UiContext, message: &str) {
    step(ctx, Mark::Info, message.to_string());
}

/// Indented `key: value` line
pub fn key_value(ctx: &UiContext, key: &str, value: &str) {
    if ctx.use_fancy_output() {
        println!("  {}: {}", style(key).dim(), value);
    } else {
        println!("  {}: {}", key, value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_output_does_not_panic() {
        let ctx = UiContext::non_interactive();
        intro(&ctx, "Publishing");
        section(&ctx, "Building");
        step_ok_detail(&ctx, "linux/amd64 published", "sha256:abc");
        step_warn_hint(&ctx, "Cache left as is", "Pass --yes");
        step_error_detail(&ctx, "linux/arm/v7 failed", "exit code 1");
        step_info(&ctx, "Host provisioning skipped");
        key_value(&ctx, "Duration", "12s");
        outro_success(&ctx, "Done");
        outro_error(&ctx, "Failed platforms: linux/arm/v7");
    }

    #[test]
    fn plain_markers() {
        assert_eq!(Mark::Ok.plain().force_styling(false).to_string(), "[OK]");
        assert_eq!(Mark::Fail.plain().force_styling(false).to_string(), "[FAIL]");
    }
}
