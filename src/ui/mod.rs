//! Terminal output
//!
//! `cliclack` steps and `indicatif` progress on a terminal, plain bracketed
//! lines in CI. Every function takes a [`UiContext`] that decides which.
//!
//! ```rust,ignore
//! let ctx = UiContext::detect();
//! ui::intro(&ctx, "Publishing docker.io/acme/app (tag v1.2.0)");
//!
//! let mut spinner = TaskSpinner::new(&ctx);
//! spinner.start("Acquiring builder...");
//! spinner.stop("Builder multipush (docker-container)");
//!
//! let progress = BuildProgress::new(&ctx, "linux/arm64");
//! progress.on_line("#5 [2/6] RUN cargo build".to_string());
//! progress.finish();
//! ```

mod context;
mod output;
mod progress;
mod prompts;
mod theme;

pub use context::UiContext;
pub use output::{
    intro, key_value, outro_error, outro_success, section, step_error_detail, step_info,
    step_ok_detail, step_warn_hint,
};
pub use progress::{BuildProgress, TaskSpinner};
pub use prompts::confirm;
pub use theme::{init_theme, PublishTheme};
