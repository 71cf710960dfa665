//! Interactive vs CI output selection

use std::io::IsTerminal;

/// Variables set by the CI systems we expect to run under
const CI_VARS: &[&str] = &["CI", "GITHUB_ACTIONS", "GITLAB_CI", "BUILDKITE", "JENKINS_URL"];

/// How the current process should talk to its user
#[derive(Debug, Clone)]
pub struct UiContext {
    interactive: bool,
    /// Answer yes to every prompt
    auto_yes: bool,
}

impl UiContext {
    /// Interactive only on a real terminal outside CI
    pub fn detect() -> Self {
        let tty = std::io::stdout().is_terminal() && std::io::stdin().is_terminal();
        Self {
            interactive: tty && !in_ci(|name| std::env::var_os(name).is_some()),
            auto_yes: false,
        }
    }

    /// Plain output, prompts answered with their default
    pub fn non_interactive() -> Self {
        Self {
            interactive: false,
            auto_yes: false,
        }
    }

    pub fn with_auto_yes(mut self, yes: bool) -> Self {
        self.auto_yes = yes;
        self
    }

    pub fn is_interactive(&self) -> bool {
        self.interactive
    }

    pub fn auto_yes(&self) -> bool {
        self.auto_yes
    }

    /// Spinners, progress bars and cliclack gutters
    pub fn use_fancy_output(&self) -> bool {
        self.interactive
    }
}

fn in_ci(is_set: impl Fn(&str) -> bool) -> bool {
    CI_VARS.iter().any(|name| is_set(name))
}
