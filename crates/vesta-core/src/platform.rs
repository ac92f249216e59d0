//! Environment signals and the daemon default policy.

use std::io::IsTerminal;
use std::time::Duration;

use crate::format::{DEFAULT_DAEMON_KEEPALIVE, DaemonSetting};

/// Environment variables set by common CI providers.
const CI_VARIABLES: &[&str] = &[
    "CI",
    "CONTINUOUS_INTEGRATION",
    "BUILD_NUMBER",
    "RUN_ID",
    "GITHUB_ACTIONS",
    "GITLAB_CI",
    "BUILDKITE",
    "CIRCLECI",
    "TRAVIS",
    "JENKINS_URL",
    "TF_BUILD",
    "TEAMCITY_VERSION",
];

/// Boolean capability queries about the host environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EnvironmentSignals {
    /// A human is attached (terminal on stderr, or an RStudio session).
    pub interactive: bool,
    /// Running on Windows.
    pub windows: bool,
    /// Running under continuous integration.
    pub ci: bool,
}

impl EnvironmentSignals {
    /// Probe the current process environment.
    pub fn detect() -> Self {
        let mut signals = Self::from_lookup(|name| std::env::var(name).ok());
        signals.interactive = signals.interactive || std::io::stderr().is_terminal();
        signals
    }

    /// Build signals from an environment lookup (terminal state excluded).
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let set = |name: &str| {
            lookup(name)
                .map(|value| !value.is_empty() && value != "false" && value != "0")
                .unwrap_or(false)
        };

        Self {
            interactive: set("RSTUDIO_VERSION"),
            windows: cfg!(windows),
            ci: CI_VARIABLES.iter().any(|name| set(name)),
        }
    }
}

/// Decides whether to keep a kernel alive when the document does not say.
pub trait DaemonPolicy: Send + Sync {
    fn default_daemon(&self, signals: &EnvironmentSignals) -> bool;
}

/// Keep kernels alive only for interactive sessions outside Windows and CI.
#[derive(Debug, Clone, Copy, Default)]
pub struct InteractivePosixPolicy;

impl DaemonPolicy for InteractivePosixPolicy {
    fn default_daemon(&self, signals: &EnvironmentSignals) -> bool {
        signals.interactive && !signals.windows && !signals.ci
    }
}

/// How a kernel is run for one execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionMode {
    /// Launch, execute, shut down.
    OneShot,
    /// Reuse a kept-alive kernel, shut down after `keepalive` of idleness.
    Daemon { keepalive: Duration },
}

impl ExecutionMode {
    /// Resolve the mode from explicit configuration, falling back to `policy`.
    pub fn resolve(
        setting: Option<DaemonSetting>,
        policy: &dyn DaemonPolicy,
        signals: &EnvironmentSignals,
    ) -> Self {
        let setting = setting
            .unwrap_or_else(|| DaemonSetting::Enabled(policy.default_daemon(signals)));

        match setting {
            DaemonSetting::Enabled(false) | DaemonSetting::Seconds(0) => ExecutionMode::OneShot,
            DaemonSetting::Enabled(true) => ExecutionMode::Daemon {
                keepalive: DEFAULT_DAEMON_KEEPALIVE,
            },
            DaemonSetting::Seconds(secs) => ExecutionMode::Daemon {
                keepalive: Duration::from_secs(secs),
            },
        }
    }

    pub fn is_daemon(&self) -> bool {
        matches!(self, ExecutionMode::Daemon { .. })
    }
}
