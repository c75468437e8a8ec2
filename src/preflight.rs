//! Environment health check for `annalist check`.
//!
//! Every check runs even when an earlier one fails, so a single invocation
//! reports everything that needs fixing.

use std::fmt;
use std::path::Path;
use std::sync::Arc;

use tracing::debug;

use crate::config::Config;
use crate::error::ConfigError;
use crate::git::{self, SourceControl};
use crate::publish::NotificationChannel;

const REMOTE: &str = "origin";

/// Outcome of one check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckResult {
    pub name: String,
    pub passed: bool,
    pub detail: String,
}

impl CheckResult {
    fn pass(name: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            passed: true,
            detail: detail.into(),
        }
    }

    fn fail(name: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            passed: false,
            detail: detail.into(),
        }
    }
}

impl fmt::Display for CheckResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mark = if self.passed { "ok" } else { "FAIL" };
        write!(f, "[{mark:>4}] {}: {}", self.name, self.detail)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PreflightReport {
    pub checks: Vec<CheckResult>,
}

impl PreflightReport {
    pub fn passed(&self) -> bool {
        self.checks.iter().all(|c| c.passed)
    }

    pub fn failures(&self) -> impl Iterator<Item = &CheckResult> {
        self.checks.iter().filter(|c| !c.passed)
    }

    pub fn get(&self, name: &str) -> Option<&CheckResult> {
        self.checks.iter().find(|c| c.name == name)
    }

    /// One line per check followed by a verdict line.
    pub fn render(&self) -> String {
        let mut out: Vec<String> = self.checks.iter().map(ToString::to_string).collect();
        let failed = self.failures().count();
        if failed == 0 {
            out.push("All checks passed.".to_string());
        } else {
            out.push(format!("{failed} check(s) failed."));
        }
        out.join("\n")
    }
}

/// Run every check against `repo_root`.
///
/// `config` is the result of loading the configuration file, so a parse
/// failure is reported rather than aborting the check.
pub async fn run_checks(
    repo_root: &Path,
    config: &Result<Config, ConfigError>,
    scm: &dyn SourceControl,
    channels: &[Arc<dyn NotificationChannel>],
) -> PreflightReport {
    let mut report = PreflightReport::default();

    report.checks.push(match which::which("git") {
        Ok(path) => CheckResult::pass("git", path.display().to_string()),
        Err(e) => CheckResult::fail("git", format!("git executable not found: {e}")),
    });

    match git::open_repository(repo_root) {
        Ok(repo) => {
            let location = repo
                .workdir()
                .map(|p| p.display().to_string())
                .unwrap_or_else(|| repo_root.display().to_string());
            report.checks.push(CheckResult::pass("repository", location));
            for key in ["user.name", "user.email"] {
                report.checks.push(match git::repo::config_value(&repo, key) {
                    Some(value) => CheckResult::pass(key, value),
                    None => {
                        CheckResult::fail(key, format!("not set; run `git config {key} <value>`"))
                    }
                });
            }
        }
        Err(e) => report.checks.push(CheckResult::fail("repository", e.to_string())),
    }

    report.checks.push(match scm.remote_reachable(REMOTE) {
        Ok(()) => CheckResult::pass("remote", format!("{REMOTE} reachable")),
        Err(e) => CheckResult::fail("remote", e.to_string()),
    });

    report.checks.push(match config {
        Ok(config) => CheckResult::pass(
            "config",
            format!("{} notification channel(s)", config.notify.platforms.len()),
        ),
        Err(e) => CheckResult::fail("config", e.to_string()),
    });

    for channel in channels {
        let name = format!("notify:{}", channel.name());
        debug!("Pinging {}", name);
        report.checks.push(if channel.ping().await {
            CheckResult::pass(name, "ping delivered")
        } else {
            CheckResult::fail(name, "ping failed")
        });
    }

    report
}
