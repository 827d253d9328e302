//! System health checks for repomirror
//!
//! Preflight checks used by `repomirror doctor` and the diagnostics
//! endpoint to verify the agent can run before the first walk.

use serde::Serialize;
use std::path::Path;

use crate::github::{AuthStrategy, GitHubCatalog};
use crate::Config;

/// Result of system health checks
#[derive(Debug, Clone, Serialize)]
pub struct HealthCheck {
    /// Git installation status
    pub git: CheckResult,
    /// Credential availability
    pub github_auth: CheckResult,
    /// Storage root status
    pub data_dir: CheckResult,
}

/// Result of an individual health check
#[derive(Debug, Clone, Serialize)]
pub struct CheckResult {
    pub passed: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
    pub is_warning: bool,
}

impl CheckResult {
    fn ok(message: impl Into<String>) -> Self {
        Self {
            passed: true,
            message: message.into(),
            details: None,
            is_warning: false,
        }
    }

    fn ok_with_details(message: impl Into<String>, details: impl Into<String>) -> Self {
        Self {
            passed: true,
            message: message.into(),
            details: Some(details.into()),
            is_warning: false,
        }
    }

    fn error(message: impl Into<String>) -> Self {
        Self {
            passed: false,
            message: message.into(),
            details: None,
            is_warning: false,
        }
    }

    fn error_with_details(message: impl Into<String>, details: impl Into<String>) -> Self {
        Self {
            passed: false,
            message: message.into(),
            details: Some(details.into()),
            is_warning: false,
        }
    }

    fn warning_with_details(message: impl Into<String>, details: impl Into<String>) -> Self {
        Self {
            passed: true,
            message: message.into(),
            details: Some(details.into()),
            is_warning: true,
        }
    }
}

impl HealthCheck {
    /// Run all health checks. Blocks on child processes.
    pub fn run(config: &Config) -> Self {
        Self {
            git: Self::check_git(),
            github_auth: Self::check_github_auth(config),
            data_dir: Self::check_data_dir(config),
        }
    }

    /// Check if all required checks passed (excludes warnings)
    pub fn all_passed(&self) -> bool {
        self.git.passed && self.github_auth.passed && self.data_dir.passed
    }

    /// Get list of failed checks
    pub fn errors(&self) -> Vec<&CheckResult> {
        [&self.git, &self.github_auth, &self.data_dir]
            .into_iter()
            .filter(|r| !r.passed && !r.is_warning)
            .collect()
    }

    /// Get list of warnings
    pub fn warnings(&self) -> Vec<&CheckResult> {
        [&self.git, &self.github_auth, &self.data_dir]
            .into_iter()
            .filter(|r| r.is_warning)
            .collect()
    }

    /// Check git installation
    fn check_git() -> CheckResult {
        match std::process::Command::new("git").arg("--version").output() {
            Ok(output) if output.status.success() => {
                let version = String::from_utf8_lossy(&output.stdout);
                CheckResult::ok_with_details("Git installed", version.trim().to_string())
            }
            Ok(_) => CheckResult::error("Git command failed"),
            Err(_) => CheckResult::error_with_details(
                "Git not found in PATH",
                "Install git: https://git-scm.com/downloads",
            ),
        }
    }

    /// Check a credential can be obtained without contacting the API
    fn check_github_auth(config: &Config) -> CheckResult {
        match GitHubCatalog::detect_authentication(config) {
            Ok((AuthStrategy::Anonymous, _)) => CheckResult::warning_with_details(
                "No GitHub token available",
                "Only public repositories will be mirrored. Set GITHUB_TOKEN or run: gh auth login",
            ),
            Ok((strategy, _)) => {
                CheckResult::ok_with_details("GitHub credential available", format!("{:?}", strategy))
            }
            Err(e) => CheckResult::error_with_details(
                "GitHub authentication failed",
                format!("{}\nRun: gh auth login", e),
            ),
        }
    }

    /// Check the storage root exists and is writable
    fn check_data_dir(config: &Config) -> CheckResult {
        let expanded = match shellexpand::full(&config.data_directory) {
            Ok(expanded) => expanded.into_owned(),
            Err(e) => {
                return CheckResult::error_with_details("Invalid data directory path", e.to_string())
            }
        };

        let path = Path::new(&expanded);
        if !path.is_dir() {
            return CheckResult::error_with_details(
                "Data directory does not exist",
                format!("Run: mkdir -p {}", expanded),
            );
        }

        let marker = path.join(".repomirror-write-test");
        match std::fs::write(&marker, b"") {
            Ok(()) => {
                let _ = std::fs::remove_file(&marker);
                CheckResult::ok_with_details("Data directory is writable", expanded)
            }
            Err(e) => CheckResult::error_with_details(
                "Data directory is not writable",
                format!("{}: {}", expanded, e),
            ),
        }
    }

    /// Get all checks as a slice for iteration
    pub fn all_checks(&self) -> [(&'static str, &CheckResult); 3] {
        [
            ("Git Installation", &self.git),
            ("GitHub Authentication", &self.github_auth),
            ("Data Directory", &self.data_dir),
        ]
    }
}
