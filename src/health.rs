//! Preflight checks for RepoVault
//!
//! Verifies that git, an archive tool, the token and the output directory
//! are usable before a backup is attempted.

use crate::archive::{available_formats, select_format};
use crate::{Config, GitHubClient};

/// Result of system health checks
#[derive(Debug, Clone)]
pub struct HealthCheck {
    /// Git installation status
    pub git: CheckResult,
    /// GitHub token status
    pub github_auth: CheckResult,
    /// Output directory status
    pub output_dir: CheckResult,
    /// zip/tar availability (warning only, the run still succeeds without one)
    pub archive_tool: CheckResult,
}

/// Result of an individual health check
#[derive(Debug, Clone)]
pub struct CheckResult {
    pub passed: bool,
    pub message: String,
    pub details: Option<String>,
    pub is_warning: bool,
}

impl CheckResult {
    #[cfg(test)]
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
    /// Run all health checks
    pub async fn run(config: &Config) -> Self {
        Self {
            git: Self::check_git(),
            github_auth: Self::check_github_auth(config).await,
            output_dir: Self::check_output_dir(config),
            archive_tool: Self::check_archive_tool(config).await,
        }
    }

    /// Check if all required checks passed (excludes warnings)
    pub fn all_passed(&self) -> bool {
        self.git.passed && self.github_auth.passed && self.output_dir.passed
    }

    /// Get list of failed checks (errors only, not warnings)
    pub fn errors(&self) -> Vec<&CheckResult> {
        self.all_checks()
            .into_iter()
            .map(|(_, result)| result)
            .filter(|r| !r.passed && !r.is_warning)
            .collect()
    }

    /// Get list of warnings
    pub fn warnings(&self) -> Vec<&CheckResult> {
        self.all_checks()
            .into_iter()
            .map(|(_, result)| result)
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

    /// Check the token is configured and accepted by GitHub
    async fn check_github_auth(config: &Config) -> CheckResult {
        let client = match GitHubClient::new(config) {
            Ok(client) => client,
            Err(e) => {
                return CheckResult::error_with_details(
                    "GitHub token not configured",
                    format!("{}\nSet GITHUB_TOKEN or github.token in the config file", e),
                )
            }
        };

        match client.verify_token().await {
            Ok(login) => CheckResult::ok_with_details(
                "GitHub authentication successful",
                format!("Token belongs to: {}", login),
            ),
            Err(e) => {
                let hint = e.remediation().unwrap_or("Check network access to the GitHub API");
                CheckResult::error_with_details(
                    "GitHub authentication failed",
                    format!("{}\n{}", e, hint),
                )
            }
        }
    }

    /// Check the output directory exists
    fn check_output_dir(config: &Config) -> CheckResult {
        let path = config.output_path();
        if path.is_dir() {
            CheckResult::ok_with_details("Output directory exists", path.display().to_string())
        } else {
            CheckResult::error_with_details(
                "Output directory does not exist",
                format!("Run: mkdir -p {}", path.display()),
            )
        }
    }

    /// Check an archive tool is installed (warning only)
    async fn check_archive_tool(config: &Config) -> CheckResult {
        let available = available_formats().await;
        match select_format(config.archive.format, |tool| {
            available.iter().any(|f| f.tool() == tool)
        }) {
            Some(format) => CheckResult::ok_with_details(
                "Archive tool found",
                format!("{} (creates .{})", format.tool(), format.extension()),
            ),
            None => CheckResult::warning_with_details(
                "No archive tool found",
                "Backups will be left as plain folders. Install zip or tar.",
            ),
        }
    }

    /// Get all checks as a slice for iteration
    pub fn all_checks(&self) -> [(&'static str, &CheckResult); 4] {
        [
            ("Git Installation", &self.git),
            ("GitHub Authentication", &self.github_auth),
            ("Output Directory", &self.output_dir),
            ("Archive Tool", &self.archive_tool),
        ]
    }
}
