use anyhow::{Context, Result};
use dirs::config_dir;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::BackupError;

/// Token values shipped in example configs that must never reach the API
const PLACEHOLDER_TOKENS: &[&str] = &[
    "your_github_token",
    "your_token_here",
    "<token>",
    "changeme",
];

/// Main configuration structure for RepoVault
///
/// Built once at startup (file, then environment, then CLI flags) and shared
/// read-only by every component afterwards.
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Config {
    /// Directory in which the dated workspace and archive are created
    #[serde(default = "default_output_directory")]
    pub output_directory: String,

    /// GitHub accounts and API settings
    #[serde(default)]
    pub github: GitHubConfig,

    /// Clone behavior settings
    #[serde(default)]
    pub clone: CloneConfig,

    /// Archive creation settings
    #[serde(default)]
    pub archive: ArchiveConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// GitHub configuration
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct GitHubConfig {
    /// Personal access token (GITHUB_TOKEN overrides)
    pub token: Option<String>,

    /// Personal account to back up
    pub username: Option<String>,

    /// Organizations to back up, in order
    #[serde(default)]
    pub organizations: Vec<String>,

    /// Clone organization repositories
    #[serde(default = "default_true")]
    pub clone_organizations: bool,

    /// Clone personal account repositories
    #[serde(default = "default_true")]
    pub clone_personal: bool,

    /// REST API root
    #[serde(default = "default_api_url")]
    pub api_url: String,

    /// Timeout for a single API request in seconds
    #[serde(default = "default_request_timeout")]
    pub request_timeout: u64,

    /// Repository exclusion patterns
    #[serde(default)]
    pub exclude_patterns: Vec<String>,
}

/// Clone configuration
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct CloneConfig {
    /// Timeout for a single git clone in seconds
    #[serde(default = "default_clone_timeout")]
    pub timeout: u64,

    /// Maximum concurrent clones (1 = sequential)
    #[serde(default = "default_max_parallel")]
    pub max_parallel: usize,
}

/// Archive configuration
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ArchiveConfig {
    /// Compress the workspace after cloning
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Archive tool preference
    #[serde(default)]
    pub format: ArchiveFormatPreference,

    /// Leave the personal folder out of the archive when personal cloning is off
    #[serde(default = "default_true")]
    pub exclude_personal: bool,
}

/// Which archiving tool to use
#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ArchiveFormatPreference {
    /// zip if available, otherwise tar.gz
    #[default]
    Auto,
    Zip,
    Tar,
}

/// Logging configuration
#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct LoggingConfig {
    /// Verbose request/response logging to stderr
    #[serde(default)]
    pub debug: bool,
}

/// Command line overrides applied on top of file and environment settings
#[derive(Debug, Clone, Default)]
pub struct TargetOverrides {
    pub organizations: Vec<String>,
    pub username: Option<String>,
    pub no_orgs: bool,
    pub no_personal: bool,
    pub no_archive: bool,
    pub output_directory: Option<String>,
}

// Default value functions
fn default_output_directory() -> String {
    ".".to_string()
}
fn default_true() -> bool {
    true
}
fn default_api_url() -> String {
    "https://api.github.com".to_string()
}
fn default_request_timeout() -> u64 {
    60
}
fn default_clone_timeout() -> u64 {
    1800
}
fn default_max_parallel() -> usize {
    1
}

impl Default for GitHubConfig {
    fn default() -> Self {
        Self {
            token: None,
            username: None,
            organizations: Vec::new(),
            clone_organizations: default_true(),
            clone_personal: default_true(),
            api_url: default_api_url(),
            request_timeout: default_request_timeout(),
            exclude_patterns: Vec::new(),
        }
    }
}

impl Default for CloneConfig {
    fn default() -> Self {
        Self {
            timeout: default_clone_timeout(),
            max_parallel: default_max_parallel(),
        }
    }
}

impl Default for ArchiveConfig {
    fn default() -> Self {
        Self {
            enabled: default_true(),
            format: ArchiveFormatPreference::default(),
            exclude_personal: default_true(),
        }
    }
}

impl Config {
    /// Load configuration from the default location, falling back to defaults
    pub fn load_or_default() -> Result<Self> {
        let config_path = Self::default_config_path()?;

        if config_path.exists() {
            Self::load(&config_path)
        } else {
            tracing::debug!("No configuration at {:?}, using defaults", config_path);
            Ok(Self::default())
        }
    }

    /// Load configuration from a specific file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;

        let mut config: Config = serde_yaml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {:?}", path))?;

        config.expand_paths()?;

        Ok(config)
    }

    /// Save configuration to a file
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = serde_yaml::to_string(self).context("Failed to serialize configuration")?;

        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {:?}", path))?;

        Ok(())
    }

    /// Get the default configuration file path (XDG compliant)
    pub fn default_config_path() -> Result<PathBuf> {
        let config_dir = config_dir().context("Failed to get user config directory")?;

        Ok(config_dir.join("repovault").join("config.yml"))
    }

    /// Expand environment variables in configuration paths
    pub fn expand_paths(&mut self) -> Result<()> {
        self.output_directory = shellexpand::full(&self.output_directory)
            .context("Failed to expand output_directory path")?
            .into_owned();

        Ok(())
    }

    /// Apply overrides from the process environment
    pub fn apply_env(&mut self) {
        self.apply_env_from(|key| std::env::var(key).ok());
    }

    /// Apply environment overrides using `lookup` to resolve variables
    pub fn apply_env_from<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(token) = lookup("GITHUB_TOKEN").filter(|t| !t.trim().is_empty()) {
            self.github.token = Some(token.trim().to_string());
        }

        if let Some(username) = lookup("REPOVAULT_USERNAME").filter(|u| !u.trim().is_empty()) {
            self.github.username = Some(username.trim().to_string());
        }

        if let Some(orgs) = lookup("REPOVAULT_ORGS") {
            let orgs: Vec<String> = orgs
                .split(',')
                .map(str::trim)
                .filter(|o| !o.is_empty())
                .map(str::to_string)
                .collect();
            if !orgs.is_empty() {
                self.github.organizations = orgs;
            }
        }

        if let Some(debug) = lookup("REPOVAULT_DEBUG") {
            self.logging.debug = matches!(debug.trim(), "1" | "true" | "yes");
        }
    }

    /// Apply command line overrides
    pub fn apply_overrides(&mut self, overrides: &TargetOverrides) -> Result<()> {
        if !overrides.organizations.is_empty() {
            self.github.organizations = overrides.organizations.clone();
        }
        if let Some(username) = &overrides.username {
            self.github.username = Some(username.clone());
        }
        if overrides.no_orgs {
            self.github.clone_organizations = false;
        }
        if overrides.no_personal {
            self.github.clone_personal = false;
        }
        if overrides.no_archive {
            self.archive.enabled = false;
        }
        if let Some(dir) = &overrides.output_directory {
            self.output_directory = dir.clone();
            self.expand_paths()?;
        }
        Ok(())
    }

    /// Pre-flight validation, run before any network activity
    pub fn validate(&self) -> std::result::Result<(), BackupError> {
        self.token()?;

        let username = self.username();
        if self.github.clone_personal && username.is_none() {
            return Err(BackupError::Config(
                "clone_personal is enabled but no github.username is set".to_string(),
            ));
        }

        let orgs_to_clone = self.github.clone_organizations && !self.github.organizations.is_empty();
        if !orgs_to_clone && !self.github.clone_personal {
            return Err(BackupError::Config(
                "nothing to back up: no organizations configured and personal cloning disabled"
                    .to_string(),
            ));
        }

        if self.github.clone_organizations && self.github.organizations.is_empty() {
            tracing::warn!("clone_organizations is enabled but no organizations are configured");
        }

        Ok(())
    }

    /// The configured token, rejecting absent or placeholder values
    pub fn token(&self) -> std::result::Result<&str, BackupError> {
        let token = self
            .github
            .token
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .ok_or_else(|| BackupError::Config("no GitHub token configured".to_string()))?;

        let lowered = token.to_lowercase();
        if PLACEHOLDER_TOKENS.iter().any(|p| lowered == *p) {
            return Err(BackupError::Config(format!(
                "GitHub token is still the placeholder value '{}'",
                token
            )));
        }

        Ok(token)
    }

    /// Personal account name, if one is configured
    pub fn username(&self) -> Option<&str> {
        self.github
            .username
            .as_deref()
            .map(str::trim)
            .filter(|u| !u.is_empty())
    }

    /// Directory that holds the dated workspace
    pub fn output_path(&self) -> PathBuf {
        PathBuf::from(&self.output_directory)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            output_directory: default_output_directory(),
            github: GitHubConfig::default(),
            clone: CloneConfig::default(),
            archive: ArchiveConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}
