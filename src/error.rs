use thiserror::Error;

/// Error taxonomy for a backup run
///
/// Everything except [`BackupError::NotFound`] aborts the run. A missing
/// account is skipped and reported at the end.
#[derive(Error, Debug)]
pub enum BackupError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("GitHub rejected the token: {0}")]
    Auth(String),

    #[error("GitHub API rate limit exceeded: {0}")]
    RateLimit(String),

    #[error("insufficient permissions: {0}")]
    Permission(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("GitHub API returned HTTP {status}: {message}")]
    Api { status: u16, message: String },

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("invalid JSON from GitHub: {0}")]
    Json(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl BackupError {
    /// Whether this error terminates the whole run
    pub fn is_fatal(&self) -> bool {
        !matches!(self, BackupError::NotFound(_))
    }

    /// Hint printed before exiting on a fatal error
    pub fn remediation(&self) -> Option<&'static str> {
        match self {
            BackupError::Config(_) => Some(
                "Set GITHUB_TOKEN or github.token in the config file. \
                 Run: repovault init",
            ),
            BackupError::Auth(_) => Some(
                "The token is invalid or expired. Create a new one at \
                 https://github.com/settings/tokens with the 'repo' and 'read:org' scopes.",
            ),
            BackupError::RateLimit(_) => Some(
                "Wait for the rate limit window to reset (usually within an hour) \
                 and run again. Authenticated requests get 5000 requests/hour.",
            ),
            BackupError::Permission(_) => Some(
                "The token cannot read these repositories. Check that it has the \
                 'repo' and 'read:org' scopes, that SSO is authorized for the organization, \
                 or that the fine-grained token grants access to the organization.",
            ),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, BackupError>;
