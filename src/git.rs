use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command as AsyncCommand;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::error::Result;
use crate::github::RepositoryRecord;

/// Subdirectory of an account folder that holds archived repositories
pub const ARCHIVE_DIR: &str = "archive";

/// Runs `git clone` for listed repositories
#[derive(Clone)]
pub struct GitClient {
    token: String,
    timeout: Duration,
}

/// Result of a clone attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloneResult {
    /// Repository was freshly cloned
    Cloned { name: String, path: PathBuf },
    /// Target already existed, nothing was run
    Skipped { name: String, path: PathBuf },
    /// git failed or timed out
    Failed {
        name: String,
        path: PathBuf,
        error: String,
    },
}

impl CloneResult {
    pub fn name(&self) -> &str {
        match self {
            CloneResult::Cloned { name, .. }
            | CloneResult::Skipped { name, .. }
            | CloneResult::Failed { name, .. } => name,
        }
    }

    pub fn path(&self) -> &Path {
        match self {
            CloneResult::Cloned { path, .. }
            | CloneResult::Skipped { path, .. }
            | CloneResult::Failed { path, .. } => path,
        }
    }
}

/// Embed the token as the user segment of an `https://` URL
///
/// Any other scheme (ssh, local path) is returned unchanged.
pub fn authenticated_url(url: &str, token: &str) -> String {
    match url.strip_prefix("https://") {
        Some(rest) => {
            // Drop existing credentials before inserting ours
            let rest = match (rest.find('@'), rest.find('/')) {
                (Some(at), Some(slash)) if at < slash => &rest[at + 1..],
                (Some(at), None) => &rest[at + 1..],
                _ => rest,
            };
            format!("https://{}@{}", token, rest)
        }
        None => url.to_string(),
    }
}

/// Hide credentials embedded in an `https://` URL
pub fn redact_url(url: &str) -> String {
    match url.strip_prefix("https://") {
        Some(rest) => match (rest.find('@'), rest.find('/')) {
            (Some(at), Some(slash)) if at < slash => format!("https://***@{}", &rest[at + 1..]),
            (Some(at), None) => format!("https://***@{}", &rest[at + 1..]),
            _ => url.to_string(),
        },
        None => url.to_string(),
    }
}

/// Where a repository lives inside its account folder
pub fn target_path(account_dir: &Path, record: &RepositoryRecord) -> PathBuf {
    if record.archived {
        account_dir.join(ARCHIVE_DIR).join(&record.name)
    } else {
        account_dir.join(&record.name)
    }
}

impl GitClient {
    /// Create a git client using the configured token and clone timeout
    pub fn new(config: &Config) -> Result<Self> {
        Ok(Self {
            token: config.token()?.to_string(),
            timeout: Duration::from_secs(config.clone.timeout),
        })
    }

    /// Clone one repository into `account_dir`, skipping existing targets
    pub async fn clone_repository(
        &self,
        account_dir: &Path,
        record: &RepositoryRecord,
    ) -> CloneResult {
        let path = target_path(account_dir, record);
        let name = record.name.clone();

        // An active repo with this name would land on the archived-repo folder
        if !record.archived && name == ARCHIVE_DIR {
            let error = format!(
                "active repository {:?} collides with the folder reserved for archived repositories",
                name
            );
            warn!("{}: {}", name, error);
            return CloneResult::Failed { name, path, error };
        }

        if path.exists() {
            info!("Skipping {}: {} already exists", name, path.display());
            return CloneResult::Skipped { name, path };
        }

        if let Some(parent) = path.parent() {
            if let Err(e) = tokio::fs::create_dir_all(parent).await {
                return CloneResult::Failed {
                    name,
                    path,
                    error: format!("Failed to create parent directory: {}", e),
                };
            }
        }

        let url = authenticated_url(&record.clone_url, &self.token);
        info!(
            "Cloning {}{} -> {}",
            name,
            if record.archived { " (archived)" } else { "" },
            path.display()
        );
        debug!("Using clone URL: {}", redact_url(&url));

        let output = AsyncCommand::new("git")
            .arg("clone")
            .arg(&url)
            .arg(&path)
            .env("GIT_TERMINAL_PROMPT", "0")
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output();

        match timeout(self.timeout, output).await {
            Ok(Ok(output)) if output.status.success() => {
                info!("Successfully cloned: {}", name);
                CloneResult::Cloned { name, path }
            }
            Ok(Ok(output)) => {
                let stderr = String::from_utf8_lossy(&output.stderr);
                let error = format!("git clone failed: {}", self.scrub(stderr.trim()));
                warn!("{}: {}", name, error);
                CloneResult::Failed { name, path, error }
            }
            Ok(Err(e)) => {
                let error = format!("Failed to execute git clone: {}", e);
                warn!("{}: {}", name, error);
                CloneResult::Failed { name, path, error }
            }
            Err(_) => {
                let error = format!("git clone timed out after {}s", self.timeout.as_secs());
                warn!("{}: {}", name, error);
                if path.exists() {
                    if let Err(e) = tokio::fs::remove_dir_all(&path).await {
                        warn!("Failed to remove partial clone {}: {}", path.display(), e);
                    }
                }
                CloneResult::Failed { name, path, error }
            }
        }
    }

    fn scrub(&self, text: &str) -> String {
        if self.token.is_empty() {
            text.to_string()
        } else {
            text.replace(&self.token, "***")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn record(name: &str, archived: bool) -> RepositoryRecord {
        RepositoryRecord {
            name: name.to_string(),
            clone_url: format!("https://github.com/acme/{}.git", name),
            archived,
        }
    }

    fn client() -> GitClient {
        let mut config = Config::default();
        config.github.token = Some("ghp_secret".to_string());
        GitClient::new(&config).unwrap()
    }

    #[test]
    fn test_https_url_gets_token() {
        assert_eq!(
            authenticated_url("https://github.com/acme/a.git", "ghp_x"),
            "https://ghp_x@github.com/acme/a.git"
        );
        assert_eq!(
            authenticated_url("https://old@github.com/acme/a.git", "ghp_x"),
            "https://ghp_x@github.com/acme/a.git"
        );
    }

    #[test]
    fn test_non_https_url_unchanged() {
        assert_eq!(
            authenticated_url("git@github.com:acme/a.git", "ghp_x"),
            "git@github.com:acme/a.git"
        );
        assert_eq!(authenticated_url("/srv/git/a.git", "ghp_x"), "/srv/git/a.git");
    }

    #[test]
    fn test_redact_url() {
        assert_eq!(
            redact_url("https://ghp_x@github.com/acme/a.git"),
            "https://***@github.com/acme/a.git"
        );
        assert_eq!(
            redact_url("https://github.com/acme/a.git"),
            "https://github.com/acme/a.git"
        );
    }

    #[test]
    fn test_target_path_routes_archived() {
        let dir = PathBuf::from("/backups/2024-01-01/acme");
        assert_eq!(
            target_path(&dir, &record("live", false)),
            PathBuf::from("/backups/2024-01-01/acme/live")
        );
        assert_eq!(
            target_path(&dir, &record("old", true)),
            PathBuf::from("/backups/2024-01-01/acme/archive/old")
        );
    }

    #[tokio::test]
    async fn test_existing_target_is_skipped() {
        let temp = TempDir::new().unwrap();
        std::fs::create_dir_all(temp.path().join("archive").join("old")).unwrap();

        let result = client()
            .clone_repository(temp.path(), &record("old", true))
            .await;

        assert_eq!(
            result,
            CloneResult::Skipped {
                name: "old".to_string(),
                path: temp.path().join("archive").join("old"),
            }
        );
    }

    #[tokio::test]
    async fn test_active_repo_named_archive_is_not_skipped() {
        let temp = TempDir::new().unwrap();
        std::fs::create_dir_all(temp.path().join("archive").join("old")).unwrap();

        let result = client()
            .clone_repository(temp.path(), &record("archive", false))
            .await;

        match result {
            CloneResult::Failed { name, error, .. } => {
                assert_eq!(name, "archive");
                assert!(error.contains("collides"));
            }
            other => panic!("expected a failure, got {:?}", other),
        }
        assert!(temp.path().join("archive").join("old").exists());
    }

    #[test]
    fn test_scrub_hides_token() {
        let scrubbed = client().scrub("fatal: could not read https://ghp_secret@github.com/acme/a");
        assert!(!scrubbed.contains("ghp_secret"));
        assert!(scrubbed.contains("***@github.com"));
    }
}
