//! RepoVault - Dated GitHub Organization and Account Backups
//!
//! RepoVault enumerates every repository owned by a set of GitHub organizations
//! and a personal account, clones each into a dated workspace, writes a summary
//! and compresses the result into a single archive.
//!
//! ## Modules
//!
//! - [`config`]: Configuration loading, overrides and validation
//! - [`github`]: GitHub REST API client and repository enumeration
//! - [`git`]: Idempotent `git clone` of listed repositories
//! - [`summary`]: On-disk repository counts and the summary report
//! - [`archive`]: zip / tar.gz packing of the workspace
//! - [`backup`]: Run orchestration

pub mod archive;
pub mod backup;
pub mod config;
pub mod error;
pub mod git;
pub mod github;
pub mod health;
pub mod summary;

pub use archive::{ArchiveFormat, ArchiveOutcome, Archiver};
pub use backup::{AccountOutcome, AccountReport, BackupEngine, BackupRun, RunPhase, RunReport};
pub use config::Config;
pub use error::BackupError;
pub use git::{CloneResult, GitClient};
pub use github::{Account, GitHubClient, RepositoryRecord};
pub use health::HealthCheck;
pub use summary::BackupSummary;
