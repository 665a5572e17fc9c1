//! Backup Engine - Orchestrates a dated backup run
//!
//! Walks every configured account page by page, clones what it finds,
//! then summarizes and archives the workspace. API errors other than a
//! missing account end the run immediately.

use anyhow::{Context, Result};
use chrono::{Local, NaiveDate};
use futures::stream::{self, StreamExt, TryStreamExt};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::archive::{tree_preview, ArchiveOutcome, Archiver};
use crate::config::Config;
use crate::error::BackupError;
use crate::git::{CloneResult, GitClient};
use crate::github::{Account, GitHubClient, RepositoryRecord};
use crate::summary::BackupSummary;

/// Stage of a backup run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunPhase {
    Init,
    CloningOrgs,
    CloningPersonal,
    Summarizing,
    Archiving,
    Done,
    Failed,
}

/// How processing an account ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AccountOutcome {
    Completed,
    /// Organization or user does not exist; the run moved on
    NotFound(String),
}

/// Per-account clone results, in listing order
#[derive(Debug, Clone)]
pub struct AccountReport {
    pub account: Account,
    pub outcome: AccountOutcome,
    pub results: Vec<CloneResult>,
}

/// Immutable description of one run
#[derive(Debug, Clone)]
pub struct BackupRun {
    /// `YYYY-MM-DD`
    pub date: String,
    /// `<output_directory>/<date>`
    pub root: PathBuf,
    pub organizations: Vec<Account>,
    pub personal: Option<Account>,
    /// Top-level folders left out of the archive
    pub archive_exclusions: Vec<String>,
}

impl BackupRun {
    pub fn new(config: &Config, date: NaiveDate) -> Self {
        let date = date.format("%Y-%m-%d").to_string();
        let root = config.output_path().join(&date);

        let organizations = if config.github.clone_organizations {
            config
                .github
                .organizations
                .iter()
                .map(Account::organization)
                .collect()
        } else {
            Vec::new()
        };

        let personal = if config.github.clone_personal {
            config.username().map(Account::user)
        } else {
            None
        };

        let archive_exclusions = match config.username() {
            Some(username) if !config.github.clone_personal && config.archive.exclude_personal => {
                vec![username.to_string()]
            }
            _ => Vec::new(),
        };

        Self {
            date,
            root,
            organizations,
            personal,
            archive_exclusions,
        }
    }

    /// A run dated today (local time)
    pub fn today(config: &Config) -> Self {
        Self::new(config, Local::now().date_naive())
    }

    /// Organizations first, then the personal account
    pub fn accounts(&self) -> impl Iterator<Item = &Account> {
        self.organizations.iter().chain(self.personal.iter())
    }

    pub fn account_dir(&self, account: &Account) -> PathBuf {
        self.root.join(&account.name)
    }
}

/// Everything a finished run produced
#[derive(Debug)]
pub struct RunReport {
    pub run: BackupRun,
    pub accounts: Vec<AccountReport>,
    pub summary: BackupSummary,
    pub summary_path: PathBuf,
    pub archive: ArchiveOutcome,
    pub preview: String,
}

impl RunReport {
    /// False when any account could not be found
    pub fn is_success(&self) -> bool {
        self.not_found().next().is_none()
    }

    pub fn not_found(&self) -> impl Iterator<Item = &AccountReport> {
        self.accounts
            .iter()
            .filter(|r| matches!(r.outcome, AccountOutcome::NotFound(_)))
    }

    pub fn failed_clones(&self) -> impl Iterator<Item = &CloneResult> {
        self.accounts
            .iter()
            .flat_map(|r| r.results.iter())
            .filter(|r| matches!(r, CloneResult::Failed { .. }))
    }
}

/// Drives a backup run from enumeration to archive
pub struct BackupEngine {
    config: Arc<Config>,
    github: GitHubClient,
    git: GitClient,
    phase: RunPhase,
}

impl BackupEngine {
    /// Validate configuration and build the API and git clients
    pub fn new(config: Config) -> Result<Self> {
        config.validate()?;

        let github = GitHubClient::new(&config).context("Failed to create GitHub client")?;
        let git = GitClient::new(&config)?;

        Ok(Self {
            config: Arc::new(config),
            github,
            git,
            phase: RunPhase::Init,
        })
    }

    pub fn phase(&self) -> RunPhase {
        self.phase
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    fn transition(&mut self, next: RunPhase) {
        debug!("Run phase {:?} -> {:?}", self.phase, next);
        self.phase = next;
    }

    /// Execute a full run
    pub async fn run(&mut self, run: BackupRun) -> Result<RunReport> {
        info!("Starting backup {} into {}", run.date, run.root.display());

        tokio::fs::create_dir_all(&run.root)
            .await
            .with_context(|| format!("Failed to create workspace {}", run.root.display()))?;

        let mut reports = Vec::new();

        self.transition(RunPhase::CloningOrgs);
        for account in &run.organizations {
            let report = self.backup_or_fail(&run, account).await?;
            reports.push(report);
        }

        self.transition(RunPhase::CloningPersonal);
        if let Some(account) = &run.personal {
            let report = self.backup_or_fail(&run, account).await?;
            reports.push(report);
        }

        self.transition(RunPhase::Summarizing);
        let summary = BackupSummary::collect(&run.root, &run.date, &reports)?;
        let summary_path = summary.write(&run.root)?;
        info!("Wrote summary to {}", summary_path.display());

        self.transition(RunPhase::Archiving);
        let archiver = Archiver::new(&self.config, run.archive_exclusions.clone());
        let archive = archiver.archive(&run.root).await?;
        let preview = tree_preview(&run.root, archiver.excluded())?;

        self.transition(RunPhase::Done);

        Ok(RunReport {
            run,
            accounts: reports,
            summary,
            summary_path,
            archive,
            preview,
        })
    }

    /// Back up one account, recovering only from a missing account
    async fn backup_or_fail(&mut self, run: &BackupRun, account: &Account) -> Result<AccountReport> {
        match self.backup_account(run, account).await {
            Ok(report) => Ok(report),
            Err(BackupError::NotFound(message)) => {
                warn!("Skipping {}: {}", account, message);
                Ok(AccountReport {
                    account: account.clone(),
                    outcome: AccountOutcome::NotFound(message),
                    results: Vec::new(),
                })
            }
            Err(e) => {
                error!("Aborting backup while processing {}: {}", account, e);
                self.transition(RunPhase::Failed);
                Err(e.into())
            }
        }
    }

    /// Enumerate and clone an account page by page
    pub async fn backup_account(
        &self,
        run: &BackupRun,
        account: &Account,
    ) -> std::result::Result<AccountReport, BackupError> {
        info!("Backing up {}", account);

        let account_dir = run.account_dir(account);
        let mut results = Vec::new();

        let pages = self.github.repository_pages(account);
        futures::pin_mut!(pages);
        while let Some(repo_page) = pages.try_next().await? {
            if repo_page.number == 1 {
                tokio::fs::create_dir_all(&account_dir).await?;
            }

            results.extend(self.clone_records(&account_dir, &repo_page.records).await);
        }

        info!(
            "Finished {}: {} repositories processed",
            account,
            results.len()
        );

        Ok(AccountReport {
            account: account.clone(),
            outcome: AccountOutcome::Completed,
            results,
        })
    }

    /// Clone a page of records, at most `clone.max_parallel` at a time
    ///
    /// Results come back in record order regardless of completion order.
    async fn clone_records(&self, account_dir: &Path, records: &[RepositoryRecord]) -> Vec<CloneResult> {
        let parallel = self.config.clone.max_parallel.max(1);

        stream::iter(records)
            .map(|record| self.git.clone_repository(account_dir, record))
            .buffered(parallel)
            .collect()
            .await
    }
}
