//! Backup summary
//!
//! Counts what actually landed on disk for each account and renders the
//! `BACKUP_SUMMARY.txt` report.

use anyhow::{Context, Result};
use chrono::{DateTime, Local};
use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use crate::backup::{AccountOutcome, AccountReport};
use crate::git::ARCHIVE_DIR;
use crate::github::AccountKind;

/// Summary file written at the workspace root
pub const SUMMARY_FILE: &str = "BACKUP_SUMMARY.txt";

/// Repositories present on disk for one account
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct AccountSummary {
    pub name: String,
    pub active: Vec<String>,
    pub archived: Vec<String>,
}

impl AccountSummary {
    pub fn total(&self) -> usize {
        self.active.len() + self.archived.len()
    }
}

/// Clone counters for one account in this run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CloneStats {
    pub cloned: usize,
    pub skipped: usize,
    pub failed: usize,
}

/// Everything that goes into the summary report
#[derive(Debug, Clone)]
pub struct BackupSummary {
    pub date: String,
    pub generated_at: DateTime<Local>,
    pub entries: Vec<SummaryEntry>,
    pub disk_usage: u64,
}

/// One account's section of the report
#[derive(Debug, Clone)]
pub struct SummaryEntry {
    pub kind: AccountKind,
    pub outcome: AccountOutcome,
    pub repositories: AccountSummary,
    pub stats: CloneStats,
}

/// Sorted names of the immediate subdirectories of `dir`, minus `skip`
fn list_subdirectories(dir: &Path, skip: Option<&str>) -> std::io::Result<Vec<String>> {
    if !dir.is_dir() {
        return Ok(Vec::new());
    }

    let mut names = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        if !entry.file_type()?.is_dir() {
            continue;
        }
        let name = entry.file_name().to_string_lossy().into_owned();
        if Some(name.as_str()) == skip {
            continue;
        }
        names.push(name);
    }
    names.sort();
    Ok(names)
}

/// Count the active and archived repositories in an account folder
pub fn scan_account(account_dir: &Path, name: &str) -> std::io::Result<AccountSummary> {
    Ok(AccountSummary {
        name: name.to_string(),
        active: list_subdirectories(account_dir, Some(ARCHIVE_DIR))?,
        archived: list_subdirectories(&account_dir.join(ARCHIVE_DIR), None)?,
    })
}

/// Total size in bytes of all files below `root`
pub fn disk_usage(root: &Path) -> u64 {
    WalkDir::new(root)
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_file())
        .filter_map(|entry| entry.metadata().ok())
        .map(|metadata| metadata.len())
        .sum()
}

/// Human readable byte count
pub fn format_size(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KB", "MB", "GB", "TB"];

    let mut size = bytes as f64;
    let mut unit = 0;
    while size >= 1024.0 && unit < UNITS.len() - 1 {
        size /= 1024.0;
        unit += 1;
    }

    if unit == 0 {
        format!("{} {}", bytes, UNITS[0])
    } else {
        format!("{:.1} {}", size, UNITS[unit])
    }
}

impl CloneStats {
    pub fn from_report(report: &AccountReport) -> Self {
        use crate::git::CloneResult;

        let mut stats = Self::default();
        for result in &report.results {
            match result {
                CloneResult::Cloned { .. } => stats.cloned += 1,
                CloneResult::Skipped { .. } => stats.skipped += 1,
                CloneResult::Failed { .. } => stats.failed += 1,
            }
        }
        stats
    }
}

impl BackupSummary {
    /// Scan the workspace after cloning
    pub fn collect(root: &Path, date: &str, reports: &[AccountReport]) -> Result<Self> {
        let mut entries = Vec::with_capacity(reports.len());

        for report in reports {
            let account_dir = root.join(&report.account.name);
            let repositories = scan_account(&account_dir, &report.account.name)
                .with_context(|| format!("Failed to scan {}", account_dir.display()))?;

            entries.push(SummaryEntry {
                kind: report.account.kind,
                outcome: report.outcome.clone(),
                repositories,
                stats: CloneStats::from_report(report),
            });
        }

        Ok(Self {
            date: date.to_string(),
            generated_at: Local::now(),
            entries,
            disk_usage: disk_usage(root),
        })
    }

    pub fn total_active(&self) -> usize {
        self.entries.iter().map(|e| e.repositories.active.len()).sum()
    }

    pub fn total_archived(&self) -> usize {
        self.entries.iter().map(|e| e.repositories.archived.len()).sum()
    }

    /// Render the report text
    pub fn render(&self) -> String {
        let mut out = String::new();

        let _ = writeln!(out, "RepoVault Backup Summary");
        let _ = writeln!(out, "========================");
        let _ = writeln!(out, "Date: {}", self.date);
        let _ = writeln!(
            out,
            "Generated: {}",
            self.generated_at.format("%Y-%m-%d %H:%M:%S %:z")
        );
        let _ = writeln!(out);

        for entry in &self.entries {
            let kind = match entry.kind {
                AccountKind::Organization => "organization",
                AccountKind::User => "user",
            };
            let _ = writeln!(out, "[{}] ({})", entry.repositories.name, kind);

            if let AccountOutcome::NotFound(reason) = &entry.outcome {
                let _ = writeln!(out, "  Not found, skipped: {}", reason);
                let _ = writeln!(out);
                continue;
            }

            let repos = &entry.repositories;
            let _ = writeln!(out, "  Active repositories: {}", repos.active.len());
            for name in &repos.active {
                let _ = writeln!(out, "    - {}", name);
            }
            let _ = writeln!(out, "  Archived repositories: {}", repos.archived.len());
            for name in &repos.archived {
                let _ = writeln!(out, "    - {}", name);
            }
            let _ = writeln!(out, "  Total: {}", repos.total());
            let _ = writeln!(
                out,
                "  This run: {} cloned, {} skipped, {} failed",
                entry.stats.cloned, entry.stats.skipped, entry.stats.failed
            );
            let _ = writeln!(out);
        }

        let _ = writeln!(out, "Overall");
        let _ = writeln!(out, "-------");
        let _ = writeln!(out, "Accounts: {}", self.entries.len());
        let _ = writeln!(
            out,
            "Repositories: {} ({} active, {} archived)",
            self.total_active() + self.total_archived(),
            self.total_active(),
            self.total_archived()
        );
        let _ = writeln!(out, "Disk usage: {}", format_size(self.disk_usage));

        out
    }

    /// Write the report to `<root>/BACKUP_SUMMARY.txt`
    pub fn write(&self, root: &Path) -> Result<PathBuf> {
        let path = root.join(SUMMARY_FILE);
        std::fs::write(&path, self.render())
            .with_context(|| format!("Failed to write summary: {}", path.display()))?;
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::git::CloneResult;
    use crate::github::Account;
    use tempfile::TempDir;

    fn mkdirs(root: &Path, dirs: &[&str]) {
        for dir in dirs {
            std::fs::create_dir_all(root.join(dir)).unwrap();
        }
    }

    #[test]
    fn test_scan_account_splits_archived() {
        let temp = TempDir::new().unwrap();
        mkdirs(temp.path(), &["beta", "alpha", "archive/old", "archive/older"]);
        std::fs::write(temp.path().join("stray.txt"), "x").unwrap();

        let summary = scan_account(temp.path(), "acme").unwrap();

        assert_eq!(summary.active, vec!["alpha", "beta"]);
        assert_eq!(summary.archived, vec!["old", "older"]);
        assert_eq!(summary.total(), 4);
    }

    #[test]
    fn test_scan_missing_account_is_empty() {
        let temp = TempDir::new().unwrap();
        let summary = scan_account(&temp.path().join("ghost"), "ghost").unwrap();
        assert_eq!(summary.total(), 0);
    }

    #[test]
    fn test_disk_usage_counts_nested_files() {
        let temp = TempDir::new().unwrap();
        mkdirs(temp.path(), &["a/b"]);
        std::fs::write(temp.path().join("a/one"), vec![0u8; 100]).unwrap();
        std::fs::write(temp.path().join("a/b/two"), vec![0u8; 24]).unwrap();

        assert_eq!(disk_usage(temp.path()), 124);
    }

    #[test]
    fn test_format_size() {
        assert_eq!(format_size(512), "512 B");
        assert_eq!(format_size(2048), "2.0 KB");
        assert_eq!(format_size(5 * 1024 * 1024 + 512 * 1024), "5.5 MB");
    }

    #[test]
    fn test_summary_matches_disk() {
        let temp = TempDir::new().unwrap();
        mkdirs(temp.path(), &["acme/api", "acme/web", "acme/archive/legacy"]);

        let reports = vec![
            AccountReport {
                account: Account::organization("acme"),
                outcome: AccountOutcome::Completed,
                results: vec![
                    CloneResult::Cloned {
                        name: "api".into(),
                        path: temp.path().join("acme/api"),
                    },
                    CloneResult::Skipped {
                        name: "web".into(),
                        path: temp.path().join("acme/web"),
                    },
                    CloneResult::Failed {
                        name: "broken".into(),
                        path: temp.path().join("acme/broken"),
                        error: "boom".into(),
                    },
                ],
            },
            AccountReport {
                account: Account::organization("ghost"),
                outcome: AccountOutcome::NotFound("Not Found".into()),
                results: Vec::new(),
            },
        ];

        let summary = BackupSummary::collect(temp.path(), "2024-05-01", &reports).unwrap();
        assert_eq!(summary.total_active(), 2);
        assert_eq!(summary.total_archived(), 1);
        assert_eq!(
            summary.entries[0].stats,
            CloneStats {
                cloned: 1,
                skipped: 1,
                failed: 1
            }
        );

        let path = summary.write(temp.path()).unwrap();
        let text = std::fs::read_to_string(path).unwrap();
        assert!(text.contains("Date: 2024-05-01"));
        assert!(text.contains("[acme] (organization)"));
        assert!(text.contains("Active repositories: 2"));
        assert!(text.contains("    - legacy"));
        assert!(text.contains("This run: 1 cloned, 1 skipped, 1 failed"));
        assert!(text.contains("Not found, skipped"));
        assert!(text.contains("Repositories: 3 (2 active, 1 archived)"));
    }
}
