//! Workspace compression
//!
//! Shells out to `zip` (preferred) or `tar` to pack the dated workspace,
//! leaving out every `.git` directory.

use anyhow::{anyhow, Context, Result};
use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::Command as AsyncCommand;
use tracing::{debug, info, warn};

use crate::config::{ArchiveFormatPreference, Config};
use crate::summary::scan_account;

/// Repositories listed per account in the tree preview
const PREVIEW_LIMIT: usize = 5;

/// Archive container produced by an external tool
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveFormat {
    Zip,
    TarGz,
}

impl ArchiveFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            ArchiveFormat::Zip => "zip",
            ArchiveFormat::TarGz => "tar.gz",
        }
    }

    pub fn tool(&self) -> &'static str {
        match self {
            ArchiveFormat::Zip => "zip",
            ArchiveFormat::TarGz => "tar",
        }
    }
    /// Harmless argument the tool answers with exit status 0
    fn probe_arg(&self) -> &'static str {
        match self {
            ArchiveFormat::Zip => "-h",
            ArchiveFormat::TarGz => "--version",
        }
    }
}

/// What happened at the archiving step
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArchiveOutcome {
    /// Archive written next to the workspace
    Created {
        path: PathBuf,
        format: ArchiveFormat,
        size: u64,
    },
    /// No usable archive tool; the workspace is left as a plain folder
    ToolMissing { folder: PathBuf },
    /// Archiving turned off in configuration
    Disabled { folder: PathBuf },
}

async fn tool_responds(program: &str, arg: &str) -> bool {
    AsyncCommand::new(program)
        .arg(arg)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .await
        .map(|status| status.success())
        .unwrap_or(false)
}

/// Whether the tool behind `format` can be run on this host
pub async fn is_tool_available(format: ArchiveFormat) -> bool {
    tool_responds(format.tool(), format.probe_arg()).await
}

/// Archive formats whose tool is installed, zip first
pub async fn available_formats() -> Vec<ArchiveFormat> {
    let mut found = Vec::new();
    for format in [ArchiveFormat::Zip, ArchiveFormat::TarGz] {
        if is_tool_available(format).await {
            found.push(format);
        }
    }
    debug!("Archive tools available: {:?}", found);
    found
}

/// Choose the archive format given which tools are installed
pub fn select_format<F>(preference: ArchiveFormatPreference, available: F) -> Option<ArchiveFormat>
where
    F: Fn(&str) -> bool,
{
    let candidates: &[ArchiveFormat] = match preference {
        ArchiveFormatPreference::Auto => &[ArchiveFormat::Zip, ArchiveFormat::TarGz],
        ArchiveFormatPreference::Zip => &[ArchiveFormat::Zip],
        ArchiveFormatPreference::Tar => &[ArchiveFormat::TarGz],
    };

    candidates
        .iter()
        .copied()
        .find(|format| available(format.tool()))
}

/// Arguments for the archive tool, run from the directory holding `root_name`
pub fn archive_args(format: ArchiveFormat, root_name: &str, excluded: &[String]) -> Vec<String> {
    let archive_name = format!("{}.{}", root_name, format.extension());

    match format {
        ArchiveFormat::Zip => {
            let mut args = vec![
                "-r".to_string(),
                "-q".to_string(),
                archive_name,
                root_name.to_string(),
                "-x".to_string(),
                "*/.git/*".to_string(),
            ];
            for folder in excluded {
                args.push(format!("{}/{}/*", root_name, folder));
            }
            args
        }
        ArchiveFormat::TarGz => {
            let mut args = vec![
                "-czf".to_string(),
                archive_name,
                "--exclude=.git".to_string(),
            ];
            for folder in excluded {
                args.push(format!("--exclude={}/{}", root_name, folder));
            }
            args.push(root_name.to_string());
            args
        }
    }
}

/// Shallow listing of the workspace: accounts, first repositories, archived count
pub fn tree_preview(root: &Path, excluded: &[String]) -> Result<String> {
    let root_name = root
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| root.display().to_string());

    let mut accounts = Vec::new();
    for entry in std::fs::read_dir(root)
        .with_context(|| format!("Failed to read workspace {}", root.display()))?
    {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy().into_owned();
        if entry.file_type()?.is_dir() && !excluded.contains(&name) {
            accounts.push(name);
        }
    }
    accounts.sort();

    let mut out = String::new();
    let _ = writeln!(out, "{}/", root_name);
    for account in accounts {
        let summary = scan_account(&root.join(&account), &account)?;
        let _ = writeln!(out, "  {}/", account);
        for repo in summary.active.iter().take(PREVIEW_LIMIT) {
            let _ = writeln!(out, "    {}", repo);
        }
        if summary.active.len() > PREVIEW_LIMIT {
            let _ = writeln!(out, "    ... and {} more", summary.active.len() - PREVIEW_LIMIT);
        }
        if !summary.archived.is_empty() {
            let _ = writeln!(out, "    archive/ ({} repositories)", summary.archived.len());
        }
    }

    Ok(out)
}

/// Packs a finished workspace
pub struct Archiver {
    enabled: bool,
    preference: ArchiveFormatPreference,
    excluded: Vec<String>,
}

impl Archiver {
    /// `excluded` holds top-level account folders to leave out of the archive
    pub fn new(config: &Config, excluded: Vec<String>) -> Self {
        Self {
            enabled: config.archive.enabled,
            preference: config.archive.format,
            excluded,
        }
    }

    pub fn excluded(&self) -> &[String] {
        &self.excluded
    }

    /// Compress `root` into a sibling archive file
    pub async fn archive(&self, root: &Path) -> Result<ArchiveOutcome> {
        if !self.enabled {
            info!("Archiving disabled, leaving {}", root.display());
            return Ok(ArchiveOutcome::Disabled {
                folder: root.to_path_buf(),
            });
        }

        let available = available_formats().await;
        let Some(format) = select_format(self.preference, |tool| {
            available.iter().any(|f| f.tool() == tool)
        }) else {
            warn!(
                "No archive tool found ({:?}), leaving {} unarchived",
                self.preference,
                root.display()
            );
            return Ok(ArchiveOutcome::ToolMissing {
                folder: root.to_path_buf(),
            });
        };

        let parent = match root.parent() {
            Some(p) if !p.as_os_str().is_empty() => p,
            _ => Path::new("."),
        };
        let root_name = root
            .file_name()
            .ok_or_else(|| anyhow!("Workspace {} has no name", root.display()))?
            .to_string_lossy()
            .into_owned();

        let archive_path = parent.join(format!("{}.{}", root_name, format.extension()));
        if archive_path.exists() {
            info!("Replacing existing archive {}", archive_path.display());
            tokio::fs::remove_file(&archive_path)
                .await
                .with_context(|| format!("Failed to remove {}", archive_path.display()))?;
        }

        let args = archive_args(format, &root_name, &self.excluded);
        info!("Creating {} with {}", archive_path.display(), format.tool());
        debug!("{} {}", format.tool(), args.join(" "));

        let output = AsyncCommand::new(format.tool())
            .args(&args)
            .current_dir(parent)
            .output()
            .await
            .with_context(|| format!("Failed to execute {}", format.tool()))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(anyhow!("{} failed: {}", format.tool(), stderr.trim()));
        }

        let size = tokio::fs::metadata(&archive_path)
            .await
            .with_context(|| format!("Archive {} was not created", archive_path.display()))?
            .len();

        Ok(ArchiveOutcome::Created {
            path: archive_path,
            format,
            size,
        })
    }
}
