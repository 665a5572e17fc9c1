use anyhow::{anyhow, bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use repovault::config::TargetOverrides;
use repovault::health::CheckResult;
use repovault::summary::format_size;
use repovault::{
    AccountOutcome, ArchiveOutcome, BackupEngine, BackupError, BackupRun, CloneResult, Config, GitHubClient,
    HealthCheck,
};

#[derive(Parser)]
#[command(name = "repovault")]
#[command(about = "Dated backups of GitHub organizations and personal accounts")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Configuration file path (defaults to XDG config location)
    #[arg(short, long, global = true)]
    config: Option<std::path::PathBuf>,

    /// Verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Clone every repository into today's workspace and archive it (default)
    Run {
        #[command(flatten)]
        target: TargetArgs,

        /// Leave the workspace as a plain folder
        #[arg(long)]
        no_archive: bool,
    },

    /// List the repositories a run would clone
    List {
        #[command(flatten)]
        target: TargetArgs,
    },

    /// Write a default configuration file
    Init {
        /// Directory for dated backups
        #[arg(short, long, default_value = ".")]
        output_dir: String,

        /// Overwrite an existing configuration file
        #[arg(long)]
        force: bool,
    },

    /// System health check and diagnostics
    Doctor,
}

#[derive(Args, Clone, Default)]
struct TargetArgs {
    /// Organization to back up (repeatable, replaces the configured list)
    #[arg(long = "org", value_name = "ORG")]
    orgs: Vec<String>,

    /// Personal account to back up
    #[arg(long, value_name = "USER")]
    user: Option<String>,

    /// Skip organization repositories
    #[arg(long)]
    no_orgs: bool,

    /// Skip personal repositories
    #[arg(long)]
    no_personal: bool,

    /// Directory for dated backups
    #[arg(short, long)]
    output_dir: Option<String>,
}

impl TargetArgs {
    fn overrides(&self, no_archive: bool) -> TargetOverrides {
        TargetOverrides {
            organizations: self.orgs.clone(),
            username: self.user.clone(),
            no_orgs: self.no_orgs,
            no_personal: self.no_personal,
            no_archive,
            output_directory: self.output_dir.clone(),
        }
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    if let Err(e) = dispatch(cli).await {
        eprintln!("❌ {:#}", e);
        if let Some(hint) = e.downcast_ref::<BackupError>().and_then(BackupError::remediation) {
            eprintln!("💡 {}", hint);
        }
        std::process::exit(1);
    }
}

async fn dispatch(cli: Cli) -> Result<()> {
    let command = cli.command.unwrap_or(Commands::Run {
        target: TargetArgs::default(),
        no_archive: false,
    });

    match command {
        Commands::Init { output_dir, force } => {
            init_logging(cli.verbose);
            cmd_init(&output_dir, force)
        }
        Commands::Run { target, no_archive } => {
            let config = prepare(cli.config, cli.verbose, &target.overrides(no_archive))?;
            cmd_run(config).await
        }
        Commands::List { target } => {
            let config = prepare(cli.config, cli.verbose, &target.overrides(false))?;
            cmd_list(config).await
        }
        Commands::Doctor => {
            let config = prepare(cli.config, cli.verbose, &TargetOverrides::default())?;
            cmd_doctor(&config).await
        }
    }
}

/// Load configuration and start logging at the configured verbosity
fn prepare(
    config_path: Option<std::path::PathBuf>,
    verbose: bool,
    overrides: &TargetOverrides,
) -> Result<Config> {
    let config = load_config(config_path, overrides)?;

    init_logging(verbose || config.logging.debug);
    info!("Starting RepoVault v{}", env!("CARGO_PKG_VERSION"));

    Ok(config)
}

/// Initialize logging to stderr based on verbosity level
fn init_logging(verbose: bool) {
    let filter = if verbose {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug"))
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();
}

/// Load configuration, then layer environment and command line overrides
fn load_config(config_path: Option<std::path::PathBuf>, overrides: &TargetOverrides) -> Result<Config> {
    let mut config = match config_path {
        Some(path) => Config::load(&path)?,
        None => Config::load_or_default()?,
    };

    config.apply_env();
    config.apply_overrides(overrides)?;

    Ok(config)
}

/// Write a default configuration file
fn cmd_init(output_dir: &str, force: bool) -> Result<()> {
    let config_path = Config::default_config_path()?;

    if config_path.exists() && !force {
        bail!(
            "Configuration already exists at {:?} (use --force to overwrite)",
            config_path
        );
    }

    if let Some(parent) = config_path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create config directory: {:?}", parent))?;
    }

    let config = Config {
        output_directory: output_dir.to_string(),
        ..Config::default()
    };
    config.save(&config_path)?;

    info!("Configuration saved to: {:?}", config_path);

    println!("✅ RepoVault initialized");
    println!("   Config: {:?}", config_path);
    println!("   Next: set github.token (or GITHUB_TOKEN), github.username and");
    println!("         github.organizations, then run 'repovault run'");

    Ok(())
}

/// Clone, summarize and archive
async fn cmd_run(config: Config) -> Result<()> {
    let mut engine = BackupEngine::new(config)?;
    let run = BackupRun::today(engine.config());

    let accounts: Vec<_> = run.accounts().map(|a| a.name.as_str()).collect();
    println!("🗄️  RepoVault backup {}", run.date);
    println!("   Workspace: {}", run.root.display());
    println!("   Accounts: {}", accounts.join(", "));

    let report = engine.run(run).await?;

    println!("\n📊 Backup Summary");
    for entry in &report.summary.entries {
        match &entry.outcome {
            AccountOutcome::Completed => println!(
                "   📁 {}: {} cloned, {} skipped, {} failed",
                entry.repositories.name, entry.stats.cloned, entry.stats.skipped, entry.stats.failed
            ),
            AccountOutcome::NotFound(reason) => {
                println!("   ⚠️  {}: not found ({})", entry.repositories.name, reason)
            }
        }
    }
    println!(
        "   Repositories on disk: {} active, {} archived",
        report.summary.total_active(),
        report.summary.total_archived()
    );
    println!("   Disk usage: {}", format_size(report.summary.disk_usage));
    println!("   Summary: {}", report.summary_path.display());

    let failures: Vec<_> = report.failed_clones().collect();
    if !failures.is_empty() {
        println!("\n🔍 Failed Clones:");
        for result in failures {
            if let CloneResult::Failed { path, error, .. } = result {
                println!("   ❌ {}: {}", path.display(), error);
            }
        }
    }

    println!();
    match &report.archive {
        ArchiveOutcome::Created { path, size, .. } => {
            println!("📦 Archive: {} ({})", path.display(), format_size(*size));
        }
        ArchiveOutcome::ToolMissing { folder } => {
            println!("⚠️  No zip or tar found; backup left unarchived at {}", folder.display());
        }
        ArchiveOutcome::Disabled { folder } => {
            println!("📂 Backup folder: {}", folder.display());
        }
    }

    println!();
    print!("{}", report.preview);

    if !report.is_success() {
        let missing: Vec<_> = report
            .not_found()
            .map(|r| r.account.name.as_str())
            .collect();
        return Err(anyhow!("Accounts not found: {}", missing.join(", ")));
    }

    Ok(())
}

/// List repositories that would be cloned
async fn cmd_list(config: Config) -> Result<()> {
    config.validate()?;
    let client = GitHubClient::new(&config)?;
    let run = BackupRun::today(&config);

    let mut missing = Vec::new();
    for account in run.accounts() {
        match client.list_repositories(account).await {
            Ok(repositories) => {
                println!("{} ({} repositories):", account, repositories.len());
                for repo in repositories {
                    if repo.archived {
                        println!("  🗃️  {} (archived)", repo.name);
                    } else {
                        println!("  📁 {}", repo.name);
                    }
                }
            }
            Err(BackupError::NotFound(reason)) => {
                println!("⚠️  {}: not found ({})", account, reason);
                missing.push(account.name.clone());
            }
            Err(e) => return Err(e.into()),
        }
    }

    if !missing.is_empty() {
        bail!("Accounts not found: {}", missing.join(", "));
    }

    Ok(())
}

/// System health check and diagnostics
async fn cmd_doctor(config: &Config) -> Result<()> {
    let health = HealthCheck::run(config).await;
    print_health_report(&health);

    let warnings = health.warnings();
    if !warnings.is_empty() {
        println!("⚠️  {} warning(s)", warnings.len());
    }

    let errors = health.errors();
    if !errors.is_empty() {
        let failed: Vec<_> = errors.iter().map(|c| c.message.as_str()).collect();
        bail!("{} check(s) failed: {}", errors.len(), failed.join("; "));
    }
    Ok(())
}

/// Print health check report to stdout
fn print_health_report(health: &HealthCheck) {
    fn print_check(name: &str, result: &CheckResult) {
        println!("{}:", name);
        let icon = if result.passed {
            if result.is_warning { "⚠️ " } else { "✅" }
        } else {
            "❌"
        };
        println!("  {} {}", icon, result.message);
        if let Some(details) = &result.details {
            for line in details.lines() {
                println!("     {}", line);
            }
        }
    }

    println!("🔍 RepoVault System Diagnostics");
    println!();

    for (name, result) in health.all_checks() {
        print_check(name, result);
        println!();
    }

    if health.all_passed() {
        println!("✅ All checks passed");
    } else {
        println!("❌ Some checks failed");
    }
}
