//! # Backchain CLI - Incremental backups you can walk back through
//!
//! Command-line front end for the Backchain library.
//!
//! ## Features
//! - Register source/destination pairs and their exclusions
//! - Back up every registered pair, storing only changed files
//! - List every distinct version of a file across the archive chain
//! - Restore files, folders or whole trees, in place or elsewhere
//!
//! ## Usage
//! ```bash
//! # Register a directory
//! backchain add ~/docs /mnt/backup/docs
//!
//! # Skip scratch files in that pair
//! backchain contains ~/docs /mnt/backup/docs scratch
//!
//! # Back up everything registered
//! backchain backup
//!
//! # See which versions of a file exist, then restore the second newest
//! backchain versions notes.txt
//! backchain restore notes.txt --index 1
//!
//! # Restore the first pair into a scratch directory
//! backchain restore '#1' --to /tmp/docs
//! ```

use anyhow::{anyhow, Context};
use backchain::registry::default_registry_path;
use backchain::{
    Backchain, BackchainError, BackupOutcome, BackupStatus, Backup, DirectoryPair, PathRules,
    ProgressCallback, Registry, RestoreReport, VersionSelector,
};
use backchain::utils::format_bytes;
use clap::{Parser, Subcommand};
use colored::*;
use humantime::format_duration;
use indicatif::{ProgressBar, ProgressStyle};
use std::io::{self, BufRead, IsTerminal, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing_subscriber::EnvFilter;

/// Backchain CLI - incremental, content-addressed backups
#[derive(Parser)]
#[command(name = "backchain")]
#[command(version)]
#[command(about = "Incremental backups as a chain of tar.gz archives")]
#[command(long_about = None)]
struct Cli {
    /// Registry file (defaults to $BACKCHAIN_CONFIG or ~/.backchain)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Print results as JSON
    #[arg(long, global = true)]
    json: bool,

    /// Match names without regard to case
    #[arg(long, global = true)]
    ignore_case: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show registered pairs and global skips
    #[command(alias = "ls")]
    List,

    /// Register a source directory and its backup destination
    Add {
        /// Directory to back up
        source: PathBuf,
        /// Directory receiving archives
        destination: PathBuf,
    },

    /// Unregister a pair (existing archives are kept)
    #[command(alias = "rm")]
    Delete {
        /// Source of the pair
        #[arg(required_unless_present = "number")]
        source: Option<PathBuf>,
        /// Destination of the pair
        #[arg(required_unless_present = "number")]
        destination: Option<PathBuf>,
        /// Position as shown by `list` (1-based)
        #[arg(short, long, conflicts_with_all = ["source", "destination"])]
        number: Option<usize>,
    },

    /// Add glob exclusions to a pair
    Skip {
        source: PathBuf,
        destination: PathBuf,
        #[arg(required = true)]
        patterns: Vec<String>,
    },

    /// Exclude paths containing the given text
    Contains {
        source: PathBuf,
        destination: PathBuf,
        #[arg(required = true)]
        patterns: Vec<String>,
    },

    /// Add exclusions applied to every pair
    AddGlobalSkip {
        #[arg(required = true)]
        patterns: Vec<String>,
    },

    /// Remove global exclusions
    DeleteGlobalSkip {
        #[arg(required = true)]
        patterns: Vec<String>,
    },

    /// Back up every registered pair, or only `#n`
    #[command(alias = "bk")]
    Backup {
        /// Pair selector such as `#2`
        selector: Option<String>,

        /// Keep archives that only record deleted files
        #[arg(long)]
        record_deletions: bool,

        /// Show progress
        #[arg(long)]
        progress: bool,
    },

    /// Restore files or folders; with no names, restore everything
    #[command(alias = "rs")]
    Restore {
        /// Optional `#n` pair selector followed by names
        names: Vec<String>,

        /// Version to restore, 0 is the newest
        #[arg(short, long)]
        index: Option<usize>,

        /// Restore under this directory instead of in place
        #[arg(short, long)]
        to: Option<PathBuf>,
    },

    /// Restore from an archive directory that is not registered
    TempRestore {
        /// Directory holding the archives
        backup_dir: PathBuf,

        /// Names to restore; everything when empty
        names: Vec<String>,

        /// Where to place restored files
        #[arg(short, long)]
        to: PathBuf,
    },

    /// List the distinct versions of a name
    Versions {
        name: String,
    },
}

/// Asks on the terminal which version to restore
struct PromptSelector;

impl VersionSelector for PromptSelector {
    fn select(&self, name: &str, versions: &[Arc<Backup>]) -> backchain::Result<Option<usize>> {
        if !io::stdin().is_terminal() {
            return Err(BackchainError::SelectionRequired {
                name: name.to_string(),
                versions: versions.len(),
            });
        }

        println!("{} versions of {}:", versions.len(), name.cyan());
        for (i, backup) in versions.iter().enumerate() {
            println!("  [{}] {}", i.to_string().yellow(), backup.archive_path().display());
        }
        print!("Version to restore (blank to cancel): ");
        io::stdout().flush()?;

        let mut line = String::new();
        io::stdin().lock().read_line(&mut line)?;
        let line = line.trim();
        if line.is_empty() {
            return Ok(None);
        }
        line.parse()
            .map(Some)
            .map_err(|_| BackchainError::custom(format!("'{}' is not a version number", line)))
    }
}

fn main() {
    let cli = Cli::parse();

    let level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level)))
        .with_writer(io::stderr)
        .init();

    if std::env::var("NO_COLOR").is_ok() {
        colored::control::set_override(false);
    }

    if let Err(e) = run(cli) {
        let message = match e.downcast_ref::<BackchainError>() {
            Some(err) => err.user_message(),
            None => format!("{:#}", e),
        };
        eprintln!("{}: {}", "Error".red().bold(), message);
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> anyhow::Result<()> {
    let rules = if cli.ignore_case {
        PathRules::case_insensitive()
    } else {
        PathRules::platform()
    };
    let registry_path = match cli.config {
        Some(path) => path,
        None => default_registry_path().ok_or_else(|| anyhow!("No home directory; pass --config"))?,
    };
    let json = cli.json;

    match cli.command {
        Commands::List => cmd_list(&registry_path, rules, json),
        Commands::Add { source, destination } => {
            let mut registry = Registry::init(&registry_path, rules)?;
            let index = registry.add_pair(&source, &destination)?;
            registry.save(&registry_path)?;
            let pair = &registry.pairs()[index];
            println!(
                "{} Added #{} {} → {}",
                "✓".green().bold(),
                index + 1,
                pair.source.display().to_string().cyan(),
                pair.destination.display().to_string().cyan()
            );
            Ok(())
        }
        Commands::Delete { source, destination, number } => {
            let mut registry = Registry::init(&registry_path, rules)?;
            let removed = match (number, source, destination) {
                (Some(n), _, _) => registry.remove_pair_at(
                    n.checked_sub(1)
                        .ok_or_else(|| BackchainError::NotFound("registry entry 0".to_string()))?,
                )?,
                (None, Some(source), Some(destination)) => registry.remove_pair(&source, &destination)?,
                _ => return Err(anyhow!("Give a source and destination, or --number")),
            };
            registry.save(&registry_path)?;
            println!(
                "{} Removed {} → {}",
                "✓".green().bold(),
                removed.source.display(),
                removed.destination.display()
            );
            Ok(())
        }
        Commands::Skip { source, destination, patterns } => {
            cmd_skip(&registry_path, rules, &source, &destination, &patterns, false)
        }
        Commands::Contains { source, destination, patterns } => {
            cmd_skip(&registry_path, rules, &source, &destination, &patterns, true)
        }
        Commands::AddGlobalSkip { patterns } => {
            let mut registry = Registry::init(&registry_path, rules)?;
            let added = registry.add_global_exclusions(&patterns)?;
            registry.save(&registry_path)?;
            for pattern in added {
                println!("{} Skipping {} everywhere", "✓".green().bold(), pattern.yellow());
            }
            Ok(())
        }
        Commands::DeleteGlobalSkip { patterns } => {
            let mut registry = Registry::init(&registry_path, rules)?;
            let removed = registry.remove_global_exclusions(&patterns)?;
            registry.save(&registry_path)?;
            for pattern in removed {
                println!("{} No longer skipping {}", "✓".green().bold(), pattern.yellow());
            }
            Ok(())
        }
        Commands::Backup { selector, record_deletions, progress } => {
            cmd_backup(&registry_path, rules, selector, record_deletions, progress, json)
        }
        Commands::Restore { names, index, to } => {
            let registry = Registry::load(&registry_path, rules)?;
            let backchain = restorer(rules);
            let report = backchain.restore(registry.pairs(), &names, index, to.as_deref())?;
            print_report(&report, json)
        }
        Commands::TempRestore { backup_dir, names, to } => {
            if !backup_dir.is_dir() {
                return Err(BackchainError::NotFound(backup_dir.display().to_string()).into());
            }
            let report = restorer(rules).temp_restore(&backup_dir, &names, &to)?;
            print_report(&report, json)
        }
        Commands::Versions { name } => cmd_versions(&registry_path, rules, &name, json),
    }
}

fn restorer(rules: PathRules) -> Backchain {
    Backchain::builder()
        .path_rules(rules)
        .version_selector(Arc::new(PromptSelector))
        .build()
}

fn cmd_list(registry_path: &Path, rules: PathRules, json: bool) -> anyhow::Result<()> {
    let registry = Registry::load(registry_path, rules)?;

    if json {
        let value = serde_json::json!({
            "version": registry.version(),
            "pairs": registry.pairs(),
            "global_exclusions": registry.global_exclusions(),
        });
        println!("{}", serde_json::to_string_pretty(&value)?);
        return Ok(());
    }

    if registry.pairs().is_empty() {
        println!("{}", "No directories registered".yellow());
        println!("  Add one with: {}", "backchain add <source> <destination>".yellow());
    }
    for (i, pair) in registry.pairs().iter().enumerate() {
        println!(
            "{} {} → {}",
            format!("#{}", i + 1).yellow().bold(),
            pair.source.display().to_string().cyan(),
            pair.destination.display()
        );
        if !pair.exclusions.is_empty() {
            println!("    skips: {}", pair.exclusions.join(", "));
        }
    }
    if !registry.global_exclusions().is_empty() {
        println!("{} {}", "Global skips:".bold(), registry.global_exclusions().join(", "));
    }
    Ok(())
}

fn cmd_skip(
    registry_path: &Path,
    rules: PathRules,
    source: &Path,
    destination: &Path,
    patterns: &[String],
    contains: bool,
) -> anyhow::Result<()> {
    let mut registry = Registry::init(registry_path, rules)?;
    let added = registry.add_exclusions(source, destination, patterns, contains)?;
    registry.save(registry_path)?;
    for pattern in added {
        println!("{} Skipping {}", "✓".green().bold(), pattern.yellow());
    }
    Ok(())
}

fn cmd_backup(
    registry_path: &Path,
    rules: PathRules,
    selector: Option<String>,
    record_deletions: bool,
    show_progress: bool,
    json: bool,
) -> anyhow::Result<()> {
    let registry = Registry::load(registry_path, rules)
        .with_context(|| format!("Reading registry {}", registry_path.display()))?;
    let pairs: Vec<DirectoryPair> = match selector {
        Some(selector) => {
            let n: usize = selector
                .strip_prefix('#')
                .and_then(|n| n.parse().ok())
                .ok_or_else(|| anyhow!("Expected a pair selector like #1, got {}", selector))?;
            let pair = n
                .checked_sub(1)
                .and_then(|i| registry.pairs().get(i))
                .ok_or_else(|| BackchainError::NotFound(format!("#{}", n)))?;
            vec![pair.clone()]
        }
        None => registry.pairs().to_vec(),
    };
    if pairs.is_empty() {
        println!("{}", "No directories registered".yellow());
        return Ok(());
    }

    let spinner = if show_progress && !json {
        let pb = ProgressBar::new_spinner();
        pb.set_style(
            ProgressStyle::default_spinner()
                .template("{spinner:.green} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner()),
        );
        pb.enable_steady_tick(Duration::from_millis(100));
        Some(pb)
    } else {
        None
    };

    let mut builder = Backchain::builder()
        .registry(&registry)
        .path_rules(rules)
        .record_deletions(record_deletions);
    if let Some(pb) = &spinner {
        let pb = pb.clone();
        let callback: ProgressCallback = Arc::new(move |info| {
            pb.set_message(format!("{} {} files", info.operation, info.processed));
        });
        builder = builder.progress(callback);
    }
    let backchain = builder.build();

    let start = Instant::now();
    let results = backchain.backup_all(&pairs);
    if let Some(pb) = spinner {
        pb.finish_and_clear();
    }

    let mut failures = 0;
    let mut outcomes = Vec::new();
    for (pair, result) in pairs.iter().zip(results) {
        match result {
            Ok(outcome) => {
                if !json {
                    print_outcome(pair, &outcome);
                }
                outcomes.push(outcome);
            }
            Err(e) => {
                failures += 1;
                eprintln!(
                    "{} {}: {}",
                    "✗".red().bold(),
                    pair.source.display(),
                    e.user_message()
                );
            }
        }
    }

    if json {
        println!("{}", serde_json::to_string_pretty(&outcomes)?);
    } else {
        println!("  Time: {}", format_duration(round_to_millis(start.elapsed())).to_string().cyan());
    }

    if failures > 0 {
        return Err(anyhow!("{} of {} backups failed", failures, pairs.len()));
    }
    Ok(())
}

fn print_outcome(pair: &DirectoryPair, outcome: &BackupOutcome) {
    let source = pair.source.display().to_string();
    match outcome.status {
        BackupStatus::Written => {
            let archive = outcome
                .archive
                .as_ref()
                .map(|p| p.display().to_string())
                .unwrap_or_default();
            println!("{} {} → {}", "✓".green().bold(), source.cyan(), archive);
            println!(
                "  Stored: {} of {} files ({})",
                outcome.files_added.to_string().cyan(),
                outcome.files_indexed,
                format_bytes(outcome.bytes_added)
            );
            if outcome.files_missing > 0 {
                println!("  Missing since last backup: {}", outcome.files_missing.to_string().yellow());
            }
        }
        BackupStatus::NoChanges => println!("{} {}: no changes", "•".blue(), source),
        BackupStatus::DeletionsOnlyDiscarded => println!(
            "{} {}: {} files deleted, nothing new to store",
            "•".blue(),
            source,
            outcome.files_missing
        ),
        BackupStatus::EmptySource => println!("{} {}: no files found", "!".yellow().bold(), source),
    }
}

fn cmd_versions(registry_path: &Path, rules: PathRules, name: &str, json: bool) -> anyhow::Result<()> {
    let registry = Registry::load(registry_path, rules)?;
    let backchain = Backchain::builder().path_rules(rules).build();
    let matches = backchain.versions(registry.pairs(), name);

    if json {
        let value = serde_json::json!({
            "files": matches.files.iter().map(|b| b.archive_path()).collect::<Vec<_>>(),
            "folders": matches.folders.iter().map(|b| b.archive_path()).collect::<Vec<_>>(),
        });
        println!("{}", serde_json::to_string_pretty(&value)?);
        return Ok(());
    }

    if matches.is_empty() {
        return Err(BackchainError::NotFound(name.to_string()).into());
    }
    for (i, backup) in matches.files.iter().enumerate() {
        println!("[{}] {}", i.to_string().yellow(), backup.archive_path().display());
    }
    if !matches.folders.is_empty() {
        println!("{} {} archives contain a folder named {}", "•".blue(), matches.folders.len(), name.cyan());
    }
    Ok(())
}

fn print_report(report: &RestoreReport, json: bool) -> anyhow::Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(report)?);
        return Ok(());
    }

    println!(
        "{} Restored {} files ({} already current)",
        "✓".green().bold(),
        report.files_restored.to_string().cyan(),
        report.files_unchanged
    );
    if report.directories_created > 0 {
        println!("  Directories created: {}", report.directories_created);
    }
    for name in &report.not_found {
        println!("{} {} not found", "!".yellow().bold(), name);
    }
    for warning in &report.warnings {
        println!("{} {}", "!".yellow().bold(), warning);
    }
    Ok(())
}

fn round_to_millis(duration: Duration) -> Duration {
    Duration::from_millis(duration.as_millis() as u64)
}
