// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;

use tcsync::deps::pinned_versions;
use tcsync::download::{ProgressEvent, RunState};
use tcsync::error::describe;
use tcsync::reconcile::prune;
use tcsync::types::resource_dir;
use tcsync::{
    HttpCatalog, HttpTransport, OwnerFilter, ResourceKind, SyncConfig, SyncError, Synchronizer,
};

const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Exit codes following sysexits.h conventions
mod exit_codes {
    /// General error - unspecified error
    pub const ERROR: i32 = 1;
    /// Usage error - invalid command line arguments
    pub const USAGE: i32 = 64;
    /// Temporary failure - try again later
    pub const TEMP_FAIL: i32 = 75;
    /// Configuration error - invalid or missing config
    pub const CONFIG: i32 = 78;
}

use exit_codes::*;

/// Spinner helpers for consistent progress indicators
mod spinner {
    use indicatif::{ProgressBar, ProgressStyle};
    use std::time::Duration;

    /// Create a spinner with consistent styling
    pub fn create(message: &str) -> ProgressBar {
        let spinner = ProgressBar::new_spinner();
        if let Ok(style) = ProgressStyle::default_spinner()
            .tick_chars("\u{28FB}\u{28F9}\u{28FC}\u{28F8}\u{28FE}\u{28F6}\u{28F7}\u{28E7}\u{28CF}\u{28DF} ")
            .template("{spinner:.cyan} {msg}")
        {
            spinner.set_style(style);
        }
        spinner.set_message(message.to_string());
        spinner.enable_steady_tick(Duration::from_millis(80));
        spinner
    }

    /// A spinner that draws nothing (quiet mode)
    pub fn hidden() -> ProgressBar {
        ProgressBar::hidden()
    }
}

#[derive(Parser)]
#[command(name = "tcsync")]
#[command(version = VERSION)]
#[command(about = "Keep translation resources in step with the Door43 catalog.")]
#[command(long_about = "tcsync - translation resource synchronizer\n\n\
    Update languages:    tcsync sync --lang en --lang grc\n\
    See what is new:     tcsync check --lang en\n\
    Installed resources: tcsync list\n\
    Last run:            tcsync status\n\
    Configure:           tcsync config show\n\n\
    Newer resources are downloaded, installed per language and owner, and\n\
    superseded versions are pruned unless another resource pins them.")]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Resource root (overrides config and TCSYNC_RESOURCES)
    #[arg(long, global = true)]
    root: Option<PathBuf>,

    /// Quiet mode: minimal output, only essential information
    #[arg(short = 'q', long, global = true)]
    quiet: bool,

    /// Verbose mode: detailed output for debugging
    #[arg(short = 'v', long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Download and install everything newer than what is installed
    ///
    /// Examples:
    ///   tcsync sync --lang en --lang grc
    ///   tcsync sync --lang en --owner unfoldingWord
    Sync {
        /// Language to sync (repeatable; defaults to config languages)
        #[arg(short, long = "lang")]
        languages: Vec<String>,
        /// Only sync these owners (repeatable; defaults to config owners)
        #[arg(short, long = "owner")]
        owners: Vec<String>,
    },

    /// Show what a sync would download, without downloading
    ///
    /// Examples:
    ///   tcsync check --lang en
    Check {
        #[arg(short, long = "lang")]
        languages: Vec<String>,
        #[arg(short, long = "owner")]
        owners: Vec<String>,
    },

    /// List installed resources (latest version per owner)
    #[command(alias = "ls")]
    List,

    /// Remove superseded versions of one resource, keeping pinned ones
    ///
    /// Examples:
    ///   tcsync prune en ult --owner unfoldingWord
    Prune {
        /// Language id
        language: String,
        /// Resource id (ult, tn, ugnt, ...)
        resource: String,
        /// Owner whose versions are pruned (defaults to config default owner)
        #[arg(long)]
        owner: Option<String>,
    },

    /// Show the result of the last sync
    #[command(alias = "s")]
    Status,

    /// Configure settings
    ///
    /// Examples:
    ///   tcsync config show
    ///   tcsync config set-root ~/translationCore/resources
    ///   tcsync config set-concurrency 4
    Config {
        #[command(subcommand)]
        command: Option<ConfigCommands>,
    },
}

#[derive(Subcommand)]
enum ConfigCommands {
    /// Show current configuration
    Show,
    /// Set the resource root
    SetRoot { path: PathBuf },
    /// Set how many resources install at once
    SetConcurrency { concurrency: usize },
}

fn init_logging(verbose: bool, quiet: bool) {
    let default_level = if verbose {
        "tcsync=debug"
    } else if quiet {
        "error"
    } else {
        "warn"
    };
    let filter =
        EnvFilter::try_from_env("TCSYNC_LOG").unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn load_config(root: Option<PathBuf>) -> Result<SyncConfig> {
    let mut config = SyncConfig::load().context("Failed to load configuration")?;
    if let Some(root) = root {
        config.resource_root = root;
    }
    Ok(config)
}

fn build_synchronizer(config: &SyncConfig) -> Result<Synchronizer<HttpCatalog>> {
    let catalog = HttpCatalog::new(&config.catalog_url, config.socket_timeout())
        .context("Failed to create catalog client")?;
    let transport =
        HttpTransport::with_settings(config.socket_timeout(), config.max_attempts, config.retry_delay())
            .context("Failed to create HTTP transport")?;
    Ok(Synchronizer::from_config(config, catalog, transport))
}

fn pick<T: Clone>(given: Vec<T>, configured: &[T]) -> Vec<T> {
    if given.is_empty() {
        configured.to_vec()
    } else {
        given
    }
}

fn owner_filter(owners: Vec<String>) -> Option<OwnerFilter> {
    (!owners.is_empty()).then(|| OwnerFilter::new(owners))
}

/// Print a library error with hints and exit with a matching code.
fn exit_with(err: &SyncError) -> ! {
    eprintln!("{}", describe(err));
    let code = match err {
        SyncError::EmptyLanguageList => USAGE,
        SyncError::Config(_) => CONFIG,
        SyncError::Catalog(_) | SyncError::AllFailed { .. } | SyncError::Transport(_) => TEMP_FAIL,
        _ => ERROR,
    };
    std::process::exit(code);
}

async fn cmd_sync(config: &SyncConfig, languages: Vec<String>, owners: Vec<String>, quiet: bool) -> Result<()> {
    let languages = pick(languages, &config.languages);
    let filter = owner_filter(pick(owners, &config.owners));

    let (tx, mut rx) = mpsc::unbounded_channel();
    let sync = build_synchronizer(config)?.with_progress(tx);

    let progress = if quiet {
        spinner::hidden()
    } else {
        spinner::create("Checking the catalog...")
    };
    let bar = progress.clone();
    let reporter = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            match event {
                ProgressEvent::Started { resource } => bar.set_message(format!("Installing {}", resource)),
                ProgressEvent::FetchingPrerequisite { resource, prerequisite } => {
                    bar.set_message(format!("Fetching {} for {}", prerequisite, resource))
                }
                ProgressEvent::Installed { resource, .. } => {
                    bar.println(format!("{} {}", "[OK]".green(), resource))
                }
                ProgressEvent::Failed(e) => bar.println(format!("{} {}", "[X]".red(), e)),
            }
        }
    });

    let result = sync.synchronize(&languages, filter.as_ref()).await;
    // Dropping the synchronizer closes the progress channel.
    drop(sync);
    let _ = reporter.await;
    progress.finish_and_clear();

    let outcome = match result {
        Ok(outcome) => outcome,
        Err(e) => exit_with(&e),
    };

    if outcome.installed.is_empty() && outcome.errors.is_empty() {
        println!("{} Everything is up to date", "[OK]".green());
        return Ok(());
    }

    println!(
        "{} {} installed, {} failed",
        if outcome.errors.is_empty() { "[OK]".green() } else { "[!]".yellow() },
        outcome.installed.len(),
        outcome.errors.len()
    );
    for descriptor in &outcome.installed {
        println!("  {} {}", "+".green(), descriptor);
    }
    for error in &outcome.errors {
        println!("  {} {}", "x".red(), error);
    }
    Ok(())
}

async fn cmd_check(config: &SyncConfig, languages: Vec<String>, owners: Vec<String>) -> Result<()> {
    let languages = pick(languages, &config.languages);
    let filter = owner_filter(pick(owners, &config.owners));
    let sync = build_synchronizer(config)?;

    let items = match sync.check_for_updates(&languages, filter.as_ref()).await {
        Ok(items) => items,
        Err(e) => exit_with(&e),
    };

    if items.is_empty() {
        println!("{} Everything is up to date", "[OK]".green());
        return Ok(());
    }
    println!("{} resources to update:", items.len().to_string().bold());
    for item in &items {
        println!("  {:<40} {}", item.descriptor.to_string(), format!("{:?}", item.priority).dimmed());
    }
    Ok(())
}

fn cmd_list(config: &SyncConfig) -> Result<()> {
    let records = tcsync::inventory::scan(&config.resource_root)
        .with_context(|| format!("Failed to scan {:?}", config.resource_root))?;
    if records.is_empty() {
        println!("No resources installed under {}", config.resource_root.display());
        return Ok(());
    }
    println!(
        "{:<8} {:<8} {:<20} {:<10} {}",
        "LANG".bold(),
        "ID".bold(),
        "OWNER".bold(),
        "VERSION".bold(),
        "MODIFIED".bold()
    );
    for r in &records {
        println!(
            "{:<8} {:<8} {:<20} {:<10} {}",
            r.language_id,
            r.resource_id,
            r.owner,
            r.version,
            r.modified_time.as_deref().unwrap_or("-")
        );
    }
    Ok(())
}

fn cmd_prune(config: &SyncConfig, language: &str, resource: &str, owner: Option<String>) -> Result<()> {
    let owner = owner.unwrap_or_else(|| config.default_owner.clone());
    let kind = ResourceKind::from_resource_id(resource);
    let dir = resource_dir(&config.resource_root, language, resource, kind);
    let keep = pinned_versions(&config.resource_root, language, resource, &owner);

    let pruned = prune(&dir, &keep, &owner).with_context(|| format!("Failed to prune {:?}", dir))?;
    if pruned {
        println!("{} Pruned {}/{} for {}", "[OK]".green(), language, resource, owner);
        if !keep.is_empty() {
            let kept: Vec<_> = keep.into_iter().collect();
            println!("  kept pinned: {}", kept.join(", "));
        }
    } else {
        println!("Nothing to prune for {}/{} ({})", language, resource, owner);
    }
    Ok(())
}

fn cmd_status(config: &SyncConfig) -> Result<()> {
    let Some(state) = RunState::load(&config.resource_root).context("Failed to read last run")? else {
        println!("No sync has run yet. Start one with: tcsync sync --lang <language>");
        return Ok(());
    };
    println!(
        "Last sync: {} ({})",
        state.finished_at.format("%Y-%m-%d %H:%M:%S UTC"),
        state.languages.join(", ")
    );
    println!("  {} installed, {} failed", state.installed.len(), state.errors.len());
    for error in &state.errors {
        println!("  {} {}", "x".red(), error);
    }
    Ok(())
}

fn cmd_config(command: Option<ConfigCommands>) -> Result<()> {
    let path = SyncConfig::config_path();
    let mut config = SyncConfig::load_from(&path).context("Failed to load configuration")?;

    match command.unwrap_or(ConfigCommands::Show) {
        ConfigCommands::Show => {
            println!("{}", path.display().to_string().dimmed());
            println!("{}", serde_json::to_string_pretty(&config)?);
            return Ok(());
        }
        ConfigCommands::SetRoot { path } => config.resource_root = path,
        ConfigCommands::SetConcurrency { concurrency } => config.concurrency = concurrency,
    }

    if let Err(e) = config.validate() {
        exit_with(&e);
    }
    config.save().context("Failed to save configuration")?;
    println!("{} Saved {}", "[OK]".green(), path.display());
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose, cli.quiet);

    let command = match cli.command {
        Commands::Config { command } => return cmd_config(command),
        other => other,
    };

    let config = match load_config(cli.root) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{} {:#}", "[X]".red(), e);
            std::process::exit(CONFIG);
        }
    };

    match command {
        Commands::Sync { languages, owners } => cmd_sync(&config, languages, owners, cli.quiet).await,
        Commands::Check { languages, owners } => cmd_check(&config, languages, owners).await,
        Commands::List => cmd_list(&config),
        Commands::Prune { language, resource, owner } => cmd_prune(&config, &language, &resource, owner),
        Commands::Status => cmd_status(&config),
        Commands::Config { command } => cmd_config(command),
    }
}
