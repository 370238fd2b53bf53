// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

use rulesync::{
    path::default_snapshot_cache_dir,
    sync::{RecoveryChoice, RecoveryPrompt, SyncError, SyncReport, SyncState},
    Git2Snapshot, Supervisor, SyncProfile,
};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use indicatif::ProgressBar;
use inquire::Select;
use std::{
    fs,
    path::{Path, PathBuf},
    process::exit,
    time::Duration,
};
use tokio::time::{interval, MissedTickBehavior};
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Debug, Clone, Parser)]
#[command(
    about,
    override_usage = "\n  rulesync [options] <command> <profile>",
    subcommand_help_heading = "Commands",
    version
)]
struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

impl Cli {
    async fn run(self) -> Result<()> {
        match self.command {
            Command::Init(opts) => run_init(opts),
            Command::Sync(opts) => run_sync(opts),
            Command::Watch(opts) => run_watch(opts).await,
        }
    }
}

#[derive(Debug, Clone, Subcommand)]
enum Command {
    /// Write a placeholder sync profile to fill in.
    #[command(override_usage = "rulesync init [options] <profile>")]
    Init(InitOptions),

    /// Mirror the remote into the workspace once.
    #[command(override_usage = "rulesync sync [options] <profile>")]
    Sync(SyncOptions),

    /// Mirror now, then keep mirroring on the profile's interval.
    #[command(override_usage = "rulesync watch [options] <profile>")]
    Watch(SyncOptions),
}

#[derive(Parser, Clone, Debug)]
#[command(author, about, long_about)]
struct InitOptions {
    /// Path to write the new profile to.
    #[arg(value_name = "profile")]
    pub profile: PathBuf,
}

#[derive(Parser, Clone, Debug)]
#[command(author, about, long_about)]
struct SyncOptions {
    /// Path to the sync profile to use.
    #[arg(value_name = "profile")]
    pub profile: PathBuf,
}

#[tokio::main]
async fn main() {
    let layer = fmt::layer().compact();
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("info"))
        .unwrap();
    tracing_subscriber::registry().with(layer).with(filter).init();

    if let Err(error) = Cli::parse().run().await {
        error!("{error:?}");
        exit(1);
    }

    exit(0)
}

fn run_init(opts: InitOptions) -> Result<()> {
    if opts.profile.exists() {
        bail!("profile already exists at {:?}", opts.profile.display());
    }

    let mut profile = SyncProfile::default();
    profile.settings.remote = "<put url to remote here>".into();
    profile.settings.destination = "<put destination directory here>".into();
    profile.settings.interval_minutes = 30;

    fs::write(&opts.profile, profile.to_string())
        .with_context(|| format!("failed to write profile to {:?}", opts.profile.display()))?;
    info!("wrote placeholder profile to {:?}", opts.profile.display());

    Ok(())
}

fn run_sync(opts: SyncOptions) -> Result<()> {
    let profile = load_profile(&opts.profile)?;
    let mut supervisor = build_supervisor(profile, ProgressBar::no_length())?;

    let report = supervisor.request_sync()?;
    announce(&report);

    Ok(())
}

async fn run_watch(opts: SyncOptions) -> Result<()> {
    let profile = load_profile(&opts.profile)?;
    let minutes = profile.interval_minutes();
    if minutes == 0 {
        bail!("profile disables timed syncing (interval_minutes = 0); use `rulesync sync` instead");
    }

    let mut supervisor = build_supervisor(profile, ProgressBar::hidden())?;
    let mut ticker = interval(Duration::from_secs(minutes * 60));
    // INVARIANT: Ticks firing mid-attempt coalesce instead of bursting.
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        // First tick completes immediately, giving the startup sync.
        ticker.tick().await;
        let report = supervisor.request_sync()?;
        announce(&report);
    }
}

fn load_profile(path: &Path) -> Result<SyncProfile> {
    fs::read_to_string(path)
        .with_context(|| format!("failed to read profile at {:?}", path.display()))?
        .parse()
        .with_context(|| format!("failed to parse profile at {:?}", path.display()))
}

fn build_supervisor(
    profile: SyncProfile,
    bar: ProgressBar,
) -> Result<Supervisor<Git2Snapshot, TermRecovery>> {
    let cache_root = match profile.cache_root() {
        Some(path) => path.to_path_buf(),
        None => default_snapshot_cache_dir()?,
    };
    let access = Git2Snapshot::with_progress(cache_root, bar);

    Ok(Supervisor::new(profile, access, TermRecovery))
}

fn announce(report: &SyncReport) {
    match report.state {
        SyncState::Synced => info!("workspace rules are up to date"),
        _ => info!("workspace rules left as they were"),
    }

    if let Some(branch) = &report.resolved_branch {
        info!("remote default branch resolved to {branch:?}; pin it with `branch = \"{branch}\"` in the profile");
    }
}

/// Recovery surface backed by the terminal.
#[derive(Debug, Default)]
struct TermRecovery;

impl RecoveryPrompt for TermRecovery {
    fn choose_recovery(&mut self, error: &SyncError) -> RecoveryChoice {
        const RETRY: &str = "retry the sync";
        const LOCAL: &str = "work with the local copy";

        error!("first sync attempt failed: {error}");
        let picked = Select::new("how should we proceed?", vec![RETRY, LOCAL]).prompt();

        match picked {
            Ok(RETRY) => RecoveryChoice::Retry,
            Ok(_) => RecoveryChoice::UseLocalCopy,
            Err(prompt_error) => {
                // No terminal to ask on. The local copy path degrades
                // gracefully either way: cached rules or a notice.
                warn!("cannot prompt for recovery ({prompt_error}), using local copy");
                RecoveryChoice::UseLocalCopy
            }
        }
    }

    fn warn_failure(&mut self, error: &SyncError) {
        warn!("sync failed, previous rules remain in place: {error}");
    }

    fn notify_no_rules(&mut self) {
        warn!("no rules available yet: the remote is unreachable and nothing is cached");
    }
}
