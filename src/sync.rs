// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Sync orchestration and failure recovery.
//!
//! One sync attempt is a straight line: acquire an up-to-date snapshot
//! through [`SnapshotAccess`], then mirror the selected subset into the
//! destination. [`sync_once`] performs exactly that, no retries, no error
//! reinterpretation. Everything interesting about failure lives one layer up.
//!
//! # Failure Recovery
//!
//! The [`Supervisor`] wraps the orchestrator in a small state machine:
//!
//! ```text
//! Idle --start--> Syncing --success--> Synced
//!                 Syncing --failure, first attempt ever--> FirstFailureBlocked
//!                 Syncing --failure, otherwise--> SteadyStateWarned --> Idle
//! ```
//!
//! The very first attempt of the process lifetime is special: its failure
//! blocks on a choice between retrying from scratch and working with a
//! previously cached snapshot. Every later attempt, including the retry
//! itself, fails into a non-blocking warning instead, leaving whatever the
//! last successful mirror produced untouched. This asymmetry is deliberate:
//! a user who just turned syncing on deserves to know it did not work, while
//! a user mid-session does not deserve an interruption because the wifi
//! dropped. The treatment depends only on the attempt count, never on the
//! failure kind.
//!
//! The fallback path mirrors straight from the cached snapshot directory,
//! bypassing the remote entirely. It reads without taking the snapshot lock,
//! accepting a small race window against other processes as a tradeoff
//! favoring simplicity.

use crate::{
    config::SyncProfile,
    mirror::{mirror, MirrorError},
    snapshot::{Snapshot, SnapshotAccess, SnapshotError},
};

use tracing::{info, instrument, warn};

/// Drive one end-to-end sync attempt.
///
/// Acquires an up-to-date snapshot of the profile's remote, then mirrors the
/// selected subset into the destination. Performs no retries; retry policy
/// belongs entirely to the [`Supervisor`] layered above.
///
/// # Errors
///
/// - Return [`SyncError::Snapshot`] if the snapshot cannot be acquired.
/// - Return [`SyncError::Mirror`] if the copy phase fails.
#[instrument(skip_all, level = "debug")]
pub fn sync_once<A: SnapshotAccess>(profile: &SyncProfile, access: &A) -> Result<SyncOutcome> {
    let Snapshot {
        path,
        resolved_branch,
    } = access.ensure_snapshot(profile.remote(), profile.branch())?;
    mirror(&path, profile.destination(), profile.teams())?;

    Ok(SyncOutcome { resolved_branch })
}

/// Outcome of one successful sync attempt.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SyncOutcome {
    /// Branch that was actually resolved when the profile pinned none.
    ///
    /// One-way informational signal: the caller may persist it as a new
    /// default, but nothing about the completed sync depends on it.
    pub resolved_branch: Option<String>,
}

/// States of the failure recovery machine.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
    /// No sync has run, or the last one failed without recourse.
    #[default]
    Idle,

    /// An attempt is in flight.
    Syncing,

    /// First attempt of the session failed; blocked on a recovery choice.
    FirstFailureBlocked,

    /// A later attempt failed; the user got a non-blocking warning.
    SteadyStateWarned,

    /// Destination reflects a successful mirror.
    Synced,
}

/// Resolutions a host may pick for a blocking first failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryChoice {
    /// Re-invoke the orchestrator from scratch: re-acquire lock, re-fetch.
    Retry,

    /// Mirror from the cached snapshot on disk, bypassing the remote.
    UseLocalCopy,
}

/// Layer of indirection for host-surface recovery interaction.
///
/// The host owns menus, dialogs, and notification channels; the state
/// machine only decides which of these three surfaces to poke.
pub trait RecoveryPrompt {
    /// Present the blocking first-failure choice. Must not return until the
    /// user picks a resolution.
    fn choose_recovery(&mut self, error: &SyncError) -> RecoveryChoice;

    /// Surface a non-blocking warning naming the failure cause.
    fn warn_failure(&mut self, error: &SyncError);

    /// Surface a non-blocking "no rules available" notice.
    ///
    /// Not a fatal condition for the host, just an absence of rules.
    fn notify_no_rules(&mut self);
}

/// Failure recovery state machine over the sync orchestrator.
///
/// # Invariant
///
/// - Never runs two mirror operations against the same destination
///   concurrently: every attempt goes through [`Supervisor::request_sync`],
///   which requires exclusive access, so requests from any one supervisor
///   are serialized by construction.
#[derive(Debug)]
pub struct Supervisor<A, P>
where
    A: SnapshotAccess,
    P: RecoveryPrompt,
{
    profile: SyncProfile,
    access: A,
    prompt: P,
    state: SyncState,
    attempted_before: bool,
}

impl<A, P> Supervisor<A, P>
where
    A: SnapshotAccess,
    P: RecoveryPrompt,
{
    /// Construct new supervisor in the [`SyncState::Idle`] state.
    pub fn new(profile: SyncProfile, access: A, prompt: P) -> Self {
        Self {
            profile,
            access,
            prompt,
            state: SyncState::default(),
            attempted_before: false,
        }
    }

    /// Current machine state.
    pub fn state(&self) -> SyncState {
        self.state
    }

    /// Check whether a snapshot from a prior run exists on disk.
    pub fn has_cached_snapshot(&self) -> bool {
        self.access.snapshot_exists(self.profile.remote())
    }

    /// Run one externally triggered sync request through the machine.
    ///
    /// Covers timer ticks, manual commands, and configuration changes alike.
    /// Requests are serialized by the exclusive receiver: a caller cannot
    /// start a second request until the current one returns, so two mirror
    /// operations never run against the same destination.
    /// Failures are consumed by the recovery policy; the returned report says
    /// where the machine ended up and what the last successful attempt
    /// resolved.
    ///
    /// # Errors
    ///
    /// - Return [`SyncError::Mirror`] only from the fallback path, when
    ///   mirroring the cached snapshot itself fails.
    pub fn request_sync(&mut self) -> Result<SyncReport> {
        self.run_attempt()
    }

    #[instrument(skip(self), level = "debug")]
    fn run_attempt(&mut self) -> Result<SyncReport> {
        loop {
            self.state = SyncState::Syncing;
            let first_attempt_ever = !self.attempted_before;
            self.attempted_before = true;

            let error = match sync_once(&self.profile, &self.access) {
                Ok(outcome) => {
                    self.state = SyncState::Synced;
                    if let Some(branch) = &outcome.resolved_branch {
                        info!("resolved branch {branch:?} for {:?}", self.profile.remote());
                    }
                    return Ok(SyncReport {
                        state: self.state,
                        resolved_branch: outcome.resolved_branch,
                    });
                }
                Err(error) => error,
            };

            if !first_attempt_ever {
                self.state = SyncState::SteadyStateWarned;
                warn!("sync failed, keeping previous mirror: {error}");
                self.prompt.warn_failure(&error);
                // Previous successful mirror stays in place untouched.
                self.state = SyncState::Idle;
                return Ok(SyncReport {
                    state: SyncState::SteadyStateWarned,
                    resolved_branch: None,
                });
            }

            self.state = SyncState::FirstFailureBlocked;
            match self.prompt.choose_recovery(&error) {
                RecoveryChoice::Retry => continue,
                RecoveryChoice::UseLocalCopy => return self.fall_back_to_cache(),
            }
        }
    }

    /// Mirror from the cached snapshot, bypassing the remote entirely.
    fn fall_back_to_cache(&mut self) -> Result<SyncReport> {
        if !self.has_cached_snapshot() {
            info!("no cached snapshot for {:?}", self.profile.remote());
            self.prompt.notify_no_rules();
            self.state = SyncState::Idle;
            return Ok(SyncReport {
                state: self.state,
                resolved_branch: None,
            });
        }

        let snapshot = self.access.snapshot_path(self.profile.remote());
        info!("mirror cached snapshot at {:?}", snapshot.display());
        mirror(&snapshot, self.profile.destination(), self.profile.teams())?;
        self.state = SyncState::Synced;

        Ok(SyncReport {
            state: self.state,
            resolved_branch: None,
        })
    }
}

/// Where the machine ended up after a supervised request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncReport {
    /// State reached by the final attempt of the request.
    pub state: SyncState,

    /// Branch resolved by the final attempt, when it succeeded unpinned.
    pub resolved_branch: Option<String>,
}

/// Sync orchestration error types.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    /// Snapshot acquisition failed.
    #[error(transparent)]
    Snapshot(#[from] SnapshotError),

    /// Mirror engine failed.
    #[error(transparent)]
    Mirror(#[from] MirrorError),
}

/// Friendly result alias :3
pub type Result<T, E = SyncError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{SyncSettings, TeamSelection};
    use crate::snapshot::Snapshot;

    use pretty_assertions::assert_eq;
    use sealed_test::prelude::*;
    use std::{
        cell::RefCell,
        fs::{create_dir_all, read_to_string, write},
        path::{Path, PathBuf},
    };

    /// Scripted snapshot access: pops one result per ensure call.
    struct ScriptedAccess {
        cache: PathBuf,
        script: RefCell<Vec<std::result::Result<Snapshot, ()>>>,
        calls: RefCell<usize>,
    }

    impl ScriptedAccess {
        fn new(cache: impl Into<PathBuf>, script: Vec<std::result::Result<Snapshot, ()>>) -> Self {
            Self {
                cache: cache.into(),
                script: RefCell::new(script),
                calls: RefCell::new(0),
            }
        }

        fn calls(&self) -> usize {
            *self.calls.borrow()
        }

        fn unreachable_error() -> SnapshotError {
            SnapshotError::RemoteUnavailable {
                remote: "https://blah.org/foo/rules.git".into(),
                source: git2::Error::new(
                    git2::ErrorCode::GenericError,
                    git2::ErrorClass::Net,
                    "could not resolve host",
                ),
            }
        }
    }

    impl SnapshotAccess for ScriptedAccess {
        fn ensure_snapshot(
            &self,
            _remote: &str,
            _branch_override: Option<&str>,
        ) -> crate::snapshot::Result<Snapshot> {
            *self.calls.borrow_mut() += 1;
            let mut script = self.script.borrow_mut();
            assert!(!script.is_empty(), "unexpected ensure_snapshot call");
            script.remove(0).map_err(|()| Self::unreachable_error())
        }

        fn snapshot_path(&self, _remote: &str) -> PathBuf {
            self.cache.clone()
        }

        fn snapshot_exists(&self, _remote: &str) -> bool {
            self.cache.is_dir()
        }
    }

    /// Scripted recovery prompt that records every surface it gets poked on.
    #[derive(Default)]
    struct ScriptedPrompt {
        choices: Vec<RecoveryChoice>,
        blocking_prompts: usize,
        warnings: usize,
        no_rules_notices: usize,
    }

    impl RecoveryPrompt for ScriptedPrompt {
        fn choose_recovery(&mut self, _error: &SyncError) -> RecoveryChoice {
            self.blocking_prompts += 1;
            assert!(!self.choices.is_empty(), "unexpected blocking prompt");
            self.choices.remove(0)
        }

        fn warn_failure(&mut self, _error: &SyncError) {
            self.warnings += 1;
        }

        fn notify_no_rules(&mut self) {
            self.no_rules_notices += 1;
        }
    }

    fn profile(destination: &str) -> SyncProfile {
        SyncProfile {
            settings: SyncSettings {
                remote: "https://blah.org/foo/rules.git".into(),
                destination: destination.into(),
                teams: TeamSelection::new(["cloud-infra"]),
                interval_minutes: 0,
                branch: None,
                cache_root: None,
            },
        }
    }

    fn seed_snapshot(root: &str) {
        create_dir_all(format!("{root}/team/cloud-infra")).unwrap();
        write(format!("{root}/team/cloud-infra/deploy.mdc"), "deploy").unwrap();
        create_dir_all(format!("{root}/general")).unwrap();
        write(format!("{root}/general/style.mdc"), "style").unwrap();
    }

    fn snapshot(root: &str) -> Snapshot {
        Snapshot {
            path: root.into(),
            resolved_branch: Some("main".into()),
        }
    }

    #[sealed_test]
    fn successful_sync_reaches_synced_and_reports_branch() {
        seed_snapshot("cache");
        let access = ScriptedAccess::new("cache", vec![Ok(snapshot("cache"))]);
        let mut supervisor = Supervisor::new(profile("dest"), access, ScriptedPrompt::default());

        let report = supervisor.request_sync().unwrap();

        assert_eq!(report.state, SyncState::Synced);
        assert_eq!(report.resolved_branch, Some("main".into()));
        assert_eq!(supervisor.state(), SyncState::Synced);
        assert_eq!(
            read_to_string("dest/team/cloud-infra/deploy.mdc").unwrap(),
            "deploy"
        );
    }

    #[sealed_test]
    fn first_failure_blocks_and_retry_reattempts_from_scratch() {
        seed_snapshot("cache");
        let access = ScriptedAccess::new("cache", vec![Err(()), Ok(snapshot("cache"))]);
        let mut supervisor = Supervisor::new(
            profile("dest"),
            access,
            ScriptedPrompt {
                choices: vec![RecoveryChoice::Retry],
                ..Default::default()
            },
        );

        let report = supervisor.request_sync().unwrap();

        assert_eq!(report.state, SyncState::Synced);
        assert_eq!(supervisor.prompt.blocking_prompts, 1);
        assert_eq!(supervisor.prompt.warnings, 0);
        assert_eq!(supervisor.access.calls(), 2);
        assert!(Path::new("dest/general/style.mdc").exists());
    }

    #[sealed_test]
    fn first_failure_with_cache_falls_back_to_local_copy() {
        seed_snapshot("cache");
        let access = ScriptedAccess::new("cache", vec![Err(())]);
        let mut supervisor = Supervisor::new(
            profile("dest"),
            access,
            ScriptedPrompt {
                choices: vec![RecoveryChoice::UseLocalCopy],
                ..Default::default()
            },
        );

        let report = supervisor.request_sync().unwrap();

        // Fallback output is identical to a direct mirror of the snapshot.
        assert_eq!(report.state, SyncState::Synced);
        assert_eq!(supervisor.access.calls(), 1);
        assert_eq!(
            read_to_string("dest/team/cloud-infra/deploy.mdc").unwrap(),
            "deploy"
        );
        assert_eq!(read_to_string("dest/general/style.mdc").unwrap(), "style");
    }

    #[sealed_test]
    fn first_failure_without_cache_notifies_and_idles() {
        let access = ScriptedAccess::new("cache", vec![Err(())]);
        let mut supervisor = Supervisor::new(
            profile("dest"),
            access,
            ScriptedPrompt {
                choices: vec![RecoveryChoice::UseLocalCopy],
                ..Default::default()
            },
        );

        let report = supervisor.request_sync().unwrap();

        assert_eq!(report.state, SyncState::Idle);
        assert_eq!(supervisor.prompt.no_rules_notices, 1);
        assert!(!Path::new("dest").exists());
    }

    #[sealed_test]
    fn steady_state_failure_warns_without_touching_destination() {
        seed_snapshot("cache");
        let access = ScriptedAccess::new("cache", vec![Ok(snapshot("cache")), Err(())]);
        let mut supervisor = Supervisor::new(profile("dest"), access, ScriptedPrompt::default());

        supervisor.request_sync().unwrap();
        let before = read_to_string("dest/team/cloud-infra/deploy.mdc").unwrap();
        let report = supervisor.request_sync().unwrap();

        assert_eq!(report.state, SyncState::SteadyStateWarned);
        assert_eq!(supervisor.state(), SyncState::Idle);
        assert_eq!(supervisor.prompt.warnings, 1);
        assert_eq!(supervisor.prompt.blocking_prompts, 0);
        assert_eq!(
            read_to_string("dest/team/cloud-infra/deploy.mdc").unwrap(),
            before
        );
    }

    #[sealed_test]
    fn failed_retry_takes_the_non_blocking_path() {
        let access = ScriptedAccess::new("cache", vec![Err(()), Err(())]);
        let mut supervisor = Supervisor::new(
            profile("dest"),
            access,
            ScriptedPrompt {
                choices: vec![RecoveryChoice::Retry],
                ..Default::default()
            },
        );

        let report = supervisor.request_sync().unwrap();

        // The retry is a fresh attempt, so its failure warns instead of
        // blocking a second time.
        assert_eq!(report.state, SyncState::SteadyStateWarned);
        assert_eq!(supervisor.prompt.blocking_prompts, 1);
        assert_eq!(supervisor.prompt.warnings, 1);
    }

    #[sealed_test]
    fn each_request_runs_exactly_one_attempt() {
        seed_snapshot("cache");
        let access = ScriptedAccess::new(
            "cache",
            vec![Ok(snapshot("cache")), Ok(snapshot("cache"))],
        );
        let mut supervisor = Supervisor::new(profile("dest"), access, ScriptedPrompt::default());

        supervisor.request_sync().unwrap();
        supervisor.request_sync().unwrap();

        // Back-to-back requests serialize: one ensure call each, no extras.
        assert_eq!(supervisor.access.calls(), 2);
        assert_eq!(supervisor.state(), SyncState::Synced);
    }

    #[sealed_test]
    fn all_failure_kinds_get_uniform_treatment() {
        seed_snapshot("cache");
        let access = ScriptedAccess::new("cache", vec![Ok(snapshot("cache")), Err(()), Err(())]);
        let mut supervisor = Supervisor::new(profile("dest"), access, ScriptedPrompt::default());

        supervisor.request_sync().unwrap();
        supervisor.request_sync().unwrap();
        supervisor.request_sync().unwrap();

        // Two steady-state failures, two warnings, zero blocking prompts.
        assert_eq!(supervisor.prompt.warnings, 2);
        assert_eq!(supervisor.prompt.blocking_prompts, 0);
    }
}
