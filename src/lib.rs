// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Mirror rule files from a remote Git repository into a local workspace.
//!
//! Rulesync keeps a workspace folder in sync with a selected subset of a
//! remote repository: team-like directories are filtered down to the teams
//! the user selected, everything else is mirrored in full, and the
//! destination is fully replaced on every successful run. Fetched state is
//! cached on disk so a flaky remote degrades into "work with the local copy"
//! instead of "no rules for you".
//!
//! The crate splits along the seams of that job:
//!
//! - [`config`] lays out the sync profile describing one mirror.
//! - [`path`] resolves the cache root and derives cache slugs for remotes.
//! - [`snapshot`] owns the local snapshot cache and the Git plumbing.
//! - [`mirror`] materializes the selected subset into the destination.
//! - [`sync`] orchestrates attempts and decides what a failure means.

pub mod config;
pub mod mirror;
pub mod path;
pub mod snapshot;
pub mod sync;

pub use config::{SyncProfile, TeamSelection};
pub use mirror::mirror;
pub use snapshot::{Git2Snapshot, Snapshot, SnapshotAccess};
pub use sync::{sync_once, RecoveryChoice, RecoveryPrompt, Supervisor, SyncState};
