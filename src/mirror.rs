// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Selective mirroring of a snapshot into the workspace.
//!
//! The mirror engine makes the destination directory's contents exactly equal
//! to a selected subset of a source directory. It runs in a single pass over
//! the source's top-level entries with one branch per entry:
//!
//! - Hidden entries (names starting with '.') and top-level files are skipped
//!   outright, which conveniently keeps the snapshot's gitdir out of the
//!   workspace.
//! - A __team-like__ directory, meaning any top-level directory whose name
//!   starts with the literal prefix "team" (`team`, `teams`, `team-docs`, all
//!   of them), is filtered: only subdirectories whose names appear in the
//!   selected team set get copied. A selected team with no matching
//!   subdirectory is expected, not exceptional, so it only gets an
//!   informational log entry.
//! - Every other top-level directory is copied in full, all file types, all
//!   nesting, no extension filtering of any kind.
//!
//! # Replace, Never Patch
//!
//! The destination is deleted recursively and recreated empty before any
//! copying happens. There is no delta logic and no rollback: a successful
//! mirror leaves the destination as an exact materialization of the current
//! snapshot subset, and a failed mirror leaves it indeterminate until the
//! next successful run fully re-overwrites it. Callers must not treat the
//! destination as user-editable.

use crate::config::TeamSelection;

use std::{
    fs::{copy, create_dir_all, read_dir, remove_dir_all},
    io::ErrorKind,
    path::{Path, PathBuf},
};
use tracing::{debug, info, instrument};

/// Directory name prefix that marks a top-level directory as team-filtered.
pub const TEAM_PREFIX: &str = "team";

/// Mirror selected subset of snapshot directory into destination directory.
///
/// Fully replaces the destination on every call: stale entries from prior
/// runs cannot survive. Nothing outside the source's top-level children is
/// ever touched.
///
/// # Errors
///
/// - Return [`MirrorError`] tagged with the offending path if any delete,
///   create, enumerate, or copy operation fails. No partial rollback is
///   performed.
#[instrument(skip_all, level = "debug")]
pub fn mirror(
    source: impl AsRef<Path>,
    destination: impl AsRef<Path>,
    teams: &TeamSelection,
) -> Result<()> {
    let source = source.as_ref();
    let destination = destination.as_ref();
    info!(
        "mirror {:?} into {:?}",
        source.display(),
        destination.display()
    );

    clear_destination(destination)?;
    create_dir(destination)?;

    for entry in list_dir(source)? {
        let name = entry.file_name();

        // INVARIANT: Only visible top-level directories are mirrored.
        if name.to_string_lossy().starts_with('.') {
            debug!("skip hidden entry {:?}", name);
            continue;
        }
        if !entry.path().is_dir() {
            debug!("skip top-level file {:?}", name);
            continue;
        }

        let target = destination.join(&name);
        if name.to_string_lossy().starts_with(TEAM_PREFIX) {
            mirror_team_directory(&entry.path(), &target, teams)?;
        } else {
            copy_dir_all(&entry.path(), &target)?;
        }
    }

    Ok(())
}

/// Mirror a team-like directory, keeping only selected team subdirectories.
fn mirror_team_directory(source: &Path, destination: &Path, teams: &TeamSelection) -> Result<()> {
    create_dir(destination)?;

    for team in teams.iter_sorted() {
        let team_source = source.join(team);
        if team_source.is_dir() {
            copy_dir_all(&team_source, &destination.join(team))?;
        } else {
            // Missing team folder is expected, not exceptional.
            info!(
                "team {:?} has no folder under {:?}, skipping",
                team,
                source.display()
            );
        }
    }

    Ok(())
}

/// Copy a directory tree in full, preserving relative structure.
///
/// Symbolic links and special files follow the semantics of [`std::fs::copy`].
fn copy_dir_all(source: &Path, destination: &Path) -> Result<()> {
    create_dir(destination)?;

    for entry in list_dir(source)? {
        let target = destination.join(entry.file_name());
        if entry.path().is_dir() {
            copy_dir_all(&entry.path(), &target)?;
        } else {
            copy(entry.path(), &target).map_err(|err| MirrorError::CopyEntry {
                source: err,
                path: entry.path(),
            })?;
        }
    }

    Ok(())
}

fn clear_destination(destination: &Path) -> Result<()> {
    match remove_dir_all(destination) {
        Ok(()) => Ok(()),
        // INVARIANT: An absent destination counts as already cleared.
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
        Err(err) => Err(MirrorError::ClearDestination {
            source: err,
            path: destination.to_path_buf(),
        }),
    }
}

fn create_dir(path: &Path) -> Result<()> {
    create_dir_all(path).map_err(|err| MirrorError::CreateDirectory {
        source: err,
        path: path.to_path_buf(),
    })
}

fn list_dir(path: &Path) -> Result<Vec<std::fs::DirEntry>> {
    let entries = read_dir(path).map_err(|err| MirrorError::ReadDirectory {
        source: err,
        path: path.to_path_buf(),
    })?;

    entries
        .map(|entry| {
            entry.map_err(|err| MirrorError::ReadDirectory {
                source: err,
                path: path.to_path_buf(),
            })
        })
        .collect()
}

/// Mirror engine error types, each tagged with the offending path.
#[derive(Debug, thiserror::Error)]
pub enum MirrorError {
    /// Destination tree cannot be deleted before the copy phase.
    #[error("failed to clear destination at {:?}", path.display())]
    ClearDestination {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },

    /// Directory cannot be created in the destination tree.
    #[error("failed to create directory at {:?}", path.display())]
    CreateDirectory {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },

    /// Source directory cannot be enumerated.
    #[error("failed to read directory at {:?}", path.display())]
    ReadDirectory {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },

    /// File cannot be copied into the destination tree.
    #[error("failed to copy {:?}", path.display())]
    CopyEntry {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },
}

/// Friendly result alias :3
pub type Result<T, E = MirrorError> = std::result::Result<T, E>;
