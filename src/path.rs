// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Path resolution utilities.
//!
//! Determine relevent path information for the snapshot cache, and derive
//! stable directory names for cached remotes.
//!
//! # Remote Slugs
//!
//! Each distinct remote gets exactly one directory under the snapshot cache
//! root, named by a __slug__ derived from its location. When the remote looks
//! like the usual organization/repository pair, the slug stays human-legible,
//! e.g. `https://blah.org/foo/rules.git` becomes `foo-rules`. Anything that
//! does not parse cleanly falls back to a stable hex digest of bounded
//! length, so weird remotes still cache deterministically without producing
//! hostile directory names.

use sha2::{Digest, Sha256};
use std::path::PathBuf;

/// Determine default absolute path to snapshot cache directory.
///
/// Uses XDG Base Directory path `$XDG_DATA_HOME/rulesync-cache` as the
/// default absolute path for the snapshot cache. Does not check if the path
/// returned actually exists.
///
/// # Errors
///
/// - Return [`NoWayHome`] if the user's data directory cannot be determined.
///
/// # See Also
///
/// - [XDG Base Directory](https://wiki.archlinux.org/title/XDG_Base_Directory)
pub fn default_snapshot_cache_dir() -> Result<PathBuf> {
    dirs::data_dir()
        .map(|path| path.join("rulesync-cache"))
        .ok_or(NoWayHome)
}

/// Derive stable cache directory name for a remote location.
///
/// Produces a human-legible `organization-repository` pair when the remote
/// parses as one, otherwise a bounded hex digest of the full location. Pure
/// function: same remote in, same slug out, no I/O.
pub fn remote_slug(remote: impl AsRef<str>) -> String {
    let remote = remote.as_ref();

    if let Some((org, repo)) = parse_org_repo(remote) {
        return format!("{}-{}", sanitize(&org), sanitize(&repo));
    }

    format!("remote-{}", digest16(remote))
}

/// Pull the trailing organization/repository pair out of a remote location.
///
/// Understands URL-style remotes (`https://host/org/repo.git`) and scp-style
/// remotes (`git@host:org/repo.git`). Returns [`None`] when either segment
/// comes up empty.
fn parse_org_repo(remote: &str) -> Option<(String, String)> {
    let trimmed = remote.trim_end_matches('/');
    let trimmed = trimmed.strip_suffix(".git").unwrap_or(trimmed);

    // INVARIANT: scp-style remotes hide their path after the first ':'.
    let path = match trimmed.split_once("://") {
        Some((_, rest)) => rest,
        None => trimmed.split_once(':').map_or(trimmed, |(_, rest)| rest),
    };

    let mut segments = path.rsplit('/');
    let repo = segments.next()?.trim();
    let org = segments.next()?.trim();

    // INVARIANT: The segment before the repository must not be the host
    // itself, so bare `host/repo` remotes fall back to the digest form.
    if org.is_empty() || repo.is_empty() || org.contains('.') || org.contains('@') {
        return None;
    }

    Some((org.to_string(), repo.to_string()))
}

fn sanitize(segment: &str) -> String {
    segment
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '-'
            }
        })
        .collect()
}

fn digest16(remote: &str) -> String {
    hex::encode(&Sha256::digest(remote.as_bytes())[..8])
}

/// No way to determine user's data directory.
///
/// # See Also
///
/// - [`dirs::data_dir`](https://docs.rs/dirs/latest/dirs/fn.data_dir.html)
#[derive(Clone, Debug, thiserror::Error)]
#[error("cannot determine absolute path to user's data directory")]
pub struct NoWayHome;

/// Friendly result alias :3
pub type Result<T, E = NoWayHome> = std::result::Result<T, E>;
