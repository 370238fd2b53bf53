// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Local snapshot cache of remote rule repositories.
//!
//! A __snapshot__ is a full working clone of a remote reflecting its state as
//! of the last successful fetch. Snapshots live under a cache root, one
//! directory per distinct remote, named by the slug from
//! [`remote_slug`](crate::path::remote_slug). A snapshot is created on the
//! first successful fetch, refreshed in place on every later one, and never
//! deleted by this crate, because a stale snapshot is exactly what the
//! offline fallback path mirrors from when the remote is unreachable.
//!
//! # Fetch Semantics
//!
//! [`SnapshotAccess::ensure_snapshot`] performs exactly one attempt: clone if
//! the cache entry is missing, otherwise fetch and force-checkout the wanted
//! branch. It never retries; retry policy belongs to the caller. When no
//! branch is pinned, the remote's default branch gets resolved and reported
//! back so the caller may persist it as a new default.
//!
//! # Cross-Process Locking
//!
//! Multiple independent processes may share one cache directory, e.g.
//! separate editor windows syncing the same remote. Writes to a cache entry
//! happen under a lock file next to it, acquired with a small fixed number of
//! attempts spaced seconds apart before giving up with a lock-contention
//! error. The lock file records the owning pid and gets removed on drop on
//! every exit path. Readers of the snapshot do not take the lock.

use crate::path::remote_slug;

use auth_git2::{GitAuthenticator, Prompter};
use git2::{
    build::{CheckoutBuilder, RepoBuilder},
    Config, FetchOptions, RemoteCallbacks, Repository,
};
use indicatif::{ProgressBar, ProgressStyle};
use inquire::{Password, Text};
use std::{
    fs::{create_dir_all, remove_file, OpenOptions},
    io::{ErrorKind, Write},
    path::{Path, PathBuf},
    thread::sleep,
    time,
};
use tracing::{debug, info, instrument, warn};

/// Layer of indirection for snapshot access.
///
/// Seam between the sync core and the underlying version-control client. The
/// core only needs "give me a local directory reflecting the latest fetched
/// state of a remote, or tell me it failed".
pub trait SnapshotAccess {
    /// Acquire an up-to-date local snapshot of a remote.
    ///
    /// Single attempt, no retries. Blocks for however long the fetch or the
    /// lock acquisition takes.
    fn ensure_snapshot(&self, remote: &str, branch_override: Option<&str>) -> Result<Snapshot>;

    /// Determine cache path for a remote. Pure, no I/O.
    fn snapshot_path(&self, remote: &str) -> PathBuf;

    /// Check whether a snapshot from a prior run exists on disk.
    fn snapshot_exists(&self, remote: &str) -> bool;
}

/// A local snapshot acquired by [`SnapshotAccess::ensure_snapshot`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snapshot {
    /// Directory holding the working copy of the remote.
    pub path: PathBuf,

    /// Branch that was actually resolved when no override was pinned.
    ///
    /// Informational only; the caller may persist it as a new default.
    pub resolved_branch: Option<String>,
}

/// Snapshot access through libgit2.
#[derive(Debug)]
pub struct Git2Snapshot {
    cache_root: PathBuf,
    bar: ProgressBar,
}

impl Git2Snapshot {
    /// Construct new snapshot access rooted at target cache directory.
    ///
    /// Transfer progress stays hidden. Use [`Git2Snapshot::with_progress`]
    /// for interactive runs.
    pub fn new(cache_root: impl Into<PathBuf>) -> Self {
        Self {
            cache_root: cache_root.into(),
            bar: ProgressBar::hidden(),
        }
    }

    /// Construct new snapshot access that reports transfer progress.
    pub fn with_progress(cache_root: impl Into<PathBuf>, bar: ProgressBar) -> Self {
        Self {
            cache_root: cache_root.into(),
            bar,
        }
    }

    fn remote_callbacks<'a>(
        &self,
        authenticator: &'a GitAuthenticator,
        config: &'a Config,
    ) -> RemoteCallbacks<'a> {
        let bar = self.bar.clone();
        let mut throttle = time::Instant::now();
        let mut callbacks = RemoteCallbacks::new();
        callbacks.credentials(authenticator.credentials(config));
        callbacks.transfer_progress(move |progress| {
            let stats = progress.to_owned();
            let bar_size = stats.total_objects() as u64;
            let bar_pos = stats.received_objects() as u64;
            if throttle.elapsed() > time::Duration::from_millis(10) {
                throttle = time::Instant::now();
                bar.set_length(bar_size);
                bar.set_position(bar_pos);
            }
            true
        });

        callbacks
    }

    #[instrument(skip(self, path), level = "debug")]
    fn clone_remote(
        &self,
        remote: &str,
        path: &Path,
        branch_override: Option<&str>,
    ) -> Result<Repository> {
        info!("clone {remote:?} into {:?}", path.display());
        let style = ProgressStyle::with_template(
            "{elapsed_precise:.green}  {msg:<50}  [{wide_bar:.yellow/blue}]",
        )?
        .progress_chars("-Cco.");
        self.bar.set_style(style);
        self.bar.set_message(remote.to_string());
        self.bar
            .enable_steady_tick(time::Duration::from_millis(100));

        let prompter = TermPrompter::new(self.bar.clone());
        let authenticator = GitAuthenticator::default().set_prompter(prompter);
        let config = Config::open_default()?;

        let mut fo = FetchOptions::new();
        fo.remote_callbacks(self.remote_callbacks(&authenticator, &config));

        let mut builder = RepoBuilder::new();
        builder.fetch_options(fo);
        if let Some(branch) = branch_override {
            builder.branch(branch);
        }

        let repository = builder
            .clone(remote, path)
            .map_err(|err| classify(remote, err))?;
        self.bar.finish_and_clear();

        Ok(repository)
    }

    #[instrument(skip(self, repository), level = "debug")]
    fn refresh(&self, repository: &Repository, remote: &str) -> Result<()> {
        debug!("fetch latest state of {remote:?}");
        let prompter = TermPrompter::new(self.bar.clone());
        let authenticator = GitAuthenticator::default().set_prompter(prompter);
        let config = Config::open_default()?;

        let mut fo = FetchOptions::new();
        fo.remote_callbacks(self.remote_callbacks(&authenticator, &config));

        let mut origin = repository.find_remote("origin")?;
        origin
            .fetch(&[] as &[&str], Some(&mut fo), None)
            .map_err(|err| classify(remote, err))?;
        self.bar.finish_and_clear();

        Ok(())
    }
}

impl SnapshotAccess for Git2Snapshot {
    /// Acquire an up-to-date local snapshot of a remote.
    ///
    /// Clones into the cache on first use, fetches in place afterwards, then
    /// force-checkouts the pinned branch, or the remote's default branch when
    /// none is pinned. The whole write happens under the cache entry's lock
    /// file.
    ///
    /// # Errors
    ///
    /// - Return [`SnapshotError::RemoteUnavailable`] on network faults.
    /// - Return [`SnapshotError::AuthenticationFailed`] on credential faults.
    /// - Return [`SnapshotError::RemoteNotFound`] when the remote is absent.
    /// - Return [`SnapshotError::LockContention`] when the lock stays busy.
    /// - Return [`SnapshotError::Cache`] on local filesystem faults.
    #[instrument(skip(self), level = "debug")]
    fn ensure_snapshot(&self, remote: &str, branch_override: Option<&str>) -> Result<Snapshot> {
        create_dir_all(&self.cache_root).map_err(|err| SnapshotError::Cache {
            source: err,
            path: self.cache_root.clone(),
        })?;

        let path = self.snapshot_path(remote);
        let lock_path = self
            .cache_root
            .join(format!("{}.lock", remote_slug(remote)));
        let _lock = SnapshotLock::acquire(lock_path)?;

        let repository = if path.join(".git").is_dir() {
            let repository = Repository::open(&path)?;
            self.refresh(&repository, remote)?;
            repository
        } else {
            self.clone_remote(remote, &path, branch_override)?
        };

        let branch = match branch_override {
            Some(branch) => branch.to_string(),
            None => default_branch(&repository)?,
        };
        checkout_branch(&repository, &branch)?;
        info!("snapshot of {remote:?} ready at {:?}", path.display());

        Ok(Snapshot {
            path,
            resolved_branch: branch_override.is_none().then_some(branch),
        })
    }

    fn snapshot_path(&self, remote: &str) -> PathBuf {
        self.cache_root.join(remote_slug(remote))
    }

    fn snapshot_exists(&self, remote: &str) -> bool {
        self.snapshot_path(remote).join(".git").is_dir()
    }
}

/// Resolve the remote's default branch name.
///
/// Prefers the `origin/HEAD` symbolic reference recorded at clone time, and
/// falls back to whatever the local HEAD points at.
fn default_branch(repository: &Repository) -> Result<String> {
    if let Ok(reference) = repository.find_reference("refs/remotes/origin/HEAD") {
        if let Some(target) = reference.symbolic_target() {
            let branch = target.strip_prefix("refs/remotes/origin/").unwrap_or(target);
            return Ok(branch.to_string());
        }
    }

    // HEAD may already sit on a remote-tracking reference from the checkout
    // of a prior sync, so strip whichever prefix applies.
    let head = repository.head()?;
    let name = head
        .name()
        .ok_or_else(|| git2::Error::from_str("HEAD is not a named reference"))?;
    let branch = name
        .strip_prefix("refs/remotes/origin/")
        .or_else(|| name.strip_prefix("refs/heads/"))
        .unwrap_or(name);

    Ok(branch.to_string())
}

/// Force the working copy onto the fetched state of target branch.
fn checkout_branch(repository: &Repository, branch: &str) -> Result<()> {
    repository.set_head(format!("refs/remotes/origin/{branch}").as_str())?;
    let mut checkout = CheckoutBuilder::new();
    checkout.force();
    repository.checkout_head(Some(&mut checkout))?;

    Ok(())
}

/// Classify a libgit2 failure from a remote operation into the sync taxonomy.
fn classify(remote: &str, error: git2::Error) -> SnapshotError {
    use git2::{ErrorClass, ErrorCode};

    match error.code() {
        ErrorCode::Auth | ErrorCode::Certificate => SnapshotError::AuthenticationFailed {
            remote: remote.to_string(),
            source: error,
        },
        ErrorCode::NotFound => SnapshotError::RemoteNotFound {
            remote: remote.to_string(),
            source: error,
        },
        _ => match error.class() {
            ErrorClass::Net | ErrorClass::Http | ErrorClass::Ssl => {
                SnapshotError::RemoteUnavailable {
                    remote: remote.to_string(),
                    source: error,
                }
            }
            ErrorClass::Ssh => SnapshotError::AuthenticationFailed {
                remote: remote.to_string(),
                source: error,
            },
            _ => SnapshotError::Git2(error),
        },
    }
}

/// Scoped cross-process lock over one cache entry.
///
/// # Invariant
///
/// - Released on every exit path, including failure, via [`Drop`].
/// - Never steals a lock it did not create; a stale lock file surfaces as
///   contention for the user to resolve.
#[derive(Debug)]
struct SnapshotLock {
    path: PathBuf,
}

impl SnapshotLock {
    const ATTEMPTS: u32 = 5;
    const RETRY_DELAY: time::Duration = time::Duration::from_secs(3);

    fn acquire(path: PathBuf) -> Result<Self> {
        for attempt in 1..=Self::ATTEMPTS {
            match OpenOptions::new().write(true).create_new(true).open(&path) {
                Ok(mut file) => {
                    let _ = write!(file, "{}", std::process::id());
                    debug!("acquired snapshot lock at {:?}", path.display());
                    return Ok(Self { path });
                }
                Err(err) if err.kind() == ErrorKind::AlreadyExists => {
                    warn!(
                        "snapshot lock at {:?} is busy (attempt {attempt}/{})",
                        path.display(),
                        Self::ATTEMPTS,
                    );
                    if attempt < Self::ATTEMPTS {
                        sleep(Self::RETRY_DELAY);
                    }
                }
                Err(err) => {
                    return Err(SnapshotError::Cache {
                        source: err,
                        path,
                    })
                }
            }
        }

        Err(SnapshotError::LockContention { path })
    }
}

impl Drop for SnapshotLock {
    fn drop(&mut self) {
        let _ = remove_file(&self.path);
    }
}

/// Git2 authentication prompter that plays nice with a progress bar.
#[derive(Debug, Clone)]
struct TermPrompter {
    bar: ProgressBar,
}

impl TermPrompter {
    fn new(bar: ProgressBar) -> Self {
        Self { bar }
    }
}

impl Prompter for TermPrompter {
    #[instrument(skip(self, url, _config), level = "debug")]
    fn prompt_username_password(
        &mut self,
        url: &str,
        _config: &git2::Config,
    ) -> Option<(String, String)> {
        info!("authentication required at {url}");
        self.bar.suspend(|| -> Option<(String, String)> {
            let username = Text::new("username").prompt().ok()?;
            let password = Password::new("password")
                .without_confirmation()
                .prompt()
                .ok()?;
            Some((username, password))
        })
    }

    #[instrument(skip(self, username, url, _config), level = "debug")]
    fn prompt_password(
        &mut self,
        username: &str,
        url: &str,
        _config: &git2::Config,
    ) -> Option<String> {
        info!("authentication required at {url} for user {username}");
        self.bar.suspend(|| -> Option<String> {
            Password::new("password")
                .without_confirmation()
                .prompt()
                .ok()
        })
    }

    #[instrument(skip(self, ssh_key_path, _config), level = "debug")]
    fn prompt_ssh_key_passphrase(
        &mut self,
        ssh_key_path: &Path,
        _config: &git2::Config,
    ) -> Option<String> {
        info!(
            "authentication required with ssh key at {}",
            ssh_key_path.display()
        );
        self.bar.suspend(|| -> Option<String> {
            Password::new("passphrase")
                .without_confirmation()
                .prompt()
                .ok()
        })
    }
}

/// Snapshot access error types.
#[derive(Debug, thiserror::Error)]
pub enum SnapshotError {
    /// Remote cannot be reached over the network.
    #[error("remote {remote:?} is unreachable")]
    RemoteUnavailable {
        remote: String,
        #[source]
        source: git2::Error,
    },

    /// Remote rejected the offered credentials.
    #[error("authentication failed for remote {remote:?}")]
    AuthenticationFailed {
        remote: String,
        #[source]
        source: git2::Error,
    },

    /// Remote does not exist, or the pinned branch does not exist on it.
    #[error("remote {remote:?} was not found")]
    RemoteNotFound {
        remote: String,
        #[source]
        source: git2::Error,
    },

    /// Gave up waiting for another process to release the cache entry.
    #[error("gave up waiting for snapshot lock at {:?}", path.display())]
    LockContention { path: PathBuf },

    /// Local snapshot cache cannot be accessed.
    #[error("failed to access snapshot cache at {:?}", path.display())]
    Cache {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },

    /// Style template cannot be set for progress bars.
    #[error(transparent)]
    IndicatifStyleTemplate(#[from] indicatif::style::TemplateError),

    /// Operations from libgit2 fail locally.
    #[error(transparent)]
    Git2(#[from] git2::Error),
}

/// Friendly result alias :3
pub type Result<T, E = SnapshotError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use sealed_test::prelude::*;
    use simple_test_case::test_case;

    #[test]
    fn snapshot_path_is_pure_and_stable() {
        let access = Git2Snapshot::new("/tmp/cache");

        assert_eq!(
            access.snapshot_path("https://blah.org/foo/rules.git"),
            PathBuf::from("/tmp/cache/foo-rules")
        );
        assert_eq!(
            access.snapshot_path("https://blah.org/foo/rules.git"),
            access.snapshot_path("https://blah.org/foo/rules.git")
        );
    }

    #[sealed_test]
    fn lock_released_on_drop() {
        let lock_path = PathBuf::from("cache.lock");

        let lock = SnapshotLock::acquire(lock_path.clone()).unwrap();
        assert!(lock_path.exists());

        drop(lock);
        assert!(!lock_path.exists());

        // Reacquiring after release succeeds immediately.
        let lock = SnapshotLock::acquire(lock_path.clone()).unwrap();
        assert!(lock_path.exists());
        drop(lock);
    }

    #[sealed_test]
    fn default_branch_follows_local_head_without_origin_head() -> anyhow::Result<()> {
        let mut opts = git2::RepositoryInitOptions::new();
        opts.initial_head("trunk");
        let repository = Repository::init_opts("snapshot", &opts)?;

        // INVARIANT: Always provide valid name and email.
        //   - Git will complain if this is not set in CI/CD environments.
        let mut config = repository.config()?;
        config.set_str("user.name", "John Doe")?;
        config.set_str("user.email", "john@doe.com")?;

        let tree_oid = repository.index()?.write_tree()?;
        let tree = repository.find_tree(tree_oid)?;
        let signature = repository.signature()?;
        let oid = repository.commit(
            Some("HEAD"),
            &signature,
            &signature,
            "chore: initial commit",
            &tree,
            &[],
        )?;

        assert_eq!(default_branch(&repository)?, "trunk");

        // HEAD parked on a remote-tracking reference by a prior checkout.
        repository.reference("refs/remotes/origin/trunk", oid, true, "fixture")?;
        repository.set_head("refs/remotes/origin/trunk")?;
        assert_eq!(default_branch(&repository)?, "trunk");

        Ok(())
    }

    #[test_case(
        git2::ErrorCode::Auth,
        git2::ErrorClass::Http,
        "auth code maps to authentication";
        "auth code"
    )]
    #[test_case(
        git2::ErrorCode::GenericError,
        git2::ErrorClass::Ssh,
        "ssh class maps to authentication";
        "ssh class"
    )]
    #[test]
    fn classify_authentication_failures(
        code: git2::ErrorCode,
        class: git2::ErrorClass,
        message: &str,
    ) {
        let error = git2::Error::new(code, class, message);

        assert!(matches!(
            classify("https://blah.org/foo/rules.git", error),
            SnapshotError::AuthenticationFailed { .. }
        ));
    }

    #[test]
    fn classify_network_failures() {
        let error = git2::Error::new(
            git2::ErrorCode::GenericError,
            git2::ErrorClass::Net,
            "could not resolve host",
        );

        assert!(matches!(
            classify("https://blah.org/foo/rules.git", error),
            SnapshotError::RemoteUnavailable { .. }
        ));
    }

    #[test]
    fn classify_missing_remote() {
        let error = git2::Error::new(
            git2::ErrorCode::NotFound,
            git2::ErrorClass::Http,
            "repository not found",
        );

        assert!(matches!(
            classify("https://blah.org/foo/rules.git", error),
            SnapshotError::RemoteNotFound { .. }
        ));
    }

    #[test]
    fn classify_local_faults_pass_through() {
        let error = git2::Error::new(
            git2::ErrorCode::GenericError,
            git2::ErrorClass::Index,
            "index is busted",
        );

        assert!(matches!(
            classify("https://blah.org/foo/rules.git", error),
            SnapshotError::Git2(_)
        ));
    }
}
