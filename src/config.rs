// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Sync profile layout.
//!
//! Specify the layout for the profile file that Rulesync uses to describe one
//! remote-to-workspace mirror, to simplify the process of serialization and
//! deserialization. File I/O is left to the caller to figure out.
//!
//! # General Layout
//!
//! A sync profile is a single `[settings]` table. It names the remote
//! repository to mirror from, the destination directory to mirror into, the
//! listing of selected teams, and a sync interval in minutes. An interval of
//! zero disables timed syncing. A branch may optionally be pinned; when it is
//! not, the remote's default branch gets used, and the branch that was
//! actually resolved is reported back after each successful sync so the user
//! may pin it if they want.
//!
//! A profile is immutable for the duration of one sync attempt. The caller is
//! responsible for sourcing and validating it before each call into the core.

use serde::{Deserialize, Serialize};
use std::{
    collections::HashSet,
    fmt::{Display, Error as FmtError, Formatter, Result as FmtResult},
    path::{Path, PathBuf},
    str::FromStr,
};

/// Sync profile layout.
///
/// Describes one remote-to-workspace mirror: where to fetch from, where to
/// mirror into, and which team subdirectories to include.
#[derive(Default, Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
pub struct SyncProfile {
    /// Settings for the mirror.
    pub settings: SyncSettings,
}

impl SyncProfile {
    /// Remote location to mirror from.
    pub fn remote(&self) -> &str {
        self.settings.remote.as_str()
    }

    /// Destination directory to mirror into.
    pub fn destination(&self) -> &Path {
        self.settings.destination.as_path()
    }

    /// Selected team identifiers.
    pub fn teams(&self) -> &TeamSelection {
        &self.settings.teams
    }

    /// Pinned branch, if any.
    pub fn branch(&self) -> Option<&str> {
        self.settings.branch.as_deref()
    }

    /// Root directory of the local snapshot cache, if overridden.
    pub fn cache_root(&self) -> Option<&Path> {
        self.settings.cache_root.as_deref()
    }

    /// Sync interval in minutes. Zero means timed syncing is disabled.
    pub fn interval_minutes(&self) -> u64 {
        self.settings.interval_minutes
    }
}

impl FromStr for SyncProfile {
    type Err = ConfigError;

    fn from_str(data: &str) -> Result<Self, Self::Err> {
        let mut profile: SyncProfile = toml::de::from_str(data).map_err(ConfigError::Deserialize)?;

        // INVARIANT: Perform shell expansion on user-provided path fields.
        profile.settings.destination = expand_path(&profile.settings.destination)?;
        if let Some(cache_root) = &profile.settings.cache_root {
            profile.settings.cache_root = Some(expand_path(cache_root)?);
        }

        Ok(profile)
    }
}

impl Display for SyncProfile {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        fmt.write_str(
            toml::ser::to_string_pretty(self)
                .map_err(ConfigError::Serialize)?
                .as_str(),
        )
    }
}

fn expand_path(path: &Path) -> Result<PathBuf> {
    Ok(PathBuf::from(
        shellexpand::full(path.to_string_lossy().as_ref())
            .map_err(ConfigError::ShellExpansion)?
            .into_owned(),
    ))
}

/// Sync profile settings.
///
/// Standard settings to use for any given mirror.
#[derive(Default, Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
pub struct SyncSettings {
    /// Remote URL to mirror rule files from.
    pub remote: String,

    /// Destination directory to mirror into.
    ///
    /// Must be a strict subdirectory of some enclosing root, never the root
    /// itself. The caller validates this before handing the profile over.
    pub destination: PathBuf,

    /// Listing of selected team identifiers.
    #[serde(default)]
    pub teams: TeamSelection,

    /// Sync interval in minutes. Zero disables timed syncing.
    #[serde(default)]
    pub interval_minutes: u64,

    /// Branch to pin instead of the remote's default branch.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub branch: Option<String>,

    /// Root directory of the local snapshot cache.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache_root: Option<PathBuf>,
}

/// Set of selected team identifiers.
///
/// # Invariant
///
/// - Set semantics: duplicates collapse, order is irrelevant.
#[derive(Default, Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
#[serde(from = "Vec<String>", into = "Vec<String>")]
pub struct TeamSelection(HashSet<String>);

impl TeamSelection {
    /// Construct new team selection from a listing of identifiers.
    pub fn new(teams: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self(teams.into_iter().map(Into::into).collect())
    }

    /// Check if a team identifier is selected.
    pub fn contains(&self, team: impl AsRef<str>) -> bool {
        self.0.contains(team.as_ref())
    }

    /// Check if no teams are selected.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterate selected team identifiers in sorted order.
    ///
    /// Sorted so callers that log or copy per team do so deterministically.
    pub fn iter_sorted(&self) -> impl Iterator<Item = &str> {
        let mut teams: Vec<_> = self.0.iter().map(String::as_str).collect();
        teams.sort_unstable();
        teams.into_iter()
    }
}

impl From<Vec<String>> for TeamSelection {
    fn from(teams: Vec<String>) -> Self {
        Self(teams.into_iter().collect())
    }
}

impl From<TeamSelection> for Vec<String> {
    fn from(selection: TeamSelection) -> Self {
        let mut teams: Vec<_> = selection.0.into_iter().collect();
        teams.sort_unstable();
        teams
    }
}

/// Configuration error types.
#[derive(Clone, Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to deserialize configuration.
    #[error(transparent)]
    Deserialize(#[from] toml::de::Error),

    /// Failed to serialize configuration.
    #[error(transparent)]
    Serialize(#[from] toml::ser::Error),

    /// Failed to perform shell expansion on configuration.
    #[error(transparent)]
    ShellExpansion(#[from] shellexpand::LookupError<std::env::VarError>),
}

impl From<ConfigError> for FmtError {
    fn from(_: ConfigError) -> Self {
        FmtError
    }
}

/// Friendly result alias :3
type Result<T, E = ConfigError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;
    use indoc::indoc;
    use pretty_assertions::assert_eq;
    use sealed_test::prelude::*;

    #[sealed_test(env = [("RULES_DEST", "/home/blah/rules")])]
    fn deserialize_sync_profile() -> anyhow::Result<()> {
        let result: SyncProfile = r#"
            [settings]
            remote = "https://blah.org/foo/rules.git"
            destination = "$RULES_DEST"
            teams = ["cloud-infra", "blue-team", "cloud-infra"]
            interval_minutes = 30
            branch = "main"
        "#
        .parse()?;

        let expect = SyncProfile {
            settings: SyncSettings {
                remote: "https://blah.org/foo/rules.git".into(),
                destination: "/home/blah/rules".into(),
                teams: TeamSelection::new(["cloud-infra", "blue-team"]),
                interval_minutes: 30,
                branch: Some("main".into()),
                cache_root: None,
            },
        };

        assert_eq!(result, expect);

        Ok(())
    }

    #[test]
    fn serialize_sync_profile() {
        let result = SyncProfile {
            settings: SyncSettings {
                remote: "https://blah.org/foo/rules.git".into(),
                destination: "/home/blah/rules".into(),
                teams: TeamSelection::new(["cloud-infra", "blue-team"]),
                interval_minutes: 30,
                branch: Some("main".into()),
                cache_root: None,
            },
        }
        .to_string();

        let expect = indoc! {r#"
            [settings]
            remote = "https://blah.org/foo/rules.git"
            destination = "/home/blah/rules"
            teams = [
                "blue-team",
                "cloud-infra",
            ]
            interval_minutes = 30
            branch = "main"
        "#};

        assert_eq!(result, expect);
    }

    #[test]
    fn team_selection_collapses_duplicates() {
        let selection = TeamSelection::new(["cloud-infra", "cloud-infra", "blue-team"]);
        let listing: Vec<String> = selection.clone().into();

        assert_eq!(
            listing,
            vec!["blue-team".to_string(), "cloud-infra".to_string()]
        );
        assert!(selection.contains("cloud-infra"));
        assert!(!selection.contains("red-team"));
    }

    #[test]
    fn optional_fields_default() -> anyhow::Result<()> {
        let result: SyncProfile = r#"
            [settings]
            remote = "https://blah.org/foo/rules.git"
            destination = "/home/blah/rules"
        "#
        .parse()?;

        assert!(result.teams().is_empty());
        assert_eq!(result.interval_minutes(), 0);
        assert_eq!(result.branch(), None);
        assert_eq!(result.cache_root(), None);

        Ok(())
    }
}
