//! Hub session abstraction.
//!
//! The hub owns task records, build targets, tag configuration, package lists
//! and the build catalog. A task only reaches it through [`HubSession`].

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::fs::File;

use kcb_core::TaskId;

/// Errors raised by the hub session.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// The hub refused the action, typically because the task was cancelled.
    #[error("action not allowed: {message}")]
    ActionNotAllowed {
        /// Description from the hub.
        message: String,
    },

    /// A hub call failed.
    #[error("hub request failed: {message}")]
    Request {
        /// Description of the failure.
        message: String,
        /// The underlying cause, if any.
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },
}

impl SessionError {
    /// Creates a request error.
    #[must_use]
    pub fn request(message: impl Into<String>) -> Self {
        Self::Request {
            message: message.into(),
            source: None,
        }
    }
}

/// Result alias for hub calls.
pub type SessionResult<T> = std::result::Result<T, SessionError>;

/// A build target: where builds come from and where they land.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildTarget {
    /// Target name.
    pub name: String,
    /// Tag whose configuration drives the build.
    pub build_tag: String,
    /// Tag builds are imported into.
    pub dest_tag_name: String,
}

/// Build configuration of a tag.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildConfig {
    /// Tag name.
    pub name: String,
    /// Whitespace-separated architectures, if any.
    pub arches: Option<String>,
}

/// Package list entry of a tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageConfig {
    /// Whether the package is blocked.
    pub blocked: bool,
}

/// State of a build in the catalog.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BuildState {
    /// Build in progress.
    Building,
    /// Build finished and imported.
    Complete,
    /// Build deleted.
    Deleted,
    /// Build failed.
    Failed,
    /// Build cancelled.
    Canceled,
}

impl BuildState {
    /// Returns true if a new build may reuse this build's NVR.
    #[must_use]
    pub const fn is_reusable(self) -> bool {
        matches!(self, Self::Failed | Self::Canceled)
    }
}

impl fmt::Display for BuildState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Building => "BUILDING",
            Self::Complete => "COMPLETE",
            Self::Deleted => "DELETED",
            Self::Failed => "FAILED",
            Self::Canceled => "CANCELED",
        };
        f.write_str(name)
    }
}

/// A build recorded in the catalog.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExistingBuild {
    /// Catalog id.
    pub build_id: i64,
    /// Name-version-release.
    pub nvr: String,
    /// Package name.
    pub name: String,
    /// Current state.
    pub state: BuildState,
    /// Free-form build metadata.
    #[serde(default)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// How a catalog build is looked up.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum BuildRef {
    /// By catalog id.
    Id(i64),
    /// By name-version-release.
    Nvr(String),
}

impl fmt::Display for BuildRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Id(id) => write!(f, "{id}"),
            Self::Nvr(nvr) => f.write_str(nvr),
        }
    }
}

/// The hub as seen from a running task.
#[async_trait]
pub trait HubSession: Send + Sync {
    /// Returns the name of the user who owns the task.
    async fn task_owner(&self, task_id: TaskId) -> SessionResult<String>;

    /// Returns the id of the latest hub event, used for consistent reads.
    async fn last_event_id(&self) -> SessionResult<i64>;

    /// Looks up a build target as of `event`.
    async fn build_target(&self, name: &str, event: i64) -> SessionResult<Option<BuildTarget>>;

    /// Returns the build configuration of a tag as of `event`.
    async fn build_config(&self, tag: &str, event: i64) -> SessionResult<BuildConfig>;

    /// Looks up a package in a tag's package list.
    async fn package_config(&self, tag: &str, package: &str)
    -> SessionResult<Option<PackageConfig>>;

    /// Looks up a build in the catalog.
    async fn get_build(&self, build: &BuildRef) -> SessionResult<Option<ExistingBuild>>;

    /// Uploads what can be read from `file` at its current position.
    ///
    /// Reads to EOF and stores the bytes at the matching offset of
    /// `upload_path/name`. Returns the number of bytes uploaded. Safe to call
    /// repeatedly on a growing file.
    async fn incremental_upload(
        &self,
        name: &str,
        file: &mut File,
        upload_path: &str,
    ) -> SessionResult<u64>;

    /// Uploads an in-memory file, replacing any previous content.
    async fn upload_bytes(&self, name: &str, data: &[u8], upload_path: &str)
    -> SessionResult<()>;

    /// Marks a task as cancelled.
    async fn cancel_task(&self, task_id: TaskId) -> SessionResult<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_failed_and_canceled_builds_are_reusable() {
        assert!(BuildState::Failed.is_reusable());
        assert!(BuildState::Canceled.is_reusable());
        for state in [BuildState::Building, BuildState::Complete, BuildState::Deleted] {
            assert!(!state.is_reusable(), "{state} must not be reusable");
        }
    }

    #[test]
    fn existing_build_deserializes_with_default_extra() {
        let json = r#"{"build_id": 3, "nvr": "foo-1-2", "name": "foo", "state": "COMPLETE"}"#;
        let build: ExistingBuild = serde_json::from_str(json).unwrap();
        assert_eq!(build.state, BuildState::Complete);
        assert!(build.extra.is_empty());
    }
}
