//! Orchestrator client abstraction.
//!
//! This module provides:
//!
//! - [`Orchestrator`]: the remote build service a task drives
//! - [`OrchestratorConnector`]: constructs fresh clients on demand
//! - [`BuildResponse`]: explicit status/result record for a build
//! - [`LogEntry`] and [`LogStream`]: the follow-mode log channel
//!
//! Clients are never shared between the log reader and the task that waits
//! for completion; each side asks the connector for its own.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};

use kcb_core::{BuildHandle, TaskId};

/// Errors raised by an orchestrator client.
#[derive(Debug, thiserror::Error)]
pub enum OrchestratorError {
    /// Multi-platform builds are not enabled on this orchestrator.
    #[error("orchestrator builds are not enabled")]
    OrchestratorNotEnabled,

    /// The client does not implement a method.
    #[error("orchestrator client has no method {method}")]
    MethodUnavailable {
        /// Name of the missing method.
        method: &'static str,
    },

    /// A request to the orchestrator failed.
    #[error("orchestrator request failed: {message}")]
    Request {
        /// Description of the failure.
        message: String,
        /// The underlying cause, if any.
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Reading a log stream failed.
    #[error("log stream error: {message}")]
    Stream {
        /// Description of the failure.
        message: String,
    },

    /// A client could not be constructed.
    #[error("cannot connect to orchestrator: {message}")]
    Connect {
        /// Description of the failure.
        message: String,
    },
}

impl OrchestratorError {
    /// Creates a request error.
    #[must_use]
    pub fn request(message: impl Into<String>) -> Self {
        Self::Request {
            message: message.into(),
            source: None,
        }
    }

    /// Creates a request error with a source.
    #[must_use]
    pub fn request_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Request {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Creates a stream error.
    #[must_use]
    pub fn stream(message: impl Into<String>) -> Self {
        Self::Stream {
            message: message.into(),
        }
    }

    /// Returns true if the error means a capability is missing rather than
    /// that a call failed.
    #[must_use]
    pub const fn is_capability_unavailable(&self) -> bool {
        matches!(
            self,
            Self::OrchestratorNotEnabled | Self::MethodUnavailable { .. }
        )
    }
}

/// Result alias for orchestrator calls.
pub type OrchestratorResult<T> = std::result::Result<T, OrchestratorError>;

/// Status of a build as reported by the orchestrator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BuildStatus {
    /// Accepted but not yet running.
    Pending,
    /// Running.
    Running,
    /// Finished successfully.
    Succeeded,
    /// Finished with an error.
    Failed,
    /// Cancelled before finishing.
    Cancelled,
}

impl BuildStatus {
    /// Returns true while the build has not reached a terminal status.
    #[must_use]
    pub const fn is_active(self) -> bool {
        matches!(self, Self::Pending | Self::Running)
    }

    /// Returns true once the build has finished, whatever the outcome.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        !self.is_active()
    }
}

impl fmt::Display for BuildStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Pending => "PENDING",
            Self::Running => "RUNNING",
            Self::Succeeded => "SUCCEEDED",
            Self::Failed => "FAILED",
            Self::Cancelled => "CANCELLED",
        };
        f.write_str(name)
    }
}

/// Snapshot of an orchestrator build.
///
/// Optional fields are absent when the orchestrator did not report them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BuildResponse {
    /// Orchestrator build name.
    pub build_id: String,
    /// Current status.
    pub status: BuildStatus,
    /// Image repositories grouped by registry.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repositories: Option<BTreeMap<String, Vec<String>>>,
    /// Hub build id minted for non-scratch builds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub koji_build_id: Option<String>,
    /// Human-readable failure reason.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    /// Build annotations.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub annotations: Option<serde_json::Map<String, serde_json::Value>>,
}

impl BuildResponse {
    /// Creates a response carrying only an id and a status.
    #[must_use]
    pub fn new(build_id: impl Into<String>, status: BuildStatus) -> Self {
        Self {
            build_id: build_id.into(),
            status,
            repositories: None,
            koji_build_id: None,
            error_message: None,
            annotations: None,
        }
    }

    /// Adds repositories for `registry`.
    #[must_use]
    pub fn with_repositories<I, S>(mut self, registry: impl Into<String>, repos: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.repositories
            .get_or_insert_with(BTreeMap::new)
            .entry(registry.into())
            .or_default()
            .extend(repos.into_iter().map(Into::into));
        self
    }

    /// Sets the minted hub build id.
    #[must_use]
    pub fn with_koji_build_id(mut self, id: impl Into<String>) -> Self {
        self.koji_build_id = Some(id.into());
        self
    }

    /// Sets the failure reason.
    #[must_use]
    pub fn with_error_message(mut self, message: impl Into<String>) -> Self {
        self.error_message = Some(message.into());
        self
    }

    /// Sets one annotation.
    #[must_use]
    pub fn with_annotation(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.annotations
            .get_or_insert_with(serde_json::Map::new)
            .insert(key.into(), value);
        self
    }

    /// All repositories across registries, in registry order.
    #[must_use]
    pub fn flattened_repositories(&self) -> Vec<String> {
        self.repositories
            .iter()
            .flat_map(BTreeMap::values)
            .flatten()
            .cloned()
            .collect()
    }
}

/// One line of build log output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    /// Platform tag, or `None` for orchestrator-level lines.
    pub platform: Option<String>,
    /// Line text without a trailing newline.
    pub line: String,
}

impl LogEntry {
    /// Creates an orchestrator-level entry.
    #[must_use]
    pub fn untagged(line: impl Into<String>) -> Self {
        Self {
            platform: None,
            line: line.into(),
        }
    }

    /// Creates an entry tagged with a platform.
    #[must_use]
    pub fn tagged(platform: impl Into<String>, line: impl Into<String>) -> Self {
        Self {
            platform: Some(platform.into()),
            line: line.into(),
        }
    }
}

/// A possibly infinite stream of log entries.
pub type LogStream = BoxStream<'static, OrchestratorResult<LogEntry>>;

/// Parameters shared by every container submission.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CommonBuildParams {
    /// Clone URI of the source repository.
    pub git_uri: String,
    /// Revision to build.
    pub git_ref: String,
    /// Branch the revision belongs to.
    pub git_branch: Option<String>,
    /// Push URL of the repository.
    pub git_push_url: Option<String>,
    /// Name of the task owner.
    pub user: String,
    /// Component name.
    pub component: String,
    /// Build target name.
    pub target: String,
    /// Dependency replacements.
    pub dependency_replacements: Vec<String>,
    /// Extra yum repo file URLs.
    pub yum_repourls: Vec<String>,
    /// Scratch build flag.
    pub scratch: bool,
    /// Hub task driving the build.
    pub koji_task_id: TaskId,
    /// Flatpak build flag.
    pub flatpak: bool,
    /// Task that triggered this automatic rebuild.
    pub triggered_after_koji_task: Option<u64>,
    /// User-defined metadata.
    pub userdata: Option<serde_json::Map<String, serde_json::Value>>,
}

/// Multi-platform submission.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OrchestratorBuildParams {
    /// Shared parameters.
    #[serde(flatten)]
    pub common: CommonBuildParams,
    /// Platforms to build for.
    pub platforms: Vec<String>,
    /// Compose ids used as build input.
    pub compose_ids: Option<Vec<i64>>,
    /// Signing intent of the composes.
    pub signing_intent: Option<String>,
    /// Parent image override.
    pub koji_parent_build: Option<String>,
    /// Isolated build flag.
    pub isolated: bool,
    /// Release override.
    pub release: Option<String>,
    /// Only update the build configuration.
    pub skip_build: bool,
}

/// Single-platform submission used when orchestration is unavailable.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LegacyBuildParams {
    /// Shared parameters.
    #[serde(flatten)]
    pub common: CommonBuildParams,
    /// The one platform to build for.
    pub architecture: String,
}

/// Source container submission.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SourceContainerBuildParams {
    /// Name of the task owner.
    pub user: String,
    /// Component name (`<name>-source`).
    pub component: String,
    /// Hub id of the image build to collect sources for.
    pub sources_for_koji_build_id: i64,
    /// NVR of the image build to collect sources for.
    pub sources_for_koji_build_nvr: String,
    /// Build target name.
    pub target: String,
    /// Scratch build flag.
    pub scratch: bool,
    /// Hub task driving the build.
    pub koji_task_id: TaskId,
    /// Signing intent of the composes.
    pub signing_intent: Option<String>,
}

/// The remote build service.
#[async_trait]
pub trait Orchestrator: Send + Sync {
    /// Submits a multi-platform build.
    ///
    /// Returns `None` when the orchestrator accepted the request without
    /// starting a build (`skip_build`).
    async fn create_orchestrator_build(
        &self,
        params: &OrchestratorBuildParams,
    ) -> OrchestratorResult<Option<BuildHandle>>;

    /// Submits a single-platform build.
    async fn create_build(&self, params: &LegacyBuildParams) -> OrchestratorResult<BuildHandle>;

    /// Submits a source container build.
    async fn create_source_container_build(
        &self,
        params: &SourceContainerBuildParams,
    ) -> OrchestratorResult<BuildHandle> {
        let _ = params;
        Err(OrchestratorError::MethodUnavailable {
            method: "create_source_container_build",
        })
    }

    /// Blocks until the build has been scheduled.
    async fn wait_for_build_to_get_scheduled(&self, handle: &BuildHandle) -> OrchestratorResult<()>;

    /// Returns true if per-platform tagged logs are available.
    fn supports_orchestrator_logs(&self) -> bool {
        true
    }

    /// Opens the platform-tagged log stream.
    async fn orchestrator_build_logs(
        &self,
        handle: &BuildHandle,
        follow: bool,
    ) -> OrchestratorResult<LogStream>;

    /// Opens the combined, untagged log stream.
    async fn build_logs(&self, handle: &BuildHandle, follow: bool)
    -> OrchestratorResult<LogStream>;

    /// Requests cancellation of a build.
    async fn cancel_build(&self, handle: &BuildHandle) -> OrchestratorResult<()>;

    /// Returns the current build snapshot.
    async fn get_build(&self, handle: &BuildHandle) -> OrchestratorResult<BuildResponse>;

    /// Blocks until the build reaches a terminal status.
    async fn wait_for_build_to_finish(
        &self,
        handle: &BuildHandle,
    ) -> OrchestratorResult<BuildResponse>;

    /// Deletes the build record on the orchestrator.
    async fn remove_build(&self, handle: &BuildHandle) -> OrchestratorResult<()>;
}

/// Client configuration profile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClientProfile {
    /// Regular builds.
    Default,
    /// Scratch builds, which may go to a separate cluster.
    Scratch,
}

impl ClientProfile {
    /// Selects the profile for a build.
    #[must_use]
    pub const fn for_scratch(scratch: bool) -> Self {
        if scratch { Self::Scratch } else { Self::Default }
    }
}

/// Constructs orchestrator clients.
#[async_trait]
pub trait OrchestratorConnector: Send + Sync {
    /// Builds a new client for `profile`.
    async fn connect(&self, profile: ClientProfile) -> OrchestratorResult<Arc<dyn Orchestrator>>;
}
