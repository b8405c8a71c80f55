//! Error types for container build tasks.
//!
//! Every fatal condition a task can hit has its own variant so callers can
//! tell validation problems, build failures and cancellations apart without
//! string matching.

use std::path::PathBuf;

use crate::orchestrator::OrchestratorError;
use crate::session::SessionError;
use crate::source::SourceError;

/// The result type used throughout kcb-builder.
pub type Result<T> = std::result::Result<T, Error>;

/// Fault code reported to the hub for a failed container build.
pub const CONTAINER_ERROR_FAULT: i32 = 2001;

/// Fault code reported to the hub for a cancelled container build.
pub const CONTAINER_CANCELLED_FAULT: i32 = 2002;

/// Errors that can occur while handling a container build task.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The task parameters are malformed or inconsistent.
    #[error("{message}")]
    InvalidRequest {
        /// Description of the problem.
        message: String,
    },

    /// Required labels are absent from the Dockerfile.
    #[error("Required LABELs haven't been found in Dockerfile: {}.", .labels.join(", "))]
    MissingLabels {
        /// User-facing label names, each with its accepted aliases.
        labels: Vec<String>,
    },

    /// The longest image tag would be rejected by the container runtime.
    #[error(
        "Docker cannot create image with a tag longer than 128, current version-release tag length is {length}"
    )]
    TagTooLong {
        /// Length of the longest tag.
        length: usize,
    },

    /// The build tag declares no architectures.
    #[error("No arches for tag {tag}")]
    NoArches {
        /// Build tag name.
        tag: String,
    },

    /// No requested architecture is permitted by the build tag.
    #[error("No matching arches were found")]
    NoMatchingArches {
        /// Build tag name.
        tag: String,
    },

    /// An architecture override was given for a regular build.
    #[error("arch-override is only allowed for isolated or scratch builds")]
    ArchOverrideNotAllowed,

    /// Two mutually exclusive inputs were supplied together.
    #[error("{first} used with {second}")]
    ConflictingInputs {
        /// First option name.
        first: &'static str,
        /// Second option name.
        second: &'static str,
    },

    /// The package is not listed for the destination tag.
    #[error("package (container) {package} not in list for tag {tag}")]
    PackageNotListed {
        /// Package (component) name.
        package: String,
        /// Destination tag name.
        tag: String,
    },

    /// The package is blocked for the destination tag.
    #[error("package (container) {package} is blocked for tag {tag}")]
    PackageBlocked {
        /// Package (component) name.
        package: String,
        /// Destination tag name.
        tag: String,
    },

    /// A non-reusable build with the expected NVR already exists.
    #[error("Build for {nvr} already exists, id {build_id}")]
    DuplicateBuild {
        /// The expected NVR.
        nvr: String,
        /// Hub id of the existing build.
        build_id: i64,
    },

    /// The build target does not exist.
    #[error("Target `{target}` not found")]
    TargetNotFound {
        /// Requested target name.
        target: String,
    },

    /// The build a source container was requested for is unusable.
    #[error("{message}")]
    SourceBuild {
        /// Description of the problem.
        message: String,
    },

    /// The orchestrator reported the image build as failed.
    #[error("{message}")]
    ContainerFailed {
        /// Message including the orchestrator build id.
        message: String,
    },

    /// Reading or persisting the build log stream failed.
    #[error("{message}")]
    LogStream {
        /// Description of the failure.
        message: String,
    },

    /// The log stream closed while the build was still active.
    #[error("Build log finished but build still has not finished: {status}.")]
    BuildStillRunning {
        /// Status reported after the stream ended.
        status: String,
    },

    /// The build was cancelled, either locally or on the orchestrator.
    #[error("Image build was cancelled by the orchestrator. Build id: {build_id}")]
    Cancelled {
        /// Orchestrator build id.
        build_id: String,
    },

    /// The hub refused an action because the task was cancelled.
    #[error("action not allowed: {message}")]
    ActionNotAllowed {
        /// Description from the hub.
        message: String,
    },

    /// A local file operation failed.
    #[error("I/O error on {}: {source}", .path.display())]
    Io {
        /// Path being accessed.
        path: PathBuf,
        /// The underlying cause.
        #[source]
        source: std::io::Error,
    },

    /// An orchestrator call failed.
    #[error(transparent)]
    Orchestrator(#[from] OrchestratorError),

    /// A hub session call failed.
    #[error(transparent)]
    Session(SessionError),

    /// Fetching the source checkout failed.
    #[error(transparent)]
    Source(#[from] SourceError),

    /// An error from kcb-core.
    #[error("core error: {0}")]
    Core(#[from] kcb_core::Error),
}

impl Error {
    /// Creates an invalid request error.
    #[must_use]
    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::InvalidRequest {
            message: message.into(),
        }
    }

    /// Creates a source build error.
    #[must_use]
    pub fn source_build(message: impl Into<String>) -> Self {
        Self::SourceBuild {
            message: message.into(),
        }
    }

    /// Creates a log stream error.
    #[must_use]
    pub fn log_stream(message: impl Into<String>) -> Self {
        Self::LogStream {
            message: message.into(),
        }
    }

    /// Creates an I/O error for `path`.
    #[must_use]
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Returns the hub fault code for container-specific errors.
    #[must_use]
    pub const fn fault_code(&self) -> Option<i32> {
        match self {
            Self::ContainerFailed { .. }
            | Self::LogStream { .. }
            | Self::BuildStillRunning { .. } => Some(CONTAINER_ERROR_FAULT),
            Self::Cancelled { .. } => Some(CONTAINER_CANCELLED_FAULT),
            _ => None,
        }
    }

    /// Returns true if the build ended because it was cancelled.
    #[must_use]
    pub const fn is_cancellation(&self) -> bool {
        matches!(self, Self::Cancelled { .. } | Self::ActionNotAllowed { .. })
    }
}

impl From<SessionError> for Error {
    fn from(err: SessionError) -> Self {
        match err {
            SessionError::ActionNotAllowed { message } => Self::ActionNotAllowed { message },
            other => Self::Session(other),
        }
    }
}
