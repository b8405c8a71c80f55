//! # kcb-builder
//!
//! Container build task handler.
//!
//! A task validates its request, derives the image identity from the
//! Dockerfile, resolves target platforms and submits the build to a remote
//! orchestrator. While the build runs, logs are streamed into a results
//! directory on one task and uploaded to the hub from another; the finished
//! build is then classified into a task result or a typed error.
//!
//! ## Components
//!
//! - [`labels::LabelExtractor`]: required labels, expected NVR, tag length guard
//! - [`arches::ArchResolver`]: platform list from tag configuration and overrides
//! - [`submit::BuildSubmitter`]: orchestrator submission with a single legacy fallback
//! - [`logs::LogStreamer`] and [`logs::FileWatcher`]: incremental log capture and upload
//! - [`cancel::CancellationController`]: interrupt handling before scheduling
//! - [`outcome::OutcomeClassifier`]: terminal status to result or error
//!
//! The remote services are reached through the [`orchestrator::Orchestrator`],
//! [`session::HubSession`] and [`source::SourceFetcher`] traits.
//!
//! ## Example
//!
//! ```rust
//! use kcb_builder::prelude::*;
//!
//! let options = BuildOptions {
//!     git_branch: Some("main".into()),
//!     ..BuildOptions::default()
//! };
//! let request = BuildRequest::new("git://pkgs.example.com/containers/foo#abc123", "f40-container", options)
//!     .unwrap();
//! assert_eq!(request.source().component(), "foo");
//! assert_eq!(request.mode(), BuildMode::Regular);
//! ```

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(rust_2018_idioms)]
#![warn(clippy::pedantic)]
#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used))]

pub mod arches;
pub mod cancel;
pub mod dockerfile;
pub mod error;
pub mod labels;
pub mod logs;
pub mod orchestrator;
pub mod outcome;
pub mod request;
pub mod session;
pub mod source;
pub mod submit;
pub mod task;

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::arches::{ArchResolver, ArchSet, BuildMode};
    pub use crate::cancel::{BuildCancellation, CancellationController, Interrupt};
    pub use crate::error::{Error, Result};
    pub use crate::labels::{LabelExtractor, LabelId, LabelSet};
    pub use crate::logs::{FileWatcher, LogMode, LogStreamer, ReaderExit, UserWarnings};
    pub use crate::orchestrator::{
        BuildResponse, BuildStatus, ClientProfile, LogEntry, Orchestrator, OrchestratorConnector,
        OrchestratorError,
    };
    pub use crate::outcome::{BuildOutcome, OutcomeClassifier};
    pub use crate::request::{BuildOptions, BuildRequest, SourceContainerOptions, SourceLocator};
    pub use crate::session::{BuildRef, BuildState, HubSession, SessionError};
    pub use crate::source::{SourceError, SourceFetcher};
    pub use crate::submit::{BuildSubmitter, Submission, SubmissionKind};
    pub use crate::task::{BuildContainerTask, BuildSourceContainerTask, TaskContext, TaskResult};
}

pub use error::{CONTAINER_CANCELLED_FAULT, CONTAINER_ERROR_FAULT, Error, Result};
pub use task::{BuildContainerTask, BuildSourceContainerTask, TaskContext, TaskResult};
