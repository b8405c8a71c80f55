//! Strongly-typed identifiers for hub tasks and orchestrator builds.
//!
//! - [`TaskId`] is the integer id the hub assigned to the task being handled.
//! - [`BuildHandle`] is the opaque build name the orchestrator returned on
//!   submission. It is owned by exactly one task and never reused.
//!
//! # Example
//!
//! ```rust
//! use kcb_core::id::{BuildHandle, TaskId};
//!
//! let task: TaskId = "42".parse().unwrap();
//! let build: BuildHandle = "foo-build-7".parse().unwrap();
//!
//! // IDs are different types - this won't compile:
//! // let wrong: TaskId = build;
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{Error, Result};

/// Identifier of a hub task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(u64);

impl TaskId {
    /// Creates a task ID from the raw hub value.
    #[must_use]
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// Returns the raw hub value.
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }

    /// Returns the hub-relative directory that uploads for this task land in.
    ///
    /// Tasks are bucketed by `id % 10000` so that no single directory on the
    /// hub grows without bound.
    #[must_use]
    pub fn upload_path(self) -> String {
        format!("tasks/{}/{}", self.0 % 10_000, self.0)
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for TaskId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        s.trim()
            .parse::<u64>()
            .map(Self)
            .map_err(|e| Error::InvalidId {
                message: format!("invalid task ID '{s}': {e}"),
            })
    }
}

/// Opaque identifier of a build on the orchestrator.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BuildHandle(String);

impl BuildHandle {
    /// Wraps an orchestrator build name.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidId`] if the name is empty or whitespace.
    pub fn new(id: impl Into<String>) -> Result<Self> {
        let id = id.into();
        if id.trim().is_empty() {
            return Err(Error::InvalidId {
                message: "build handle cannot be empty".to_string(),
            });
        }
        Ok(Self(id))
    }

    /// Returns the orchestrator build name.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for BuildHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for BuildHandle {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::new(s)
    }
}

impl AsRef<str> for BuildHandle {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
