//! # kcb-core
//!
//! Shared primitives for the container build task handler.
//!
//! This crate provides the foundational types used by every other crate in the
//! workspace:
//!
//! - **Identifiers**: Strongly-typed IDs for hub tasks and orchestrator builds
//! - **Configuration**: Builder settings loaded from the environment
//! - **Observability**: One-shot logging initialization and span helpers
//! - **Error Types**: Shared error definitions and result types
//!
//! ## Example
//!
//! ```rust
//! use kcb_core::prelude::*;
//!
//! let task = TaskId::new(12345);
//! assert_eq!(task.upload_path(), "tasks/2345/12345");
//!
//! let build = BuildHandle::new("foo-master-1a2b3").unwrap();
//! assert_eq!(build.as_str(), "foo-master-1a2b3");
//! ```

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(rust_2018_idioms)]
#![warn(clippy::pedantic)]
#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used))]

pub mod config;
pub mod error;
pub mod id;
pub mod observability;

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::config::BuilderConfig;
    pub use crate::error::{Error, Result};
    pub use crate::id::{BuildHandle, TaskId};
    pub use crate::observability::{LogFormat, init_logging};
}

pub use config::BuilderConfig;
pub use error::{Error, Result};
pub use id::{BuildHandle, TaskId};
pub use observability::{LogFormat, build_span, init_logging, task_span};
