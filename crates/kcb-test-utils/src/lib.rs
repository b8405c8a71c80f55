//! Shared test utilities for kcb integration tests.
//!
//! This crate provides:
//! - [`MemoryOrchestrator`] and [`MemoryConnector`]: scripted orchestrator with call recording
//! - [`MemorySession`]: hub session with an offset-aware upload store
//! - [`MemorySourceFetcher`]: writes a Dockerfile fixture into a temporary checkout
//! - [`TestContext`]: pre-wired collaborators and a temporary work area
//! - Fixtures and custom assertion helpers
//!
//! # Example
//!
//! ```rust,ignore
//! use kcb_test_utils::{RequestFactory, SOURCE_URL, TARGET, TestContext};
//!
//! #[tokio::test]
//! async fn test_example() {
//!     let ctx = TestContext::new();
//!     let result = ctx
//!         .container_task()
//!         .handle(SOURCE_URL, TARGET, RequestFactory::options())
//!         .await
//!         .unwrap();
//!     assert_eq!(result.koji_builds.len(), 0);
//! }
//! ```

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(rust_2018_idioms)]
#![warn(clippy::pedantic)]
#![allow(clippy::must_use_candidate)]
// Test utilities use expect/unwrap for cleaner test code - panics are acceptable in tests
#![allow(clippy::expect_used)]
#![allow(clippy::unwrap_used)]
#![allow(clippy::missing_panics_doc)]

pub mod assertions;
pub mod fixtures;
pub mod orchestrator;
pub mod session;
pub mod source;

pub use assertions::*;
pub use fixtures::*;
pub use orchestrator::*;
pub use session::*;
pub use source::*;

/// Initialize test logging (call once per test module).
pub fn init_test_logging() {
    use tracing_subscriber::{EnvFilter, fmt};

    let _ = fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("kcb_builder=debug".parse().expect("valid directive")),
        )
        .with_test_writer()
        .try_init();
}
