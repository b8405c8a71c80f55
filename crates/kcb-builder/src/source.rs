//! Source checkout abstraction.

use std::path::PathBuf;

use async_trait::async_trait;

use crate::request::SourceLocator;

/// Errors raised while fetching sources.
#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    /// The checkout did not contain a Dockerfile.
    #[error("Dockerfile file missing: {}", .path.display())]
    MissingDockerfile {
        /// Path that was expected to exist.
        path: PathBuf,
    },

    /// The checkout itself failed.
    #[error("source checkout failed: {message}")]
    Checkout {
        /// Description of the failure.
        message: String,
    },
}

/// Checks out a source location and locates its Dockerfile.
#[async_trait]
pub trait SourceFetcher: Send + Sync {
    /// Checks out `source` and returns the path of its Dockerfile.
    async fn fetch_dockerfile(
        &self,
        source: &SourceLocator,
        build_tag: &str,
        scratch: bool,
    ) -> Result<PathBuf, SourceError>;
}
