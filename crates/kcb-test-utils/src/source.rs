//! In-memory source checkout.

use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tempfile::TempDir;

use kcb_builder::labels::ADDITIONAL_TAGS_FILE;
use kcb_builder::request::SourceLocator;
use kcb_builder::source::{SourceError, SourceFetcher};

/// Writes a fixed Dockerfile into a temporary checkout.
#[derive(Debug, Clone)]
pub struct MemorySourceFetcher {
    root: Arc<TempDir>,
    dockerfile: Option<String>,
    additional_tags: Option<String>,
    fetched: Arc<Mutex<Vec<String>>>,
}

impl MemorySourceFetcher {
    /// Creates a fetcher whose checkouts contain `dockerfile`.
    #[must_use]
    pub fn new(dockerfile: impl Into<String>) -> Self {
        Self {
            root: Arc::new(tempfile::tempdir().expect("tempdir")),
            dockerfile: Some(dockerfile.into()),
            additional_tags: None,
            fetched: Arc::default(),
        }
    }

    /// Creates a fetcher whose checkouts have no Dockerfile.
    #[must_use]
    pub fn empty() -> Self {
        Self {
            dockerfile: None,
            ..Self::new("")
        }
    }

    /// Adds an additional-tags file next to the Dockerfile.
    #[must_use]
    pub fn with_additional_tags(mut self, content: impl Into<String>) -> Self {
        self.additional_tags = Some(content.into());
        self
    }

    /// Source URLs fetched so far.
    #[must_use]
    pub fn fetched(&self) -> Vec<String> {
        self.fetched.lock().expect("lock").clone()
    }
}

#[async_trait]
impl SourceFetcher for MemorySourceFetcher {
    async fn fetch_dockerfile(
        &self,
        source: &SourceLocator,
        _build_tag: &str,
        _scratch: bool,
    ) -> Result<PathBuf, SourceError> {
        self.fetched.lock().expect("lock").push(source.url().to_string());

        let checkout = self.root.path().join(source.component());
        tokio::fs::create_dir_all(&checkout)
            .await
            .map_err(|e| SourceError::Checkout {
                message: e.to_string(),
            })?;
        let path = checkout.join("Dockerfile");
        let Some(content) = &self.dockerfile else {
            return Err(SourceError::MissingDockerfile { path });
        };
        tokio::fs::write(&path, content)
            .await
            .map_err(|e| SourceError::Checkout {
                message: e.to_string(),
            })?;
        if let Some(tags) = &self.additional_tags {
            tokio::fs::write(checkout.join(ADDITIONAL_TAGS_FILE), tags)
                .await
                .map_err(|e| SourceError::Checkout {
                    message: e.to_string(),
                })?;
        }
        Ok(path)
    }
}
