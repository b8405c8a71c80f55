//! Build identity from Dockerfile labels.
//!
//! Each [`LabelId`] is looked up through a fixed alias list, preferred alias
//! first. For every alias a caller override beats the Dockerfile; the first
//! alias that resolves either way wins.

use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;

use crate::dockerfile::Dockerfile;
use crate::error::{Error, Result};

/// Longest image tag the container runtime accepts.
pub const MAX_TAG_LENGTH: usize = 128;

/// Sidecar file next to the Dockerfile listing extra image tags.
pub const ADDITIONAL_TAGS_FILE: &str = "additional-tags";

/// Canonical label identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum LabelId {
    /// Component name.
    Component,
    /// Version.
    Version,
    /// Release; absent means the orchestrator picks one.
    Release,
    /// Image name.
    Name,
}

impl LabelId {
    /// Every label id, in resolution order.
    pub const ALL: [Self; 4] = [Self::Component, Self::Version, Self::Release, Self::Name];

    /// Dockerfile label names accepted for this id, preferred first.
    #[must_use]
    pub const fn aliases(self) -> &'static [&'static str] {
        match self {
            Self::Component => &["com.redhat.component", "BZComponent"],
            Self::Version => &["version", "Version"],
            Self::Release => &["release", "Release"],
            Self::Name => &["name", "Name"],
        }
    }

    /// Preferred Dockerfile label name.
    #[must_use]
    pub const fn preferred(self) -> &'static str {
        self.aliases()[0]
    }

    /// User-facing description, e.g. `version (or Version)`.
    #[must_use]
    pub fn describe(self) -> String {
        match self.aliases() {
            [only] => (*only).to_string(),
            [first, rest @ ..] => format!("{first} (or {})", rest.join(" or ")),
            [] => self.to_string(),
        }
    }
}

impl fmt::Display for LabelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Component => "COMPONENT",
            Self::Version => "VERSION",
            Self::Release => "RELEASE",
            Self::Name => "NAME",
        };
        f.write_str(name)
    }
}

/// Resolved label values keyed by canonical id.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LabelSet {
    values: BTreeMap<LabelId, String>,
}

impl LabelSet {
    /// Resolves every label id from Dockerfile labels and caller overrides.
    ///
    /// An override under any alias beats every Dockerfile value; within each
    /// source the preferred alias comes first.
    #[must_use]
    pub fn resolve(
        manifest: &BTreeMap<String, String>,
        overrides: &BTreeMap<String, String>,
    ) -> Self {
        let mut values = BTreeMap::new();
        for id in LabelId::ALL {
            let lookup = |source: &BTreeMap<String, String>| {
                id.aliases().iter().find_map(|alias| source.get(*alias).cloned())
            };
            let found = lookup(overrides).or_else(|| lookup(manifest));
            if let Some(value) = found {
                values.insert(id, value);
            }
        }
        Self { values }
    }

    /// Returns the value of a label, if resolved.
    #[must_use]
    pub fn get(&self, id: LabelId) -> Option<&str> {
        self.values.get(&id).map(String::as_str)
    }

    /// Label ids that block a build.
    ///
    /// COMPONENT and NAME must be non-empty; VERSION only has to be present
    /// since its value may come from the build environment.
    #[must_use]
    pub fn missing_label_ids(&self) -> Vec<LabelId> {
        let mut missing: Vec<LabelId> = [LabelId::Name, LabelId::Component]
            .into_iter()
            .filter(|id| self.get(*id).is_none_or(str::is_empty))
            .collect();
        if self.get(LabelId::Version).is_none() {
            missing.push(LabelId::Version);
        }
        missing
    }

    /// The `VERSION-RELEASE` image tag, when both are non-empty.
    #[must_use]
    pub fn version_release_tag(&self) -> Option<String> {
        let version = self.get(LabelId::Version).filter(|v| !v.is_empty())?;
        let release = self.get(LabelId::Release).filter(|r| !r.is_empty())?;
        Some(format!("{version}-{release}"))
    }

    /// `component-version-release`, defined only when release is concrete.
    #[must_use]
    pub fn expected_nvr(&self) -> Option<String> {
        let tag = self.version_release_tag()?;
        let component = self.get(LabelId::Component)?;
        Some(format!("{component}-{tag}"))
    }
}

/// Outcome of a successful label check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabelCheck {
    /// Component label value.
    pub component: String,
    /// Expected NVR, when the release is known up front.
    pub expected_nvr: Option<String>,
    /// All resolved labels.
    pub labels: LabelSet,
}

/// Reads build identity from a Dockerfile.
#[derive(Debug, Clone, Default)]
pub struct LabelExtractor {
    overrides: BTreeMap<String, String>,
}

impl LabelExtractor {
    /// Creates an extractor without overrides.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Overrides a Dockerfile label by name.
    #[must_use]
    pub fn with_override(mut self, label: impl Into<String>, value: impl Into<String>) -> Self {
        self.overrides.insert(label.into(), value.into());
        self
    }

    /// Overrides the preferred release label.
    #[must_use]
    pub fn with_release(self, release: impl Into<String>) -> Self {
        self.with_override(LabelId::Release.preferred(), release)
    }

    /// Resolves labels from the Dockerfile at `dockerfile`.
    ///
    /// The file is read on every call.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] if the Dockerfile cannot be read.
    pub async fn extract(&self, dockerfile: &Path) -> Result<LabelSet> {
        let parsed = Dockerfile::read(dockerfile).await?;
        Ok(LabelSet::resolve(parsed.labels(), &self.overrides))
    }

    /// Extra tags from the sidecar file next to the Dockerfile.
    ///
    /// Entries containing `-` are skipped; a missing file yields no tags.
    pub async fn additional_tags(dockerfile: &Path) -> Vec<String> {
        let Some(dir) = dockerfile.parent() else {
            return Vec::new();
        };
        let path = dir.join(ADDITIONAL_TAGS_FILE);
        match tokio::fs::read_to_string(&path).await {
            Ok(content) => content
                .lines()
                .filter(|tag| !tag.contains('-'))
                .map(str::trim)
                .filter(|tag| !tag.is_empty())
                .map(str::to_string)
                .collect(),
            Err(err) => {
                tracing::debug!(path = %path.display(), error = %err, "no additional tags");
                Vec::new()
            }
        }
    }

    /// Validates labels and tag lengths before submission.
    ///
    /// # Errors
    ///
    /// - [`Error::MissingLabels`] if a required label is missing
    /// - [`Error::TagTooLong`] if any image tag exceeds [`MAX_TAG_LENGTH`]
    pub async fn check(&self, dockerfile: &Path) -> Result<LabelCheck> {
        let labels = self.extract(dockerfile).await?;

        let missing = labels.missing_label_ids();
        if !missing.is_empty() {
            return Err(Error::MissingLabels {
                labels: missing.into_iter().map(LabelId::describe).collect(),
            });
        }

        let mut tags = Self::additional_tags(dockerfile).await;
        tags.extend(labels.version_release_tag());
        if let Some(length) = tags.iter().map(String::len).max() {
            if length > MAX_TAG_LENGTH {
                return Err(Error::TagTooLong { length });
            }
        }

        Ok(LabelCheck {
            component: labels.get(LabelId::Component).unwrap_or_default().to_string(),
            expected_nvr: labels.expected_nvr(),
            labels,
        })
    }
}
