//! Target architecture resolution.
//!
//! The tag's declared architectures bound what a build may target. An override
//! replaces the candidate list (never merges with it) and is only honored for
//! scratch and isolated builds.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::session::BuildConfig;

/// Pseudo-architecture that is always permitted when requested.
pub const NOARCH: &str = "noarch";

/// How a build is recorded, which decides which restrictions apply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BuildMode {
    /// A regular build, imported and tagged on success.
    Regular,
    /// A disposable build that is never imported.
    Scratch,
    /// A build pinned to specific inputs.
    Isolated,
}

impl BuildMode {
    /// Returns true if an architecture override may be used.
    #[must_use]
    pub const fn allows_arch_override(self) -> bool {
        matches!(self, Self::Scratch | Self::Isolated)
    }
}

impl fmt::Display for BuildMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Regular => write!(f, "REGULAR"),
            Self::Scratch => write!(f, "SCRATCH"),
            Self::Isolated => write!(f, "ISOLATED"),
        }
    }
}

/// Maps an architecture name to its canonical form.
///
/// ```rust
/// use kcb_builder::arches::canon_arch;
///
/// assert_eq!(canon_arch("i686"), "i386");
/// assert_eq!(canon_arch("ppc64le"), "ppc64le");
/// assert_eq!(canon_arch("armv7hl"), "armhfp");
/// ```
#[must_use]
pub fn canon_arch(arch: &str) -> String {
    let bytes = arch.as_bytes();
    let is_ix86 = bytes.len() == 4
        && bytes[0] == b'i'
        && bytes[1].is_ascii_digit()
        && arch.get(2..) == Some("86");

    let canon = if is_ix86 || arch == "athlon" {
        "i386"
    } else if arch == "ia32e" {
        "x86_64"
    } else if arch == "ppc64le" {
        "ppc64le"
    } else if arch.starts_with("ppc64") {
        "ppc64"
    } else if arch.starts_with("sparc64") {
        "sparc64"
    } else if arch.starts_with("sparc") {
        "sparc"
    } else if arch.starts_with("alpha") {
        "alpha"
    } else if arch.starts_with("arm") && arch[3..].contains('h') {
        "armhfp"
    } else if arch.starts_with("arm") {
        "arm"
    } else {
        arch
    };
    canon.to_string()
}

/// Ordered, duplicate-free set of target platforms.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ArchSet(Vec<String>);

impl ArchSet {
    /// Builds a set keeping the first occurrence of each name.
    pub fn from_names<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut set = Self::default();
        for name in names {
            set.insert(name.into());
        }
        set
    }

    /// Adds a platform unless it is already present.
    pub fn insert(&mut self, arch: String) {
        if !self.0.contains(&arch) {
            self.0.push(arch);
        }
    }

    /// Returns the number of platforms.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns true if there are no platforms.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterates platforms in resolution order.
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }

    /// Returns the platforms as a slice.
    #[must_use]
    pub fn as_slice(&self) -> &[String] {
        &self.0
    }

    /// Consumes the set, returning the platform names.
    #[must_use]
    pub fn into_vec(self) -> Vec<String> {
        self.0
    }
}

impl fmt::Display for ArchSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0.join(" "))
    }
}

/// Computes target platforms for a build.
#[derive(Debug, Clone, Copy, Default)]
pub struct ArchResolver;

impl ArchResolver {
    /// Resolves the platforms for a build against its tag configuration.
    ///
    /// Candidates come from `arch_override` when given, otherwise from the
    /// tag. A candidate is kept if it is `noarch` or its canonical form is one
    /// of the tag's canonical architectures.
    ///
    /// # Errors
    ///
    /// - [`Error::NoArches`] if the tag declares no architectures
    /// - [`Error::ArchOverrideNotAllowed`] if an override is given for a regular build
    /// - [`Error::NoMatchingArches`] if no candidate survives filtering
    pub fn resolve(
        &self,
        config: &BuildConfig,
        arch_override: Option<&str>,
        mode: BuildMode,
    ) -> Result<ArchSet> {
        let tag_arches = config
            .arches
            .as_deref()
            .map(str::trim)
            .filter(|a| !a.is_empty())
            .ok_or_else(|| Error::NoArches {
                tag: config.name.clone(),
            })?;

        let permitted: Vec<String> = tag_arches.split_whitespace().map(canon_arch).collect();
        tracing::debug!(tag = %config.name, arches = tag_arches, "tag arches");

        let candidates: Vec<&str> = match arch_override.filter(|o| !o.trim().is_empty()) {
            Some(over) if mode.allows_arch_override() => {
                tracing::debug!(arch_override = over, "arch override");
                over.split_whitespace().collect()
            }
            Some(_) => return Err(Error::ArchOverrideNotAllowed),
            None => tag_arches.split_whitespace().collect(),
        };

        let resolved = ArchSet::from_names(
            candidates
                .into_iter()
                .filter(|a| *a == NOARCH || permitted.contains(&canon_arch(a))),
        );

        if resolved.is_empty() {
            return Err(Error::NoMatchingArches {
                tag: config.name.clone(),
            });
        }
        tracing::debug!(arches = %resolved, "resolved arches");
        Ok(resolved)
    }
}
