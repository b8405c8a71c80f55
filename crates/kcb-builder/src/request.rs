//! Task parameters and their validation.
//!
//! A [`BuildRequest`] is built once per task and is immutable afterwards; all
//! option-combination rules are checked in [`BuildRequest::new`] so that the
//! rest of the pipeline can rely on them.

use serde::{Deserialize, Serialize};

use crate::arches::BuildMode;
use crate::error::{Error, Result};

/// A parsed source location of the form `scheme://host/path#revision`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceLocator {
    url: String,
    scheme: String,
    host: String,
    path: String,
    revision: String,
}

impl SourceLocator {
    /// Parses a source URL.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidRequest`] if the URL has no scheme, host or
    /// revision.
    pub fn parse(url: &str) -> Result<Self> {
        let invalid = || Error::invalid_request(format!("Invalid source specification: {url}"));

        let (base, revision) = url.split_once('#').ok_or_else(invalid)?;
        let (scheme, rest) = base.split_once("://").ok_or_else(invalid)?;
        if scheme.is_empty() || revision.trim().is_empty() {
            return Err(invalid());
        }

        let (host, path) = match rest.find('/') {
            Some(idx) => rest.split_at(idx),
            None => (rest, ""),
        };
        if host.is_empty() {
            return Err(invalid());
        }

        Ok(Self {
            url: url.to_string(),
            scheme: scheme.to_string(),
            host: host.to_string(),
            path: path.to_string(),
            revision: revision.trim().to_string(),
        })
    }

    /// Returns the URL as given.
    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Returns the repository host.
    #[must_use]
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Returns the repository path, including its leading `/`.
    #[must_use]
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Returns the revision after `#`.
    #[must_use]
    pub fn revision(&self) -> &str {
        &self.revision
    }

    /// Component name: the repository basename without a `.git` suffix.
    #[must_use]
    pub fn component(&self) -> String {
        let trimmed = self.path.trim_end_matches('/');
        let trimmed = trimmed.strip_suffix(".git").unwrap_or(trimmed);
        trimmed.rsplit('/').next().unwrap_or(trimmed).to_string()
    }

    /// Clone URI handed to the orchestrator.
    ///
    /// A `git+` transport prefix on the scheme is dropped.
    #[must_use]
    pub fn git_uri(&self) -> String {
        let scheme = self
            .scheme
            .split_once('+')
            .map_or(self.scheme.as_str(), |(_, s)| s);
        format!("{scheme}://{}{}", self.host, self.path)
    }

    /// Checks the location against `host:path` allow patterns.
    ///
    /// Patterns may use `*` wildcards; a pattern without `:` matches any path
    /// on its host. An empty pattern list allows everything.
    #[must_use]
    pub fn is_allowed(&self, patterns: &[String]) -> bool {
        if patterns.is_empty() {
            return true;
        }
        patterns.iter().any(|pattern| {
            let (host, path) = pattern.split_once(':').unwrap_or((pattern.as_str(), "*"));
            wildcard_match(host, &self.host) && wildcard_match(path, &self.path)
        })
    }

    /// Fails unless the location is allowed by `patterns`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidRequest`] naming the rejected location.
    pub fn assert_allowed(&self, patterns: &[String]) -> Result<()> {
        if self.is_allowed(patterns) {
            Ok(())
        } else {
            Err(Error::invalid_request(format!(
                "Source location not allowed: {}{}",
                self.host, self.path
            )))
        }
    }
}

/// Matches `text` against a pattern where `*` matches any run of characters.
fn wildcard_match(pattern: &str, text: &str) -> bool {
    let p: Vec<char> = pattern.chars().collect();
    let t: Vec<char> = text.chars().collect();
    let (mut pi, mut ti) = (0, 0);
    let mut star: Option<(usize, usize)> = None;

    while ti < t.len() {
        if pi < p.len() && p[pi] == '*' {
            star = Some((pi, ti));
            pi += 1;
        } else if pi < p.len() && p[pi] == t[ti] {
            pi += 1;
            ti += 1;
        } else if let Some((sp, st)) = star {
            pi = sp + 1;
            ti = st + 1;
            star = Some((sp, st + 1));
        } else {
            return false;
        }
    }
    p[pi..].iter().all(|&c| c == '*')
}

/// Options accepted by a container build task.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BuildOptions {
    /// Perform a scratch build.
    pub scratch: bool,
    /// Perform an isolated build.
    pub isolated: bool,
    /// Build a flatpak instead of a container.
    pub flatpak: bool,
    /// Dependency replacements for the content resolver.
    pub dependency_replacements: Vec<String>,
    /// URLs of yum repo files.
    pub yum_repourls: Vec<String>,
    /// Whitespace-separated architectures to build instead of the tag's.
    pub arch_override: Option<String>,
    /// Git branch to build from.
    pub git_branch: Option<String>,
    /// Push URL for the repository.
    pub push_url: Option<String>,
    /// Parent image override from a hub build.
    pub koji_parent_build: Option<String>,
    /// Release value override.
    pub release: Option<String>,
    /// Compose ids used as build input.
    pub compose_ids: Option<Vec<i64>>,
    /// Signing intent of the composes.
    pub signing_intent: Option<String>,
    /// Only update the build configuration, don't start a build.
    pub skip_build: bool,
    /// Task that triggered this automatic rebuild.
    pub triggered_after_koji_task: Option<u64>,
    /// User-defined metadata passed through to the orchestrator.
    pub userdata: Option<serde_json::Map<String, serde_json::Value>>,
}

impl BuildOptions {
    /// Returns the build mode these options request.
    #[must_use]
    pub const fn mode(&self) -> BuildMode {
        if self.scratch {
            BuildMode::Scratch
        } else if self.isolated {
            BuildMode::Isolated
        } else {
            BuildMode::Regular
        }
    }

    /// Checks option combinations shared by every entry point.
    ///
    /// # Errors
    ///
    /// Returns an error for any mutually exclusive pair of options.
    pub fn validate(&self) -> Result<()> {
        if self.scratch && self.isolated {
            return Err(Error::invalid_request(
                "Build cannot be both isolated and scratch",
            ));
        }
        if self.signing_intent.is_some() && self.compose_ids.is_some() {
            return Err(Error::ConflictingInputs {
                first: "signing_intent",
                second: "compose_ids",
            });
        }
        if self.compose_ids.is_some() && !self.yum_repourls.is_empty() {
            return Err(Error::ConflictingInputs {
                first: "compose_ids",
                second: "yum_repourls",
            });
        }
        if self.arch_override.is_some() && !self.mode().allows_arch_override() {
            return Err(Error::ArchOverrideNotAllowed);
        }
        Ok(())
    }
}

/// A validated container build request.
#[derive(Debug, Clone)]
pub struct BuildRequest {
    source: SourceLocator,
    target: String,
    options: BuildOptions,
}

impl BuildRequest {
    /// Validates task parameters and builds a request.
    ///
    /// # Errors
    ///
    /// Returns an error if the source URL is malformed, the branch is missing,
    /// or the options contain a forbidden combination.
    pub fn new(source: &str, target: impl Into<String>, options: BuildOptions) -> Result<Self> {
        if options
            .git_branch
            .as_deref()
            .is_none_or(|b| b.trim().is_empty())
        {
            return Err(Error::invalid_request("Git branch must be specified"));
        }
        options.validate()?;
        let source = SourceLocator::parse(source)?;

        Ok(Self {
            source,
            target: target.into(),
            options,
        })
    }

    /// Returns the source location.
    #[must_use]
    pub const fn source(&self) -> &SourceLocator {
        &self.source
    }

    /// Returns the build target name.
    #[must_use]
    pub fn target(&self) -> &str {
        &self.target
    }

    /// Returns the validated options.
    #[must_use]
    pub const fn options(&self) -> &BuildOptions {
        &self.options
    }

    /// Returns the build mode.
    #[must_use]
    pub const fn mode(&self) -> BuildMode {
        self.options.mode()
    }
}

/// Options accepted by a source container build task.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SourceContainerOptions {
    /// Perform a scratch build.
    pub scratch: bool,
    /// Hub id of the image build to collect sources for.
    pub koji_build_id: Option<i64>,
    /// NVR of the image build to collect sources for.
    pub koji_build_nvr: Option<String>,
    /// Signing intent of the composes.
    pub signing_intent: Option<String>,
}

/// A validated source container build request.
#[derive(Debug, Clone)]
pub struct SourceContainerRequest {
    target: String,
    options: SourceContainerOptions,
}

impl SourceContainerRequest {
    /// Validates task parameters and builds a request.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidRequest`] if neither a build id nor an NVR is
    /// given.
    pub fn new(target: impl Into<String>, options: SourceContainerOptions) -> Result<Self> {
        let has_nvr = options
            .koji_build_nvr
            .as_deref()
            .is_some_and(|nvr| !nvr.trim().is_empty());
        if options.koji_build_id.is_none() && !has_nvr {
            return Err(Error::invalid_request(
                "koji_build_id or koji_build_nvr must be specified",
            ));
        }
        Ok(Self {
            target: target.into(),
            options,
        })
    }

    /// Returns the build target name.
    #[must_use]
    pub fn target(&self) -> &str {
        &self.target
    }

    /// Returns the validated options.
    #[must_use]
    pub const fn options(&self) -> &SourceContainerOptions {
        &self.options
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn branch() -> BuildOptions {
        BuildOptions {
            git_branch: Some("main".into()),
            ..BuildOptions::default()
        }
    }

    #[test]
    fn parses_source_locator() {
        let src = SourceLocator::parse("git+https://pkgs.example.com/containers/foo.git#abc123")
            .unwrap();
        assert_eq!(src.host(), "pkgs.example.com");
        assert_eq!(src.path(), "/containers/foo.git");
        assert_eq!(src.revision(), "abc123");
        assert_eq!(src.component(), "foo");
        assert_eq!(src.git_uri(), "https://pkgs.example.com/containers/foo.git");
    }

    #[test]
    fn rejects_malformed_sources() {
        for bad in [
            "pkgs.example.com/foo#abc",
            "git://pkgs.example.com/foo",
            "git://pkgs.example.com/foo#",
            "git:///foo#abc",
        ] {
            assert!(SourceLocator::parse(bad).is_err(), "{bad} should be rejected");
        }
    }

    #[test]
    fn allow_list_matches_wildcards() {
        let src = SourceLocator::parse("git://pkgs.example.com/containers/foo#abc").unwrap();
        assert!(src.is_allowed(&[]));
        assert!(src.is_allowed(&["pkgs.example.com:/containers/*".into()]));
        assert!(src.is_allowed(&["*.example.com".into()]));
        assert!(!src.is_allowed(&["pkgs.example.com:/rpms/*".into()]));
        assert!(src.assert_allowed(&["git.other.org:*".into()]).is_err());
    }

    #[test]
    fn branch_is_required() {
        let err = BuildRequest::new("git://h/foo#1", "t", BuildOptions::default()).unwrap_err();
        assert_eq!(err.to_string(), "Git branch must be specified");
    }

    #[test]
    fn rejects_scratch_and_isolated() {
        let opts = BuildOptions {
            scratch: true,
            isolated: true,
            ..branch()
        };
        let err = BuildRequest::new("git://h/foo#1", "t", opts).unwrap_err();
        assert_eq!(err.to_string(), "Build cannot be both isolated and scratch");
    }

    #[test]
    fn rejects_conflicting_compose_inputs() {
        let opts = BuildOptions {
            signing_intent: Some("release".into()),
            compose_ids: Some(vec![1]),
            ..branch()
        };
        assert!(matches!(
            opts.validate(),
            Err(Error::ConflictingInputs {
                first: "signing_intent",
                ..
            })
        ));

        let opts = BuildOptions {
            compose_ids: Some(vec![1]),
            yum_repourls: vec!["http://repo/x.repo".into()],
            ..branch()
        };
        assert!(matches!(
            opts.validate(),
            Err(Error::ConflictingInputs {
                second: "yum_repourls",
                ..
            })
        ));
    }

    #[test]
    fn arch_override_needs_scratch_or_isolated() {
        let opts = BuildOptions {
            arch_override: Some("x86_64".into()),
            ..branch()
        };
        assert!(matches!(opts.validate(), Err(Error::ArchOverrideNotAllowed)));

        let opts = BuildOptions {
            arch_override: Some("x86_64".into()),
            isolated: true,
            ..branch()
        };
        assert!(opts.validate().is_ok());
    }

    #[test]
    fn options_reject_unknown_fields() {
        let json = r#"{"scratch": true, "bogus": 1}"#;
        assert!(serde_json::from_str::<BuildOptions>(json).is_err());

        let json = r#"{"git_branch": "main", "compose_ids": [1, 2]}"#;
        let opts: BuildOptions = serde_json::from_str(json).unwrap();
        assert_eq!(opts.compose_ids, Some(vec![1, 2]));
    }

    #[test]
    fn source_container_needs_build_reference() {
        assert!(SourceContainerRequest::new("t", SourceContainerOptions::default()).is_err());
        let opts = SourceContainerOptions {
            koji_build_nvr: Some("foo-1-2".into()),
            ..SourceContainerOptions::default()
        };
        assert!(SourceContainerRequest::new("t", opts).is_ok());
    }
}
