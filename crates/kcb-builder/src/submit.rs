//! Build submission with capability fallback.
//!
//! A multi-platform submission is always attempted first. If the orchestrator
//! reports that capability as unavailable, exactly one single-platform
//! submission follows, built from the first resolved platform. Options the
//! single-platform path cannot carry are reported, never dropped silently.

use std::fmt;
use std::sync::Arc;

use kcb_core::BuildHandle;

use crate::error::{Error, Result};
use crate::orchestrator::{LegacyBuildParams, Orchestrator, OrchestratorBuildParams};

/// Which submission path produced a build.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmissionKind {
    /// Multi-platform orchestrator build.
    Orchestrator,
    /// Single-platform legacy build.
    Legacy,
}

impl fmt::Display for SubmissionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Orchestrator => write!(f, "ORCHESTRATOR"),
            Self::Legacy => write!(f, "LEGACY"),
        }
    }
}

/// Result of a submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Submission {
    /// Build handle, or `None` if the orchestrator skipped the build.
    pub handle: Option<BuildHandle>,
    /// Path that accepted the request.
    pub kind: SubmissionKind,
    /// Platform of a legacy build.
    pub arch: Option<String>,
}

/// Submits builds to the orchestrator.
pub struct BuildSubmitter {
    orchestrator: Arc<dyn Orchestrator>,
    strict_legacy_fallback: bool,
}

impl BuildSubmitter {
    /// Creates a submitter using `orchestrator`.
    #[must_use]
    pub fn new(orchestrator: Arc<dyn Orchestrator>) -> Self {
        Self {
            orchestrator,
            strict_legacy_fallback: false,
        }
    }

    /// Fails instead of warning when the legacy path would drop options.
    #[must_use]
    pub const fn with_strict_legacy_fallback(mut self, strict: bool) -> Self {
        self.strict_legacy_fallback = strict;
        self
    }

    /// Submits a build, falling back to a single-platform build once.
    ///
    /// # Errors
    ///
    /// - [`Error::ConflictingInputs`] for mutually exclusive compose inputs
    /// - [`Error::InvalidRequest`] if no platform is given, or if the strict
    ///   fallback would drop requested options
    /// - [`Error::Orchestrator`] if the chosen submission call fails
    pub async fn submit(&self, params: OrchestratorBuildParams) -> Result<Submission> {
        if params.signing_intent.is_some() && params.compose_ids.is_some() {
            return Err(Error::ConflictingInputs {
                first: "signing_intent",
                second: "compose_ids",
            });
        }
        if params.compose_ids.is_some() && !params.common.yum_repourls.is_empty() {
            return Err(Error::ConflictingInputs {
                first: "compose_ids",
                second: "yum_repourls",
            });
        }
        if params.platforms.is_empty() {
            return Err(Error::invalid_request("arches aren't specified"));
        }

        tracing::debug!(
            component = %params.common.component,
            platforms = ?params.platforms,
            "starting orchestrator build"
        );
        match self.orchestrator.create_orchestrator_build(&params).await {
            Ok(handle) => Ok(Submission {
                handle,
                kind: SubmissionKind::Orchestrator,
                arch: None,
            }),
            Err(err) if err.is_capability_unavailable() => {
                tracing::info!(reason = %err, "orchestrator builds unavailable, using legacy build");
                self.submit_legacy(params).await
            }
            Err(err) => Err(err.into()),
        }
    }

    async fn submit_legacy(&self, params: OrchestratorBuildParams) -> Result<Submission> {
        let dropped = dropped_fields(&params);
        if !dropped.is_empty() {
            if self.strict_legacy_fallback {
                return Err(Error::invalid_request(format!(
                    "legacy single-platform build cannot honor requested options: {}",
                    dropped.join(", ")
                )));
            }
            tracing::warn!(
                dropped = %dropped.join(", "),
                "legacy single-platform build ignores requested options"
            );
        }

        let arch = params
            .platforms
            .first()
            .cloned()
            .ok_or_else(|| Error::invalid_request("arches aren't specified"))?;
        let legacy = LegacyBuildParams {
            common: params.common,
            architecture: arch.clone(),
        };

        tracing::debug!(architecture = %arch, "starting legacy build");
        let handle = self.orchestrator.create_build(&legacy).await?;
        Ok(Submission {
            handle: Some(handle),
            kind: SubmissionKind::Legacy,
            arch: Some(arch),
        })
    }
}

/// Options set on `params` that a single-platform build does not carry.
#[must_use]
pub fn dropped_fields(params: &OrchestratorBuildParams) -> Vec<&'static str> {
    let mut dropped = Vec::new();
    if params.platforms.len() > 1 {
        dropped.push("platforms");
    }
    if params.compose_ids.is_some() {
        dropped.push("compose_ids");
    }
    if params.signing_intent.is_some() {
        dropped.push("signing_intent");
    }
    if params.koji_parent_build.is_some() {
        dropped.push("koji_parent_build");
    }
    if params.isolated {
        dropped.push("isolated");
    }
    if params.release.is_some() {
        dropped.push("release");
    }
    if params.skip_build {
        dropped.push("skip_build");
    }
    dropped
}
