//! `buildSourceContainer` task handler.

use std::sync::Arc;

use tracing::Instrument;

use crate::cancel::{BuildCancellation, Interrupt};
use crate::error::{Error, Result};
use crate::logs::LogMode;
use crate::orchestrator::{ClientProfile, SourceContainerBuildParams};
use crate::request::{SourceContainerOptions, SourceContainerRequest};
use crate::session::{BuildRef, ExistingBuild};

use super::{Supervised, TaskContext, TaskResult, check_whitelist, run_build};

/// Hub method name of this task.
pub const METHOD: &str = "buildSourceContainer";

/// The image build a source container collects sources for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceBuildInfo {
    /// Component of the source container (`<name>-source`).
    pub component: String,
    /// Hub id of the image build.
    pub build_id: i64,
    /// NVR of the image build.
    pub build_nvr: String,
}

/// Builds a source container for an existing image build.
pub struct BuildSourceContainerTask {
    ctx: TaskContext,
    interrupt: Interrupt,
}

impl BuildSourceContainerTask {
    /// Creates a handler that cancels on Ctrl-C.
    #[must_use]
    pub fn new(ctx: TaskContext) -> Self {
        Self {
            ctx,
            interrupt: Interrupt::ctrl_c(),
        }
    }

    /// Replaces the interrupt that cancels a build waiting to be scheduled.
    #[must_use]
    pub fn with_interrupt(mut self, interrupt: Interrupt) -> Self {
        self.interrupt = interrupt;
        self
    }

    /// Runs the task.
    ///
    /// # Errors
    ///
    /// - [`Error::SourceBuild`] if the referenced image build is unusable
    /// - [`Error::InvalidRequest`] if the orchestrator cannot build source
    ///   containers
    /// - any failure of the build itself
    pub async fn handle(self, target: &str, options: SourceContainerOptions) -> Result<TaskResult> {
        let span = kcb_core::task_span(METHOD, self.ctx.task_id.get());
        self.run(target, options).instrument(span).await
    }

    async fn run(self, target: &str, options: SourceContainerOptions) -> Result<TaskResult> {
        let request = SourceContainerRequest::new(target, options)?;
        let session = Arc::clone(&self.ctx.session);

        let event = session.last_event_id().await?;
        let target_info = session
            .build_target(request.target(), event)
            .await?
            .ok_or_else(|| Error::TargetNotFound {
                target: request.target().to_string(),
            })?;

        let opts = request.options();
        let info = self
            .source_build_info(opts.koji_build_id, opts.koji_build_nvr.as_deref())
            .await?;
        if !opts.scratch {
            check_whitelist(session.as_ref(), &info.component, &target_info).await?;
        }

        let owner = session.task_owner(self.ctx.task_id).await?;
        tracing::debug!(owner = %owner, "started by");
        let params = SourceContainerBuildParams {
            user: owner,
            component: info.component,
            sources_for_koji_build_id: info.build_id,
            sources_for_koji_build_nvr: info.build_nvr,
            target: target_info.name.clone(),
            scratch: opts.scratch,
            koji_task_id: self.ctx.task_id,
            signing_intent: opts.signing_intent.clone(),
        };

        let profile = ClientProfile::for_scratch(opts.scratch);
        let orchestrator = self.ctx.connector.connect(profile).await?;
        tracing::debug!(component = %params.component, "starting source container build");
        let handle = orchestrator
            .create_source_container_build(&params)
            .await
            .map_err(|err| {
                if err.is_capability_unavailable() {
                    Error::invalid_request(format!(
                        "orchestrator cannot build source containers: {err}"
                    ))
                } else {
                    err.into()
                }
            })?;

        let token = BuildCancellation::new();
        token.set_handle(handle);
        let finished = run_build(
            &self.ctx,
            Supervised {
                orchestrator,
                profile,
                token,
                interrupt: self.interrupt,
                mode: LogMode::SOURCE_COMBINED,
                arch: None,
            },
        )
        .await?;
        Ok(TaskResult::from_finished(finished))
    }

    /// Looks up and validates the image build, preferring the NVR.
    ///
    /// # Errors
    ///
    /// Returns [`Error::SourceBuild`] if the build does not exist, the id and
    /// NVR disagree, or the build is not a plain image build.
    pub async fn source_build_info(
        &self,
        build_id: Option<i64>,
        build_nvr: Option<&str>,
    ) -> Result<SourceBuildInfo> {
        let build_nvr = build_nvr.filter(|nvr| !nvr.trim().is_empty());
        let lookup = match (build_nvr, build_id) {
            (Some(nvr), _) => BuildRef::Nvr(nvr.to_string()),
            (None, Some(id)) => BuildRef::Id(id),
            (None, None) => {
                return Err(Error::invalid_request(
                    "koji_build_id or koji_build_nvr must be specified",
                ));
            }
        };

        let build = self
            .ctx
            .session
            .get_build(&lookup)
            .await?
            .ok_or_else(|| {
                Error::source_build(format!("specified source build '{lookup}' doesn't exist"))
            })?;

        if let Some(id) = build_id {
            if id != build.build_id {
                return Err(Error::source_build(format!(
                    "koji_build_id {id} does not match koji_build_nvr {} with id {}. \
                     When specifying both an id and an nvr, they should point to the same image build",
                    build_nvr.unwrap_or_default(),
                    build.build_id
                )));
            }
        }
        ensure_plain_image(&build)?;

        Ok(SourceBuildInfo {
            component: format!("{}-source", build.name),
            build_id: build.build_id,
            build_nvr: build.nvr,
        })
    }
}

fn ensure_plain_image(build: &ExistingBuild) -> Result<()> {
    let Some(image) = build.extra.get("image") else {
        return Err(Error::source_build(format!(
            "koji build {} is not image build which source container requires",
            build.nvr
        )));
    };
    if image.get("sources_for_nvr").is_some() {
        return Err(Error::source_build(format!(
            "koji build {} is source container build, source container can not use source container build image",
            build.nvr
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::session::BuildState;

    fn build(extra: serde_json::Value) -> ExistingBuild {
        ExistingBuild {
            build_id: 7,
            nvr: "foo-1-2".into(),
            name: "foo".into(),
            state: BuildState::Complete,
            extra: match extra {
                serde_json::Value::Object(map) => map,
                _ => serde_json::Map::new(),
            },
        }
    }

    #[test]
    fn image_builds_are_accepted() {
        assert!(ensure_plain_image(&build(json!({"image": {}}))).is_ok());
    }

    #[test]
    fn non_image_builds_are_rejected() {
        let err = ensure_plain_image(&build(json!({}))).unwrap_err();
        assert_eq!(
            err.to_string(),
            "koji build foo-1-2 is not image build which source container requires"
        );
    }

    #[test]
    fn source_container_builds_are_rejected() {
        let err =
            ensure_plain_image(&build(json!({"image": {"sources_for_nvr": "foo-1-1"}}))).unwrap_err();
        assert!(err.to_string().contains("is source container build"));
    }
}
