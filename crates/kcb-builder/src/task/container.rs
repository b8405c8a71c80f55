//! `buildContainer` task handler.

use std::sync::Arc;

use tracing::Instrument;

use crate::arches::{ArchResolver, ArchSet};
use crate::cancel::{BuildCancellation, Interrupt};
use crate::error::{Error, Result};
use crate::labels::LabelExtractor;
use crate::logs::{FileWatcher, LogMode};
use crate::orchestrator::{ClientProfile, CommonBuildParams, OrchestratorBuildParams};
use crate::request::{BuildOptions, BuildRequest};
use crate::session::{BuildRef, BuildTarget};
use crate::source::{SourceError, SourceFetcher};
use crate::submit::BuildSubmitter;

use super::{Supervised, TaskContext, TaskResult, check_whitelist, run_build};

/// Hub method name of this task.
pub const METHOD: &str = "buildContainer";

/// Builds a container image from a source repository.
pub struct BuildContainerTask {
    ctx: TaskContext,
    fetcher: Arc<dyn SourceFetcher>,
    demux: bool,
    interrupt: Interrupt,
}

/// What label checking decided about the build identity.
struct Identity {
    component: Option<String>,
    expected_nvr: Option<String>,
}

impl BuildContainerTask {
    /// Creates a handler with demultiplexed logs that cancels on Ctrl-C.
    #[must_use]
    pub fn new(ctx: TaskContext, fetcher: Arc<dyn SourceFetcher>) -> Self {
        Self {
            ctx,
            fetcher,
            demux: true,
            interrupt: Interrupt::ctrl_c(),
        }
    }

    /// Chooses per-platform logs (`true`) or one combined log.
    #[must_use]
    pub fn with_demux(mut self, demux: bool) -> Self {
        self.demux = demux;
        self
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
    /// Returns the first validation, submission or build failure. See
    /// [`Error`] for the kinds and [`Error::fault_code`] for how the host
    /// reports them.
    pub async fn handle(
        self,
        src: &str,
        target: &str,
        options: BuildOptions,
    ) -> Result<TaskResult> {
        let span = kcb_core::task_span(METHOD, self.ctx.task_id.get());
        self.run(src, target, options).instrument(span).await
    }

    async fn run(self, src: &str, target: &str, options: BuildOptions) -> Result<TaskResult> {
        let request = BuildRequest::new(src, target, options)?;
        request
            .source()
            .assert_allowed(&self.ctx.config.allowed_scms)?;

        let session = Arc::clone(&self.ctx.session);
        let event = session.last_event_id().await?;
        let target_info = session
            .build_target(request.target(), event)
            .await?
            .ok_or_else(|| Error::TargetNotFound {
                target: request.target().to_string(),
            })?;

        let build_config = session.build_config(&target_info.build_tag, event).await?;
        let arches = ArchResolver.resolve(
            &build_config,
            request.options().arch_override.as_deref(),
            request.mode(),
        )?;
        tracing::debug!(%arches, "resolved build arches");

        let identity = self.check_labels(&request, &target_info).await?;
        let opts = request.options();

        if !opts.scratch && !opts.flatpak {
            let component = identity.component.as_deref().unwrap_or_default();
            check_whitelist(session.as_ref(), component, &target_info).await?;
        }

        // Autorebuilds may add a timestamp to the release and skipped builds
        // only toggle configuration, so neither can collide.
        let expected_nvr = identity
            .expected_nvr
            .filter(|_| opts.triggered_after_koji_task.is_none() && !opts.skip_build);
        if !opts.scratch {
            if let Some(nvr) = expected_nvr.as_deref() {
                self.check_duplicate(nvr).await?;
            }
        }

        self.create_container(&request, &target_info, arches).await
    }

    async fn check_labels(
        &self,
        request: &BuildRequest,
        target_info: &BuildTarget,
    ) -> Result<Identity> {
        let opts = request.options();
        if opts.flatpak {
            return Ok(Identity {
                component: None,
                expected_nvr: None,
            });
        }

        let dockerfile = self
            .fetcher
            .fetch_dockerfile(request.source(), &target_info.build_tag, opts.scratch)
            .await
            .map_err(|err| match err {
                SourceError::MissingDockerfile { .. } => Error::invalid_request(err.to_string()),
                other => other.into(),
            })?;
        let extractor = match opts.release.as_deref() {
            Some(release) => LabelExtractor::new().with_release(release),
            None => LabelExtractor::new(),
        };
        let check = extractor.check(&dockerfile).await?;
        tracing::debug!(
            component = %check.component,
            expected_nvr = ?check.expected_nvr,
            "labels checked"
        );
        Ok(Identity {
            component: Some(check.component),
            expected_nvr: check.expected_nvr,
        })
    }

    async fn check_duplicate(&self, nvr: &str) -> Result<()> {
        let lookup = BuildRef::Nvr(nvr.to_string());
        match self.ctx.session.get_build(&lookup).await {
            Ok(Some(build)) if build.state.is_reusable() => {
                tracing::info!(nvr, state = %build.state, "build found, but with reusable state");
                Ok(())
            }
            Ok(Some(build)) => Err(Error::DuplicateBuild {
                nvr: nvr.to_string(),
                build_id: build.build_id,
            }),
            Ok(None) => {
                tracing::info!(nvr, "no build found");
                Ok(())
            }
            Err(err) => {
                tracing::info!(nvr, error = %err, "no build found");
                Ok(())
            }
        }
    }

    async fn create_container(
        self,
        request: &BuildRequest,
        target_info: &BuildTarget,
        arches: ArchSet,
    ) -> Result<TaskResult> {
        let opts = request.options();
        let source = request.source();
        let owner = self.ctx.session.task_owner(self.ctx.task_id).await?;
        tracing::debug!(owner = %owner, "started by");

        let params = OrchestratorBuildParams {
            common: CommonBuildParams {
                git_uri: source.git_uri(),
                git_ref: source.revision().to_string(),
                git_branch: opts.git_branch.clone(),
                git_push_url: opts.push_url.clone(),
                user: owner,
                component: source.component(),
                target: target_info.name.clone(),
                dependency_replacements: opts.dependency_replacements.clone(),
                yum_repourls: opts.yum_repourls.clone(),
                scratch: opts.scratch,
                koji_task_id: self.ctx.task_id,
                flatpak: opts.flatpak,
                triggered_after_koji_task: opts.triggered_after_koji_task,
                userdata: opts.userdata.clone(),
            },
            platforms: arches.into_vec(),
            compose_ids: opts.compose_ids.clone(),
            signing_intent: opts.signing_intent.clone(),
            koji_parent_build: opts.koji_parent_build.clone(),
            isolated: opts.isolated,
            release: opts.release.clone().filter(|_| !opts.flatpak),
            skip_build: opts.skip_build,
        };

        let profile = ClientProfile::for_scratch(opts.scratch);
        let orchestrator = self.ctx.connector.connect(profile).await?;
        let submission = BuildSubmitter::new(Arc::clone(&orchestrator))
            .with_strict_legacy_fallback(self.ctx.config.strict_legacy_fallback)
            .submit(params)
            .await?;
        tracing::info!(kind = %submission.kind, "build submitted");

        let Some(handle) = submission.handle else {
            tracing::debug!("build was skipped");
            self.upload_once().await?;
            return Ok(TaskResult::skipped());
        };

        let token = BuildCancellation::new();
        token.set_handle(handle);
        let mode = if self.demux {
            LogMode::Demultiplexed
        } else {
            LogMode::CONTAINER_COMBINED
        };

        let finished = run_build(
            &self.ctx,
            Supervised {
                orchestrator,
                profile,
                token,
                interrupt: self.interrupt,
                mode,
                arch: submission.arch,
            },
        )
        .await?;
        tracing::info!(
            repositories = ?finished.outcome.repositories,
            koji_build_id = ?finished.outcome.koji_build_id,
            arch = ?finished.arch,
            "container build finished"
        );
        Ok(TaskResult::from_finished(finished))
    }

    async fn upload_once(&self) -> Result<()> {
        let dir = self.ctx.ensure_results_dir().await?;
        let mut watcher = FileWatcher::new(dir);
        let uploaded = watcher
            .upload(self.ctx.session.as_ref(), &self.ctx.upload_path())
            .await;
        watcher.clean();
        match uploaded {
            Err(Error::ActionNotAllowed { message }) => {
                tracing::info!(reason = %message, "upload of skipped build not allowed");
                Ok(())
            }
            other => other,
        }
    }
}
