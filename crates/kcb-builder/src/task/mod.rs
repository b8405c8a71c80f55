//! Task handlers and the shared build supervisor.
//!
//! Both handlers end in [`run_build`]: wait for scheduling (interruptible),
//! stream logs on a separate task while uploading the results directory, then
//! classify the finished build.

pub mod container;
pub mod source_container;

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use serde::Serialize;
use tracing::Instrument;

use kcb_core::{BuildHandle, BuilderConfig, TaskId};

pub use container::BuildContainerTask;
pub use source_container::BuildSourceContainerTask;

use crate::cancel::{BuildCancellation, CancellationController, Interrupt};
use crate::error::{Error, Result};
use crate::logs::{LogMode, LogStreamer, ReaderExit, UserWarnings, watch_and_upload};
use crate::orchestrator::{ClientProfile, Orchestrator, OrchestratorConnector};
use crate::outcome::{BuildOutcome, OutcomeClassifier};
use crate::session::{BuildTarget, HubSession};

/// Everything a task handler needs from its host.
#[derive(Clone)]
pub struct TaskContext {
    /// Hub task id.
    pub task_id: TaskId,
    /// Hub session of the task.
    pub session: Arc<dyn HubSession>,
    /// Factory for orchestrator clients.
    pub connector: Arc<dyn OrchestratorConnector>,
    /// Builder settings.
    pub config: BuilderConfig,
}

impl TaskContext {
    /// Creates a context.
    #[must_use]
    pub fn new(
        task_id: TaskId,
        session: Arc<dyn HubSession>,
        connector: Arc<dyn OrchestratorConnector>,
        config: BuilderConfig,
    ) -> Self {
        Self {
            task_id,
            session,
            connector,
            config,
        }
    }

    /// Hub-relative upload destination of this task.
    #[must_use]
    pub fn upload_path(&self) -> String {
        self.task_id.upload_path()
    }

    /// Local directory the log reader writes into.
    #[must_use]
    pub fn results_dir(&self) -> PathBuf {
        self.config.results_dir()
    }

    pub(crate) async fn ensure_results_dir(&self) -> Result<PathBuf> {
        let dir = self.results_dir();
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| Error::io(&dir, e))?;
        Ok(dir)
    }
}

impl fmt::Debug for TaskContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskContext")
            .field("task_id", &self.task_id)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

/// How a finished build ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FinishedAs {
    /// The image was built.
    Succeeded,
    /// The build failed.
    Failed,
    /// The build was cancelled.
    Cancelled,
}

/// Lifecycle of a submitted build as seen by its task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildPhase {
    /// Submission accepted, waiting for the scheduler.
    Submitting,
    /// The orchestrator scheduled the build.
    Scheduled,
    /// Logs are being streamed and uploaded.
    LogStreaming,
    /// Terminal.
    Finished(FinishedAs),
}

impl BuildPhase {
    /// Returns true if `next` may follow `self`.
    ///
    /// Cancellation may end any non-terminal phase; every other move goes
    /// forward one step.
    #[must_use]
    pub const fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Submitting, Self::Scheduled)
                | (Self::Scheduled, Self::LogStreaming)
                | (Self::LogStreaming, Self::Finished(_))
                | (
                    Self::Submitting | Self::Scheduled,
                    Self::Finished(FinishedAs::Cancelled)
                )
        )
    }

    /// Returns true for finished builds.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Finished(_))
    }

    fn advance(&mut self, next: Self) {
        if !self.can_transition_to(next) {
            tracing::warn!(from = %self, to = %next, "unexpected build phase transition");
        }
        tracing::debug!(from = %self, to = %next, "build phase");
        *self = next;
    }
}

impl fmt::Display for BuildPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Submitting => write!(f, "SUBMITTING"),
            Self::Scheduled => write!(f, "SCHEDULED"),
            Self::LogStreaming => write!(f, "LOG_STREAMING"),
            Self::Finished(FinishedAs::Succeeded) => write!(f, "FINISHED(SUCCEEDED)"),
            Self::Finished(FinishedAs::Failed) => write!(f, "FINISHED(FAILED)"),
            Self::Finished(FinishedAs::Cancelled) => write!(f, "FINISHED(CANCELLED)"),
        }
    }
}

/// A build that finished successfully, with what the task reports about it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FinishedBuild {
    /// Classified outcome.
    pub outcome: BuildOutcome,
    /// Platform of a legacy single-platform build.
    pub arch: Option<String>,
    /// Warnings captured from the build log.
    pub user_warnings: Vec<String>,
}

/// Value returned to the hub when a task completes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TaskResult {
    /// Repositories the image was pushed to.
    pub repositories: Vec<String>,
    /// Hub builds created by the task.
    pub koji_builds: Vec<String>,
    /// Warnings for the submitter.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub user_warnings: Vec<String>,
    /// Set to `skipped` when no build ran.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub build: Option<String>,
}

impl TaskResult {
    /// Result of a task whose build was skipped.
    #[must_use]
    pub fn skipped() -> Self {
        Self {
            build: Some("skipped".to_string()),
            ..Self::default()
        }
    }

    /// Result of a finished build.
    #[must_use]
    pub fn from_finished(finished: FinishedBuild) -> Self {
        Self {
            repositories: finished.outcome.repositories,
            koji_builds: finished.outcome.koji_build_id.into_iter().collect(),
            user_warnings: finished.user_warnings,
            build: None,
        }
    }
}

/// Rejects packages missing from, or blocked in, the destination tag.
///
/// # Errors
///
/// - [`Error::PackageNotListed`] if the tag has no entry for `package`
/// - [`Error::PackageBlocked`] if the entry is blocked
/// - [`Error::Session`] if the lookup fails
pub async fn check_whitelist(
    session: &dyn HubSession,
    package: &str,
    target: &BuildTarget,
) -> Result<()> {
    let tag = &target.dest_tag_name;
    let config = session.package_config(tag, package).await?;
    tracing::debug!(package, tag = %tag, ?config, "package config");
    match config {
        None => Err(Error::PackageNotListed {
            package: package.to_string(),
            tag: tag.clone(),
        }),
        Some(config) if config.blocked => Err(Error::PackageBlocked {
            package: package.to_string(),
            tag: tag.clone(),
        }),
        Some(_) => Ok(()),
    }
}

/// Inputs of [`run_build`] beyond the task context.
pub(crate) struct Supervised {
    pub orchestrator: Arc<dyn Orchestrator>,
    pub profile: ClientProfile,
    pub token: BuildCancellation,
    pub interrupt: Interrupt,
    pub mode: LogMode,
    pub arch: Option<String>,
}

/// Drives a submitted build to completion.
///
/// # Errors
///
/// - [`Error::Cancelled`] if the task was interrupted while waiting for
///   scheduling, or the orchestrator reports the build cancelled
/// - [`Error::ContainerFailed`] if the build failed
/// - any upload failure other than a revoked permission; the build is then
///   cancelled and removed
pub(crate) async fn run_build(ctx: &TaskContext, run: Supervised) -> Result<FinishedBuild> {
    let Supervised {
        orchestrator,
        profile,
        token,
        interrupt,
        mode,
        arch,
    } = run;
    let handle: BuildHandle = token
        .handle()
        .cloned()
        .ok_or_else(|| Error::invalid_request("no build was submitted"))?;
    let span = kcb_core::build_span(ctx.task_id.get(), handle.as_str());

    async move {
        let mut phase = BuildPhase::Submitting;

        let controller = CancellationController::new(Arc::clone(&orchestrator), token);
        if let Err(err) = controller.wait_until_scheduled(interrupt).await {
            if err.is_cancellation() {
                phase.advance(BuildPhase::Finished(FinishedAs::Cancelled));
                if let Err(cancel_err) = ctx.session.cancel_task(ctx.task_id).await {
                    tracing::warn!(error = %cancel_err, "failed to mark task cancelled");
                }
            }
            return Err(err);
        }
        phase.advance(BuildPhase::Scheduled);

        let results_dir = ctx.ensure_results_dir().await?;
        let reader = LogStreamer::from_config(
            Arc::clone(&ctx.connector),
            profile,
            handle.clone(),
            &ctx.config,
        )
        .with_mode(mode)
        .spawn();
        phase.advance(BuildPhase::LogStreaming);

        let watched = watch_and_upload(
            ctx.session.as_ref(),
            &results_dir,
            &ctx.upload_path(),
            ctx.config.poll_interval(),
            Some(&reader),
        )
        .await;
        match watched {
            Ok(()) => log_reader_exit(reader.await),
            Err(Error::ActionNotAllowed { message }) => {
                tracing::info!(reason = %message, "log upload stopped, task no longer allowed");
                reader.abort();
            }
            Err(err) => {
                reader.abort();
                tracing::warn!(error = %err, "log upload failed, abandoning build");
                abandon_build(orchestrator.as_ref(), &handle).await;
                phase.advance(BuildPhase::Finished(FinishedAs::Failed));
                return Err(err);
            }
        }

        let classifier = OutcomeClassifier::new(
            Arc::clone(&orchestrator),
            Arc::clone(&ctx.session),
            ctx.task_id,
        );
        let outcome = match classifier.await_outcome(&handle).await {
            Ok(outcome) => outcome,
            Err(err) => {
                let finished = if err.is_cancellation() {
                    FinishedAs::Cancelled
                } else {
                    FinishedAs::Failed
                };
                phase.advance(BuildPhase::Finished(finished));
                return Err(err);
            }
        };
        phase.advance(BuildPhase::Finished(FinishedAs::Succeeded));

        let user_warnings = UserWarnings::load(&results_dir).await.into_vec();
        Ok(FinishedBuild {
            outcome,
            arch,
            user_warnings,
        })
    }
    .instrument(span)
    .await
}

/// Cancels and removes a build the task can no longer follow. Both steps are
/// best-effort.
async fn abandon_build(orchestrator: &dyn Orchestrator, handle: &BuildHandle) {
    if let Err(err) = orchestrator.cancel_build(handle).await {
        tracing::warn!(build_id = %handle, error = %err, "failed to cancel build");
    }
    if let Err(err) = orchestrator.remove_build(handle).await {
        tracing::warn!(build_id = %handle, error = %err, "failed to remove build");
    }
}

fn log_reader_exit(joined: std::result::Result<ReaderExit, tokio::task::JoinError>) {
    match joined {
        Ok(ReaderExit::Completed) => tracing::debug!("log reader completed"),
        Ok(exit) => tracing::warn!(code = exit.code(), %exit, "log reader failed"),
        Err(err) => tracing::warn!(error = %err, "log reader did not finish cleanly"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn phases_move_forward_only() {
        use super::BuildPhase::{Finished, LogStreaming, Scheduled, Submitting};

        assert!(Submitting.can_transition_to(Scheduled));
        assert!(Scheduled.can_transition_to(LogStreaming));
        assert!(LogStreaming.can_transition_to(Finished(FinishedAs::Failed)));
        assert!(Submitting.can_transition_to(Finished(FinishedAs::Cancelled)));

        assert!(!Submitting.can_transition_to(LogStreaming));
        assert!(!Scheduled.can_transition_to(Finished(FinishedAs::Succeeded)));
        assert!(!Finished(FinishedAs::Succeeded).can_transition_to(Scheduled));
        assert!(Finished(FinishedAs::Cancelled).is_terminal());
        assert_eq!(LogStreaming.to_string(), "LOG_STREAMING");
    }

    #[test]
    fn skipped_result_shape() {
        let json = serde_json::to_value(TaskResult::skipped()).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"repositories": [], "koji_builds": [], "build": "skipped"})
        );
    }

    #[test]
    fn finished_result_omits_empty_warnings() {
        let finished = FinishedBuild {
            outcome: BuildOutcome {
                build_id: "b-1".into(),
                repositories: vec!["registry/foo:1-2".into()],
                koji_build_id: Some("42".into()),
            },
            arch: None,
            user_warnings: Vec::new(),
        };
        let json = serde_json::to_value(TaskResult::from_finished(finished)).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"repositories": ["registry/foo:1-2"], "koji_builds": ["42"]})
        );
    }
}
