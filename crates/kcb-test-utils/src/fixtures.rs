//! Pre-built test fixtures for common task scenarios.
//!
//! Provides factory functions to create test data with sensible defaults.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;

use kcb_builder::cancel::Interrupt;
use kcb_builder::request::{BuildOptions, SourceContainerOptions};
use kcb_builder::session::BuildTarget;
use kcb_builder::task::{BuildContainerTask, BuildSourceContainerTask, TaskContext};
use kcb_core::{BuilderConfig, TaskId};

use crate::orchestrator::{MemoryConnector, MemoryOrchestrator};
use crate::session::MemorySession;
use crate::source::MemorySourceFetcher;

/// Hub task id used by fixtures.
pub const TASK_ID: u64 = 12345;
/// Build target used by fixtures.
pub const TARGET: &str = "f40-container";
/// Build tag of [`TARGET`].
pub const BUILD_TAG: &str = "f40-container-build";
/// Destination tag of [`TARGET`].
pub const DEST_TAG: &str = "f40-container-candidate";
/// Component built by fixtures.
pub const COMPONENT: &str = "foo";
/// Source URL of [`COMPONENT`].
pub const SOURCE_URL: &str = "git://pkgs.example.com/containers/foo#a1b2c3d4";

/// Builds Dockerfile text.
#[derive(Debug, Clone)]
pub struct DockerfileBuilder {
    lines: Vec<String>,
}

impl DockerfileBuilder {
    /// Starts a Dockerfile from `base`.
    #[must_use]
    pub fn from_image(base: &str) -> Self {
        Self {
            lines: vec![format!("FROM {base}")],
        }
    }

    /// A Dockerfile labelled `component`, `version`, `release` and named after
    /// the component.
    #[must_use]
    pub fn labelled(component: &str, version: &str, release: &str) -> Self {
        Self::from_image("registry.example.com/base:latest")
            .label("com.redhat.component", component)
            .label("name", component)
            .label("version", version)
            .label("release", release)
    }

    /// Adds a `LABEL` instruction.
    #[must_use]
    pub fn label(self, key: &str, value: &str) -> Self {
        self.line(format!("LABEL {key}=\"{value}\""))
    }

    /// Adds an `ENV` instruction.
    #[must_use]
    pub fn env(self, key: &str, value: &str) -> Self {
        self.line(format!("ENV {key}=\"{value}\""))
    }

    /// Adds a raw line.
    #[must_use]
    pub fn line(mut self, line: impl Into<String>) -> Self {
        self.lines.push(line.into());
        self
    }

    /// Returns the Dockerfile text.
    #[must_use]
    pub fn build(&self) -> String {
        let mut text = self.lines.join("\n");
        text.push('\n');
        text
    }
}

/// Factory for task parameters.
pub struct RequestFactory;

impl RequestFactory {
    /// Regular build options on branch `main`.
    #[must_use]
    pub fn options() -> BuildOptions {
        BuildOptions {
            git_branch: Some("main".into()),
            ..BuildOptions::default()
        }
    }

    /// Scratch build options.
    #[must_use]
    pub fn scratch() -> BuildOptions {
        BuildOptions {
            scratch: true,
            ..Self::options()
        }
    }

    /// Isolated build options with a release override.
    #[must_use]
    pub fn isolated(release: &str) -> BuildOptions {
        BuildOptions {
            isolated: true,
            release: Some(release.into()),
            ..Self::options()
        }
    }

    /// Source container options referring to `nvr`.
    #[must_use]
    pub fn source_container(nvr: &str) -> SourceContainerOptions {
        SourceContainerOptions {
            koji_build_nvr: Some(nvr.into()),
            ..SourceContainerOptions::default()
        }
    }
}

/// Test context with in-memory collaborators and a temporary work area.
///
/// The session knows [`TARGET`], its tag builds for `x86_64` and
/// [`COMPONENT`] is listed in the destination tag. The orchestrator accepts
/// and succeeds every build.
pub struct TestContext {
    /// Scripted orchestrator.
    pub orchestrator: MemoryOrchestrator,
    /// Connector handing out [`TestContext::orchestrator`].
    pub connector: MemoryConnector,
    /// Hub session.
    pub session: MemorySession,
    /// Source checkout.
    pub fetcher: MemorySourceFetcher,
    /// Builder settings rooted in the temporary work area.
    pub config: BuilderConfig,
    /// Hub task id.
    pub task_id: TaskId,
    work: TempDir,
}

impl TestContext {
    /// Creates a context building `foo-1-2`.
    #[must_use]
    pub fn new() -> Self {
        Self::with_dockerfile(&DockerfileBuilder::labelled(COMPONENT, "1", "2").build())
    }

    /// Creates a context whose checkout contains `dockerfile`.
    #[must_use]
    pub fn with_dockerfile(dockerfile: &str) -> Self {
        let work = tempfile::tempdir().expect("tempdir");
        let config = BuilderConfig {
            work_dir: work.path().join("task"),
            koji_work_dir: work.path().join("work"),
            poll_interval_ms: 5,
            log_retry_attempts: 3,
            log_retry_delay_ms: 0,
            ..BuilderConfig::default()
        };
        let session = MemorySession::new()
            .with_target(BuildTarget {
                name: TARGET.into(),
                build_tag: BUILD_TAG.into(),
                dest_tag_name: DEST_TAG.into(),
            })
            .with_tag_arches(BUILD_TAG, Some("x86_64"))
            .with_package(DEST_TAG, COMPONENT, false);
        let orchestrator = MemoryOrchestrator::new();

        Self {
            connector: MemoryConnector::new(orchestrator.clone()),
            orchestrator,
            session,
            fetcher: MemorySourceFetcher::new(dockerfile),
            config,
            task_id: TaskId::new(TASK_ID),
            work,
        }
    }

    /// Replaces the orchestrator script.
    #[must_use]
    pub fn with_orchestrator(mut self, orchestrator: MemoryOrchestrator) -> Self {
        self.connector = MemoryConnector::new(orchestrator.clone());
        self.orchestrator = orchestrator;
        self
    }

    /// Replaces the hub session.
    #[must_use]
    pub fn with_session(mut self, session: MemorySession) -> Self {
        self.session = session;
        self
    }

    /// Replaces the source checkout.
    #[must_use]
    pub fn with_fetcher(mut self, fetcher: MemorySourceFetcher) -> Self {
        self.fetcher = fetcher;
        self
    }

    /// Adjusts the builder settings.
    #[must_use]
    pub fn with_config(mut self, f: impl FnOnce(&mut BuilderConfig)) -> Self {
        f(&mut self.config);
        self
    }

    /// Shared work area that metadata files are copied from.
    #[must_use]
    pub fn koji_work_dir(&self) -> PathBuf {
        self.config.koji_work_dir.clone()
    }

    /// Root of the temporary work area.
    #[must_use]
    pub fn work_root(&self) -> PathBuf {
        self.work.path().to_path_buf()
    }

    /// Hub-relative upload directory of the task.
    #[must_use]
    pub fn upload_path(&self) -> String {
        self.task_id.upload_path()
    }

    /// Task context wired to the in-memory collaborators.
    #[must_use]
    pub fn task_context(&self) -> TaskContext {
        TaskContext::new(
            self.task_id,
            Arc::new(self.session.clone()),
            Arc::new(self.connector.clone()),
            self.config.clone(),
        )
    }

    /// Container task that is never interrupted.
    #[must_use]
    pub fn container_task(&self) -> BuildContainerTask {
        BuildContainerTask::new(self.task_context(), Arc::new(self.fetcher.clone()))
            .with_interrupt(Interrupt::never())
    }

    /// Source container task that is never interrupted.
    #[must_use]
    pub fn source_container_task(&self) -> BuildSourceContainerTask {
        BuildSourceContainerTask::new(self.task_context()).with_interrupt(Interrupt::never())
    }
}

impl Default for TestContext {
    fn default() -> Self {
        Self::new()
    }
}

/// Interrupt that fires after `delay`.
#[must_use]
pub fn interrupt_after(delay: Duration) -> Interrupt {
    Interrupt::from_future(tokio::time::sleep(delay))
}
