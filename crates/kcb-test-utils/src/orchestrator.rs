//! Scripted in-memory orchestrator.
//!
//! Every call is recorded so tests can assert on what the task asked for.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use futures::StreamExt;

use kcb_builder::orchestrator::{
    BuildResponse, BuildStatus, ClientProfile, LegacyBuildParams, LogEntry, LogStream,
    Orchestrator, OrchestratorBuildParams, OrchestratorConnector, OrchestratorError,
    OrchestratorResult, SourceContainerBuildParams,
};
use kcb_core::BuildHandle;

/// Default name of the build created by [`MemoryOrchestrator`].
pub const DEFAULT_BUILD_ID: &str = "foo-main-12345";

/// Record of an orchestrator call.
#[derive(Debug, Clone, PartialEq)]
pub enum OrchestratorCall {
    /// Multi-platform submission.
    CreateOrchestratorBuild(Box<OrchestratorBuildParams>),
    /// Single-platform submission.
    CreateBuild(Box<LegacyBuildParams>),
    /// Source container submission.
    CreateSourceContainerBuild(Box<SourceContainerBuildParams>),
    /// Scheduling wait.
    WaitScheduled(String),
    /// Platform-tagged log stream opened.
    OrchestratorLogs(String),
    /// Combined log stream opened.
    BuildLogs(String),
    /// Cancellation request.
    Cancel(String),
    /// Status snapshot.
    GetBuild(String),
    /// Completion wait.
    WaitFinished(String),
    /// Build record removal.
    Remove(String),
}

/// How the multi-platform submission responds.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum SubmitBehavior {
    /// Accept and return the build handle.
    #[default]
    Accept,
    /// Accept without starting a build.
    Skip,
    /// Report orchestration as not enabled.
    NotEnabled,
    /// Report the method as missing.
    MethodMissing,
    /// Fail with a request error.
    Fail(String),
}

/// One attempt at reading the log stream.
#[derive(Debug, Clone, Default)]
pub struct LogScript {
    entries: Vec<LogEntry>,
    fail_with: Option<String>,
}

impl LogScript {
    /// A stream yielding `entries` and ending cleanly.
    #[must_use]
    pub fn entries(entries: impl IntoIterator<Item = LogEntry>) -> Self {
        Self {
            entries: entries.into_iter().collect(),
            fail_with: None,
        }
    }

    /// Makes the stream fail after its entries.
    #[must_use]
    pub fn then_fail(mut self, message: impl Into<String>) -> Self {
        self.fail_with = Some(message.into());
        self
    }

    fn into_stream(self) -> LogStream {
        let mut items: Vec<OrchestratorResult<LogEntry>> =
            self.entries.into_iter().map(Ok).collect();
        if let Some(message) = self.fail_with {
            items.push(Err(OrchestratorError::stream(message)));
        }
        futures::stream::iter(items).boxed()
    }
}

#[derive(Debug)]
struct State {
    build_id: String,
    submit: SubmitBehavior,
    legacy_failure: Option<String>,
    source_container_supported: bool,
    scheduling_blocked: bool,
    demux_supported: bool,
    log_scripts: VecDeque<LogScript>,
    status: BuildStatus,
    final_response: Option<BuildResponse>,
    remove_fails: bool,
    calls: Vec<OrchestratorCall>,
}

/// In-memory [`Orchestrator`] with scripted responses.
#[derive(Debug, Clone)]
pub struct MemoryOrchestrator {
    state: Arc<Mutex<State>>,
}

impl Default for MemoryOrchestrator {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryOrchestrator {
    /// Creates an orchestrator that accepts builds which then succeed.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(State {
                build_id: DEFAULT_BUILD_ID.to_string(),
                submit: SubmitBehavior::Accept,
                legacy_failure: None,
                source_container_supported: true,
                scheduling_blocked: false,
                demux_supported: true,
                log_scripts: VecDeque::new(),
                status: BuildStatus::Succeeded,
                final_response: None,
                remove_fails: false,
                calls: Vec::new(),
            })),
        }
    }

    fn with_state(self, f: impl FnOnce(&mut State)) -> Self {
        f(&mut self.state.lock().expect("lock"));
        self
    }

    /// Sets the name of the created build.
    #[must_use]
    pub fn with_build_id(self, build_id: impl Into<String>) -> Self {
        let build_id = build_id.into();
        self.with_state(|s| s.build_id = build_id)
    }

    /// Sets how the multi-platform submission responds.
    #[must_use]
    pub fn with_submit(self, behavior: SubmitBehavior) -> Self {
        self.with_state(|s| s.submit = behavior)
    }

    /// Makes the single-platform submission fail.
    #[must_use]
    pub fn with_legacy_failure(self, message: impl Into<String>) -> Self {
        let message = message.into();
        self.with_state(|s| s.legacy_failure = Some(message))
    }

    /// Removes source container support.
    #[must_use]
    pub fn without_source_containers(self) -> Self {
        self.with_state(|s| s.source_container_supported = false)
    }

    /// Makes the scheduling wait never return.
    #[must_use]
    pub fn with_scheduling_blocked(self) -> Self {
        self.with_state(|s| s.scheduling_blocked = true)
    }

    /// Removes platform-tagged log support.
    #[must_use]
    pub fn without_demux(self) -> Self {
        self.with_state(|s| s.demux_supported = false)
    }

    /// Queues the next log stream attempt. Unscripted attempts are empty.
    #[must_use]
    pub fn with_log_attempt(self, script: LogScript) -> Self {
        self.with_state(|s| s.log_scripts.push_back(script))
    }

    /// Sets the status reported by `get_build`.
    #[must_use]
    pub fn with_status(self, status: BuildStatus) -> Self {
        self.with_state(|s| s.status = status)
    }

    /// Sets the response of the completion wait.
    ///
    /// Without one, the wait reports the configured status.
    #[must_use]
    pub fn with_final_response(self, response: BuildResponse) -> Self {
        self.with_state(|s| s.final_response = Some(response))
    }

    /// Makes build record removal fail.
    #[must_use]
    pub fn with_remove_failure(self) -> Self {
        self.with_state(|s| s.remove_fails = true)
    }

    /// Returns every recorded call.
    #[must_use]
    pub fn calls(&self) -> Vec<OrchestratorCall> {
        self.state.lock().expect("lock").calls.clone()
    }

    /// Counts recorded calls matching `pred`.
    pub fn count(&self, pred: impl Fn(&OrchestratorCall) -> bool) -> usize {
        self.calls().iter().filter(|c| pred(c)).count()
    }

    /// Returns the single-platform submissions.
    #[must_use]
    pub fn legacy_submissions(&self) -> Vec<LegacyBuildParams> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                OrchestratorCall::CreateBuild(params) => Some(*params),
                _ => None,
            })
            .collect()
    }

    /// Returns the multi-platform submissions.
    #[must_use]
    pub fn orchestrator_submissions(&self) -> Vec<OrchestratorBuildParams> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                OrchestratorCall::CreateOrchestratorBuild(params) => Some(*params),
                _ => None,
            })
            .collect()
    }

    fn record(&self, call: OrchestratorCall) {
        self.state.lock().expect("lock").calls.push(call);
    }

    fn handle(&self) -> BuildHandle {
        BuildHandle::new(self.state.lock().expect("lock").build_id.clone()).expect("build id")
    }

    fn next_log_stream(&self) -> LogStream {
        let script = self
            .state
            .lock()
            .expect("lock")
            .log_scripts
            .pop_front()
            .unwrap_or_default();
        script.into_stream()
    }
}

#[async_trait]
impl Orchestrator for MemoryOrchestrator {
    async fn create_orchestrator_build(
        &self,
        params: &OrchestratorBuildParams,
    ) -> OrchestratorResult<Option<BuildHandle>> {
        self.record(OrchestratorCall::CreateOrchestratorBuild(Box::new(
            params.clone(),
        )));
        let behavior = self.state.lock().expect("lock").submit.clone();
        match behavior {
            SubmitBehavior::Accept => Ok(Some(self.handle())),
            SubmitBehavior::Skip => Ok(None),
            SubmitBehavior::NotEnabled => Err(OrchestratorError::OrchestratorNotEnabled),
            SubmitBehavior::MethodMissing => Err(OrchestratorError::MethodUnavailable {
                method: "create_orchestrator_build",
            }),
            SubmitBehavior::Fail(message) => Err(OrchestratorError::request(message)),
        }
    }

    async fn create_build(&self, params: &LegacyBuildParams) -> OrchestratorResult<BuildHandle> {
        self.record(OrchestratorCall::CreateBuild(Box::new(params.clone())));
        let failure = self.state.lock().expect("lock").legacy_failure.clone();
        match failure {
            Some(message) => Err(OrchestratorError::request(message)),
            None => Ok(self.handle()),
        }
    }

    async fn create_source_container_build(
        &self,
        params: &SourceContainerBuildParams,
    ) -> OrchestratorResult<BuildHandle> {
        self.record(OrchestratorCall::CreateSourceContainerBuild(Box::new(
            params.clone(),
        )));
        if self.state.lock().expect("lock").source_container_supported {
            Ok(self.handle())
        } else {
            Err(OrchestratorError::MethodUnavailable {
                method: "create_source_container_build",
            })
        }
    }

    async fn wait_for_build_to_get_scheduled(&self, handle: &BuildHandle) -> OrchestratorResult<()> {
        self.record(OrchestratorCall::WaitScheduled(handle.to_string()));
        if self.state.lock().expect("lock").scheduling_blocked {
            std::future::pending::<()>().await;
        }
        Ok(())
    }

    fn supports_orchestrator_logs(&self) -> bool {
        self.state.lock().expect("lock").demux_supported
    }

    async fn orchestrator_build_logs(
        &self,
        handle: &BuildHandle,
        _follow: bool,
    ) -> OrchestratorResult<LogStream> {
        self.record(OrchestratorCall::OrchestratorLogs(handle.to_string()));
        Ok(self.next_log_stream())
    }

    async fn build_logs(&self, handle: &BuildHandle, _follow: bool) -> OrchestratorResult<LogStream> {
        self.record(OrchestratorCall::BuildLogs(handle.to_string()));
        Ok(self.next_log_stream())
    }

    async fn cancel_build(&self, handle: &BuildHandle) -> OrchestratorResult<()> {
        self.record(OrchestratorCall::Cancel(handle.to_string()));
        self.state.lock().expect("lock").status = BuildStatus::Cancelled;
        Ok(())
    }

    async fn get_build(&self, handle: &BuildHandle) -> OrchestratorResult<BuildResponse> {
        self.record(OrchestratorCall::GetBuild(handle.to_string()));
        let status = self.state.lock().expect("lock").status;
        Ok(BuildResponse::new(handle.as_str(), status))
    }

    async fn wait_for_build_to_finish(
        &self,
        handle: &BuildHandle,
    ) -> OrchestratorResult<BuildResponse> {
        self.record(OrchestratorCall::WaitFinished(handle.to_string()));
        let state = self.state.lock().expect("lock");
        Ok(state
            .final_response
            .clone()
            .unwrap_or_else(|| BuildResponse::new(handle.as_str(), state.status)))
    }

    async fn remove_build(&self, handle: &BuildHandle) -> OrchestratorResult<()> {
        self.record(OrchestratorCall::Remove(handle.to_string()));
        if self.state.lock().expect("lock").remove_fails {
            return Err(OrchestratorError::request("remove failed"));
        }
        Ok(())
    }
}

/// Connector handing out one shared [`MemoryOrchestrator`].
#[derive(Debug, Clone, Default)]
pub struct MemoryConnector {
    orchestrator: MemoryOrchestrator,
    profiles: Arc<Mutex<Vec<ClientProfile>>>,
}

impl MemoryConnector {
    /// Creates a connector for `orchestrator`.
    #[must_use]
    pub fn new(orchestrator: MemoryOrchestrator) -> Self {
        Self {
            orchestrator,
            profiles: Arc::default(),
        }
    }

    /// Returns the orchestrator behind every connection.
    #[must_use]
    pub fn orchestrator(&self) -> &MemoryOrchestrator {
        &self.orchestrator
    }

    /// Profiles requested so far, in order.
    #[must_use]
    pub fn profiles(&self) -> Vec<ClientProfile> {
        self.profiles.lock().expect("lock").clone()
    }
}

#[async_trait]
impl OrchestratorConnector for MemoryConnector {
    async fn connect(&self, profile: ClientProfile) -> OrchestratorResult<Arc<dyn Orchestrator>> {
        self.profiles.lock().expect("lock").push(profile);
        Ok(Arc::new(self.orchestrator.clone()))
    }
}
