//! In-memory hub session.

use std::collections::HashMap;
use std::io::SeekFrom;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt};

use kcb_builder::session::{
    BuildConfig, BuildRef, BuildState, BuildTarget, ExistingBuild, HubSession, PackageConfig,
    SessionError, SessionResult,
};
use kcb_core::TaskId;

/// Name of the task owner reported by [`MemorySession`].
pub const TASK_OWNER: &str = "kojiuser";

/// Record of one upload call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadRecord {
    /// File name.
    pub name: String,
    /// Hub-relative upload directory.
    pub upload_path: String,
    /// Offset the bytes were stored at.
    pub offset: u64,
    /// Number of bytes stored.
    pub len: u64,
}

#[derive(Debug, Default)]
struct State {
    last_event: i64,
    targets: HashMap<String, BuildTarget>,
    configs: HashMap<String, BuildConfig>,
    packages: HashMap<(String, String), PackageConfig>,
    builds: Vec<ExistingBuild>,
    get_build_fails: bool,
    uploads_denied: bool,
    uploads_fail: bool,
    cancel_fails: bool,
    files: HashMap<(String, String), Vec<u8>>,
    uploads: Vec<UploadRecord>,
    cancelled: Vec<TaskId>,
}

/// In-memory [`HubSession`] with an offset-aware upload store.
#[derive(Debug, Clone)]
pub struct MemorySession {
    state: Arc<Mutex<State>>,
}

impl Default for MemorySession {
    fn default() -> Self {
        Self::new()
    }
}

impl MemorySession {
    /// Creates an empty session.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(State {
                last_event: 1000,
                ..State::default()
            })),
        }
    }

    fn with_state(self, f: impl FnOnce(&mut State)) -> Self {
        f(&mut self.state.lock().expect("lock"));
        self
    }

    /// Adds a build target.
    #[must_use]
    pub fn with_target(self, target: BuildTarget) -> Self {
        self.with_state(|s| {
            s.targets.insert(target.name.clone(), target);
        })
    }

    /// Sets the architectures of a build tag.
    #[must_use]
    pub fn with_tag_arches(self, tag: impl Into<String>, arches: Option<&str>) -> Self {
        let tag = tag.into();
        let config = BuildConfig {
            name: tag.clone(),
            arches: arches.map(str::to_string),
        };
        self.with_state(|s| {
            s.configs.insert(tag, config);
        })
    }

    /// Lists a package in a tag.
    #[must_use]
    pub fn with_package(self, tag: impl Into<String>, package: impl Into<String>, blocked: bool) -> Self {
        let key = (tag.into(), package.into());
        self.with_state(|s| {
            s.packages.insert(key, PackageConfig { blocked });
        })
    }

    /// Adds a catalog build.
    #[must_use]
    pub fn with_build(self, build: ExistingBuild) -> Self {
        self.with_state(|s| s.builds.push(build))
    }

    /// Adds a catalog image build in `state`.
    #[must_use]
    pub fn with_image_build(self, build_id: i64, nvr: &str, name: &str, state: BuildState) -> Self {
        let mut extra = serde_json::Map::new();
        extra.insert("image".into(), serde_json::json!({}));
        self.with_build(ExistingBuild {
            build_id,
            nvr: nvr.to_string(),
            name: name.to_string(),
            state,
            extra,
        })
    }

    /// Makes catalog lookups fail.
    #[must_use]
    pub fn with_get_build_failure(self) -> Self {
        self.with_state(|s| s.get_build_fails = true)
    }

    /// Rejects uploads as if the task had been cancelled.
    pub fn deny_uploads(&self) {
        self.state.lock().expect("lock").uploads_denied = true;
    }

    /// Makes marking the task cancelled fail.
    #[must_use]
    pub fn with_cancel_failure(self) -> Self {
        self.with_state(|s| s.cancel_fails = true)
    }

    /// Fails uploads as if the hub were unreachable.
    pub fn fail_uploads(&self) {
        self.state.lock().expect("lock").uploads_fail = true;
    }

    /// Returns the stored content of an uploaded file.
    #[must_use]
    pub fn uploaded(&self, upload_path: &str, name: &str) -> Option<Vec<u8>> {
        self.state
            .lock()
            .expect("lock")
            .files
            .get(&(upload_path.to_string(), name.to_string()))
            .cloned()
    }

    /// Returns the stored content of an uploaded file as text.
    #[must_use]
    pub fn uploaded_text(&self, upload_path: &str, name: &str) -> Option<String> {
        self.uploaded(upload_path, name)
            .map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
    }

    /// Returns every non-empty upload call in order.
    #[must_use]
    pub fn uploads(&self) -> Vec<UploadRecord> {
        self.state.lock().expect("lock").uploads.clone()
    }

    /// Returns the tasks marked cancelled.
    #[must_use]
    pub fn cancelled_tasks(&self) -> Vec<TaskId> {
        self.state.lock().expect("lock").cancelled.clone()
    }

    fn check_uploads_allowed(&self) -> SessionResult<()> {
        let state = self.state.lock().expect("lock");
        if state.uploads_denied {
            return Err(SessionError::ActionNotAllowed {
                message: "task is no longer open".into(),
            });
        }
        if state.uploads_fail {
            return Err(SessionError::request("hub unreachable"));
        }
        Ok(())
    }

    fn store(&self, name: &str, upload_path: &str, offset: u64, data: &[u8]) {
        let mut state = self.state.lock().expect("lock");
        let key = (upload_path.to_string(), name.to_string());
        let file = state.files.entry(key).or_default();
        let start = usize::try_from(offset).expect("offset fits in memory");
        let end = start + data.len();
        if file.len() < end {
            file.resize(end, 0);
        }
        file[start..end].copy_from_slice(data);
        if !data.is_empty() {
            state.uploads.push(UploadRecord {
                name: name.to_string(),
                upload_path: upload_path.to_string(),
                offset,
                len: data.len() as u64,
            });
        }
    }
}

#[async_trait]
impl HubSession for MemorySession {
    async fn task_owner(&self, _task_id: TaskId) -> SessionResult<String> {
        Ok(TASK_OWNER.to_string())
    }

    async fn last_event_id(&self) -> SessionResult<i64> {
        Ok(self.state.lock().expect("lock").last_event)
    }

    async fn build_target(&self, name: &str, _event: i64) -> SessionResult<Option<BuildTarget>> {
        Ok(self.state.lock().expect("lock").targets.get(name).cloned())
    }

    async fn build_config(&self, tag: &str, _event: i64) -> SessionResult<BuildConfig> {
        let config = self.state.lock().expect("lock").configs.get(tag).cloned();
        Ok(config.unwrap_or_else(|| BuildConfig {
            name: tag.to_string(),
            arches: None,
        }))
    }

    async fn package_config(
        &self,
        tag: &str,
        package: &str,
    ) -> SessionResult<Option<PackageConfig>> {
        let key = (tag.to_string(), package.to_string());
        Ok(self.state.lock().expect("lock").packages.get(&key).copied())
    }

    async fn get_build(&self, build: &BuildRef) -> SessionResult<Option<ExistingBuild>> {
        let state = self.state.lock().expect("lock");
        if state.get_build_fails {
            return Err(SessionError::request(format!("no such build: {build}")));
        }
        Ok(state
            .builds
            .iter()
            .find(|b| match build {
                BuildRef::Id(id) => b.build_id == *id,
                BuildRef::Nvr(nvr) => b.nvr == *nvr,
            })
            .cloned())
    }

    async fn incremental_upload(
        &self,
        name: &str,
        file: &mut File,
        upload_path: &str,
    ) -> SessionResult<u64> {
        self.check_uploads_allowed()?;
        let offset = file
            .seek(SeekFrom::Current(0))
            .await
            .map_err(|e| SessionError::request(format!("seek {name}: {e}")))?;
        let mut data = Vec::new();
        file.read_to_end(&mut data)
            .await
            .map_err(|e| SessionError::request(format!("read {name}: {e}")))?;
        self.store(name, upload_path, offset, &data);
        Ok(data.len() as u64)
    }

    async fn upload_bytes(&self, name: &str, data: &[u8], upload_path: &str) -> SessionResult<()> {
        self.check_uploads_allowed()?;
        self.state
            .lock()
            .expect("lock")
            .files
            .remove(&(upload_path.to_string(), name.to_string()));
        self.store(name, upload_path, 0, data);
        Ok(())
    }

    async fn cancel_task(&self, task_id: TaskId) -> SessionResult<()> {
        let mut state = self.state.lock().expect("lock");
        if state.cancel_fails {
            return Err(SessionError::request("cancelTask failed"));
        }
        state.cancelled.push(task_id);
        Ok(())
    }
}
