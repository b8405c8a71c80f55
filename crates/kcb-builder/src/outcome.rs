//! Terminal outcome classification.

use std::sync::Arc;

use serde::Serialize;
use serde_json::{Map, Value};

use kcb_core::{BuildHandle, TaskId};

use crate::error::{Error, Result};
use crate::orchestrator::{BuildResponse, BuildStatus, Orchestrator};
use crate::session::HubSession;

/// Upload name of the whitelisted build annotations.
pub const ANNOTATIONS_FILENAME: &str = "build_annotations.json";

/// Annotation listing which annotations are copied to the task.
pub const ANNOTATIONS_WHITELIST_KEY: &str = "koji_task_annotations_whitelist";

/// A successfully finished build.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildOutcome {
    /// Orchestrator build id.
    pub build_id: String,
    /// Repositories the image was pushed to.
    pub repositories: Vec<String>,
    /// Hub build id, absent for scratch builds.
    pub koji_build_id: Option<String>,
}

/// Waits for a build to finish and maps its status to a result.
pub struct OutcomeClassifier {
    orchestrator: Arc<dyn Orchestrator>,
    session: Arc<dyn HubSession>,
    task_id: TaskId,
}

impl OutcomeClassifier {
    /// Creates a classifier for the build owned by `task_id`.
    #[must_use]
    pub fn new(
        orchestrator: Arc<dyn Orchestrator>,
        session: Arc<dyn HubSession>,
        task_id: TaskId,
    ) -> Self {
        Self {
            orchestrator,
            session,
            task_id,
        }
    }

    /// Blocks until the build finishes, classifies it and releases the handle.
    ///
    /// The orchestrator build record is removed whatever the outcome; a
    /// failed removal is only logged.
    ///
    /// # Errors
    ///
    /// See [`OutcomeClassifier::classify`].
    pub async fn await_outcome(&self, handle: &BuildHandle) -> Result<BuildOutcome> {
        let outcome = match self.orchestrator.wait_for_build_to_finish(handle).await {
            Ok(response) => self.classify(response).await,
            Err(err) => Err(err.into()),
        };
        if let Err(err) = self.orchestrator.remove_build(handle).await {
            tracing::warn!(build_id = %handle, error = %err, "failed to remove build");
        }
        outcome
    }

    /// Maps a finished build to an outcome.
    ///
    /// # Errors
    ///
    /// - [`Error::Cancelled`] if the build was cancelled; the hub task is
    ///   marked cancelled first, and a failure to do so is only logged
    /// - [`Error::ContainerFailed`] if the build failed
    /// - [`Error::BuildStillRunning`] if the build is not actually finished
    pub async fn classify(&self, response: BuildResponse) -> Result<BuildOutcome> {
        tracing::info!(
            build_id = %response.build_id,
            status = %response.status,
            "build finished"
        );

        match response.status {
            BuildStatus::Succeeded => {
                self.upload_annotations(&response).await;
                let repositories = response.flattened_repositories();
                tracing::info!(?repositories, "image available");
                if response.koji_build_id.is_none() {
                    tracing::info!("hub build id not available");
                }
                Ok(BuildOutcome {
                    build_id: response.build_id,
                    repositories,
                    koji_build_id: response.koji_build_id,
                })
            }
            BuildStatus::Cancelled => {
                if let Err(err) = self.session.cancel_task(self.task_id).await {
                    tracing::warn!(error = %err, "failed to mark task cancelled");
                }
                Err(Error::Cancelled {
                    build_id: response.build_id,
                })
            }
            BuildStatus::Failed => Err(Error::ContainerFailed {
                message: failure_message(&response),
            }),
            BuildStatus::Pending | BuildStatus::Running => Err(Error::BuildStillRunning {
                status: response.status.to_string(),
            }),
        }
    }

    async fn upload_annotations(&self, response: &BuildResponse) {
        let Some(annotations) = response.annotations.as_ref().and_then(task_annotations) else {
            return;
        };
        let rendered = match render_annotations(&annotations) {
            Ok(rendered) => rendered,
            Err(err) => {
                tracing::warn!(error = %err, "cannot render build annotations");
                return;
            }
        };
        let upload_path = self.task_id.upload_path();
        if let Err(err) = self
            .session
            .upload_bytes(ANNOTATIONS_FILENAME, rendered.as_bytes(), &upload_path)
            .await
        {
            tracing::warn!(error = %err, "failed to upload build annotations");
        }
    }
}

fn failure_message(response: &BuildResponse) -> String {
    match response.error_message.as_deref().filter(|m| !m.is_empty()) {
        Some(message) => format!(
            "Image build failed. {message}. Build id: {}",
            response.build_id
        ),
        None => format!("Image build failed. Build id: {}", response.build_id),
    }
}

/// Annotations named by the whitelist annotation, if any.
///
/// The whitelist is a JSON array of keys stored as a string. A missing or
/// unparseable whitelist selects nothing.
#[must_use]
pub fn task_annotations(annotations: &Map<String, Value>) -> Option<Map<String, Value>> {
    let whitelist: Vec<String> = annotations
        .get(ANNOTATIONS_WHITELIST_KEY)
        .and_then(Value::as_str)
        .and_then(|raw| serde_json::from_str(raw).ok())?;

    let selected: Map<String, Value> = annotations
        .iter()
        .filter(|(key, _)| whitelist.contains(key))
        .map(|(key, value)| (key.clone(), value.clone()))
        .collect();
    (!selected.is_empty()).then_some(selected)
}

/// Renders annotations with sorted keys and a four-space indent.
///
/// # Errors
///
/// Returns an error if serialization fails.
pub fn render_annotations(annotations: &Map<String, Value>) -> serde_json::Result<String> {
    let sorted: std::collections::BTreeMap<&String, &Value> = annotations.iter().collect();
    let mut out = Vec::new();
    let formatter = serde_json::ser::PrettyFormatter::with_indent(b"    ");
    let mut serializer = serde_json::Serializer::with_formatter(&mut out, formatter);
    sorted.serialize(&mut serializer)?;
    Ok(String::from_utf8_lossy(&out).into_owned())
}
