//! Custom assertion helpers for integration tests.

use kcb_builder::error::{CONTAINER_CANCELLED_FAULT, CONTAINER_ERROR_FAULT, Error};

use crate::orchestrator::{MemoryOrchestrator, OrchestratorCall};

/// Asserts that a task ended as cancelled, not as a failure.
///
/// # Panics
///
/// Panics if `err` is not the cancelled kind.
pub fn assert_cancelled(err: &Error) {
    assert!(
        matches!(err, Error::Cancelled { .. }),
        "Expected cancellation, got {err:?}"
    );
    assert_eq!(err.fault_code(), Some(CONTAINER_CANCELLED_FAULT));
}

/// Asserts that a build failed with a message containing `needle`.
///
/// # Panics
///
/// Panics if `err` is not a container failure or the message differs.
pub fn assert_container_failed(err: &Error, needle: &str) {
    assert!(
        matches!(err, Error::ContainerFailed { .. }),
        "Expected container failure, got {err:?}"
    );
    assert_eq!(err.fault_code(), Some(CONTAINER_ERROR_FAULT));
    let message = err.to_string();
    assert!(
        message.contains(needle),
        "Expected {message:?} to contain {needle:?}"
    );
}

/// Asserts that exactly one single-platform build was submitted for `arch`.
///
/// # Panics
///
/// Panics if the orchestrator saw zero or several legacy submissions, or one
/// for a different platform.
pub fn assert_single_legacy_submission(orchestrator: &MemoryOrchestrator, arch: &str) {
    let legacy = orchestrator.legacy_submissions();
    assert_eq!(
        legacy.len(),
        1,
        "Expected exactly one legacy submission, got {}",
        legacy.len()
    );
    assert_eq!(legacy[0].architecture, arch);
}

/// Asserts that the orchestrator build record was removed.
///
/// # Panics
///
/// Panics if no removal was recorded.
pub fn assert_build_removed(orchestrator: &MemoryOrchestrator) {
    assert!(
        orchestrator.count(|c| matches!(c, OrchestratorCall::Remove(_))) > 0,
        "Expected the build to be removed"
    );
}
