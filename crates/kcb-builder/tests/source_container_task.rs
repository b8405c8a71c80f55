//! Tests of the `buildSourceContainer` task.

#![allow(clippy::expect_used, clippy::unwrap_used)]

use kcb_builder::error::Error;
use kcb_builder::orchestrator::{BuildResponse, BuildStatus, LogEntry};
use kcb_builder::request::SourceContainerOptions;
use kcb_builder::session::{BuildState, BuildTarget, ExistingBuild};
use kcb_test_utils::{
    BUILD_TAG, DEFAULT_BUILD_ID, DEST_TAG, LogScript, MemoryOrchestrator, MemorySession,
    OrchestratorCall, RequestFactory, TARGET, TASK_OWNER, TestContext,
};

fn session() -> MemorySession {
    MemorySession::new()
        .with_target(BuildTarget {
            name: TARGET.into(),
            build_tag: BUILD_TAG.into(),
            dest_tag_name: DEST_TAG.into(),
        })
        .with_package(DEST_TAG, "foo-source", false)
        .with_image_build(7, "foo-1-2", "foo", BuildState::Complete)
}

#[tokio::test]
async fn builds_sources_for_image_build() {
    let ctx = TestContext::new().with_session(session()).with_orchestrator(
        MemoryOrchestrator::new()
            .with_final_response(
                BuildResponse::new(DEFAULT_BUILD_ID, BuildStatus::Succeeded)
                    .with_repositories("registry.example.com", ["registry.example.com/foo-source:1-2"])
                    .with_koji_build_id("4243"),
            )
            .with_log_attempt(LogScript::entries([
                LogEntry::tagged("noarch", "fetching sources"),
                LogEntry::untagged("done"),
            ])),
    );

    let result = ctx
        .source_container_task()
        .handle(TARGET, RequestFactory::source_container("foo-1-2"))
        .await
        .unwrap();

    assert_eq!(result.koji_builds, ["4243"]);
    let params = ctx
        .orchestrator
        .calls()
        .into_iter()
        .find_map(|c| match c {
            OrchestratorCall::CreateSourceContainerBuild(params) => Some(*params),
            _ => None,
        })
        .unwrap();
    assert_eq!(params.component, "foo-source");
    assert_eq!(params.sources_for_koji_build_id, 7);
    assert_eq!(params.sources_for_koji_build_nvr, "foo-1-2");
    assert_eq!(params.user, TASK_OWNER);

    assert_eq!(
        ctx.session
            .uploaded_text(&ctx.upload_path(), "orchestrator.log")
            .as_deref(),
        Some("fetching sources\ndone\n")
    );
    assert_eq!(
        ctx.orchestrator
            .count(|c| matches!(c, OrchestratorCall::BuildLogs(_))),
        1
    );
}

#[tokio::test]
async fn build_id_alone_is_enough() {
    let ctx = TestContext::new().with_session(session());
    let options = SourceContainerOptions {
        koji_build_id: Some(7),
        ..SourceContainerOptions::default()
    };

    let info = ctx
        .source_container_task()
        .source_build_info(options.koji_build_id, None)
        .await
        .unwrap();

    assert_eq!(info.build_nvr, "foo-1-2");
    assert_eq!(info.component, "foo-source");
}

#[tokio::test]
async fn missing_reference_is_rejected() {
    let ctx = TestContext::new().with_session(session());

    let err = ctx
        .source_container_task()
        .handle(TARGET, SourceContainerOptions::default())
        .await
        .unwrap_err();

    assert_eq!(
        err.to_string(),
        "koji_build_id or koji_build_nvr must be specified"
    );
}

#[tokio::test]
async fn unknown_build_is_rejected() {
    let ctx = TestContext::new().with_session(session());

    let err = ctx
        .source_container_task()
        .handle(TARGET, RequestFactory::source_container("foo-9-9"))
        .await
        .unwrap_err();

    assert_eq!(err.to_string(), "specified source build 'foo-9-9' doesn't exist");
}

#[tokio::test]
async fn id_and_nvr_must_agree() {
    let ctx = TestContext::new().with_session(session());
    let options = SourceContainerOptions {
        koji_build_id: Some(8),
        ..RequestFactory::source_container("foo-1-2")
    };

    let err = ctx
        .source_container_task()
        .handle(TARGET, options)
        .await
        .unwrap_err();

    assert!(matches!(err, Error::SourceBuild { .. }));
    assert!(
        err.to_string()
            .starts_with("koji_build_id 8 does not match koji_build_nvr foo-1-2 with id 7.")
    );
}

#[tokio::test]
async fn source_container_build_cannot_be_a_source() {
    let mut extra = serde_json::Map::new();
    extra.insert(
        "image".into(),
        serde_json::json!({"sources_for_nvr": "foo-1-2"}),
    );
    let ctx = TestContext::new().with_session(session().with_build(ExistingBuild {
        build_id: 8,
        nvr: "foo-source-1-2".into(),
        name: "foo-source".into(),
        state: BuildState::Complete,
        extra,
    }));

    let err = ctx
        .source_container_task()
        .handle(TARGET, RequestFactory::source_container("foo-source-1-2"))
        .await
        .unwrap_err();

    assert_eq!(
        err.to_string(),
        "koji build foo-source-1-2 is source container build, source container can not use source container build image"
    );
}

#[tokio::test]
async fn missing_capability_is_fatal() {
    let ctx = TestContext::new()
        .with_session(session())
        .with_orchestrator(MemoryOrchestrator::new().without_source_containers());

    let err = ctx
        .source_container_task()
        .handle(TARGET, RequestFactory::source_container("foo-1-2"))
        .await
        .unwrap_err();

    assert!(matches!(err, Error::InvalidRequest { .. }));
    assert!(ctx.orchestrator.legacy_submissions().is_empty());
}

#[tokio::test]
async fn non_scratch_requires_whitelisted_source_package() {
    let session = MemorySession::new()
        .with_target(BuildTarget {
            name: TARGET.into(),
            build_tag: BUILD_TAG.into(),
            dest_tag_name: DEST_TAG.into(),
        })
        .with_image_build(7, "foo-1-2", "foo", BuildState::Complete);
    let ctx = TestContext::new().with_session(session);

    let err = ctx
        .source_container_task()
        .handle(TARGET, RequestFactory::source_container("foo-1-2"))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::PackageNotListed { .. }));

    let scratch = SourceContainerOptions {
        scratch: true,
        ..RequestFactory::source_container("foo-1-2")
    };
    assert!(ctx.source_container_task().handle(TARGET, scratch).await.is_ok());
}
