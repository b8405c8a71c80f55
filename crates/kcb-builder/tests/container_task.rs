//! End-to-end tests of the `buildContainer` task against in-memory collaborators.

#![allow(clippy::expect_used, clippy::unwrap_used)]

use std::time::Duration;

use kcb_builder::error::Error;
use kcb_builder::logs::METADATA_TAG;
use kcb_builder::orchestrator::{BuildResponse, BuildStatus, ClientProfile, LogEntry};
use kcb_builder::request::BuildOptions;
use kcb_builder::session::{BuildState, BuildTarget};
use kcb_builder::task::TaskResult;
use kcb_test_utils::{
    BUILD_TAG, COMPONENT, DEFAULT_BUILD_ID, DEST_TAG, DockerfileBuilder, LogScript,
    MemoryOrchestrator, MemorySession, MemorySourceFetcher, OrchestratorCall, RequestFactory,
    SOURCE_URL, SubmitBehavior, TARGET, TASK_OWNER, TestContext, assert_build_removed,
    assert_cancelled, assert_container_failed, assert_single_legacy_submission,
    init_test_logging, interrupt_after,
};

fn succeeded() -> BuildResponse {
    BuildResponse::new(DEFAULT_BUILD_ID, BuildStatus::Succeeded)
        .with_repositories("registry.example.com", ["registry.example.com/foo:1-2"])
        .with_koji_build_id("4242")
}

fn session_with_arches(arches: &str) -> MemorySession {
    MemorySession::new()
        .with_target(BuildTarget {
            name: TARGET.into(),
            build_tag: BUILD_TAG.into(),
            dest_tag_name: DEST_TAG.into(),
        })
        .with_tag_arches(BUILD_TAG, Some(arches))
        .with_package(DEST_TAG, COMPONENT, false)
}

#[tokio::test]
async fn successful_build_reports_repositories_and_koji_build() {
    init_test_logging();
    let ctx = TestContext::new().with_orchestrator(
        MemoryOrchestrator::new()
            .with_final_response(succeeded())
            .with_log_attempt(LogScript::entries([
                LogEntry::untagged("a"),
                LogEntry::tagged("x86_64", "b"),
            ])),
    );

    let result = ctx
        .container_task()
        .handle(SOURCE_URL, TARGET, RequestFactory::options())
        .await
        .unwrap();

    assert_eq!(result.repositories, ["registry.example.com/foo:1-2"]);
    assert_eq!(result.koji_builds, ["4242"]);
    assert!(result.user_warnings.is_empty());
    assert_eq!(result.build, None);

    let submitted = ctx.orchestrator.orchestrator_submissions();
    assert_eq!(submitted.len(), 1);
    assert_eq!(submitted[0].platforms, ["x86_64"]);
    assert_eq!(submitted[0].common.component, "foo");
    assert_eq!(submitted[0].common.user, TASK_OWNER);
    assert_eq!(submitted[0].common.git_uri, "git://pkgs.example.com/containers/foo");
    assert_eq!(submitted[0].common.git_ref, "a1b2c3d4");
    assert_eq!(ctx.connector.profiles()[0], ClientProfile::Default);

    let upload_path = ctx.upload_path();
    assert_eq!(
        ctx.session.uploaded_text(&upload_path, "x86_64.log").as_deref(),
        Some("b\n")
    );
    let main = ctx
        .session
        .uploaded_text(&upload_path, "orchestrator.log")
        .unwrap();
    assert!(main.starts_with("a\n"));
    assert_build_removed(&ctx.orchestrator);
}

#[tokio::test]
async fn legacy_fallback_submits_once_with_first_arch() {
    let ctx = TestContext::new()
        .with_session(session_with_arches("x86_64 ppc64le"))
        .with_orchestrator(
            MemoryOrchestrator::new()
                .with_submit(SubmitBehavior::NotEnabled)
                .with_final_response(succeeded()),
        );

    let result = ctx
        .container_task()
        .handle(SOURCE_URL, TARGET, RequestFactory::options())
        .await
        .unwrap();

    assert_eq!(result.koji_builds, ["4242"]);
    assert_eq!(ctx.orchestrator.orchestrator_submissions().len(), 1);
    assert_single_legacy_submission(&ctx.orchestrator, "x86_64");
}

#[tokio::test]
async fn strict_fallback_refuses_to_drop_platforms() {
    let ctx = TestContext::new()
        .with_session(session_with_arches("x86_64 ppc64le"))
        .with_orchestrator(MemoryOrchestrator::new().with_submit(SubmitBehavior::MethodMissing))
        .with_config(|config| config.strict_legacy_fallback = true);

    let err = ctx
        .container_task()
        .handle(SOURCE_URL, TARGET, RequestFactory::options())
        .await
        .unwrap_err();

    assert!(matches!(err, Error::InvalidRequest { .. }));
    assert!(err.to_string().contains("platforms"));
    assert!(ctx.orchestrator.legacy_submissions().is_empty());
}

#[tokio::test]
async fn existing_build_with_expected_nvr_is_a_duplicate() {
    let ctx = TestContext::new();
    let ctx = ctx.with_session(
        session_with_arches("x86_64").with_image_build(99, "foo-1-2", "foo", BuildState::Complete),
    );

    let err = ctx
        .container_task()
        .handle(SOURCE_URL, TARGET, RequestFactory::options())
        .await
        .unwrap_err();

    assert!(matches!(err, Error::DuplicateBuild { build_id: 99, .. }));
    assert_eq!(err.to_string(), "Build for foo-1-2 already exists, id 99");
    assert!(ctx.orchestrator.calls().is_empty());
}

#[tokio::test]
async fn failed_and_canceled_builds_are_reusable() {
    for state in [BuildState::Failed, BuildState::Canceled] {
        let ctx = TestContext::new().with_session(
            session_with_arches("x86_64").with_image_build(99, "foo-1-2", "foo", state),
        );

        let result = ctx
            .container_task()
            .handle(SOURCE_URL, TARGET, RequestFactory::options())
            .await;

        assert!(result.is_ok(), "state {state} should be reusable: {result:?}");
    }
}

#[tokio::test]
async fn failed_catalog_lookup_is_treated_as_no_build() {
    let ctx = TestContext::new()
        .with_session(session_with_arches("x86_64").with_get_build_failure());

    let result = ctx
        .container_task()
        .handle(SOURCE_URL, TARGET, RequestFactory::options())
        .await;

    assert!(result.is_ok());
}

#[tokio::test]
async fn scratch_builds_skip_duplicate_and_whitelist_checks() {
    let session = MemorySession::new()
        .with_target(BuildTarget {
            name: TARGET.into(),
            build_tag: BUILD_TAG.into(),
            dest_tag_name: DEST_TAG.into(),
        })
        .with_tag_arches(BUILD_TAG, Some("x86_64"))
        .with_image_build(99, "foo-1-2", "foo", BuildState::Complete);
    let ctx = TestContext::new().with_session(session);

    let result = ctx
        .container_task()
        .handle(SOURCE_URL, TARGET, RequestFactory::scratch())
        .await
        .unwrap();

    assert!(result.koji_builds.is_empty());
    assert_eq!(ctx.connector.profiles()[0], ClientProfile::Scratch);
    assert!(ctx.orchestrator.orchestrator_submissions()[0].common.scratch);
}

#[tokio::test]
async fn unlisted_package_is_rejected() {
    let session = MemorySession::new()
        .with_target(BuildTarget {
            name: TARGET.into(),
            build_tag: BUILD_TAG.into(),
            dest_tag_name: DEST_TAG.into(),
        })
        .with_tag_arches(BUILD_TAG, Some("x86_64"));
    let ctx = TestContext::new().with_session(session);

    let err = ctx
        .container_task()
        .handle(SOURCE_URL, TARGET, RequestFactory::options())
        .await
        .unwrap_err();

    assert_eq!(
        err.to_string(),
        "package (container) foo not in list for tag f40-container-candidate"
    );
}

#[tokio::test]
async fn blocked_package_is_rejected() {
    let ctx = TestContext::new().with_session(
        session_with_arches("x86_64").with_package(DEST_TAG, COMPONENT, true),
    );

    let err = ctx
        .container_task()
        .handle(SOURCE_URL, TARGET, RequestFactory::options())
        .await
        .unwrap_err();

    assert!(matches!(err, Error::PackageBlocked { .. }));
}

#[tokio::test]
async fn unknown_target_is_rejected() {
    let ctx = TestContext::new();

    let err = ctx
        .container_task()
        .handle(SOURCE_URL, "no-such-target", RequestFactory::options())
        .await
        .unwrap_err();

    assert_eq!(err.to_string(), "Target `no-such-target` not found");
}

#[tokio::test]
async fn missing_labels_are_reported_before_submission() {
    let dockerfile = DockerfileBuilder::from_image("base")
        .label("com.redhat.component", "foo")
        .label("version", "1")
        .build();
    let ctx = TestContext::with_dockerfile(&dockerfile);

    let err = ctx
        .container_task()
        .handle(SOURCE_URL, TARGET, RequestFactory::options())
        .await
        .unwrap_err();

    assert_eq!(
        err.to_string(),
        "Required LABELs haven't been found in Dockerfile: name (or Name)."
    );
    assert!(ctx.orchestrator.calls().is_empty());
}

#[tokio::test]
async fn oversized_tag_is_rejected() {
    let release = "r".repeat(130);
    let ctx = TestContext::with_dockerfile(&DockerfileBuilder::labelled("foo", "1", &release).build());

    let err = ctx
        .container_task()
        .handle(SOURCE_URL, TARGET, RequestFactory::options())
        .await
        .unwrap_err();

    assert!(matches!(err, Error::TagTooLong { length: 132 }));
}

#[tokio::test]
async fn tag_of_exactly_max_length_is_accepted() {
    // "1-" plus 126 characters of release.
    let release = "r".repeat(126);
    let ctx = TestContext::with_dockerfile(&DockerfileBuilder::labelled("foo", "1", &release).build());

    let result = ctx
        .container_task()
        .handle(SOURCE_URL, TARGET, RequestFactory::options())
        .await;

    assert!(result.is_ok(), "{result:?}");
    assert_eq!(ctx.orchestrator.orchestrator_submissions().len(), 1);
}

#[tokio::test]
async fn tag_one_past_max_length_is_rejected() {
    let release = "r".repeat(127);
    let ctx = TestContext::with_dockerfile(&DockerfileBuilder::labelled("foo", "1", &release).build());

    let err = ctx
        .container_task()
        .handle(SOURCE_URL, TARGET, RequestFactory::options())
        .await
        .unwrap_err();

    assert!(matches!(err, Error::TagTooLong { length: 129 }));
    assert!(ctx.orchestrator.calls().is_empty());
}

#[tokio::test]
async fn hyphenated_additional_tags_are_not_length_checked() {
    let long_hyphenated = format!("extra-{}", "t".repeat(200));
    let ctx = TestContext::new().with_fetcher(
        MemorySourceFetcher::new(DockerfileBuilder::labelled(COMPONENT, "1", "2").build())
            .with_additional_tags(format!("latest\n{long_hyphenated}\n")),
    );

    let result = ctx
        .container_task()
        .handle(SOURCE_URL, TARGET, RequestFactory::options())
        .await;

    assert!(result.is_ok(), "{result:?}");
}

#[tokio::test]
async fn long_additional_tag_is_rejected() {
    let ctx = TestContext::new().with_fetcher(
        MemorySourceFetcher::new(DockerfileBuilder::labelled(COMPONENT, "1", "2").build())
            .with_additional_tags("t".repeat(129)),
    );

    let err = ctx
        .container_task()
        .handle(SOURCE_URL, TARGET, RequestFactory::options())
        .await
        .unwrap_err();

    assert!(matches!(err, Error::TagTooLong { length: 129 }));
}

#[tokio::test]
async fn release_option_overrides_dockerfile_release() {
    let ctx = TestContext::new().with_session(
        session_with_arches("x86_64").with_image_build(99, "foo-1-2", "foo", BuildState::Complete),
    );

    // foo-1-2 exists, but the override makes the expected NVR foo-1-7.
    let result = ctx
        .container_task()
        .handle(SOURCE_URL, TARGET, RequestFactory::isolated("7"))
        .await;

    assert!(result.is_ok(), "{result:?}");
    let submitted = ctx.orchestrator.orchestrator_submissions();
    assert_eq!(submitted[0].release.as_deref(), Some("7"));
    assert!(submitted[0].isolated);
}

#[tokio::test]
async fn flatpak_builds_skip_label_checks() {
    let session = MemorySession::new()
        .with_target(BuildTarget {
            name: TARGET.into(),
            build_tag: BUILD_TAG.into(),
            dest_tag_name: DEST_TAG.into(),
        })
        .with_tag_arches(BUILD_TAG, Some("x86_64"));
    let ctx = TestContext::new()
        .with_session(session)
        .with_fetcher(MemorySourceFetcher::empty());
    let options = BuildOptions {
        flatpak: true,
        ..RequestFactory::options()
    };

    ctx.container_task()
        .handle(SOURCE_URL, TARGET, options)
        .await
        .unwrap();

    assert!(ctx.fetcher.fetched().is_empty());
    assert!(ctx.orchestrator.orchestrator_submissions()[0].common.flatpak);
}

#[tokio::test]
async fn source_outside_allow_list_is_rejected() {
    let ctx = TestContext::new()
        .with_config(|config| config.allowed_scms = vec!["git.other.example.com:*".into()]);

    let err = ctx
        .container_task()
        .handle(SOURCE_URL, TARGET, RequestFactory::options())
        .await
        .unwrap_err();

    assert!(matches!(err, Error::InvalidRequest { .. }));
    assert!(ctx.fetcher.fetched().is_empty());
}

#[tokio::test]
async fn interrupt_while_waiting_cancels_build_once() {
    init_test_logging();
    let ctx = TestContext::new()
        .with_orchestrator(MemoryOrchestrator::new().with_scheduling_blocked());

    let err = ctx
        .container_task()
        .with_interrupt(interrupt_after(Duration::from_millis(20)))
        .handle(SOURCE_URL, TARGET, RequestFactory::options())
        .await
        .unwrap_err();

    assert_cancelled(&err);
    assert_eq!(
        ctx.orchestrator
            .count(|c| matches!(c, OrchestratorCall::Cancel(_))),
        1
    );
    assert_eq!(ctx.session.cancelled_tasks(), [ctx.task_id]);
    assert_eq!(
        ctx.orchestrator
            .count(|c| matches!(c, OrchestratorCall::WaitFinished(_))),
        0
    );
}

#[tokio::test]
async fn build_cancelled_by_orchestrator_is_not_a_failure() {
    let ctx = TestContext::new()
        .with_orchestrator(MemoryOrchestrator::new().with_status(BuildStatus::Cancelled));

    let err = ctx
        .container_task()
        .handle(SOURCE_URL, TARGET, RequestFactory::options())
        .await
        .unwrap_err();

    assert_cancelled(&err);
    assert_eq!(ctx.session.cancelled_tasks(), [ctx.task_id]);
    assert_build_removed(&ctx.orchestrator);
}

#[tokio::test]
async fn orchestrator_cancellation_survives_failed_task_cancel() {
    let ctx = TestContext::new()
        .with_orchestrator(MemoryOrchestrator::new().with_status(BuildStatus::Cancelled))
        .with_session(session_with_arches("x86_64").with_cancel_failure());

    let err = ctx
        .container_task()
        .handle(SOURCE_URL, TARGET, RequestFactory::options())
        .await
        .unwrap_err();

    assert_cancelled(&err);
    assert!(ctx.session.cancelled_tasks().is_empty());
    assert_build_removed(&ctx.orchestrator);
}

#[tokio::test]
async fn failed_build_carries_orchestrator_message() {
    let ctx = TestContext::new().with_orchestrator(
        MemoryOrchestrator::new().with_final_response(
            BuildResponse::new(DEFAULT_BUILD_ID, BuildStatus::Failed)
                .with_error_message("no space left on device"),
        ),
    );

    let err = ctx
        .container_task()
        .handle(SOURCE_URL, TARGET, RequestFactory::options())
        .await
        .unwrap_err();

    assert_container_failed(
        &err,
        "Image build failed. no space left on device. Build id: foo-main-12345",
    );
    assert_build_removed(&ctx.orchestrator);
}

#[tokio::test]
async fn removal_failure_does_not_change_outcome() {
    let ctx = TestContext::new().with_orchestrator(
        MemoryOrchestrator::new()
            .with_final_response(succeeded())
            .with_remove_failure(),
    );

    let result = ctx
        .container_task()
        .handle(SOURCE_URL, TARGET, RequestFactory::options())
        .await;

    assert!(result.is_ok());
}

#[tokio::test]
async fn build_still_running_after_logs_end_is_an_error() {
    let ctx = TestContext::new()
        .with_orchestrator(MemoryOrchestrator::new().with_status(BuildStatus::Running));

    let err = ctx
        .container_task()
        .handle(SOURCE_URL, TARGET, RequestFactory::options())
        .await
        .unwrap_err();

    assert_eq!(
        err.to_string(),
        "Build log finished but build still has not finished: RUNNING."
    );
    assert_eq!(err.fault_code(), Some(kcb_builder::CONTAINER_ERROR_FAULT));
}

#[tokio::test]
async fn skipped_build_uploads_once_and_reports_skip() {
    let ctx = TestContext::new()
        .with_orchestrator(MemoryOrchestrator::new().with_submit(SubmitBehavior::Skip));
    let options = BuildOptions {
        skip_build: true,
        ..RequestFactory::options()
    };

    let result = ctx
        .container_task()
        .handle(SOURCE_URL, TARGET, options)
        .await
        .unwrap();

    assert_eq!(result, TaskResult::skipped());
    assert_eq!(
        ctx.orchestrator
            .count(|c| matches!(c, OrchestratorCall::WaitScheduled(_))),
        0
    );
    assert!(ctx.task_context().results_dir().is_dir());
}

#[tokio::test]
async fn user_warnings_are_returned_and_uploaded() {
    let ctx = TestContext::new().with_orchestrator(
        MemoryOrchestrator::new()
            .with_final_response(succeeded())
            .with_log_attempt(LogScript::entries([
                LogEntry::tagged(
                    "x86_64",
                    r#"2024-05-01 10:00:00 - user_warning - {"message": "base image is deprecated"}"#,
                ),
                LogEntry::tagged("x86_64", "step 1"),
            ])),
    );

    let result = ctx
        .container_task()
        .handle(SOURCE_URL, TARGET, RequestFactory::options())
        .await
        .unwrap();

    assert_eq!(result.user_warnings, ["base image is deprecated"]);
    let upload_path = ctx.upload_path();
    assert_eq!(
        ctx.session
            .uploaded_text(&upload_path, "user_warnings.log")
            .as_deref(),
        Some("\"base image is deprecated\"")
    );
    assert_eq!(
        ctx.session.uploaded_text(&upload_path, "x86_64.log").as_deref(),
        Some("step 1\n")
    );
}

#[tokio::test]
async fn combined_log_is_used_without_demux_support() {
    let ctx = TestContext::new().with_orchestrator(
        MemoryOrchestrator::new()
            .without_demux()
            .with_log_attempt(LogScript::entries([
                LogEntry::untagged("one"),
                LogEntry::untagged("two"),
            ])),
    );

    ctx.container_task()
        .handle(SOURCE_URL, TARGET, RequestFactory::options())
        .await
        .unwrap();

    assert_eq!(
        ctx.session
            .uploaded_text(&ctx.upload_path(), "openshift-incremental.log")
            .as_deref(),
        Some("one\ntwo\n")
    );
    assert_eq!(
        ctx.orchestrator
            .count(|c| matches!(c, OrchestratorCall::OrchestratorLogs(_))),
        0
    );
}

#[tokio::test]
async fn log_stream_reconnects_without_duplicating_lines() {
    let ctx = TestContext::new().with_orchestrator(
        MemoryOrchestrator::new()
            .with_log_attempt(
                LogScript::entries([LogEntry::untagged("a"), LogEntry::untagged("b")])
                    .then_fail("connection reset"),
            )
            .with_log_attempt(LogScript::entries([
                LogEntry::untagged("a"),
                LogEntry::untagged("b"),
                LogEntry::untagged("c"),
            ])),
    );

    ctx.container_task()
        .handle(SOURCE_URL, TARGET, RequestFactory::options())
        .await
        .unwrap();

    assert_eq!(
        ctx.session
            .uploaded_text(&ctx.upload_path(), "orchestrator.log")
            .as_deref(),
        Some("a\nb\nc\n")
    );
}

#[tokio::test]
async fn exhausted_log_retries_do_not_fail_the_task() {
    let failing = || LogScript::entries([LogEntry::untagged("a")]).then_fail("gone");
    let ctx = TestContext::new().with_orchestrator(
        MemoryOrchestrator::new()
            .with_final_response(succeeded())
            .with_log_attempt(failing())
            .with_log_attempt(failing())
            .with_log_attempt(failing()),
    );

    let result = ctx
        .container_task()
        .handle(SOURCE_URL, TARGET, RequestFactory::options())
        .await
        .unwrap();

    assert_eq!(result.koji_builds, ["4242"]);
    assert_eq!(
        ctx.orchestrator
            .count(|c| matches!(c, OrchestratorCall::OrchestratorLogs(_))),
        3
    );
}

#[tokio::test]
async fn metadata_files_are_copied_and_uploaded() {
    let ctx = TestContext::new();
    let source = ctx.koji_work_dir().join("tasks/1234");
    tokio::fs::create_dir_all(&source).await.unwrap();
    tokio::fs::write(source.join("x86_64-metadata.json"), b"{\"a\": 1}")
        .await
        .unwrap();
    let ctx = ctx.with_orchestrator(MemoryOrchestrator::new().with_log_attempt(
        LogScript::entries([LogEntry::tagged(
            METADATA_TAG,
            "tasks/1234/x86_64-metadata.json",
        )]),
    ));

    ctx.container_task()
        .handle(SOURCE_URL, TARGET, RequestFactory::options())
        .await
        .unwrap();

    assert_eq!(
        ctx.session.uploaded(&ctx.upload_path(), "x86_64-metadata.json"),
        Some(b"{\"a\": 1}".to_vec())
    );
}

#[tokio::test]
async fn whitelisted_annotations_are_uploaded() {
    let response = succeeded()
        .with_annotation(
            "koji_task_annotations_whitelist",
            serde_json::json!("[\"remote_source_url\"]"),
        )
        .with_annotation("remote_source_url", serde_json::json!("https://cachito/1"))
        .with_annotation("digests", serde_json::json!("[]"));
    let ctx =
        TestContext::new().with_orchestrator(MemoryOrchestrator::new().with_final_response(response));

    ctx.container_task()
        .handle(SOURCE_URL, TARGET, RequestFactory::options())
        .await
        .unwrap();

    assert_eq!(
        ctx.session
            .uploaded_text(&ctx.upload_path(), "build_annotations.json")
            .as_deref(),
        Some("{\n    \"remote_source_url\": \"https://cachito/1\"\n}")
    );
}

#[tokio::test]
async fn revoked_uploads_stop_the_loop_quietly() {
    let ctx = TestContext::new()
        .with_orchestrator(MemoryOrchestrator::new().with_final_response(succeeded()).with_log_attempt(
            LogScript::entries([LogEntry::untagged("a")]),
        ));
    ctx.session.deny_uploads();

    let result = ctx
        .container_task()
        .handle(SOURCE_URL, TARGET, RequestFactory::options())
        .await
        .unwrap();

    assert_eq!(result.koji_builds, ["4242"]);
    assert!(ctx.session.uploads().is_empty());
}

#[tokio::test]
async fn failed_upload_cancels_and_removes_the_build() {
    let ctx = TestContext::new()
        .with_orchestrator(MemoryOrchestrator::new().with_final_response(succeeded()).with_log_attempt(
            LogScript::entries([LogEntry::untagged("a")]),
        ));
    ctx.session.fail_uploads();

    let err = ctx
        .container_task()
        .handle(SOURCE_URL, TARGET, RequestFactory::options())
        .await
        .unwrap_err();

    assert!(matches!(err, Error::Session(_)), "{err:?}");
    assert_eq!(
        ctx.orchestrator
            .count(|c| matches!(c, OrchestratorCall::Cancel(_))),
        1
    );
    assert_build_removed(&ctx.orchestrator);
    assert_eq!(
        ctx.orchestrator
            .count(|c| matches!(c, OrchestratorCall::WaitFinished(_))),
        0
    );
}

#[tokio::test]
async fn checkout_without_dockerfile_is_an_invalid_request() {
    let ctx = TestContext::new().with_fetcher(MemorySourceFetcher::empty());

    let err = ctx
        .container_task()
        .handle(SOURCE_URL, TARGET, RequestFactory::options())
        .await
        .unwrap_err();

    assert!(matches!(err, Error::InvalidRequest { .. }));
    assert!(err.to_string().starts_with("Dockerfile file missing"));
    assert!(ctx.orchestrator.calls().is_empty());
}
