//! Capability surface tests for `SyncContext`
//!
//! Drives the editor-facing methods directly, without the event queue.

mod common;

use bundlesync::{SyncConfig, SyncContext, SyncError};
use bundlesync_core::analysis::{EditDelta, LineCount, Severity, TextPosition, TextRange};
use bundlesync_core::testing::{MemoryTransport, TransportCall};
use bundlesync_core::types::{BundleId, RemoteBundle, SyncOutcome};
use bundlesync_core::ErrorKind;
use common::{create_test_env, create_test_project, main_js, sample_results};
use std::path::PathBuf;
use std::sync::Arc;

#[tokio::test]
async fn test_workspace_list_then_bundle() {
    let env = create_test_env().await;
    let project = create_test_project();
    let root = project.path().to_path_buf();

    env.context.create_workspaces_list(&[root.clone()]).await;
    assert_eq!(env.context.workspace_roots().len(), 1);
    assert!(env.context.check_if_hashes_bundles_is_empty(Some(&root)));
    assert!(env.transport.calls().is_empty());

    let outcomes = env.context.update_hashes_bundles(None, false).await;
    assert_eq!(outcomes.len(), 1);
    assert!(matches!(outcomes[0].1, SyncOutcome::Synced { created: true, .. }));
    assert!(!env.context.check_if_hashes_bundles_is_empty(Some(&root)));
    assert!(!env.context.check_if_remote_bundles_is_empty(None));

    env.context.settle().await.unwrap();
    assert_eq!(env.context.create_review_results().len(), 1);
}

#[tokio::test]
async fn test_workspace_list_drops_missing_roots() {
    let env = create_test_env().await;
    let first = create_test_project();
    let second = create_test_project();

    env.context
        .create_workspaces_list(&[first.path().to_path_buf(), second.path().to_path_buf()])
        .await;
    env.context.update_hashes_bundles(None, false).await;
    env.context.settle().await.unwrap();
    assert_eq!(env.transport.bundle_count(), 2);

    env.context
        .create_workspaces_list(&[second.path().to_path_buf()])
        .await;

    let roots: Vec<PathBuf> = env
        .context
        .workspace_roots()
        .into_iter()
        .map(|r| r.path)
        .collect();
    assert_eq!(roots, vec![second.path().to_path_buf()]);
    assert!(env.context.check_if_remote_bundles_is_empty(Some(first.path())));
    assert!(env.context.check_if_hashes_bundles_is_empty(Some(first.path())));
    assert_eq!(env.transport.bundle_count(), 1);
}

#[tokio::test]
async fn test_current_workspace_must_be_registered() {
    let env = create_test_env().await;
    let project = create_test_project();

    let unknown = env
        .context
        .update_current_workspace_path(project.path())
        .unwrap_err();
    assert_eq!(unknown.kind(), ErrorKind::NotFound);

    env.context.change_workspace_list(project.path(), false);
    env.context
        .update_current_workspace_path(project.path())
        .unwrap();
    assert!(env.context.workspace_roots()[0].active);

    env.context.change_workspace_list(project.path(), true);
    assert!(env.context.workspace_roots().is_empty());
}

#[tokio::test]
async fn test_remove_hashes_bundles() {
    let env = create_test_env().await;
    let project = create_test_project();

    env.context.change_workspace_list(project.path(), false);
    env.context
        .update_hashes_bundles(Some(project.path()), false)
        .await;
    assert!(!env.context.check_if_hashes_bundles_is_empty(None));

    let outcomes = env.context.update_hashes_bundles(None, true).await;
    assert!(outcomes.is_empty());
    assert!(env.context.check_if_hashes_bundles_is_empty(None));
}

#[tokio::test]
async fn test_adopt_and_drop_remote_bundle() {
    let env = create_test_env().await;
    let project = create_test_project();
    env.context.change_workspace_list(project.path(), false);

    let adopted = RemoteBundle {
        bundle_id: BundleId::new("external-1"),
        missing_files: Vec::new(),
    };
    env.context
        .update_extension_remote_bundles(project.path(), Some(adopted))
        .await
        .unwrap();
    assert!(!env.context.check_if_remote_bundles_is_empty(Some(project.path())));
    assert_eq!(env.context.start_analysis(), 1);
    env.context.settle().await.unwrap();
    assert!(env.transport.calls().contains(&TransportCall::Analysis {
        bundle_id: BundleId::new("external-1")
    }));

    // The memory transport never created this bundle, so the delete fails
    let dropped = env
        .context
        .update_extension_remote_bundles(project.path(), None)
        .await;
    assert!(dropped.is_err_and(|e| e.is_sync_failure()));
    assert!(env.context.check_if_remote_bundles_is_empty(Some(project.path())));
}

#[tokio::test]
async fn test_severity_toggle_keeps_positions() {
    let env = create_test_env().await;
    let project = create_test_project();
    let file = main_js(project.path());

    env.context
        .update_analysis_results_collection(sample_results(), project.path());
    assert_eq!(env.context.create_review_results()[&file].len(), 2);

    env.context
        .configure_issues_display_by_severity(Severity::INFO, true);
    let visible = env.context.create_review_results();
    assert_eq!(visible[&file].len(), 1);
    assert_eq!(visible[&file][0].suggestion.severity, Severity::WARNING);

    env.context
        .configure_issues_display_by_severity(Severity::INFO, false);
    assert_eq!(env.context.create_review_results()[&file].len(), 2);
}

#[tokio::test]
async fn test_replaced_line_turns_stale() {
    let env = create_test_env().await;
    let project = create_test_project();
    let file = main_js(project.path());
    env.context
        .update_analysis_results_collection(sample_results(), project.path());

    let edit = EditDelta::new(&file, LineCount { current: 4, prev_offset: 4 }).with_change(
        TextRange::new(TextPosition::new(10, 0), TextPosition::new(11, 0)),
        "let x = 1;\n",
    );
    let stats = env.context.update_review_results_positions(&edit).unwrap();
    assert_eq!(stats.staled, 1);

    let visible = env.context.create_review_results();
    assert_eq!(visible[&file].len(), 1);
    assert_eq!(visible[&file][0].position.rows, vec![3, 3]);

    // An edit below every issue leaves rows alone
    let below = EditDelta::new(&file, LineCount { current: 6, prev_offset: 4 }).with_change(
        TextRange::new(TextPosition::new(15, 0), TextPosition::new(15, 0)),
        "\n\n",
    );
    env.context.update_review_results_positions(&below).unwrap();
    assert_eq!(
        env.context.create_review_results()[&file][0].position.rows,
        vec![3, 3]
    );
}

#[tokio::test]
async fn test_find_and_remove_review_results() {
    let env = create_test_env().await;
    let project = create_test_project();
    let file = main_js(project.path());
    env.context
        .update_analysis_results_collection(sample_results(), project.path());

    assert_eq!(
        env.context.find_suggestion_id("Zero is never returned", &file),
        Some("js/NoZeroReturned".to_string())
    );
    assert_eq!(
        env.context.find_suggestion_id("js/UnusedImport", &file),
        Some("js/UnusedImport".to_string())
    );
    assert_eq!(env.context.find_suggestion_id("No such thing", &file), None);

    assert!(env.context.remove_review_results(project.path()));
    assert!(env.context.create_review_results().is_empty());
    assert_eq!(env.context.find_suggestion_id("Unused import", &file), None);
}

#[tokio::test]
async fn test_deactivate_deletes_every_remote_bundle() {
    let env = create_test_env().await;
    let first = create_test_project();
    let second = create_test_project();

    env.context
        .create_workspaces_list(&[first.path().to_path_buf(), second.path().to_path_buf()])
        .await;
    env.context.update_hashes_bundles(None, false).await;
    env.context.settle().await.unwrap();
    assert_eq!(env.transport.bundle_count(), 2);

    env.context.deactivate().await.unwrap();
    assert_eq!(env.transport.bundle_count(), 0);
}

#[tokio::test]
async fn test_deactivate_reports_first_teardown_failure() {
    let env = create_test_env().await;
    let project = create_test_project();

    env.context.change_workspace_list(project.path(), false);
    env.context.update_hashes_bundles(None, false).await;
    env.context.settle().await.unwrap();

    env.transport.set_fail_deletes(true);
    let err = env.context.deactivate().await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::SyncFailure);
}

#[tokio::test]
async fn test_activate_rejects_invalid_config() {
    let mut config = SyncConfig::default();
    config.remote.request_timeout_ms = 0;

    let result = SyncContext::activate(config, Arc::new(MemoryTransport::new())).await;
    assert!(matches!(result, Err(SyncError::Config(_))));
}
