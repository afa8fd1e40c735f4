//! Integration tests for unloading, shared-fate families and rollback.

mod helpers;

use std::sync::atomic::Ordering;
use std::time::Duration;

use helpers::{InitBehavior, TestHost};
use modhost_plugin::failure::FailureCount;
use modhost_plugin::{LoadOutcome, PluginState, UnloadOutcome};

async fn load_family(host: &TestHost, children: &[&str]) {
    host.register_plugin("foo", InitBehavior::Ok);
    let foo = host.write_simple("foo", None);
    assert_eq!(host.manager.load(&foo).await, LoadOutcome::Success);
    for child in children {
        host.register_plugin(child, InitBehavior::Ok);
        let path = host.write_simple(child, Some("foo"));
        assert_eq!(host.manager.load(&path).await, LoadOutcome::Success);
    }
}

#[tokio::test]
async fn test_unloading_child_takes_parent_down() {
    let host = TestHost::new().await;
    load_family(&host, &["bar"]).await;

    assert_eq!(host.manager.unload("bar").await, UnloadOutcome::Removed);

    assert!(host.manager.list_plugins().await.is_empty());
    let bar = host.journal.position("destroyed:bar").unwrap();
    let foo = host.journal.position("destroyed:foo").unwrap();
    assert!(bar < foo);
    assert_eq!(host.journal.count("destroyed:bar"), 1);
    assert_eq!(host.journal.count("destroyed:foo"), 1);

    let notified = host.journal.position("child-destroyed:foo:bar").unwrap();
    assert!(notified < host.journal.position("destroy:foo").unwrap());
    assert!(!host.path("foo").exists());
    assert!(!host.path("bar").exists());
}

#[tokio::test]
async fn test_unloading_parent_unloads_children_first() {
    let host = TestHost::new().await;
    load_family(&host, &["bar", "baz"]).await;

    assert_eq!(host.manager.unload("FOO").await, UnloadOutcome::Removed);

    assert!(host.manager.list_plugins().await.is_empty());
    let foo = host.journal.position("destroy:foo").unwrap();
    assert!(host.journal.position("destroy:bar").unwrap() < foo);
    assert!(host.journal.position("destroy:baz").unwrap() < foo);
    assert_eq!(host.journal.count("destroyed:foo"), 1);
    assert_eq!(host.manager.state_of("foo").await, PluginState::Unloaded);
    host.manager.check_consistency().await.unwrap();
}

#[tokio::test]
async fn test_unload_unknown_is_noop() {
    let host = TestHost::new().await;

    assert_eq!(host.manager.unload("ghost").await, UnloadOutcome::Removed);
    assert_eq!(host.manager.unload("ghost").await, UnloadOutcome::Removed);
    assert!(host.journal.entries().is_empty());
}

#[tokio::test]
async fn test_unload_unknown_clears_suppression() {
    let host = TestHost::new().await;
    let calls = host.register_failing("qux");
    let path = host.write_simple("qux", None);
    for _ in 0..5 {
        assert_eq!(host.manager.load(&path).await, LoadOutcome::TransientFailure);
    }
    assert_eq!(
        host.manager.failure_count("qux").await,
        Some(FailureCount::Transient(5))
    );

    assert_eq!(host.manager.unload("QUX").await, UnloadOutcome::Removed);
    assert_eq!(host.manager.failure_count("qux").await, None);
    assert_eq!(host.manager.state_of("qux").await, PluginState::Unloaded);

    assert_eq!(host.manager.load(&path).await, LoadOutcome::TransientFailure);
    assert_eq!(calls.load(Ordering::SeqCst), 6);
}

#[tokio::test]
async fn test_unload_unknown_clears_permanent_failure() {
    let host = TestHost::new().await;
    let path = host.path("broken");
    std::fs::create_dir_all(&path).unwrap();
    assert_eq!(host.manager.load(&path).await, LoadOutcome::PermanentFailure);
    assert_eq!(host.manager.load(&path).await, LoadOutcome::PermanentFailure);

    assert_eq!(host.manager.unload("broken").await, UnloadOutcome::Removed);
    assert_eq!(host.manager.failure_count("broken").await, None);

    host.register_plugin("broken", InitBehavior::Ok);
    host.write_simple("broken", None);
    assert_eq!(host.manager.load(&path).await, LoadOutcome::Success);
}

#[tokio::test]
async fn test_unload_clears_failures() {
    let host = TestHost::new().await;
    host.register_plugin("bar", InitBehavior::Ok);
    let bar = host.write_simple("bar", Some("foo"));
    assert_eq!(host.manager.load(&bar).await, LoadOutcome::TransientFailure);

    load_family(&host, &[]).await;
    assert_eq!(host.manager.load(&bar).await, LoadOutcome::Success);
    assert_eq!(host.manager.unload("bar").await, UnloadOutcome::Removed);
    assert_eq!(host.manager.failure_count("bar").await, None);
}

#[tokio::test]
async fn test_reclamation_failure_rolls_back() {
    let host = TestHost::new().await;
    let plugin = host.register_shared_plugin("foo", InitBehavior::RetainContext);
    let path = host.write_simple("foo", None);
    assert_eq!(host.manager.load(&path).await, LoadOutcome::Success);

    assert_eq!(host.manager.unload("foo").await, UnloadOutcome::StillActive);

    assert!(host.manager.get_plugin("foo").await.is_some());
    assert_eq!(host.manager.state_of("foo").await, PluginState::Loaded);
    assert!(path.exists());
    let ctx = host.manager.get_isolation_context("foo").await.unwrap();
    assert!(!ctx.is_released());
    assert_eq!(ctx.members().len(), 1);
    drop(ctx);
    assert_eq!(host.journal.count("destroyed:foo"), 0);

    plugin.release();
    assert_eq!(host.manager.unload("foo").await, UnloadOutcome::Removed);
    assert!(host.manager.get_plugin("foo").await.is_none());
    assert!(!path.exists());
}

#[tokio::test]
async fn test_child_still_active_aborts_parent_unload() {
    let host = TestHost::new().await;
    load_family(&host, &["bar", "baz"]).await;
    host.reclaimer.block("baz");

    assert_eq!(host.manager.unload("foo").await, UnloadOutcome::StillActive);

    assert!(host.manager.get_plugin("foo").await.is_some());
    assert!(host.manager.get_plugin("baz").await.is_some());
    assert!(host.manager.get_plugin("bar").await.is_none());
    let children: Vec<String> = host
        .manager
        .children_of("foo")
        .await
        .iter()
        .map(|c| c.folded())
        .collect();
    assert_eq!(children, vec!["baz".to_string()]);
    assert_eq!(host.manager.parent_of("baz").await.map(|p| p.folded()), Some("foo".into()));
    host.manager.check_consistency().await.unwrap();

    host.reclaimer.unblock("baz");
    assert_eq!(host.manager.unload("foo").await, UnloadOutcome::Removed);
    assert!(host.manager.list_plugins().await.is_empty());
    host.manager.check_consistency().await.unwrap();
}

#[tokio::test]
async fn test_parent_rollback_after_child_removed() {
    let host = TestHost::new().await;
    host.register_plugin("foo", InitBehavior::Ok);
    let child = host.register_shared_plugin("bar", InitBehavior::RetainContext);
    let foo = host.write_simple("foo", None);
    let bar = host.write_simple("bar", Some("foo"));
    assert_eq!(host.manager.load(&foo).await, LoadOutcome::Success);
    assert_eq!(host.manager.load(&bar).await, LoadOutcome::Success);

    // The child still holds the shared context, so the parent cannot be reclaimed.
    assert_eq!(host.manager.unload("bar").await, UnloadOutcome::Removed);
    assert!(host.manager.get_plugin("bar").await.is_none());
    assert!(host.manager.get_plugin("foo").await.is_some());
    assert!(host.manager.children_of("foo").await.is_empty());
    host.manager.check_consistency().await.unwrap();

    child.release();
    assert_eq!(host.manager.unload("foo").await, UnloadOutcome::Removed);
    assert!(host.manager.list_plugins().await.is_empty());
}

#[tokio::test]
async fn test_spawn_unload_runs_in_background() {
    let host = TestHost::new().await;
    load_family(&host, &["bar"]).await;

    let task = host.manager.spawn_unload("foo");
    assert_eq!(task.await.unwrap(), UnloadOutcome::Removed);
    assert!(host.manager.list_plugins().await.is_empty());
}

#[tokio::test]
async fn test_shutdown_cuts_reclamation_wait_short() {
    let host = TestHost::with_settings(|s| {
        s.initial_reclaim_wait = Duration::from_secs(60);
        s.reclaim_retry_interval = Duration::from_secs(60);
    })
    .await;
    load_family(&host, &[]).await;

    let task = host.manager.spawn_unload("foo");
    tokio::time::sleep(Duration::from_millis(50)).await;
    host.manager.shutdown().await;

    let outcome = tokio::time::timeout(Duration::from_secs(5), task)
        .await
        .expect("unload did not observe shutdown")
        .unwrap();
    assert_eq!(outcome, UnloadOutcome::Removed);
    assert!(host.manager.list_plugins().await.is_empty());
}

#[tokio::test]
async fn test_shutdown_abandons_unreclaimable_plugin_as_removed() {
    let host = TestHost::with_settings(|s| {
        s.initial_reclaim_wait = Duration::from_secs(60);
        s.reclaim_retry_interval = Duration::from_secs(60);
    })
    .await;
    load_family(&host, &[]).await;
    host.reclaimer.block("foo");

    let task = host.manager.spawn_unload("foo");
    tokio::time::sleep(Duration::from_millis(50)).await;
    host.manager.shutdown().await;

    let outcome = tokio::time::timeout(Duration::from_secs(5), task)
        .await
        .expect("unload did not observe shutdown")
        .unwrap();
    assert_eq!(outcome, UnloadOutcome::Removed);
    assert_eq!(host.journal.count("destroy:foo"), 1);
    assert_eq!(host.journal.count("destroyed:foo"), 1);
    assert!(host.manager.get_plugin("foo").await.is_none());
    assert_eq!(host.manager.state_of("foo").await, PluginState::Unloaded);
    host.manager.check_consistency().await.unwrap();
}
