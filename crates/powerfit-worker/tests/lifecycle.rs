//! Install, activation and generation eviction.

mod common;

use common::{config, drain_events, url, worker, worker_with, ScriptedSite};
use powerfit_net::Request;
use powerfit_worker::{InstallOutcome, InstallRetryConfig, VersionState, WorkerError, WorkerEvent};
use serde_json::json;

#[tokio::test]
async fn install_fails_when_any_asset_is_unreachable() {
    let site = ScriptedSite::with_shell();
    site.remove("/manifest.json");
    let (worker, mut rx) = worker(site);

    let err = worker.install().await.unwrap_err();

    assert!(matches!(err, WorkerError::Install { .. }));
    assert_eq!(worker.active_generation().await, None);
    assert!(worker.caches().keys().await.is_empty());
    assert!(drain_events(&mut rx)
        .iter()
        .any(|e| matches!(e, WorkerEvent::Error { context, .. } if context == "install")));
}

#[tokio::test]
async fn install_fails_on_network_error() {
    let site = ScriptedSite::with_shell();
    site.fail_next("/script.js", 1);
    let (worker, _rx) = worker(site);

    assert!(worker.install().await.is_err());
    assert_eq!(worker.active_generation().await, None);
}

#[tokio::test]
async fn install_retry_policy_recovers_from_flaky_asset() {
    let site = ScriptedSite::with_shell();
    site.fail_next("/styles.css", 2);
    let mut config = config();
    config.install_retry = InstallRetryConfig {
        max_attempts: 3,
        initial_delay_ms: 1,
        max_delay_ms: 2,
    };
    let (worker, _rx) = worker_with(config, site.clone());

    let outcome = worker.install().await.unwrap();

    assert!(matches!(outcome, InstallOutcome::Activated { .. }));
    assert_eq!(site.calls_for("/styles.css"), 3);
}

#[tokio::test]
async fn missing_asset_is_not_retried() {
    let site = ScriptedSite::with_shell();
    site.remove("/manifest.json");
    let mut config = config();
    config.install_retry = InstallRetryConfig {
        max_attempts: 3,
        initial_delay_ms: 1,
        max_delay_ms: 2,
    };
    let (worker, _rx) = worker_with(config, site.clone());

    assert!(worker.install().await.is_err());
    assert_eq!(site.calls_for("/manifest.json"), 1);
}

#[tokio::test]
async fn exactly_one_generation_survives_each_cycle() {
    let site = ScriptedSite::with_shell();
    let (worker, mut rx) = worker(site);
    let manifest = worker.config().shell_manifest.clone();

    worker.install().await.unwrap();
    for generation in ["powerfit-gym-v2", "powerfit-gym-v3", "powerfit-gym-v4"] {
        worker.install_version(generation, &manifest).await.unwrap();
        assert_eq!(worker.activate().await.unwrap().as_deref(), Some(generation));
        assert_eq!(worker.caches().keys().await, vec![generation.to_string()]);
    }

    let evicted: Vec<String> = drain_events(&mut rx)
        .into_iter()
        .filter_map(|e| match e {
            WorkerEvent::CacheEvicted { generation } => Some(generation),
            _ => None,
        })
        .collect();
    assert_eq!(
        evicted,
        vec!["powerfit-gym-v1", "powerfit-gym-v2", "powerfit-gym-v3"]
    );
}

#[tokio::test]
async fn update_waits_until_skip_waiting_message() {
    let site = ScriptedSite::with_shell();
    let (worker, _rx) = worker(site);
    let manifest = worker.config().shell_manifest.clone();
    worker.install().await.unwrap();

    let outcome = worker.install_version("powerfit-gym-v2", &manifest).await.unwrap();
    assert!(matches!(outcome, InstallOutcome::Waiting { .. }));
    assert_eq!(
        worker.lifecycle().waiting_version().await.unwrap().state,
        VersionState::Installed
    );
    assert_eq!(worker.active_generation().await.as_deref(), Some("powerfit-gym-v1"));

    // Unknown messages change nothing.
    assert_eq!(worker.message(&json!({ "type": "PING" })).await.unwrap(), None);
    assert_eq!(worker.active_generation().await.as_deref(), Some("powerfit-gym-v1"));

    let activated = worker.message(&json!({ "type": "SKIP_WAITING" })).await.unwrap();
    assert_eq!(activated.as_deref(), Some("powerfit-gym-v2"));
    assert_eq!(worker.caches().keys().await, vec!["powerfit-gym-v2".to_string()]);
}

#[tokio::test]
async fn failed_update_keeps_serving_previous_generation() {
    let site = ScriptedSite::with_shell();
    let (worker, _rx) = worker(site.clone());
    worker.install().await.unwrap();

    site.set_online(false);
    let err = worker
        .install_version("powerfit-gym-v2", &worker.config().shell_manifest.clone())
        .await
        .unwrap_err();
    assert!(matches!(err, WorkerError::Install { ref generation, .. } if generation == "powerfit-gym-v2"));

    assert_eq!(worker.active_generation().await.as_deref(), Some("powerfit-gym-v1"));
    assert_eq!(worker.caches().keys().await, vec!["powerfit-gym-v1".to_string()]);
    let page = worker.fetch(Request::navigate(url("/"))).await.unwrap();
    assert_eq!(page.body().as_ref(), b"shell:/");
}

#[tokio::test]
async fn offline_request_after_install_returns_cached_bytes() {
    let site = ScriptedSite::with_shell();
    site.serve("/a", 200, b"payload-a\x00\xff");
    site.serve("/b", 200, b"payload-b");
    let (worker, _rx) = worker(site.clone());

    worker
        .install_version("powerfit-gym-v1", &["/a".to_string(), "/b".to_string()])
        .await
        .unwrap();
    site.set_online(false);
    let calls = site.total_calls();

    let response = worker.fetch(Request::get(url("/a"))).await.unwrap();

    assert!(response.from_cache());
    assert_eq!(response.body().as_ref(), b"payload-a\x00\xff");
    assert_eq!(site.total_calls(), calls);
}

#[tokio::test]
async fn state_changes_are_reported() {
    let site = ScriptedSite::with_shell();
    let (worker, mut rx) = worker(site);
    worker.install().await.unwrap();

    let states: Vec<VersionState> = drain_events(&mut rx)
        .into_iter()
        .filter_map(|e| match e {
            WorkerEvent::StateChange { new_state, .. } => Some(new_state),
            _ => None,
        })
        .collect();
    assert_eq!(
        states,
        vec![
            VersionState::Installing,
            VersionState::Installed,
            VersionState::Activating,
            VersionState::Activated
        ]
    );
}
