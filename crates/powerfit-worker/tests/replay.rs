//! Background replay, periodic refresh and notifications.

mod common;

use common::{drain_events, url, worker, ScriptedSite};
use powerfit_net::Request;
use powerfit_outbox::PendingSubmission;
use powerfit_worker::{
    ClickOutcome, NotificationClick, PeriodicSyncEvent, PushEvent, SyncEvent, SyncOutcome,
    WorkerEvent, ACTION_EXPLORE,
};

#[tokio::test]
async fn drain_returns_records_in_order_then_nothing() {
    let (worker, _rx) = worker(ScriptedSite::with_shell());
    let a = PendingSubmission::from_pairs([("name", "Ana"), ("goal", "strength")]);
    let b = PendingSubmission::from_pairs([("name", "Ben"), ("goal", "cardio")]);

    worker.queue_submission(a.clone()).await.unwrap();
    worker.queue_submission(b.clone()).await.unwrap();

    assert_eq!(worker.outbox().drain_all().unwrap(), vec![a, b]);
    assert!(worker.outbox().is_empty().unwrap());
    assert!(worker.outbox().drain_all().unwrap().is_empty());
}

#[tokio::test]
async fn contact_form_sync_replays_everything_once() {
    let (worker, mut rx) = worker(ScriptedSite::with_shell());
    for name in ["Ana", "Ben", "Cleo"] {
        worker
            .queue_submission(PendingSubmission::from_pairs([("name", name)]))
            .await
            .unwrap();
    }

    let first = worker.sync(SyncEvent::new("contact-form")).await.unwrap();
    let second = worker.sync(SyncEvent::new("contact-form")).await.unwrap();

    assert_eq!(first, SyncOutcome::Replayed(3));
    assert_eq!(second, SyncOutcome::Replayed(0));
    assert!(drain_events(&mut rx).contains(&WorkerEvent::SyncCompleted {
        tag: "contact-form".to_string(),
        replayed: 3
    }));
}

#[tokio::test]
async fn periodic_sync_refreshes_the_shell() {
    let site = ScriptedSite::with_shell();
    let (worker, _rx) = worker(site.clone());
    worker.install().await.unwrap();

    site.serve("/script.js", 200, b"script v2");
    let outcome = worker
        .periodic_sync(PeriodicSyncEvent::new("update-content"))
        .await
        .unwrap();
    assert_eq!(outcome, SyncOutcome::Refreshed("powerfit-gym-v1".to_string()));

    site.set_online(false);
    let script = worker.fetch(Request::get(url("/script.js"))).await.unwrap();
    assert_eq!(script.body().as_ref(), b"script v2");
}

#[tokio::test]
async fn failed_refresh_keeps_old_assets_and_is_reported() {
    let site = ScriptedSite::with_shell();
    let (worker, mut rx) = worker(site.clone());
    worker.install().await.unwrap();
    drain_events(&mut rx);

    site.serve("/script.js", 200, b"script v2");
    site.remove("/manifest.json");
    assert!(worker
        .periodic_sync(PeriodicSyncEvent::new("update-content"))
        .await
        .is_err());

    let script = worker.fetch(Request::get(url("/script.js"))).await.unwrap();
    assert_eq!(script.body().as_ref(), b"shell:/script.js");
    assert!(drain_events(&mut rx)
        .iter()
        .any(|e| matches!(e, WorkerEvent::Error { context, .. } if context == "periodicsync")));
}

#[tokio::test]
async fn push_then_explore_opens_root_window() {
    let (worker, mut rx) = worker(ScriptedSite::with_shell());

    let intent = worker.push(PushEvent::empty()).await.unwrap();
    assert_eq!(intent.body, "New update from PowerFit Gym!");

    let outcome = worker
        .notification_click(NotificationClick {
            tag: intent.tag.clone(),
            action: Some(ACTION_EXPLORE.to_string()),
        })
        .await
        .unwrap();

    let ClickOutcome::Opened { client_id } = outcome else {
        panic!("expected a new window");
    };
    let clients = worker.clients().read().await;
    assert_eq!(clients.get(&client_id).unwrap().url, url("/"));

    let events = drain_events(&mut rx);
    assert!(events.contains(&WorkerEvent::NotificationClosed {
        tag: intent.tag,
        action: Some("explore".to_string()),
    }));
    assert!(events
        .iter()
        .any(|e| matches!(e, WorkerEvent::WindowOpened { .. })));
}

#[tokio::test]
async fn dismissal_opens_nothing() {
    let (worker, _rx) = worker(ScriptedSite::with_shell());
    let intent = worker.push(PushEvent::text("Pool closed today")).await.unwrap();

    let outcome = worker
        .notification_click(NotificationClick {
            tag: intent.tag,
            action: None,
        })
        .await
        .unwrap();

    assert_eq!(outcome, ClickOutcome::Closed);
    assert!(worker.clients().read().await.is_empty());
}
