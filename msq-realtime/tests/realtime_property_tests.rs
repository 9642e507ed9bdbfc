//! Subscription manager behaviour against an in-memory change feed.

use msq_cache::{query_key, QueryCache};
use msq_core::{Table, ToastAction, ToastLevel};
use msq_realtime::{
    invalidations_for, EventRouter, RealtimeConfig, SubscriptionManager, SubscriptionStatus,
};
use msq_test_utils::assertions::{assert_fresh, assert_stale};
use msq_test_utils::fixtures::{boq_status_change, change_request_row};
use msq_test_utils::generators::arb_change_event;
use msq_test_utils::{ChangeEvent, ChangeKind, MockChangeFeed, RecordingToastSink};
use proptest::prelude::*;
use serde_json::json;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

struct Harness {
    feed: Arc<MockChangeFeed>,
    toasts: Arc<RecordingToastSink>,
    cache: QueryCache,
    manager: SubscriptionManager,
}

fn harness() -> Harness {
    let feed = Arc::new(MockChangeFeed::new());
    let toasts = Arc::new(RecordingToastSink::new());
    let cache = QueryCache::default();
    let manager = SubscriptionManager::new(
        feed.clone(),
        cache.clone(),
        toasts.clone(),
        RealtimeConfig::default(),
    );
    Harness {
        feed,
        toasts,
        cache,
        manager,
    }
}

async fn wait_for_status(manager: &SubscriptionManager, table: Table, wanted: SubscriptionStatus) {
    let mut status = manager.watch_status(table).expect("table is subscribed");
    status.wait_for(|s| *s == wanted).await.expect("status channel open");
}

/// Let spawned channel tasks drain their queues.
async fn settle() {
    tokio::time::sleep(Duration::from_millis(10)).await;
}

#[tokio::test(start_paused = true)]
async fn test_boq_approval_invalidates_views_and_toasts_once() {
    let h = harness();
    let watched = [
        query_key!["boqs"],
        query_key!["boq", 42],
        query_key!["td_boqs", "pending"],
        query_key!["pm_boqs"],
        query_key!["estimator_boqs"],
    ];
    for key in &watched {
        h.cache.set_query_data(key.clone(), json!([]));
    }
    h.cache.set_query_data(query_key!["boq", 7], json!({}));
    h.cache.set_query_data(query_key!["vendors"], json!([]));

    h.manager.subscribe(Table::Boqs).unwrap();
    wait_for_status(&h.manager, Table::Boqs, SubscriptionStatus::Subscribed).await;

    let event = boq_status_change(42, "Pending_TD_Approval", "Approved");
    assert!(h.feed.emit(event.clone()));
    assert!(h.feed.emit(event));
    settle().await;

    for key in &watched {
        assert_stale(&h.cache, key);
    }
    assert_fresh(&h.cache, &query_key!["boq", 7]);
    assert_fresh(&h.cache, &query_key!["vendors"]);

    let toasts = h.toasts.toasts();
    assert_eq!(toasts.len(), 1);
    assert_eq!(toasts[0].level, ToastLevel::Success);
    assert_eq!(toasts[0].description.as_deref(), Some("BOQ 42"));
}

#[tokio::test(start_paused = true)]
async fn test_change_request_event_touches_parent_boq() {
    let h = harness();
    h.cache.set_query_data(query_key!["boq", 9], json!({}));
    h.cache.set_query_data(query_key!["purchases"], json!([]));
    h.cache.set_query_data(query_key!["change_request", 3], json!({}));

    h.manager.subscribe(Table::ChangeRequests).unwrap();
    wait_for_status(&h.manager, Table::ChangeRequests, SubscriptionStatus::Subscribed).await;

    h.feed.emit(
        ChangeEvent::new(Table::ChangeRequests, ChangeKind::Update)
            .with_new(change_request_row(3, 9, "approved_by_td"))
            .with_old(change_request_row(3, 9, "pending")),
    );
    settle().await;

    assert_stale(&h.cache, &query_key!["boq", 9]);
    assert_stale(&h.cache, &query_key!["purchases"]);
    assert_stale(&h.cache, &query_key!["change_request", 3]);
    assert_eq!(h.toasts.messages(), vec!["Change request approved".to_string()]);
}

#[tokio::test(start_paused = true)]
async fn test_exhausted_retries_ask_for_manual_refresh() {
    let h = harness();
    h.feed.set_always_fail(true);

    h.manager.subscribe(Table::Vendors).unwrap();
    wait_for_status(&h.manager, Table::Vendors, SubscriptionStatus::Failed).await;
    settle().await;

    assert_eq!(h.feed.open_count(Table::Vendors), 4);
    assert_eq!(h.toasts.count(), 1);
    assert_eq!(h.toasts.count_id("realtime-failed:vendors"), 1);
    assert_eq!(h.toasts.toasts()[0].action, Some(ToastAction::Refresh));

    // Waiting longer never produces a second warning.
    tokio::time::sleep(Duration::from_secs(120)).await;
    assert_eq!(h.toasts.count(), 1);
    assert_eq!(h.manager.failed_tables(), vec![Table::Vendors]);

    h.feed.set_always_fail(false);
    h.manager.resubscribe(Table::Vendors).unwrap();
    wait_for_status(&h.manager, Table::Vendors, SubscriptionStatus::Subscribed).await;
    assert!(h.manager.failed_tables().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_dropped_channel_is_reopened_after_delay() {
    let h = harness();
    h.manager.subscribe(Table::Purchases).unwrap();
    wait_for_status(&h.manager, Table::Purchases, SubscriptionStatus::Subscribed).await;

    assert!(h.feed.close(Table::Purchases, "server restart"));
    wait_for_status(
        &h.manager,
        Table::Purchases,
        SubscriptionStatus::Retrying { attempt: 1 },
    )
    .await;
    assert_eq!(h.feed.open_count(Table::Purchases), 1);

    tokio::time::sleep(Duration::from_secs(5)).await;
    wait_for_status(&h.manager, Table::Purchases, SubscriptionStatus::Subscribed).await;
    assert_eq!(h.feed.open_count(Table::Purchases), 2);
    assert_eq!(h.toasts.count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_recovered_channel_resets_retry_budget() {
    let h = harness();
    h.feed.fail_opens(Table::Boqs, 2);
    h.manager.subscribe(Table::Boqs).unwrap();
    wait_for_status(&h.manager, Table::Boqs, SubscriptionStatus::Subscribed).await;
    assert_eq!(h.feed.open_count(Table::Boqs), 3);

    // Two more failures would exhaust the budget had it not been reset.
    h.feed.fail_opens(Table::Boqs, 2);
    h.feed.close(Table::Boqs, "blip");
    wait_for_status(
        &h.manager,
        Table::Boqs,
        SubscriptionStatus::Retrying { attempt: 1 },
    )
    .await;
    wait_for_status(&h.manager, Table::Boqs, SubscriptionStatus::Subscribed).await;
    assert_eq!(h.feed.open_count(Table::Boqs), 6);
    assert_eq!(h.toasts.count(), 0);
}

#[tokio::test]
async fn test_unsubscribe_stops_delivery() {
    let h = harness();
    h.cache.set_query_data(query_key!["vendors"], json!([]));
    h.manager.subscribe(Table::Vendors).unwrap();
    wait_for_status(&h.manager, Table::Vendors, SubscriptionStatus::Subscribed).await;

    assert!(h.manager.unsubscribe(Table::Vendors));
    settle().await;
    assert!(!h.feed.is_open(Table::Vendors));
    assert_fresh(&h.cache, &query_key!["vendors"]);
}

proptest! {
    #[test]
    fn prop_each_status_transition_toasts_at_most_once(
        events in prop::collection::vec(arb_change_event(), 1..40)
    ) {
        let mut router = EventRouter::default();
        let mut shown = HashSet::new();
        for event in events.iter().chain(events.iter()) {
            if let Some(toast) = router.route(event).toast {
                let id = toast.id.expect("routed toasts carry their dedup id");
                prop_assert!(shown.insert(id), "toast shown twice");
            }
        }
    }

    #[test]
    fn prop_every_event_invalidates_its_table_lists(event in arb_change_event()) {
        let matchers = invalidations_for(&event);
        let list = match event.table {
            Table::Boqs => query_key!["boqs"],
            Table::BoqItems => query_key!["boq_items"],
            Table::Purchases => query_key!["purchases"],
            Table::ChangeRequests => query_key!["change_requests"],
            Table::Vendors => query_key!["vendors"],
            Table::VendorDeliveryInspections => query_key!["inspections"],
            Table::VendorReturnRequests => query_key!["return_requests"],
            Table::Notifications => query_key!["notifications"],
        };
        prop_assert!(matchers.iter().any(|m| m.matches(&list)));
    }
}
