mod common;

use common::{quick_options, RecordingChannel, Stores};
use std::collections::BTreeSet;
use std::time::Duration;
use summary_relay::delivery::{DeliveryError, DeliveryOutcome, DeliveryTracker};
use summary_relay::model::{Destination, Item};
use summary_relay::summary::StructuredSummary;

const TG: Destination = Destination::Telegram;
const TW: Destination = Destination::Twitter;

fn posted(stores: &Stores, id: &str) -> BTreeSet<Destination> {
    stores.queue.record(id).unwrap().posted_to
}

#[tokio::test]
async fn unreachable_destination_does_not_block_completion() {
    let stores = Stores::new();
    stores.seed_completed(&["v1", "v2"]);

    let telegram = RecordingChannel::new(TG);
    let twitter = RecordingChannel::unreachable(TW, DeliveryError::Transport("connection refused".into()));
    let mut tracker = DeliveryTracker::new(
        &stores.queue,
        &stores.artifacts,
        &stores.activity,
        vec![telegram.shared(), twitter.shared()],
        quick_options(vec![TG, TW]),
    );
    let report = tracker.run().await.unwrap();

    assert_eq!(report.items.len(), 2);
    for item in &report.items {
        assert!(item.fully_delivered, "{} should count as delivered", item.id);
        assert!(matches!(item.outcomes[1], (TW, DeliveryOutcome::Skipped { .. })));
    }
    assert_eq!(telegram.sent().await.len(), 2);
    assert!(twitter.sent().await.is_empty());

    let record = stores.queue.record("v1").unwrap();
    assert_eq!(record.posted_to, BTreeSet::from([TG]));
    assert!(record.posted_at.is_some());
    assert_eq!(record.failed_deliveries.get(&TW), Some(&1));

    // Next cycle: twitter is back; telegram must not be attempted again.
    let telegram = RecordingChannel::new(TG);
    let twitter = RecordingChannel::new(TW);
    let mut tracker = DeliveryTracker::new(
        &stores.queue,
        &stores.artifacts,
        &stores.activity,
        vec![telegram.shared(), twitter.shared()],
        quick_options(vec![TG, TW]),
    );
    let report = tracker.run().await.unwrap();

    assert_eq!(report.delivered(), 2);
    assert!(telegram.sent().await.is_empty());
    assert_eq!(twitter.sent().await.len(), 2);
    assert_eq!(posted(&stores, "v1"), BTreeSet::from([TG, TW]));
    assert!(stores.queue.record("v2").unwrap().failed_deliveries.is_empty());

    // Nothing left to do.
    let tracker = DeliveryTracker::new(
        &stores.queue,
        &stores.artifacts,
        &stores.activity,
        vec![telegram.shared(), twitter.shared()],
        quick_options(vec![TG, TW]),
    );
    assert!(tracker.pending_deliveries().unwrap().is_empty());
}

#[tokio::test]
async fn unavailable_destination_does_not_delay_the_next_one() {
    let stores = Stores::new();
    stores.seed_completed(&["a", "b"]);

    let twitter = RecordingChannel::unreachable(TW, DeliveryError::NoTargets);
    let telegram = RecordingChannel::new(TG);
    let mut options = quick_options(vec![TW, TG]);
    options.destination_pause = Duration::from_secs(3600);
    let mut tracker = DeliveryTracker::new(
        &stores.queue,
        &stores.artifacts,
        &stores.activity,
        vec![twitter.shared(), telegram.shared()],
        options,
    );
    let report = tokio::time::timeout(Duration::from_secs(30), tracker.run())
        .await
        .expect("no pause before the only real send")
        .unwrap();

    assert_eq!(report.delivered(), 2);
    assert_eq!(telegram.sent().await.len(), 2);
    assert!(twitter.sent().await.is_empty());
}

#[tokio::test]
async fn zero_successes_leave_item_pending() {
    let stores = Stores::new();
    stores.seed_completed(&["a", "b"]);

    let telegram = RecordingChannel::new(TG).with_responses(vec![
        Err(DeliveryError::Rejected("chat not found".into())),
        Err(DeliveryError::Rejected("chat not found".into())),
    ]);
    let mut tracker = DeliveryTracker::new(
        &stores.queue,
        &stores.artifacts,
        &stores.activity,
        vec![telegram.shared()],
        quick_options(vec![TG]),
    );
    let report = tracker.run().await.unwrap();

    // Rejections are not retried.
    assert_eq!(telegram.sent().await.len(), 2);
    assert_eq!(report.failures(), 2);
    assert!(report.items.iter().all(|i| !i.fully_delivered));
    let record = stores.queue.record("a").unwrap();
    assert!(record.posted_to.is_empty());
    assert!(record.posted_at.is_none());
    assert_eq!(tracker.pending_deliveries().unwrap().len(), 2);
    assert!(!stores.activity.current().errors.is_empty());
}

#[tokio::test]
async fn authentication_failure_disables_destination_for_the_cycle() {
    let stores = Stores::new();
    stores.seed_completed(&["a", "b", "c"]);

    let telegram = RecordingChannel::new(TG);
    let twitter = RecordingChannel::new(TW).with_responses(vec![Err(DeliveryError::Unauthorized("token expired".into()))]);
    let mut tracker = DeliveryTracker::new(
        &stores.queue,
        &stores.artifacts,
        &stores.activity,
        vec![telegram.shared(), twitter.shared()],
        quick_options(vec![TG, TW]),
    );
    let report = tracker.run().await.unwrap();

    // One attempt, no retry, and the other items never reach twitter.
    assert_eq!(twitter.sent().await.len(), 1);
    assert_eq!(telegram.sent().await.len(), 3);
    assert!(matches!(report.items[0].outcomes[1], (TW, DeliveryOutcome::Failed { .. })));
    assert!(matches!(report.items[1].outcomes[1], (TW, DeliveryOutcome::Skipped { .. })));
    assert!(matches!(report.items[2].outcomes[1], (TW, DeliveryOutcome::Skipped { .. })));
    for id in ["a", "b", "c"] {
        assert_eq!(posted(&stores, id), BTreeSet::from([TG]));
    }
    assert_eq!(twitter.finished().await, 1);
}

#[tokio::test]
async fn transport_errors_are_retried() {
    let stores = Stores::new();
    stores.seed_completed(&["a", "b"]);

    let telegram = RecordingChannel::new(TG).with_responses(vec![Err(DeliveryError::Transport("timeout".into()))]);
    let mut tracker = DeliveryTracker::new(
        &stores.queue,
        &stores.artifacts,
        &stores.activity,
        vec![telegram.shared()],
        quick_options(vec![TG]),
    );
    let report = tracker.run().await.unwrap();

    assert_eq!(telegram.sent().await.len(), 3);
    assert_eq!(report.delivered(), 2);
    assert_eq!(report.failures(), 0);
}

#[tokio::test]
async fn dry_run_records_mock_deliveries() {
    let stores = Stores::new();
    stores.seed_completed(&["a", "b"]);

    let telegram = RecordingChannel::unreachable(TG, DeliveryError::Unauthorized("bad token".into()));
    let mut options = quick_options(vec![TG]);
    options.dry_run = true;
    let mut tracker = DeliveryTracker::new(
        &stores.queue,
        &stores.artifacts,
        &stores.activity,
        vec![telegram.shared()],
        options,
    );
    let report = tracker.run().await.unwrap();

    assert!(telegram.sent().await.is_empty());
    assert_eq!(telegram.finished().await, 0);
    for item in &report.items {
        match &item.outcomes[0] {
            (TG, DeliveryOutcome::Delivered { confirmation }) => assert!(confirmation.starts_with("dry-run-")),
            other => panic!("unexpected outcome {:?}", other),
        }
    }
    assert_eq!(posted(&stores, "a"), BTreeSet::from([TG]));
    let log = stores.activity.current();
    assert_eq!(log.posted.get("telegram").map(|s| s.len()), Some(2));
}

#[tokio::test]
async fn force_resends_everything() {
    let stores = Stores::new();
    stores.seed_completed(&["a", "b"]);
    stores.queue.mark_posted(&["a".to_string()], TG).unwrap();

    let telegram = RecordingChannel::new(TG);
    let tracker = DeliveryTracker::new(
        &stores.queue,
        &stores.artifacts,
        &stores.activity,
        vec![telegram.shared()],
        quick_options(vec![TG]),
    );
    assert_eq!(tracker.pending_deliveries().unwrap().len(), 1);

    let mut options = quick_options(vec![TG]);
    options.force = true;
    let mut tracker = DeliveryTracker::new(
        &stores.queue,
        &stores.artifacts,
        &stores.activity,
        vec![telegram.shared()],
        options,
    );
    tracker.run().await.unwrap();
    assert_eq!(telegram.sent().await.len(), 2);
    assert_eq!(posted(&stores, "a"), BTreeSet::from([TG]));
}

#[tokio::test]
async fn destination_is_abandoned_after_repeated_failures() {
    let stores = Stores::new();
    stores.seed_completed(&["a", "b"]);

    let mut options = quick_options(vec![TG, TW]);
    options.abandon_after = 2;
    for _ in 0..2 {
        let telegram = RecordingChannel::new(TG);
        let twitter = RecordingChannel::unreachable(TW, DeliveryError::NoTargets);
        let mut tracker = DeliveryTracker::new(
            &stores.queue,
            &stores.artifacts,
            &stores.activity,
            vec![telegram.shared(), twitter.shared()],
            options.clone(),
        );
        tracker.run().await.unwrap();
    }

    let record = stores.queue.record("a").unwrap();
    assert_eq!(record.failed_deliveries.get(&TW), Some(&2));
    let twitter = RecordingChannel::new(TW);
    let tracker = DeliveryTracker::new(
        &stores.queue,
        &stores.artifacts,
        &stores.activity,
        vec![twitter.shared()],
        options,
    );
    assert!(tracker.needed(&record).is_empty());
    assert!(tracker.pending_deliveries().unwrap().is_empty());
}

#[tokio::test]
async fn only_completed_items_are_delivered() {
    let stores = Stores::new();
    stores.seed_completed(&["a", "b"]);
    for id in ["c", "d"] {
        stores
            .queue
            .enqueue(Item::new(id, "Pending", "Show"))
            .unwrap();
    }
    let batch = stores.queue.next_batch().unwrap();
    stores.queue.mark_failed(&batch.ids()).unwrap();
    // A stray artifact for a failed item must not be delivered.
    let mut stray = StructuredSummary::from_value(common::summary_json("Stray")).unwrap();
    stray.attach("c", &[]);
    stores.artifacts.save("c", "Show", &stray).unwrap();

    let telegram = RecordingChannel::new(TG);
    let tracker = DeliveryTracker::new(
        &stores.queue,
        &stores.artifacts,
        &stores.activity,
        vec![telegram.shared()],
        quick_options(vec![TG]),
    );
    let ids: Vec<String> = tracker
        .pending_deliveries()
        .unwrap()
        .into_iter()
        .map(|(a, _)| a.id)
        .collect();
    assert_eq!(ids, vec!["a", "b"]);
}
