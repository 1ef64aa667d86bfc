// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

mod common;

use chrono::{Duration as ChronoDuration, Utc};
use common::*;
use std::sync::Arc;
use std::time::Duration;

use saga_coordinator_core::application::{RejectReason, SubmitOutcome};
use saga_coordinator_core::domain::cluster::NodeRole;
use saga_coordinator_core::domain::events::{
    CoordinatorEvent, EventKind, EventType, TransactionEvent,
};
use saga_coordinator_core::domain::journal::EventJournal;
use saga_coordinator_core::domain::transaction::{AbortCause, GlobalTxId, SagaState, TxState};
use saga_coordinator_core::infrastructure::InMemoryEventJournal;

async fn timeout_events(h: &Harness, gid: &str) -> usize {
    h.journal
        .replay(&GlobalTxId::from(gid))
        .await
        .unwrap()
        .iter()
        .filter(|recorded| matches!(recorded.event.kind, EventKind::SagaTimeout))
        .count()
}

#[tokio::test]
async fn test_expired_saga_times_out_exactly_once() {
    let h = Harness::new();
    let mut events = h.event_bus.subscribe();
    h.coordinator.start();

    h.coordinator.submit(saga_started("g-2", 1)).await.unwrap();
    assert!(h.coordinator.timeout_monitor().deadline(&GlobalTxId::from("g-2")).is_some());

    eventually("saga aborted by timeout", || {
        h.live_status("g-2").state == Some(SagaState::Aborted)
    })
    .await;

    let status = h.live_status("g-2");
    assert_eq!(status.abort_cause, Some(AbortCause::TimedOut));
    assert!(status.children.is_empty());
    assert!(h.coordinator.timeout_monitor().is_empty());

    // Later scans, even far in the future, fire nothing more.
    tokio::time::sleep(Duration::from_millis(100)).await;
    let fired = h
        .coordinator
        .timeout_monitor()
        .scan(h.coordinator.registry(), Utc::now() + ChronoDuration::hours(1))
        .await;
    assert_eq!(fired, 0);
    assert_eq!(timeout_events(&h, "g-2").await, 1);

    let mut fired_events = 0;
    while let Ok(event) = events.try_recv() {
        if matches!(event, CoordinatorEvent::TimeoutFired { .. }) {
            fired_events += 1;
        }
    }
    assert_eq!(fired_events, 1);

    h.coordinator.shutdown().await;
}

#[tokio::test]
async fn test_zero_timeout_never_fires() {
    let h = Harness::new();
    h.coordinator.start();

    h.coordinator.submit(saga_started("g-forever", 0)).await.unwrap();
    assert!(h.coordinator.timeout_monitor().deadline(&GlobalTxId::from("g-forever")).is_none());

    tokio::time::sleep(Duration::from_millis(200)).await;
    let fired = h
        .coordinator
        .timeout_monitor()
        .scan(h.coordinator.registry(), Utc::now() + ChronoDuration::days(365))
        .await;

    assert_eq!(fired, 0);
    assert_eq!(h.live_status("g-forever").state, Some(SagaState::Started));
    assert_eq!(timeout_events(&h, "g-forever").await, 0);

    h.coordinator.shutdown().await;
}

#[tokio::test]
async fn test_timeout_compensates_completed_children() {
    let h = Harness::new();

    for event in [
        saga_started("g-slow", 30),
        tx_started("g-slow", "t1"),
        tx_ended("g-slow", "t1"),
        tx_started("g-slow", "t2"),
    ] {
        h.coordinator.submit(event).await.unwrap();
    }

    let fired = h
        .coordinator
        .timeout_monitor()
        .scan(h.coordinator.registry(), Utc::now() + ChronoDuration::seconds(31))
        .await;
    assert_eq!(fired, 1);

    eventually("t1 compensation dispatched", || h.sink.delivered() == vec!["t1"]).await;
    let status = h.live_status("g-slow");
    assert_eq!(status.state, Some(SagaState::Aborting));
    assert_eq!(child_state(&status, "t2"), TxState::Started);

    // The still-running child reports completion late and joins the undo set.
    assert!(h.coordinator.submit(tx_ended("g-slow", "t2")).await.unwrap().is_accepted());
    assert!(h.coordinator.submit(tx_compensated("g-slow", "t1")).await.unwrap().is_accepted());

    eventually("t2 compensation dispatched", || h.sink.delivered() == vec!["t1", "t2"]).await;
    assert!(h.coordinator.submit(tx_compensated("g-slow", "t2")).await.unwrap().is_accepted());
    assert_eq!(h.live_status("g-slow").state, Some(SagaState::Aborted));
}

#[tokio::test]
async fn test_secondary_does_not_fire_timeouts() {
    let h = Harness::build(
        Arc::new(InMemoryEventJournal::new()),
        NodeRole::Secondary,
        fast_settings(),
    );
    h.coordinator.start();

    h.coordinator.submit(saga_started("g-follower", 1)).await.unwrap();
    tokio::time::sleep(Duration::from_millis(1300)).await;

    assert_eq!(h.live_status("g-follower").state, Some(SagaState::Started));
    assert!(h.coordinator.timeout_monitor().deadline(&GlobalTxId::from("g-follower")).is_some());

    h.roles.set_role(NodeRole::Primary);
    eventually("promoted node fires overdue timeout", || {
        h.live_status("g-follower").state == Some(SagaState::Aborted)
    })
    .await;

    h.coordinator.shutdown().await;
}

#[tokio::test]
async fn test_participant_cannot_submit_saga_timeout() {
    let h = Harness::new();
    let mut events = h.event_bus.subscribe();
    h.coordinator.submit(saga_started("g-forged", 30)).await.unwrap();

    let outcome = h
        .coordinator
        .submit(TransactionEvent::saga_timeout(GlobalTxId::from("g-forged")))
        .await
        .unwrap();

    assert_eq!(
        outcome,
        SubmitOutcome::Rejected(RejectReason::CoordinatorOnly(EventType::SagaTimeoutEvent))
    );
    assert_eq!(outcome.label(), "coordinator_only");
    assert_eq!(timeout_events(&h, "g-forged").await, 0);
    assert_eq!(h.live_status("g-forged").state, Some(SagaState::Started));
    assert!(h.coordinator.timeout_monitor().deadline(&GlobalTxId::from("g-forged")).is_some());

    let mut rejected = false;
    while let Ok(event) = events.try_recv() {
        if matches!(event, CoordinatorEvent::EventRejected { .. }) {
            rejected = true;
        }
    }
    assert!(rejected);

    // The monitor still records it through the worker.
    let fired = h
        .coordinator
        .timeout_monitor()
        .scan(h.coordinator.registry(), Utc::now() + ChronoDuration::seconds(31))
        .await;
    assert_eq!(fired, 1);
    assert_eq!(timeout_events(&h, "g-forged").await, 1);
}
