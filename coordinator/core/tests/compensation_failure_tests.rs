// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

mod common;

use common::*;

use saga_coordinator_core::application::CoordinatorError;
use saga_coordinator_core::domain::events::{
    CompensationPayload, CoordinatorEvent, EventKind, TransactionEvent,
};
use saga_coordinator_core::domain::transaction::{GlobalTxId, LocalTxId, SagaState, TxState};

async fn aborted_saga_with_two_children(h: &Harness, gid: &str) {
    for event in [
        saga_started(gid, 30),
        tx_started(gid, "t1"),
        tx_ended(gid, "t1"),
        tx_started(gid, "t2"),
        tx_ended(gid, "t2"),
        saga_aborted(gid),
    ] {
        assert!(h.coordinator.submit(event).await.unwrap().is_accepted());
    }
}

#[tokio::test]
async fn test_exhausted_child_is_flagged_while_others_compensate() {
    let h = Harness::new();
    h.sink.make_unreachable("t2");
    let mut events = h.event_bus.subscribe();

    aborted_saga_with_two_children(&h, "g-3").await;

    eventually("t1 dispatched after t2 exhausted", || h.sink.delivered() == vec!["t1"]).await;
    assert_eq!(h.sink.attempts_for("t2"), 3);

    let status = h.live_status("g-3");
    assert_eq!(child_state(&status, "t2"), TxState::CompensationFailed);
    assert_eq!(status.failed_compensations, vec![LocalTxId::from("t2")]);

    assert!(h.coordinator.submit(tx_compensated("g-3", "t1")).await.unwrap().is_accepted());

    let status = h.live_status("g-3");
    assert_eq!(child_state(&status, "t1"), TxState::Compensated);
    assert_eq!(status.state, Some(SagaState::Aborting));
    assert!(status.ended_at.is_none());

    let mut exhausted = Vec::new();
    while let Ok(event) = events.try_recv() {
        if let CoordinatorEvent::CompensationExhausted {
            local_tx_id, attempts, ..
        } = event
        {
            exhausted.push((local_tx_id, attempts));
        }
    }
    assert_eq!(exhausted, vec![(LocalTxId::from("t2"), 3)]);
}

#[tokio::test]
async fn test_operator_retry_finishes_the_abort() {
    let h = Harness::new();
    h.sink.make_unreachable("t2");
    aborted_saga_with_two_children(&h, "g-retry").await;

    eventually("t1 dispatched", || h.sink.delivered() == vec!["t1"]).await;
    h.coordinator.submit(tx_compensated("g-retry", "t1")).await.unwrap();

    h.sink.make_reachable("t2");
    let reset = h
        .coordinator
        .retry_failed_compensations(&GlobalTxId::from("g-retry"))
        .await
        .unwrap();
    assert_eq!(reset, 1);

    eventually("t2 redispatched", || h.sink.delivered() == vec!["t1", "t2"]).await;
    let status = h.live_status("g-retry");
    assert_eq!(child_state(&status, "t2"), TxState::Compensating);
    assert!(status.failed_compensations.is_empty());

    h.coordinator.submit(tx_compensated("g-retry", "t2")).await.unwrap();
    assert_eq!(h.live_status("g-retry").state, Some(SagaState::Aborted));

    // Nothing left to retry.
    assert_eq!(
        h.coordinator
            .retry_failed_compensations(&GlobalTxId::from("g-retry"))
            .await
            .unwrap(),
        0
    );
}

#[tokio::test]
async fn test_late_acknowledgement_after_exhaustion_still_counts() {
    let h = Harness::new();
    h.sink.make_unreachable("t1");
    for event in [
        saga_started("g-late", 30),
        tx_started("g-late", "t1"),
        tx_ended("g-late", "t1"),
        saga_aborted("g-late"),
    ] {
        h.coordinator.submit(event).await.unwrap();
    }

    eventually("t1 exhausted", || {
        child_state(&h.live_status("g-late"), "t1") == TxState::CompensationFailed
    })
    .await;

    // The participant undid its work anyway and says so.
    assert!(h.coordinator.submit(tx_compensated("g-late", "t1")).await.unwrap().is_accepted());
    assert_eq!(h.live_status("g-late").state, Some(SagaState::Aborted));
}

#[tokio::test]
async fn test_per_child_retry_ceiling_overrides_default() {
    let h = Harness::new();
    h.sink.make_unreachable("fragile");

    h.coordinator.submit(saga_started("g-override", 30)).await.unwrap();
    let started = TransactionEvent::new(
        GlobalTxId::from("g-override"),
        participant(),
        EventKind::TxStarted {
            local_tx_id: LocalTxId::from("fragile"),
            parent_tx_id: None,
            compensation: CompensationPayload::new("undo-fragile", serde_json::Value::Null),
            reverse_retries: Some(1),
            retry_delay_ms: Some(1),
        },
    );
    h.coordinator.submit(started).await.unwrap();
    h.coordinator.submit(tx_ended("g-override", "fragile")).await.unwrap();
    h.coordinator.submit(saga_aborted("g-override")).await.unwrap();

    eventually("fragile exhausted", || {
        child_state(&h.live_status("g-override"), "fragile") == TxState::CompensationFailed
    })
    .await;
    assert_eq!(h.sink.attempts_for("fragile"), 1);
}

#[tokio::test]
async fn test_retry_for_unknown_transaction_is_not_found() {
    let h = Harness::new();

    let result = h
        .coordinator
        .retry_failed_compensations(&GlobalTxId::from("nope"))
        .await;

    assert!(matches!(result, Err(CoordinatorError::NotFound(_))));
}
