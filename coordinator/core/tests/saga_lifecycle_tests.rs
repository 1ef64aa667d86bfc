// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

mod common;

use chrono::{Duration as ChronoDuration, Utc};
use common::*;
use std::sync::Arc;

use saga_coordinator_core::application::{CoordinatorError, RejectReason, SubmitOutcome};
use saga_coordinator_core::domain::cluster::NodeRole;
use saga_coordinator_core::domain::journal::EventJournal;
use saga_coordinator_core::domain::transaction::{
    AbortCause, GlobalTxId, LocalTxId, SagaState, TransitionError, TxState,
};

#[tokio::test]
async fn test_happy_path_ends_saga_without_compensation() {
    let h = Harness::new();

    for event in [
        saga_started("g-happy", 30),
        tx_started("g-happy", "t1"),
        tx_ended("g-happy", "t1"),
        saga_ended("g-happy"),
    ] {
        assert!(h.coordinator.submit(event).await.unwrap().is_accepted());
    }

    let status = h.status("g-happy").await;
    assert_eq!(status.state, Some(SagaState::Ended));
    assert_eq!(child_state(&status, "t1"), TxState::Ended);
    assert!(status.ended_at.is_some());
    assert!(h.sink.commands().is_empty());
    assert!(h.coordinator.timeout_monitor().deadline(&GlobalTxId::from("g-happy")).is_none());
}

#[tokio::test]
async fn test_abort_compensates_children_in_reverse_completion_order() {
    let h = Harness::new();

    for event in [
        saga_started("g-1", 5),
        tx_started("g-1", "t1"),
        tx_ended("g-1", "t1"),
        tx_started("g-1", "t2"),
        tx_ended("g-1", "t2"),
        saga_aborted("g-1"),
    ] {
        assert!(h.coordinator.submit(event).await.unwrap().is_accepted());
    }

    eventually("t2 compensation dispatched", || h.sink.delivered() == vec!["t2"]).await;
    let status = h.status("g-1").await;
    assert_eq!(status.state, Some(SagaState::Aborting));
    assert_eq!(child_state(&status, "t2"), TxState::Compensating);
    assert_eq!(child_state(&status, "t1"), TxState::Ended);
    assert_eq!(
        status.abort_cause,
        Some(AbortCause::Aborted {
            reason: Some("business failure".into())
        })
    );

    assert!(h.coordinator.submit(tx_compensated("g-1", "t2")).await.unwrap().is_accepted());
    assert_eq!(h.status("g-1").await.state, Some(SagaState::Aborting));

    eventually("t1 compensation dispatched", || h.sink.delivered() == vec!["t2", "t1"]).await;
    assert!(h.coordinator.submit(tx_compensated("g-1", "t1")).await.unwrap().is_accepted());

    let status = h.status("g-1").await;
    assert_eq!(status.state, Some(SagaState::Aborted));
    assert_eq!(child_state(&status, "t1"), TxState::Compensated);
    assert_eq!(child_state(&status, "t2"), TxState::Compensated);

    let commands = h.sink.commands();
    assert_eq!(commands.len(), 2);
    assert_eq!(commands[0].payload.method, "undo-t2");
    assert_eq!(commands[0].attempt, 1);
    assert_eq!(commands[1].local_tx_id, LocalTxId::from("t1"));
}

#[tokio::test]
async fn test_aborted_child_is_not_compensated() {
    let h = Harness::new();

    for event in [
        saga_started("g-partial", 5),
        tx_started("g-partial", "t1"),
        tx_ended("g-partial", "t1"),
        tx_started("g-partial", "t2"),
        tx_aborted("g-partial", "t2"),
        saga_aborted("g-partial"),
    ] {
        assert!(h.coordinator.submit(event).await.unwrap().is_accepted());
    }

    eventually("t1 compensation dispatched", || h.sink.delivered() == vec!["t1"]).await;
    assert!(h.coordinator.submit(tx_compensated("g-partial", "t1")).await.unwrap().is_accepted());

    let status = h.status("g-partial").await;
    assert_eq!(status.state, Some(SagaState::Aborted));
    assert_eq!(child_state(&status, "t2"), TxState::Aborted);
    assert_eq!(h.sink.attempts_for("t2"), 0);
}

#[tokio::test]
async fn test_redelivered_events_are_duplicates() {
    let h = Harness::new();

    let events = [
        saga_started("g-dup", 30),
        tx_started("g-dup", "t1"),
        tx_ended("g-dup", "t1"),
    ];
    for event in events.iter().cloned() {
        assert!(h.coordinator.submit(event).await.unwrap().is_accepted());
    }
    let before = h.status("g-dup").await;

    for event in events.iter().cloned() {
        assert_eq!(h.coordinator.submit(event).await.unwrap(), SubmitOutcome::Duplicate);
    }

    assert_eq!(h.status("g-dup").await, before);
    let journaled = h.journal.replay(&GlobalTxId::from("g-dup")).await.unwrap();
    assert_eq!(journaled.len(), 3);
}

#[tokio::test]
async fn test_distinct_idempotency_keys_are_distinct_events() {
    let h = Harness::new();
    h.coordinator.submit(saga_started("g-keys", 30)).await.unwrap();
    h.coordinator.submit(tx_started("g-keys", "t1")).await.unwrap();

    let first = tx_ended("g-keys", "t1").with_idempotency_key("delivery-1");
    let second = tx_ended("g-keys", "t1").with_idempotency_key("delivery-2");

    assert!(h.coordinator.submit(first).await.unwrap().is_accepted());
    // A different key is a new event and must pass the state machine.
    assert!(matches!(
        h.coordinator.submit(second).await.unwrap(),
        SubmitOutcome::Rejected(RejectReason::IllegalTransition(
            TransitionError::InvalidSubTransition { .. }
        ))
    ));
}

#[tokio::test]
async fn test_tx_ended_without_tx_started_is_rejected() {
    let h = Harness::new();
    h.coordinator.submit(saga_started("g-bad", 30)).await.unwrap();
    let before = h.status("g-bad").await;

    let outcome = h.coordinator.submit(tx_ended("g-bad", "ghost")).await.unwrap();

    assert_eq!(
        outcome,
        SubmitOutcome::Rejected(RejectReason::IllegalTransition(
            TransitionError::UnknownSubTransaction(LocalTxId::from("ghost"))
        ))
    );
    assert_eq!(h.status("g-bad").await, before);
    assert_eq!(h.journal.replay(&GlobalTxId::from("g-bad")).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_event_for_unknown_transaction_is_orphan() {
    let h = Harness::new();

    let outcome = h.coordinator.submit(tx_started("g-unknown", "t1")).await.unwrap();

    assert_eq!(outcome, SubmitOutcome::Rejected(RejectReason::Orphan));
    assert!(h.coordinator.registry().is_empty());
    assert!(h.journal.replay(&GlobalTxId::from("g-unknown")).await.unwrap().is_empty());
    assert!(h
        .coordinator
        .transaction_status(&GlobalTxId::from("g-unknown"))
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn test_second_start_is_rejected() {
    let h = Harness::new();
    h.coordinator.submit(saga_started("g-twice", 30)).await.unwrap();

    let outcome = h
        .coordinator
        .submit(saga_started("g-twice", 60).with_idempotency_key("retry"))
        .await
        .unwrap();

    assert_eq!(
        outcome,
        SubmitOutcome::Rejected(RejectReason::IllegalTransition(
            TransitionError::SagaAlreadyStarted(GlobalTxId::from("g-twice"))
        ))
    );
    assert_eq!(h.status("g-twice").await.timeout_seconds, 30);
}

#[tokio::test]
async fn test_eviction_moves_finished_saga_to_history() {
    let h = Harness::new();
    for event in [saga_started("g-old", 30), saga_ended("g-old")] {
        h.coordinator.submit(event).await.unwrap();
    }
    h.coordinator.submit(saga_started("g-live", 30)).await.unwrap();

    let evicted = h
        .coordinator
        .registry()
        .evict_expired(Utc::now() + ChronoDuration::minutes(5))
        .await
        .unwrap();

    assert_eq!(evicted, 1);
    assert!(h.coordinator.registry().get(&GlobalTxId::from("g-old")).is_none());
    assert!(h.coordinator.registry().get(&GlobalTxId::from("g-live")).is_some());
    // Still answerable from history.
    assert_eq!(h.status("g-old").await.state, Some(SagaState::Ended));

    // Redelivery after eviction is still recognised.
    assert_eq!(
        h.coordinator.submit(saga_ended("g-old")).await.unwrap(),
        SubmitOutcome::Duplicate
    );
    assert_eq!(
        h.coordinator.submit(saga_started("g-old", 30)).await.unwrap(),
        SubmitOutcome::Duplicate
    );
    assert!(matches!(
        h.coordinator
            .submit(saga_started("g-old", 30).with_idempotency_key("again"))
            .await
            .unwrap(),
        SubmitOutcome::Rejected(RejectReason::IllegalTransition(
            TransitionError::SagaAlreadyStarted(_)
        ))
    ));
    assert!(h.coordinator.registry().get(&GlobalTxId::from("g-old")).is_none());
}

#[tokio::test]
async fn test_list_transactions_is_sorted_by_id() {
    let h = Harness::new();
    for gid in ["g-c", "g-a", "g-b"] {
        h.coordinator.submit(saga_started(gid, 0)).await.unwrap();
    }

    let ids: Vec<String> = h
        .coordinator
        .list_transactions()
        .into_iter()
        .map(|s| s.global_tx_id.to_string())
        .collect();

    assert_eq!(ids, vec!["g-a", "g-b", "g-c"]);
}

#[tokio::test]
async fn test_oversized_timeout_never_expires_and_survives_rebuild() {
    let h = Harness::new();
    for gid in ["g-max", "g-huge"] {
        let timeout = if gid == "g-max" { u64::MAX } else { 10_000_000_000_000_000 };
        for event in [saga_started(gid, timeout), tx_started(gid, "t1"), tx_ended(gid, "t1")] {
            assert!(h.coordinator.submit(event).await.unwrap().is_accepted());
        }
        assert!(h.coordinator.timeout_monitor().deadline(&GlobalTxId::from(gid)).is_none());
    }

    let far_future = Utc::now() + ChronoDuration::days(365 * 1000);
    let fired = h
        .coordinator
        .timeout_monitor()
        .scan(h.coordinator.registry(), far_future)
        .await;
    assert_eq!(fired, 0);
    assert_eq!(h.live_status("g-max").state, Some(SagaState::Started));

    let restarted = Harness::build(h.journal.clone(), NodeRole::Primary, fast_settings());
    let summary = restarted.coordinator.rebuild_from_journal().await.unwrap();
    assert_eq!(summary.live, 2);
    assert_eq!(summary.timeouts_armed, 0);

    for gid in ["g-max", "g-huge"] {
        let status = restarted.live_status(gid);
        assert_eq!(status.state, Some(SagaState::Started));
        assert_eq!(child_state(&status, "t1"), TxState::Ended);
    }
    assert!(restarted
        .coordinator
        .submit(saga_ended("g-max"))
        .await
        .unwrap()
        .is_accepted());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_starts_create_exactly_one_transaction() {
    let h = Arc::new(Harness::new());

    let submissions: Vec<_> = (0..16)
        .map(|i| {
            let h = Arc::clone(&h);
            tokio::spawn(async move {
                h.coordinator
                    .submit(saga_started("g-race", 30).with_idempotency_key(format!("start-{}", i)))
                    .await
            })
        })
        .collect();

    let mut accepted = 0;
    for outcome in futures::future::join_all(submissions).await {
        match outcome.unwrap().unwrap() {
            SubmitOutcome::Accepted { .. } => accepted += 1,
            SubmitOutcome::Rejected(RejectReason::IllegalTransition(
                TransitionError::SagaAlreadyStarted(_),
            )) => {}
            other => panic!("unexpected outcome {:?}", other),
        }
    }

    assert_eq!(accepted, 1);
    assert_eq!(h.coordinator.registry().len(), 1);
    assert_eq!(h.live_status("g-race").state, Some(SagaState::Started));
    assert_eq!(h.journal.replay(&GlobalTxId::from("g-race")).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_failed_start_write_leaves_nothing_live_and_can_be_redelivered() {
    let journal = FailingJournal::new();
    let h = Harness::build(journal.clone(), NodeRole::Primary, fast_settings());

    journal.fail_next_appends(1);
    let failed = h.coordinator.submit(saga_started("g-flaky", 30)).await;
    assert!(matches!(failed, Err(CoordinatorError::Journal(_))));
    assert!(h.coordinator.registry().get(&GlobalTxId::from("g-flaky")).is_none());

    let redelivered = h.coordinator.submit(saga_started("g-flaky", 30)).await.unwrap();
    assert!(redelivered.is_accepted());
    assert_eq!(h.live_status("g-flaky").state, Some(SagaState::Started));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_journaled_start_stays_live_after_a_concurrent_failed_write() {
    let journal = FailingJournal::new();
    let h = Arc::new(Harness::build(journal.clone(), NodeRole::Primary, fast_settings()));

    for round in 0..20 {
        let gid = format!("g-retire-{}", round);
        journal.fail_next_appends(1);

        let submissions: Vec<_> = (0..8)
            .map(|i| {
                let h = Arc::clone(&h);
                let event = saga_started(&gid, 30).with_idempotency_key(format!("start-{}", i));
                tokio::spawn(async move { h.coordinator.submit(event).await })
            })
            .collect();

        let mut accepted = 0;
        let mut write_failures = 0;
        for outcome in futures::future::join_all(submissions).await {
            match outcome.unwrap() {
                Ok(SubmitOutcome::Accepted { .. }) => accepted += 1,
                Ok(SubmitOutcome::Rejected(RejectReason::IllegalTransition(
                    TransitionError::SagaAlreadyStarted(_),
                ))) => {}
                Err(CoordinatorError::Journal(_)) => write_failures += 1,
                other => panic!("unexpected outcome {:?}", other),
            }
        }

        assert_eq!(write_failures, 1, "round {}", round);
        assert_eq!(accepted, 1, "round {}", round);
        assert_eq!(h.journal.replay(&GlobalTxId::from(gid.as_str())).await.unwrap().len(), 1);
        assert_eq!(
            h.live_status(&gid).state,
            Some(SagaState::Started),
            "journaled saga must stay live in round {}",
            round
        );
    }
}
