// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Coordinator metrics, recorded through the `metrics` facade.
//!
//! Nothing is exported unless the host process installs a recorder (the CLI
//! installs the Prometheus exporter when `observability.metrics.enabled`).

use ::metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};

use crate::domain::transaction::SagaState;

pub const SAGAS_STARTED: &str = "saga_coordinator_sagas_started_total";
pub const SAGAS_FINISHED: &str = "saga_coordinator_sagas_finished_total";
pub const SAGA_DURATION: &str = "saga_coordinator_saga_duration_seconds";
pub const EVENTS: &str = "saga_coordinator_events_total";
pub const COMPENSATIONS_DISPATCHED: &str = "saga_coordinator_compensations_dispatched_total";
pub const COMPENSATION_FAILURES: &str = "saga_coordinator_compensation_failures_total";
pub const COMPENSATIONS_EXHAUSTED: &str = "saga_coordinator_compensations_exhausted_total";
pub const TIMEOUTS_FIRED: &str = "saga_coordinator_timeouts_fired_total";
pub const LIVE_TRANSACTIONS: &str = "saga_coordinator_live_transactions";

/// Register descriptions with the installed recorder.
pub fn describe_metrics() {
    describe_counter!(SAGAS_STARTED, "Sagas that entered STARTED");
    describe_counter!(SAGAS_FINISHED, "Sagas that reached a terminal state, by state");
    describe_histogram!(SAGA_DURATION, "Time from saga start to terminal state in seconds");
    describe_counter!(EVENTS, "Submitted participant events, by outcome");
    describe_counter!(COMPENSATIONS_DISPATCHED, "Compensation commands handed to participants");
    describe_counter!(
        COMPENSATION_FAILURES,
        "Compensation attempts that failed to send or were not acknowledged in time"
    );
    describe_counter!(
        COMPENSATIONS_EXHAUSTED,
        "Sub-transactions marked COMPENSATION_FAILED after the retry ceiling"
    );
    describe_counter!(TIMEOUTS_FIRED, "Synthetic SagaTimeoutEvents journaled");
    describe_gauge!(LIVE_TRANSACTIONS, "Transactions currently held by the registry");
}

pub(crate) fn record_event(outcome: &'static str) {
    counter!(EVENTS, "outcome" => outcome).increment(1);
}

pub(crate) fn record_saga_started() {
    counter!(SAGAS_STARTED).increment(1);
}

pub(crate) fn record_saga_finished(state: SagaState, duration_seconds: Option<f64>) {
    let label = match state {
        SagaState::Ended => "ended",
        SagaState::Aborted => "aborted",
        SagaState::Started => "started",
        SagaState::Aborting => "aborting",
    };
    counter!(SAGAS_FINISHED, "state" => label).increment(1);
    if let Some(seconds) = duration_seconds {
        histogram!(SAGA_DURATION).record(seconds);
    }
}

pub(crate) fn record_compensation_dispatched() {
    counter!(COMPENSATIONS_DISPATCHED).increment(1);
}

pub(crate) fn record_compensation_failure() {
    counter!(COMPENSATION_FAILURES).increment(1);
}

pub(crate) fn record_compensation_exhausted() {
    counter!(COMPENSATIONS_EXHAUSTED).increment(1);
}

pub(crate) fn record_timeout_fired() {
    counter!(TIMEOUTS_FIRED).increment(1);
}

pub(crate) fn set_live_transactions(count: usize) {
    gauge!(LIVE_TRANSACTIONS).set(count as f64);
}
