//! Loop-level tests for full run lifecycle scenarios.
//!
//! These tests drive `LifecycleController::run` against a scripted actuator on
//! a paused tokio clock, so intervals and confirmation timeouts elapse
//! instantly and deterministically.

use std::time::Duration;

use popbot::core::types::{Phase, StopReason};
use popbot::exit_codes;
use popbot::io::config::TargetConfig;
use popbot::io::stats_store::StatsStore;
use popbot::lifecycle::{LifecycleController, StopSender, request_stop, stop_channel};
use popbot::test_support::{ActuatorProbe, ScriptedActuator, ScriptedBatch, run_config};

struct Harness {
    controller: LifecycleController<ScriptedActuator>,
    probe: ActuatorProbe,
    stop_tx: StopSender,
}

fn harness(script: Vec<ScriptedBatch>, batch_size: u64, max_total: Option<u64>) -> Harness {
    harness_with(ScriptedActuator::new(script), batch_size, max_total, StatsStore::disabled())
}

fn harness_with(
    (actuator, probe): (ScriptedActuator, ActuatorProbe),
    batch_size: u64,
    max_total: Option<u64>,
    stats: StatsStore,
) -> Harness {
    let (stop_tx, stop_rx) = stop_channel();
    let controller = LifecycleController::new(
        run_config(batch_size, max_total),
        TargetConfig::default(),
        stats,
        actuator,
        stop_rx,
    );
    Harness {
        controller,
        probe,
        stop_tx,
    }
}

fn sigint() -> StopReason {
    StopReason::Signal {
        name: "SIGINT".to_string(),
    }
}

/// Ceiling smaller than one batch: the only batch is clamped to 100 clicks.
#[tokio::test(start_paused = true)]
async fn final_batch_is_clamped_to_the_ceiling() {
    let mut h = harness(Vec::new(), 800, Some(100));

    let summary = h.controller.run().await;

    assert_eq!(h.probe.batch_sizes(), vec![100]);
    assert_eq!(summary.total_sent, 100);
    assert_eq!(summary.reason, StopReason::CeilingReached { max_total: 100 });
    assert_eq!(summary.exit_code(), exit_codes::OK);
    assert_eq!(h.probe.closes(), 1);
}

/// Batches of 800 against a 2000 ceiling: 800, 800, then the remaining 400.
#[tokio::test(start_paused = true)]
async fn run_stops_exactly_at_the_ceiling() {
    let mut h = harness(Vec::new(), 800, Some(2_000));

    let summary = h.controller.run().await;

    assert_eq!(h.probe.batch_sizes(), vec![800, 800, 400]);
    assert_eq!(summary.total_sent, 2_000);
    assert_eq!(summary.succeeded, 2_000);
    assert_eq!(summary.failed, 0);
    assert_eq!(h.controller.phase(), Phase::Stopped);
}

/// Batches are spaced by the configured interval, starting immediately.
#[tokio::test(start_paused = true)]
async fn batches_are_spaced_by_the_interval() {
    let mut h = harness(Vec::new(), 800, Some(2_400));
    let started = tokio::time::Instant::now();

    let summary = h.controller.run().await;

    // Three batches, two 30 s gaps between them, no wait after the last one.
    assert_eq!(h.probe.batch_sizes().len(), 3);
    assert_eq!(started.elapsed(), Duration::from_secs(60));
    assert_eq!(summary.elapsed, Duration::from_secs(60));
}

/// A closed session stops the run within the tick that saw it.
#[tokio::test(start_paused = true)]
async fn actuator_closed_stops_without_further_batches() {
    let mut h = harness(
        vec![
            ScriptedBatch::Confirm,
            ScriptedBatch::Fail("Protocol error: Target closed.".to_string()),
            ScriptedBatch::Confirm,
        ],
        800,
        None,
    );

    let summary = h.controller.run().await;

    assert_eq!(h.probe.batch_sizes(), vec![800, 800]);
    assert!(matches!(summary.reason, StopReason::SessionClosed { .. }));
    assert_eq!(summary.total_sent, 800);
    assert_eq!(summary.failed, 800);
    assert_eq!(summary.exit_code(), exit_codes::OK);
    assert_eq!(h.probe.closes(), 1);
}

/// Transient failures are counted and retried on the next natural tick.
#[tokio::test(start_paused = true)]
async fn transient_failures_do_not_stop_the_run() {
    let mut h = harness(
        vec![
            ScriptedBatch::Fail("net::ERR_CONNECTION_RESET".to_string()),
            ScriptedBatch::Hang,
            ScriptedBatch::Confirm,
        ],
        800,
        Some(800),
    );

    let summary = h.controller.run().await;

    assert_eq!(h.probe.batch_sizes(), vec![800, 800, 800]);
    assert_eq!(summary.total_sent, 800);
    assert_eq!(summary.failed, 1_600);
    assert_eq!(summary.reason, StopReason::CeilingReached { max_total: 800 });
}

/// A flagged session stops with the dedicated reason and sends nothing more.
#[tokio::test(start_paused = true)]
async fn blocked_session_stops_the_run() {
    let mut h = harness(
        vec![ScriptedBatch::Confirm, ScriptedBatch::Flagged],
        800,
        None,
    );

    let summary = h.controller.run().await;

    assert_eq!(summary.reason, StopReason::Blocked);
    assert_eq!(h.probe.batch_sizes(), vec![800]);
    assert_eq!(summary.total_sent, 800);
    assert_eq!(h.probe.closes(), 1);
}

/// An interrupt during an in-flight batch lets the batch finish first.
#[tokio::test(start_paused = true)]
async fn signal_during_batch_waits_for_its_outcome() {
    let mut h = harness(
        vec![ScriptedBatch::ConfirmAfter(Duration::from_secs(3))],
        800,
        None,
    );
    let stop_tx = h.stop_tx.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(1)).await;
        request_stop(&stop_tx, sigint());
    });

    let summary = h.controller.run().await;

    assert_eq!(summary.reason, sigint());
    assert_eq!(h.probe.batch_sizes(), vec![800]);
    assert_eq!(summary.total_sent, 800);
    assert_eq!(summary.elapsed, Duration::from_secs(3));
    assert_eq!(h.probe.closes(), 1);
}

/// An interrupt while waiting for the next tick stops right away.
#[tokio::test(start_paused = true)]
async fn signal_between_batches_cancels_the_schedule() {
    let mut h = harness(Vec::new(), 800, None);
    let stop_tx = h.stop_tx.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(45)).await;
        request_stop(&stop_tx, sigint());
    });

    let summary = h.controller.run().await;

    // Batches at 0 s and 30 s; the 60 s tick never starts.
    assert_eq!(h.probe.batch_sizes(), vec![800, 800]);
    assert_eq!(summary.elapsed, Duration::from_secs(45));
    assert_eq!(summary.exit_code(), exit_codes::OK);
}

/// A stop requested before the loop starts sends no batch at all.
#[tokio::test(start_paused = true)]
async fn stop_before_start_sends_nothing() {
    let mut h = harness(Vec::new(), 800, None);
    request_stop(&h.stop_tx, sigint());

    let summary = h.controller.run().await;

    assert_eq!(summary.reason, sigint());
    assert!(h.probe.batch_sizes().is_empty());
    assert_eq!(h.probe.closes(), 1);
}

/// Shutdown is idempotent: a second call neither re-closes nor changes totals.
#[tokio::test(start_paused = true)]
async fn repeated_shutdown_releases_the_actuator_once() {
    let mut h = harness(Vec::new(), 800, Some(800));

    let first = h.controller.run().await;
    let second = h.controller.shutdown(sigint()).await;
    let third = h.controller.shutdown(StopReason::Blocked).await;

    assert_eq!(h.probe.closes(), 1);
    assert_eq!(first, second);
    assert_eq!(second, third);
}

/// A panicking batch routes through shutdown and exits non-zero.
#[tokio::test(start_paused = true)]
async fn panicking_batch_is_fatal_but_still_releases() {
    let mut h = harness(
        vec![ScriptedBatch::Confirm, ScriptedBatch::Panic],
        800,
        None,
    );

    let summary = h.controller.run().await;

    assert!(summary.reason.is_fatal());
    assert_eq!(summary.exit_code(), exit_codes::FATAL);
    assert_eq!(summary.total_sent, 800);
    assert_eq!(h.probe.closes(), 1);
}

/// Setup failure is fatal, sends nothing, and still releases the session.
#[tokio::test(start_paused = true)]
async fn setup_failure_is_fatal() {
    let mut h = harness_with(
        ScriptedActuator::failing_setup("net::ERR_NAME_NOT_RESOLVED"),
        800,
        None,
        StatsStore::disabled(),
    );

    let summary = h.controller.run().await;

    assert!(
        matches!(&summary.reason, StopReason::Fatal { message } if message.contains("ERR_NAME_NOT_RESOLVED"))
    );
    assert_eq!(summary.exit_code(), exit_codes::FATAL);
    assert!(h.probe.batch_sizes().is_empty());
    assert_eq!(h.probe.closes(), 1);
}

/// Confirmed and failed clicks are persisted for the run's category.
#[tokio::test(start_paused = true)]
async fn stats_are_persisted_per_batch() {
    let temp = tempfile::tempdir().expect("tempdir");
    let store = StatsStore::new(temp.path().join("stats.json"));
    store.record_batch("FI", popbot::core::types::BatchDelta::confirmed(7));
    let mut h = harness_with(
        ScriptedActuator::new(vec![
            ScriptedBatch::Confirm,
            ScriptedBatch::Fail("net::ERR_FAILED".to_string()),
            ScriptedBatch::Confirm,
        ]),
        800,
        Some(1_600),
        store.clone(),
    );

    h.controller.run().await;

    let stats = store.load();
    assert_eq!(stats["PH"].total_sent, 1_600);
    assert_eq!(stats["PH"].succeeded, 1_600);
    assert_eq!(stats["PH"].failed, 800);
    assert!(stats["PH"].first_event_at <= stats["PH"].last_event_at);
    assert_eq!(stats["FI"].total_sent, 7);
}

/// A panic during setup takes the same shutdown path as any fatal stop.
#[tokio::test(start_paused = true)]
async fn panicking_setup_still_logs_and_releases() {
    let mut h = harness_with(
        ScriptedActuator::panicking_setup(),
        800,
        None,
        StatsStore::disabled(),
    );

    let summary = h.controller.run().await;

    assert!(
        matches!(&summary.reason, StopReason::Fatal { message } if message.contains("scripted setup panic"))
    );
    assert_eq!(summary.exit_code(), exit_codes::FATAL);
    assert!(h.probe.batch_sizes().is_empty());
    assert_eq!(h.probe.closes(), 1);
    assert_eq!(h.controller.phase(), Phase::Stopped);
}
