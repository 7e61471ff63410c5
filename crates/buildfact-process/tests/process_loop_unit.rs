// crates/buildfact-process/tests/process_loop_unit.rs
// ============================================================================
// Module: Process Loop Unit Tests
// Description: Exit delivery, concurrency budget, queueing, and shutdown.
// Purpose: Validate the executor contract rules rely on.
// ============================================================================

//! Unit tests for the process loop:
//! - An immediately exiting child delivers `Exited(0)` exactly once.
//! - Spawn failures are reported synchronously through `on_error`.
//! - The concurrency budget is never exceeded; overflow entries run FIFO.
//! - Stop cancels queued entries but still delivers exits of already
//!   spawned children; shutdown force-kills stragglers.

#![allow(
    clippy::panic,
    clippy::print_stdout,
    clippy::print_stderr,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::use_debug,
    clippy::dbg_macro,
    clippy::panic_in_result_fn,
    clippy::unwrap_in_result,
    reason = "Test-only assertions and helpers are permitted."
)]

use std::sync::Arc;
use std::sync::Mutex;
use std::time::Duration;
use std::time::Instant;

use buildfact_core::ExitOutcome;
use buildfact_process::ProcessLoop;
use buildfact_process::ProcessLoopConfig;
use buildfact_process::ProcessLoopError;

// ============================================================================
// SECTION: Helpers
// ============================================================================

/// Shared log of delivered callbacks.
type Deliveries = Arc<Mutex<Vec<Result<ExitOutcome, String>>>>;

fn new_loop(concurrent_limit: usize) -> Arc<ProcessLoop> {
    let config = ProcessLoopConfig {
        concurrent_limit,
    };
    Arc::new(ProcessLoop::new(&config).expect("process loop"))
}

fn argv(parts: &[&str]) -> Vec<String> {
    parts.iter().map(|part| (*part).to_string()).collect()
}

fn submit(process_loop: &Arc<ProcessLoop>, command: &[&str], deliveries: &Deliveries) {
    let exits = Arc::clone(deliveries);
    let errors = Arc::clone(deliveries);
    process_loop
        .exec(
            argv(command),
            Box::new(move |outcome| exits.lock().unwrap().push(Ok(outcome))),
            Box::new(move |error| errors.lock().unwrap().push(Err(error.to_string()))),
        )
        .expect("exec");
}

/// Polls until `predicate` holds or the timeout elapses.
fn wait_until(timeout: Duration, mut predicate: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if predicate() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(10));
    }
    predicate()
}

// ============================================================================
// SECTION: Exit Delivery
// ============================================================================

#[test]
fn immediate_exit_delivers_status_zero_exactly_once() {
    let process_loop = new_loop(4);
    process_loop.run_async().expect("run async");

    let deliveries: Deliveries = Arc::new(Mutex::new(Vec::new()));
    submit(&process_loop, &["true"], &deliveries);

    assert!(wait_until(Duration::from_secs(5), || !deliveries.lock().unwrap().is_empty()));
    // Give a duplicate delivery a chance to show up before asserting.
    std::thread::sleep(Duration::from_millis(50));
    let delivered = deliveries.lock().unwrap().clone();
    assert_eq!(delivered, vec![Ok(ExitOutcome::Exited(0))]);

    process_loop.shutdown(None);
}

#[test]
fn nonzero_exit_preserves_the_status_code() {
    let process_loop = new_loop(4);
    process_loop.run_async().expect("run async");

    let deliveries: Deliveries = Arc::new(Mutex::new(Vec::new()));
    submit(&process_loop, &["sh", "-c", "exit 3"], &deliveries);

    assert!(wait_until(Duration::from_secs(5), || !deliveries.lock().unwrap().is_empty()));
    let delivered = deliveries.lock().unwrap().clone();
    assert_eq!(delivered, vec![Ok(ExitOutcome::Exited(3))]);
    assert!(!delivered[0].as_ref().expect("outcome").success());

    process_loop.shutdown(None);
}

#[test]
fn spawn_failure_is_reported_synchronously() {
    let process_loop = new_loop(4);
    let deliveries: Deliveries = Arc::new(Mutex::new(Vec::new()));
    submit(&process_loop, &["buildfact-no-such-binary"], &deliveries);

    // No loop is running; the error callback already fired on this thread.
    let delivered = deliveries.lock().unwrap().clone();
    assert_eq!(delivered.len(), 1);
    assert!(delivered[0].as_ref().is_err_and(|message| message.contains("spawn")));
    assert_eq!(process_loop.running_count(), 0);
}

#[test]
fn empty_argv_is_a_spawn_failure() {
    let process_loop = new_loop(4);
    let deliveries: Deliveries = Arc::new(Mutex::new(Vec::new()));
    let exits = Arc::clone(&deliveries);
    let errors = Arc::clone(&deliveries);
    process_loop
        .exec(
            Vec::new(),
            Box::new(move |outcome| exits.lock().unwrap().push(Ok(outcome))),
            Box::new(move |error| errors.lock().unwrap().push(Err(error.to_string()))),
        )
        .expect("exec");
    let delivered = deliveries.lock().unwrap().clone();
    assert_eq!(delivered.len(), 1);
    assert!(delivered[0].is_err());
}

// ============================================================================
// SECTION: Concurrency Budget
// ============================================================================

#[test]
fn overflow_entries_queue_and_run_in_fifo_order() {
    let process_loop = new_loop(1);
    process_loop.run_async().expect("run async");

    let deliveries: Deliveries = Arc::new(Mutex::new(Vec::new()));
    submit(&process_loop, &["sh", "-c", "exit 1"], &deliveries);
    submit(&process_loop, &["sh", "-c", "exit 2"], &deliveries);
    submit(&process_loop, &["sh", "-c", "exit 3"], &deliveries);

    assert!(wait_until(Duration::from_secs(10), || deliveries.lock().unwrap().len() == 3));
    let delivered = deliveries.lock().unwrap().clone();
    assert_eq!(delivered, vec![
        Ok(ExitOutcome::Exited(1)),
        Ok(ExitOutcome::Exited(2)),
        Ok(ExitOutcome::Exited(3)),
    ]);

    process_loop.shutdown(None);
}

#[test]
fn concurrency_budget_is_never_exceeded() {
    let process_loop = new_loop(2);
    process_loop.run_async().expect("run async");

    let deliveries: Deliveries = Arc::new(Mutex::new(Vec::new()));
    for _ in 0 .. 6 {
        submit(&process_loop, &["sh", "-c", "sleep 0.05"], &deliveries);
    }
    assert!(process_loop.running_count() <= 2);

    let drained = wait_until(Duration::from_secs(10), || {
        assert!(process_loop.running_count() <= 2);
        deliveries.lock().unwrap().len() == 6
    });
    assert!(drained);
    assert_eq!(process_loop.queued_count(), 0);

    process_loop.shutdown(None);
}

// ============================================================================
// SECTION: Stop and Shutdown
// ============================================================================

#[test]
fn stop_cancels_queued_entries() {
    let process_loop = new_loop(1);
    process_loop.run_async().expect("run async");

    let deliveries: Deliveries = Arc::new(Mutex::new(Vec::new()));
    submit(&process_loop, &["sleep", "10"], &deliveries);
    submit(&process_loop, &["true"], &deliveries);
    assert!(wait_until(Duration::from_secs(5), || process_loop.queued_count() == 1));

    process_loop.stop();
    assert!(wait_until(Duration::from_secs(5), || {
        deliveries.lock().unwrap().iter().any(Result::is_err)
    }));
    let delivered = deliveries.lock().unwrap().clone();
    assert!(
        delivered
            .iter()
            .any(|entry| entry.as_ref().is_err_and(|message| message.contains("cancelled")))
    );

    process_loop.shutdown(Some(Duration::from_millis(200)));
}

#[test]
fn plain_shutdown_delivers_exits_of_running_children() {
    let process_loop = new_loop(1);
    process_loop.run_async().expect("run async");

    let deliveries: Deliveries = Arc::new(Mutex::new(Vec::new()));
    submit(&process_loop, &["sh", "-c", "sleep 0.3"], &deliveries);
    assert!(wait_until(Duration::from_secs(5), || process_loop.running_count() == 1));

    // No force-kill: the child is left alone, but its exit still reaches
    // the callback before shutdown returns.
    process_loop.shutdown(None);
    let delivered = deliveries.lock().unwrap().clone();
    assert_eq!(delivered, vec![Ok(ExitOutcome::Exited(0))]);
    assert_eq!(process_loop.running_count(), 0);
}

#[test]
fn shutdown_pumps_stranded_exits_when_the_loop_never_ran() {
    let process_loop = new_loop(1);
    let deliveries: Deliveries = Arc::new(Mutex::new(Vec::new()));
    submit(&process_loop, &["true"], &deliveries);

    process_loop.shutdown(None);
    let delivered = deliveries.lock().unwrap().clone();
    assert_eq!(delivered, vec![Ok(ExitOutcome::Exited(0))]);
    assert_eq!(process_loop.running_count(), 0);
}

#[cfg(unix)]
#[test]
fn shutdown_force_kills_outstanding_children() {
    let process_loop = new_loop(2);
    process_loop.run_async().expect("run async");

    let deliveries: Deliveries = Arc::new(Mutex::new(Vec::new()));
    submit(&process_loop, &["sleep", "30"], &deliveries);
    assert!(wait_until(Duration::from_secs(5), || process_loop.running_count() == 1));

    let started = Instant::now();
    process_loop.shutdown(Some(Duration::from_millis(200)));
    assert!(started.elapsed() < Duration::from_secs(20));

    let delivered = deliveries.lock().unwrap().clone();
    assert_eq!(delivered.len(), 1);
    assert!(matches!(delivered[0], Ok(ExitOutcome::Signaled(_))));
    assert_eq!(process_loop.running_count(), 0);
}

#[test]
fn exec_after_stop_is_cancelled() {
    let process_loop = new_loop(1);
    process_loop.stop();

    let deliveries: Deliveries = Arc::new(Mutex::new(Vec::new()));
    submit(&process_loop, &["true"], &deliveries);
    let delivered = deliveries.lock().unwrap().clone();
    assert_eq!(delivered.len(), 1);
    assert!(matches!(delivered[0], Err(ref message) if message.contains("cancelled")));
}

// ============================================================================
// SECTION: Lifecycle
// ============================================================================

#[test]
fn zero_concurrency_limit_is_rejected() {
    let config = ProcessLoopConfig {
        concurrent_limit: 0,
    };
    let result = ProcessLoop::new(&config);
    assert!(matches!(result, Err(ProcessLoopError::Invalid(_))));
}

#[test]
fn second_runner_is_rejected_while_the_loop_is_active() {
    let process_loop = new_loop(1);
    process_loop.run_async().expect("run async");
    let second = process_loop.run_async();
    assert!(matches!(second, Err(ProcessLoopError::AlreadyRunning)));
    process_loop.shutdown(None);
}
