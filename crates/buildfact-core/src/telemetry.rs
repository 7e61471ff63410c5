// crates/buildfact-core/src/telemetry.rs
// ============================================================================
// Module: Engine Telemetry
// Description: Observability hooks for dispatch, storage, and processes.
// Purpose: Provide counter events without hard dependencies.
// Dependencies: crate::interfaces
// ============================================================================

//! ## Overview
//! This module exposes a thin metrics interface for engine counters. It is
//! intentionally dependency-light so downstream deployments can plug in
//! Prometheus or OpenTelemetry without redesign. All hooks default to no-ops
//! and must not block; they run on the dispatch and executor threads.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::sync::Mutex;
use std::sync::PoisonError;

use crate::interfaces::ExitOutcome;

// ============================================================================
// SECTION: Telemetry Interface
// ============================================================================

/// Observer for engine events.
///
/// # Invariants
/// - Hooks are cheap and non-blocking.
/// - Hooks may be invoked concurrently from multiple threads.
pub trait BuildTelemetry: Send + Sync {
    /// A question was appended to the queue.
    fn question_enqueued(&self) {}

    /// A queued question was satisfied from the database.
    fn cache_hit(&self) {}

    /// A queued question was handed to the rule dispatcher.
    fn question_dispatched(&self) {}

    /// An answer row was recorded.
    fn answer_recorded(&self) {}

    /// An invalidation pass completed, deleting `deleted_rows` answers.
    fn recheck_completed(&self, deleted_rows: u64) {
        let _ = deleted_rows;
    }

    /// A child process was spawned.
    fn process_spawned(&self) {}

    /// A child process exit was delivered.
    fn process_exited(&self, outcome: ExitOutcome) {
        let _ = outcome;
    }
}

/// Telemetry sink that ignores every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopTelemetry;

impl BuildTelemetry for NoopTelemetry {}

// ============================================================================
// SECTION: Counting Telemetry
// ============================================================================

/// Snapshot of counted engine events.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TelemetryCounts {
    /// Questions appended to the queue.
    pub enqueued: u64,
    /// Questions satisfied from the database.
    pub cache_hits: u64,
    /// Questions handed to the dispatcher.
    pub dispatched: u64,
    /// Answer rows recorded.
    pub answers_recorded: u64,
    /// Invalidation passes completed.
    pub rechecks: u64,
    /// Answer rows deleted by invalidation passes.
    pub invalidated_rows: u64,
    /// Child processes spawned.
    pub processes_spawned: u64,
    /// Child process exits delivered.
    pub processes_exited: u64,
}

/// Telemetry sink that counts events, for tests and local diagnostics.
#[derive(Debug, Default)]
pub struct CountingTelemetry {
    /// Mutable counters behind a mutex.
    counts: Mutex<TelemetryCounts>,
}

impl CountingTelemetry {
    /// Creates a sink with zeroed counters.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a copy of the current counters.
    #[must_use]
    pub fn snapshot(&self) -> TelemetryCounts {
        *self.counts.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Applies `update` to the counters.
    fn record(&self, update: impl FnOnce(&mut TelemetryCounts)) {
        let mut counts = self.counts.lock().unwrap_or_else(PoisonError::into_inner);
        update(&mut counts);
    }
}

impl BuildTelemetry for CountingTelemetry {
    fn question_enqueued(&self) {
        self.record(|counts| counts.enqueued = counts.enqueued.saturating_add(1));
    }

    fn cache_hit(&self) {
        self.record(|counts| counts.cache_hits = counts.cache_hits.saturating_add(1));
    }

    fn question_dispatched(&self) {
        self.record(|counts| counts.dispatched = counts.dispatched.saturating_add(1));
    }

    fn answer_recorded(&self) {
        self.record(|counts| counts.answers_recorded = counts.answers_recorded.saturating_add(1));
    }

    fn recheck_completed(&self, deleted_rows: u64) {
        self.record(|counts| {
            counts.rechecks = counts.rechecks.saturating_add(1);
            counts.invalidated_rows = counts.invalidated_rows.saturating_add(deleted_rows);
        });
    }

    fn process_spawned(&self) {
        self.record(|counts| {
            counts.processes_spawned = counts.processes_spawned.saturating_add(1);
        });
    }

    fn process_exited(&self, outcome: ExitOutcome) {
        let _ = outcome;
        self.record(|counts| counts.processes_exited = counts.processes_exited.saturating_add(1));
    }
}
