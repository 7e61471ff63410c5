// crates/buildfact-core/src/runtime/wake.rs
// ============================================================================
// Module: Wake Signal
// Description: Condvar-backed wake primitive shared by event producers.
// Purpose: Give the dispatch loop one blocking suspension point.
// Dependencies: none
// ============================================================================

//! ## Overview
//! The dispatch loop suspends in exactly one place: the wake signal. Any
//! producer raises it; `wait` blocks until at least one raise has arrived
//! and clears it. The signal is a construction parameter of the question
//! queue so embedders can hand the same signal to several producers and
//! re-check each input after a wake. Consecutive raises may coalesce into
//! a single wake, which is why waiters drain their inputs rather than
//! count wakes.
//! Invariants:
//! - A raise before `wait` is never lost.
//! - `wait` returns only after a raise.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::sync::Condvar;
use std::sync::Mutex;
use std::sync::PoisonError;

// ============================================================================
// SECTION: Wake Signal
// ============================================================================

/// Condvar-backed wake primitive.
#[derive(Debug, Default)]
pub struct WakeSignal {
    /// Raised-but-unconsumed wake.
    raised: Mutex<bool>,
    /// Notified whenever the signal is raised.
    condvar: Condvar,
}

impl WakeSignal {
    /// Creates an unraised signal.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Raises the signal and wakes one waiter.
    pub fn raise(&self) {
        let mut raised = self.raised.lock().unwrap_or_else(PoisonError::into_inner);
        *raised = true;
        drop(raised);
        self.condvar.notify_one();
    }

    /// Blocks until the signal is raised, then clears it.
    pub fn wait(&self) {
        let mut raised = self.raised.lock().unwrap_or_else(PoisonError::into_inner);
        while !*raised {
            raised = self.condvar.wait(raised).unwrap_or_else(PoisonError::into_inner);
        }
        *raised = false;
    }
}
