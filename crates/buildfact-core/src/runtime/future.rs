// crates/buildfact-core/src/runtime/future.rs
// ============================================================================
// Module: Answer Future
// Description: Single-assignment cell holding the outcome of questions.
// Purpose: Capture suspend/resume transitions between rule continuations.
// Dependencies: crate::core
// ============================================================================

//! ## Overview
//! An answer future holds one slot per requested answer. Each slot is a
//! one-shot cell; the future as a whole leaves `Pending` exactly once —
//! either when every slot has resolved or as soon as any slot fails
//! (short-circuit). Callbacks registered while pending fire exactly once, in
//! registration order, outside the internal lock; callbacks registered after
//! completion fire synchronously. Futures are shared behind `Arc`; dropping
//! a pending future is legal and silently discards its callbacks.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::sync::Arc;
use std::sync::Mutex;
use std::sync::PoisonError;

use thiserror::Error;

use crate::core::identifiers::KindUuid;
use crate::core::question::Answer;

// ============================================================================
// SECTION: Failures
// ============================================================================

/// User-space failure carried by a failed future.
///
/// A build failure is not an engine error: it propagates through future
/// joins and reaches the root as a failed build, never as an `Err` from the
/// engine loop.
///
/// # Invariants
/// - Variants are stable for programmatic handling.
#[derive(Debug, Error, Clone)]
pub enum BuildFailure {
    /// A rule declared the question unanswerable.
    #[error("rule failed: {0}")]
    Rule(String),
    /// A child process spawned for the question failed.
    #[error("child process failed: {0}")]
    Process(String),
    /// The question was discarded before an answer was produced.
    #[error("question cancelled before an answer was produced")]
    Cancelled,
    /// No kind is registered for the question's UUID.
    #[error("no question kind registered for {0}")]
    MissingKind(KindUuid),
}

/// Future contract violations.
///
/// # Invariants
/// - Variants are stable for programmatic handling.
#[derive(Debug, Error)]
pub enum FutureError {
    /// The slot already left `Pending`; the stored value is untouched.
    #[error("future slot already completed")]
    AlreadyCompleted,
    /// The slot index is out of range.
    #[error("future slot index out of range: {index} (slots: {slots})")]
    SlotOutOfRange {
        /// Requested slot index.
        index: usize,
        /// Number of slots in the future.
        slots: usize,
    },
}

// ============================================================================
// SECTION: State
// ============================================================================

/// Aggregate state of an answer future.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FutureState {
    /// At least one slot is unresolved and none has failed.
    Pending,
    /// Every slot resolved.
    Resolved,
    /// At least one slot failed.
    Failed,
}

/// One answer slot.
enum AnswerSlot {
    /// No outcome yet.
    Pending,
    /// The answer arrived.
    Resolved(Box<dyn Answer>),
    /// The question failed.
    Failed(BuildFailure),
}

/// Callback invoked once when the future leaves `Pending`.
type FutureCallback = Box<dyn FnOnce(&AnswerFuture) + Send>;

/// Mutable interior of a future.
struct FutureInner {
    /// Per-answer slots.
    slots: Vec<AnswerSlot>,
    /// Count of slots still pending.
    pending: usize,
    /// Whether the aggregate transition already happened.
    completed: bool,
    /// Callbacks awaiting the aggregate transition, in registration order.
    callbacks: Vec<FutureCallback>,
}

// ============================================================================
// SECTION: Answer Future
// ============================================================================

/// Single-assignment, reference-counted answer cell.
pub struct AnswerFuture {
    /// Interior state behind the future's lock.
    inner: Mutex<FutureInner>,
}

impl AnswerFuture {
    /// Creates a future with `slot_count` pending slots. A zero-slot future
    /// is complete on construction.
    #[must_use]
    pub fn pending(slot_count: usize) -> Arc<Self> {
        let mut slots = Vec::with_capacity(slot_count);
        for _ in 0 .. slot_count {
            slots.push(AnswerSlot::Pending);
        }
        Arc::new(Self {
            inner: Mutex::new(FutureInner {
                slots,
                pending: slot_count,
                completed: slot_count == 0,
                callbacks: Vec::new(),
            }),
        })
    }

    /// Returns the aggregate state.
    #[must_use]
    pub fn state(&self) -> FutureState {
        let inner = self.lock();
        if !inner.completed {
            return FutureState::Pending;
        }
        if inner.slots.iter().any(|slot| matches!(slot, AnswerSlot::Failed(_))) {
            FutureState::Failed
        } else {
            FutureState::Resolved
        }
    }

    /// Returns the number of answer slots.
    #[must_use]
    pub fn answer_count(&self) -> usize {
        self.lock().slots.len()
    }

    /// Returns a replica of the resolved answer in `index`, or `None` while
    /// the slot is unresolved or failed.
    #[must_use]
    pub fn answer_clone(&self, index: usize) -> Option<Box<dyn Answer>> {
        let inner = self.lock();
        match inner.slots.get(index) {
            Some(AnswerSlot::Resolved(answer)) => Some(answer.clone_answer()),
            _ => None,
        }
    }

    /// Returns the first failure recorded in slot order, if any.
    #[must_use]
    pub fn failure(&self) -> Option<BuildFailure> {
        let inner = self.lock();
        inner.slots.iter().find_map(|slot| match slot {
            AnswerSlot::Failed(failure) => Some(failure.clone()),
            _ => None,
        })
    }

    /// Returns a replica of the outcome in `index`: `Some(Ok)` for a
    /// resolved slot, `Some(Err)` for a failed slot, `None` while pending.
    #[must_use]
    pub fn slot_outcome(&self, index: usize) -> Option<Result<Box<dyn Answer>, BuildFailure>> {
        let inner = self.lock();
        match inner.slots.get(index) {
            Some(AnswerSlot::Resolved(answer)) => Some(Ok(answer.clone_answer())),
            Some(AnswerSlot::Failed(failure)) => Some(Err(failure.clone())),
            _ => None,
        }
    }

    /// Resolves slot `index` with `answer`.
    ///
    /// Resolving a slot after the future already failed is legal; the answer
    /// is stored but discarded with the future, and no callbacks re-fire.
    ///
    /// # Errors
    ///
    /// Returns [`FutureError::AlreadyCompleted`] when the slot already left
    /// `Pending` (the stored value is untouched) and
    /// [`FutureError::SlotOutOfRange`] for a bad index.
    pub fn resolve_slot(&self, index: usize, answer: Box<dyn Answer>) -> Result<(), FutureError> {
        let callbacks = {
            let mut inner = self.lock();
            let slots = inner.slots.len();
            let slot = inner.slots.get_mut(index).ok_or(FutureError::SlotOutOfRange {
                index,
                slots,
            })?;
            if !matches!(slot, AnswerSlot::Pending) {
                return Err(FutureError::AlreadyCompleted);
            }
            *slot = AnswerSlot::Resolved(answer);
            inner.pending -= 1;
            if inner.pending == 0 && !inner.completed {
                inner.completed = true;
                std::mem::take(&mut inner.callbacks)
            } else {
                Vec::new()
            }
        };
        self.run_callbacks(callbacks);
        Ok(())
    }

    /// Fails slot `index` with `failure`, short-circuiting the future.
    ///
    /// # Errors
    ///
    /// Returns [`FutureError::AlreadyCompleted`] when the slot already left
    /// `Pending` and [`FutureError::SlotOutOfRange`] for a bad index.
    pub fn fail_slot(&self, index: usize, failure: BuildFailure) -> Result<(), FutureError> {
        let callbacks = {
            let mut inner = self.lock();
            let slots = inner.slots.len();
            let slot = inner.slots.get_mut(index).ok_or(FutureError::SlotOutOfRange {
                index,
                slots,
            })?;
            if !matches!(slot, AnswerSlot::Pending) {
                return Err(FutureError::AlreadyCompleted);
            }
            *slot = AnswerSlot::Failed(failure);
            inner.pending -= 1;
            if inner.completed {
                Vec::new()
            } else {
                inner.completed = true;
                std::mem::take(&mut inner.callbacks)
            }
        };
        self.run_callbacks(callbacks);
        Ok(())
    }

    /// Registers `callback` to run when the future leaves `Pending`. Fires
    /// synchronously, before returning, when the future already completed.
    pub fn add_callback(self: &Arc<Self>, callback: impl FnOnce(&Self) + Send + 'static) {
        let mut inner = self.lock();
        if inner.completed {
            drop(inner);
            callback(self.as_ref());
        } else {
            inner.callbacks.push(Box::new(callback));
        }
    }

    /// Joins `children` into one future carrying every child answer.
    ///
    /// The parent holds the children's slots in argument order; each child
    /// answer is replicated into its parent slot when the child completes.
    /// The parent fails as soon as any child fails and resolves once every
    /// child resolved. Children may complete in any order.
    #[must_use]
    pub fn join(children: &[Arc<Self>]) -> Arc<Self> {
        let total: usize = children.iter().map(|child| child.answer_count()).sum();
        let parent = Self::pending(total);
        let mut base = 0;
        for child in children {
            let count = child.answer_count();
            let parent_ref = Arc::clone(&parent);
            child.add_callback(move |completed: &Self| {
                for offset in 0 .. count {
                    match completed.slot_outcome(offset) {
                        Some(Ok(answer)) => {
                            let _ = parent_ref.resolve_slot(base + offset, answer);
                        }
                        Some(Err(failure)) => {
                            let _ = parent_ref.fail_slot(base + offset, failure);
                        }
                        None => {
                            // The child short-circuited with this slot still
                            // pending; the parent has already failed.
                        }
                    }
                }
            });
            base += count;
        }
        parent
    }

    /// Locks the interior state, recovering from poisoning.
    fn lock(&self) -> std::sync::MutexGuard<'_, FutureInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Runs drained callbacks outside the lock, in registration order.
    fn run_callbacks(&self, callbacks: Vec<FutureCallback>) {
        for callback in callbacks {
            callback(self);
        }
    }
}
