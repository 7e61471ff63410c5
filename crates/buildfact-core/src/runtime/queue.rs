// crates/buildfact-core/src/runtime/queue.rs
// ============================================================================
// Module: Question Queue
// Description: Thread-safe FIFO of pending questions with a wake signal.
// Purpose: Feed the dispatch loop in enqueue order across threads.
// Dependencies: crate::core, crate::runtime::future, crate::runtime::wake
// ============================================================================

//! ## Overview
//! The question queue is the only channel through which work reaches the
//! dispatch loop. Items carry an owned question, its kind, and the callback
//! that will receive the eventual answer or failure. Enqueues raise the wake
//! signal the queue was constructed with; the dispatch loop drains with
//! `try_dequeue` until the queue reports empty or closed.
//! Invariants:
//! - Items dequeue in enqueue order.
//! - After `close`, remaining items still drain before `Closed` is reported.
//! - Dropping the queue drops remaining items, discarding their callbacks.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::PoisonError;

use thiserror::Error;

use crate::core::question::Answer;
use crate::core::question::Question;
use crate::core::question::QuestionKind;
use crate::runtime::future::BuildFailure;
use crate::runtime::wake::WakeSignal;

// ============================================================================
// SECTION: Items
// ============================================================================

/// Callback delivering the outcome of one queued question.
pub type AnswerDelivery = Box<dyn FnOnce(Result<Box<dyn Answer>, BuildFailure>) + Send>;

/// One unit of pending work.
pub struct QueueItem {
    /// The question to answer; the queue owns it.
    pub question: Box<dyn Question>,
    /// The question's kind.
    pub kind: Arc<dyn QuestionKind>,
    /// Receives the answer or failure exactly once.
    pub on_answer: AnswerDelivery,
}

/// Outcome of one dequeue attempt.
pub enum Dequeue {
    /// The head item.
    Item(QueueItem),
    /// The queue is open but empty.
    Empty,
    /// The queue is closed and fully drained.
    Closed,
}

/// Queue errors.
///
/// # Invariants
/// - Variants are stable for programmatic handling.
#[derive(Debug, Error)]
pub enum QueueError {
    /// The queue no longer accepts items.
    #[error("question queue is closed")]
    Closed,
}

// ============================================================================
// SECTION: Question Queue
// ============================================================================

/// Interior queue state.
struct QueueState {
    /// Pending items in enqueue order.
    entries: VecDeque<QueueItem>,
    /// Whether `close` was called.
    closed: bool,
}

/// Thread-safe FIFO of pending questions.
pub struct QuestionQueue {
    /// Entries and the closed flag behind the queue lock.
    state: Mutex<QueueState>,
    /// Wake signal raised on enqueue and close.
    wake: Arc<WakeSignal>,
}

impl QuestionQueue {
    /// Creates an open queue raising `wake` on enqueue and close.
    #[must_use]
    pub fn new(wake: Arc<WakeSignal>) -> Self {
        Self {
            state: Mutex::new(QueueState {
                entries: VecDeque::new(),
                closed: false,
            }),
            wake,
        }
    }

    /// Appends `item` and raises the wake signal.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::Closed`] after `close`; the item is dropped and
    /// its callback is discarded without firing.
    pub fn enqueue(&self, item: QueueItem) -> Result<(), QueueError> {
        {
            let mut state = self.lock();
            if state.closed {
                return Err(QueueError::Closed);
            }
            state.entries.push_back(item);
        }
        self.wake.raise();
        Ok(())
    }

    /// Pops the head item, reporting `Closed` only once drained.
    #[must_use]
    pub fn try_dequeue(&self) -> Dequeue {
        let mut state = self.lock();
        match state.entries.pop_front() {
            Some(item) => Dequeue::Item(item),
            None if state.closed => Dequeue::Closed,
            None => Dequeue::Empty,
        }
    }

    /// Marks the queue closed and raises the wake signal. Idempotent.
    pub fn close(&self) {
        {
            let mut state = self.lock();
            state.closed = true;
        }
        self.wake.raise();
    }

    /// Returns true once `close` was called.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    /// Returns the number of pending items.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    /// Returns true when no items are pending.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock().entries.is_empty()
    }

    /// Locks the queue state, recovering from poisoning.
    fn lock(&self) -> std::sync::MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
