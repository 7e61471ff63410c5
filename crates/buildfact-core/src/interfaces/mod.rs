// crates/buildfact-core/src/interfaces/mod.rs
// ============================================================================
// Module: Buildfact Interfaces
// Description: Backend-agnostic interfaces for storage, processes, and rules.
// Purpose: Define the contract surfaces used by the Buildfact runtime.
// Dependencies: crate::core, crate::runtime
// ============================================================================

//! ## Overview
//! Interfaces define how the engine integrates with storage backends, child
//! process executors, and host-supplied rules without embedding
//! backend-specific details. Implementations must be thread-safe; the
//! runtime calls them from the dispatch thread and from executor threads.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fmt;
use std::sync::Arc;

use thiserror::Error;

use crate::core::question::Answer;
use crate::core::question::Question;
use crate::core::question::QuestionKind;
use crate::core::registry::KindRegistry;
use crate::runtime::context::AnswerContext;

// ============================================================================
// SECTION: Build Database
// ============================================================================

/// Build database errors.
///
/// # Invariants
/// - Variants are stable for programmatic handling.
/// - Messages avoid embedding raw payload bytes.
#[derive(Debug, Error, Clone)]
pub enum StoreError {
    /// Store I/O error.
    #[error("build database io error: {0}")]
    Io(String),
    /// Backing engine error.
    #[error("build database error: {0}")]
    Db(String),
    /// A stored payload failed to deserialize.
    #[error("build database codec error: {0}")]
    Codec(String),
    /// Store data or arguments are invalid.
    #[error("build database invalid data: {0}")]
    Invalid(String),
    /// The backing engine lacks a required capability.
    #[error("build database unsupported: {0}")]
    Unsupported(String),
}

/// Persistent store of answered questions and their dependency edges.
///
/// Two relations back the contract: memoized `(question, answer)` facts and
/// `(from, to)` dependency edges where `from` depends on `to`. Rows are
/// created by the record operations and deleted only by [`recheck_all`].
///
/// [`recheck_all`]: BuildDatabase::recheck_all
pub trait BuildDatabase: Send + Sync {
    /// Records that answering `from` required answering `to`.
    ///
    /// Duplicate edges are tolerated and do not change invalidation results.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the edge cannot be written.
    fn record_dependency(&self, from: &dyn Question, to: &dyn Question)
    -> Result<(), StoreError>;

    /// Records the answer to a question.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the fact cannot be written.
    fn record_answer(&self, question: &dyn Question, answer: &dyn Answer)
    -> Result<(), StoreError>;

    /// Looks up the memoized answer for a question, if any.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Codec`] when a stored row fails to deserialize;
    /// the row is left in place for `recheck_all` to prune.
    fn look_up_answer(
        &self,
        question: &dyn Question,
        kind: &dyn QuestionKind,
    ) -> Result<Option<Box<dyn Answer>>, StoreError>;

    /// Deletes every answer whose fact no longer matches reality and every
    /// answer transitively depending on such a fact. Returns the number of
    /// rows deleted. Rows whose kind UUID is absent from `kinds` are
    /// conservatively treated as stale.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the invalidation query fails.
    fn recheck_all(&self, kinds: &KindRegistry) -> Result<u64, StoreError>;
}

// ============================================================================
// SECTION: Process Runner
// ============================================================================

/// How a child process left the running state.
///
/// # Invariants
/// - Variants preserve the kernel's distinction between a normal exit and
///   termination by signal where the platform exposes it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitOutcome {
    /// The child exited normally with a status code.
    Exited(i32),
    /// The child was terminated by a signal.
    Signaled(i32),
}

impl ExitOutcome {
    /// Returns true for a normal exit with status zero.
    #[must_use]
    pub const fn success(self) -> bool {
        matches!(self, Self::Exited(0))
    }
}

impl fmt::Display for ExitOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Exited(code) => write!(f, "exited with status {code}"),
            Self::Signaled(signal) => write!(f, "terminated by signal {signal}"),
        }
    }
}

/// Process executor errors.
///
/// # Invariants
/// - Variants are stable for programmatic handling.
#[derive(Debug, Error, Clone)]
pub enum ProcessError {
    /// Spawning the child failed.
    #[error("process spawn failed: {0}")]
    Spawn(String),
    /// Waiting on the child failed after a successful spawn.
    #[error("process wait failed: {0}")]
    Wait(String),
    /// The entry was cancelled before its child was spawned.
    #[error("process cancelled before spawn")]
    Cancelled,
    /// The executor cannot accept work.
    #[error("process executor unavailable: {0}")]
    Unavailable(String),
}

/// Callback receiving a child's exit outcome, invoked exactly once.
pub type ExitCallback = Box<dyn FnOnce(ExitOutcome) + Send>;

/// Callback receiving a process error, invoked at most once.
pub type ErrorCallback = Box<dyn FnOnce(ProcessError) + Send>;

/// Bounded-concurrency child process executor.
pub trait ProcessRunner: Send + Sync {
    /// Submits `argv` for execution. Exactly one of `on_exit` / `on_error`
    /// is eventually invoked: `on_exit` with the child's outcome, or
    /// `on_error` with a spawn failure (synchronously, on the calling
    /// thread) or a cancellation.
    ///
    /// # Errors
    ///
    /// Returns [`ProcessError`] when the submission itself cannot be
    /// accepted; neither callback fires in that case.
    fn submit(
        &self,
        argv: Vec<String>,
        on_exit: ExitCallback,
        on_error: ErrorCallback,
    ) -> Result<(), ProcessError>;
}

// ============================================================================
// SECTION: Rule Dispatcher
// ============================================================================

/// Rule dispatch errors.
///
/// # Invariants
/// - Variants are stable for programmatic handling.
#[derive(Debug, Error)]
pub enum DispatchError {
    /// The dispatcher reported an error.
    #[error("rule dispatch failed: {0}")]
    Failed(String),
}

/// Host-supplied dispatcher deciding how to answer questions.
///
/// The dispatcher routes by `ctx.question().kind_uuid()` and resolves the
/// context through exactly one terminal call, possibly after requesting
/// further answers with `need`.
pub trait RuleDispatcher: Send + Sync {
    /// Dispatches one question.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError`] for operational failures; a rule that
    /// merely cannot produce an answer fails its context instead.
    fn dispatch(&self, ctx: Arc<AnswerContext>) -> Result<(), DispatchError>;
}
