// crates/buildfact-core/src/runtime/context.rs
// ============================================================================
// Module: Answer Context
// Description: Per-question handle threaded through rule dispatchers.
// Purpose: Carry the need/succeed/fail API and record dependency edges.
// Dependencies: crate::core, crate::interfaces, crate::runtime
// ============================================================================

//! ## Overview
//! The dispatch loop hands every cache-missed question to the host's rule
//! dispatcher as an answer context. Exactly one terminal call —
//! [`succeed`], [`succeed_with`], or [`fail`] — resolves a context; `need`
//! is non-terminal and returns a join future the dispatcher typically hangs
//! a continuation on. Dropping a context without a terminal call delivers a
//! cancellation instead of wedging the build.
//!
//! [`succeed`]: AnswerContext::succeed
//! [`succeed_with`]: AnswerContext::succeed_with
//! [`fail`]: AnswerContext::fail

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::sync::Arc;
use std::sync::Mutex;
use std::sync::PoisonError;

use thiserror::Error;

use crate::core::identifiers::KindUuid;
use crate::core::question::Answer;
use crate::core::question::Question;
use crate::core::question::QuestionKind;
use crate::core::registry::KindRegistry;
use crate::interfaces::BuildDatabase;
use crate::interfaces::ProcessError;
use crate::interfaces::ProcessRunner;
use crate::interfaces::StoreError;
use crate::runtime::future::AnswerFuture;
use crate::runtime::future::BuildFailure;
use crate::runtime::queue::AnswerDelivery;
use crate::runtime::queue::QueueError;
use crate::runtime::queue::QueueItem;
use crate::runtime::queue::QuestionQueue;
use crate::telemetry::BuildTelemetry;

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Answer context errors.
///
/// # Invariants
/// - Variants are stable for programmatic handling.
#[derive(Debug, Error)]
pub enum ContextError {
    /// A terminal call already resolved this context.
    #[error("answer context already answered")]
    AlreadyAnswered,
    /// The database rejected an operation.
    #[error(transparent)]
    Store(#[from] StoreError),
    /// A needed question has no registered kind.
    #[error("question kind not registered: {0}")]
    MissingKind(KindUuid),
    /// The question queue rejected a sub-question.
    #[error(transparent)]
    Queue(#[from] QueueError),
    /// Recomputing the answer failed.
    #[error("answer query failed: {0}")]
    Query(String),
    /// The process executor rejected a submission.
    #[error(transparent)]
    Process(#[from] ProcessError),
}

// ============================================================================
// SECTION: Answer Context
// ============================================================================

/// Per-question handle passed to the rule dispatcher.
pub struct AnswerContext {
    /// The question being answered.
    question: Box<dyn Question>,
    /// The question's kind.
    kind: Arc<dyn QuestionKind>,
    /// Queue receiving sub-questions declared with `need`.
    queue: Arc<QuestionQueue>,
    /// Database recording edges and answers.
    database: Arc<dyn BuildDatabase>,
    /// Registry resolving sub-question kinds.
    registry: Arc<KindRegistry>,
    /// Telemetry sink for dispatch events.
    telemetry: Arc<dyn BuildTelemetry>,
    /// One-shot delivery of the final outcome; `None` once answered.
    on_answer: Mutex<Option<AnswerDelivery>>,
}

impl AnswerContext {
    /// Creates a context for `question`, delivering its outcome through
    /// `on_answer`.
    #[must_use]
    pub fn new(
        question: Box<dyn Question>,
        kind: Arc<dyn QuestionKind>,
        queue: Arc<QuestionQueue>,
        database: Arc<dyn BuildDatabase>,
        registry: Arc<KindRegistry>,
        telemetry: Arc<dyn BuildTelemetry>,
        on_answer: AnswerDelivery,
    ) -> Arc<Self> {
        Arc::new(Self {
            question,
            kind,
            queue,
            database,
            registry,
            telemetry,
            on_answer: Mutex::new(Some(on_answer)),
        })
    }

    /// Returns the question under dispatch.
    #[must_use]
    pub fn question(&self) -> &dyn Question {
        self.question.as_ref()
    }

    /// Returns the kind of the question under dispatch.
    #[must_use]
    pub fn kind(&self) -> &Arc<dyn QuestionKind> {
        &self.kind
    }

    /// Declares that this question depends on `questions` and enqueues them.
    ///
    /// For each sub-question, in order: the dependency edge is recorded,
    /// the kind is resolved from the registry, and a queue item is enqueued
    /// whose answer resolves one slot of the returned join future. The call
    /// is non-terminal; the dispatcher usually registers a continuation on
    /// the future and resolves the context from there.
    ///
    /// # Errors
    ///
    /// Returns [`ContextError`] when a kind is missing, an edge cannot be
    /// recorded, or the queue is closed. Sub-questions enqueued before the
    /// failure stay enqueued; their answers are discarded with the future.
    pub fn need(
        self: &Arc<Self>,
        questions: Vec<Box<dyn Question>>,
    ) -> Result<Arc<AnswerFuture>, ContextError> {
        let mut children = Vec::with_capacity(questions.len());
        for question in questions {
            let uuid = question.kind_uuid();
            let kind = self.registry.get(uuid).ok_or(ContextError::MissingKind(uuid))?;
            self.database.record_dependency(self.question.as_ref(), question.as_ref())?;
            let child = AnswerFuture::pending(1);
            let slot = Arc::clone(&child);
            self.queue.enqueue(QueueItem {
                question,
                kind,
                on_answer: Box::new(move |outcome| match outcome {
                    Ok(answer) => {
                        let _ = slot.resolve_slot(0, answer);
                    }
                    Err(failure) => {
                        let _ = slot.fail_slot(0, failure);
                    }
                }),
            })?;
            self.telemetry.question_enqueued();
            children.push(child);
        }
        Ok(AnswerFuture::join(&children))
    }

    /// Recomputes the answer through the question's kind and records it.
    ///
    /// # Errors
    ///
    /// Returns [`ContextError::Query`] when recomputation fails and the
    /// errors of [`succeed_with`](Self::succeed_with) otherwise.
    pub fn succeed(&self) -> Result<(), ContextError> {
        let answer = self
            .kind
            .query_answer(self.question.as_ref())
            .map_err(|err| ContextError::Query(err.to_string()))?;
        self.succeed_with(answer)
    }

    /// Records `(question, answer)` in the database, then delivers the
    /// answer. Terminal.
    ///
    /// # Errors
    ///
    /// Returns [`ContextError::AlreadyAnswered`] after a prior terminal call
    /// and [`ContextError::Store`] when the record fails; the context stays
    /// answerable in the latter case.
    pub fn succeed_with(&self, answer: Box<dyn Answer>) -> Result<(), ContextError> {
        let mut delivery = self.lock_delivery();
        if delivery.is_none() {
            return Err(ContextError::AlreadyAnswered);
        }
        self.database.record_answer(self.question.as_ref(), answer.as_ref())?;
        self.telemetry.answer_recorded();
        if let Some(deliver) = delivery.take() {
            drop(delivery);
            deliver(Ok(answer));
        }
        Ok(())
    }

    /// Delivers `failure` without recording an answer row. Terminal.
    ///
    /// # Errors
    ///
    /// Returns [`ContextError::AlreadyAnswered`] after a prior terminal
    /// call.
    pub fn fail(&self, failure: BuildFailure) -> Result<(), ContextError> {
        let mut delivery = self.lock_delivery();
        let Some(deliver) = delivery.take() else {
            return Err(ContextError::AlreadyAnswered);
        };
        drop(delivery);
        deliver(Err(failure));
        Ok(())
    }

    /// Runs `argv` on `runner` and resolves the context from the child's
    /// outcome: exit status zero succeeds, anything else fails.
    ///
    /// # Errors
    ///
    /// Returns [`ContextError::Process`] when the submission is rejected;
    /// no terminal call has happened in that case.
    pub fn exec(
        self: &Arc<Self>,
        runner: &dyn ProcessRunner,
        argv: Vec<String>,
    ) -> Result<(), ContextError> {
        let exit_context = Arc::clone(self);
        let error_context = Arc::clone(self);
        runner.submit(
            argv,
            Box::new(move |outcome| {
                if outcome.success() {
                    if let Err(error) = exit_context.succeed() {
                        let _ = exit_context.fail(BuildFailure::Rule(error.to_string()));
                    }
                } else {
                    let _ = exit_context.fail(BuildFailure::Process(outcome.to_string()));
                }
            }),
            Box::new(move |error| {
                let _ = error_context.fail(BuildFailure::Process(error.to_string()));
            }),
        )?;
        Ok(())
    }

    /// Locks the delivery slot, recovering from poisoning.
    fn lock_delivery(&self) -> std::sync::MutexGuard<'_, Option<AnswerDelivery>> {
        self.on_answer.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for AnswerContext {
    fn drop(&mut self) {
        // A dispatcher that drops its context without a terminal call would
        // otherwise leave the asker pending forever.
        let delivery = self.lock_delivery().take();
        if let Some(deliver) = delivery {
            deliver(Err(BuildFailure::Cancelled));
        }
    }
}
