// crates/buildfact-core/src/runtime/dispatch.rs
// ============================================================================
// Module: Dispatch Loop
// Description: Turns queued questions into rule executions and runs builds.
// Purpose: Drive the cooperative loop from a root question to its answer.
// Dependencies: crate::core, crate::interfaces, crate::runtime
// ============================================================================

//! ## Overview
//! The dispatch loop dequeues questions in enqueue order. Each one is first
//! checked against the database — a cache hit delivers a deserialized
//! replica without consulting the dispatcher — and otherwise wrapped in an
//! answer context and handed to the host's rule dispatcher. [`Engine::build`]
//! packages the whole flow: invalidate stale facts, enqueue the root
//! question, drain the queue until the root's outcome closes it, and return
//! the root answer.
//! Invariants:
//! - Queue items dispatch in enqueue order; there is no priority.
//! - A suspension via `need` occupies no thread; continuations are future
//!   callbacks.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::sync::Arc;
use std::sync::Mutex;
use std::sync::PoisonError;

use serde::Deserialize;
use thiserror::Error;

use crate::core::identifiers::KindUuid;
use crate::core::question::Answer;
use crate::core::question::Question;
use crate::core::registry::KindRegistry;
use crate::interfaces::BuildDatabase;
use crate::interfaces::RuleDispatcher;
use crate::interfaces::StoreError;
use crate::runtime::context::AnswerContext;
use crate::runtime::future::BuildFailure;
use crate::runtime::queue::Dequeue;
use crate::runtime::queue::QueueError;
use crate::runtime::queue::QueueItem;
use crate::runtime::queue::QuestionQueue;
use crate::runtime::wake::WakeSignal;
use crate::telemetry::BuildTelemetry;
use crate::telemetry::NoopTelemetry;

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Operational engine errors.
///
/// # Invariants
/// - Variants are stable for programmatic handling.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The database rejected an operation.
    #[error(transparent)]
    Store(#[from] StoreError),
    /// The question queue rejected an operation.
    #[error(transparent)]
    Queue(#[from] QueueError),
    /// The rule dispatcher reported an operational failure.
    #[error("rule dispatch failed: {0}")]
    Dispatch(String),
    /// The root question has no registered kind.
    #[error("question kind not registered: {0}")]
    MissingKind(KindUuid),
}

/// Outcome errors of a whole build.
///
/// # Invariants
/// - `Root` is the user-space outcome; `Engine` is operational.
#[derive(Debug, Error)]
pub enum BuildError {
    /// The engine itself failed.
    #[error(transparent)]
    Engine(#[from] EngineError),
    /// The root question could not be answered; the build ran to completion
    /// with the root future failed.
    #[error("root question failed: {0}")]
    Root(BuildFailure),
}

// ============================================================================
// SECTION: Dispatch
// ============================================================================

/// Dispatches one queue item: short-circuit on a cached answer, otherwise
/// hand an answer context to the dispatcher.
///
/// # Errors
///
/// Returns [`EngineError`] when the database lookup fails or the dispatcher
/// reports an operational error.
pub fn dispatch_one(
    item: QueueItem,
    queue: &Arc<QuestionQueue>,
    database: &Arc<dyn BuildDatabase>,
    registry: &Arc<KindRegistry>,
    telemetry: &Arc<dyn BuildTelemetry>,
    dispatcher: &dyn RuleDispatcher,
) -> Result<(), EngineError> {
    if let Some(answer) = database.look_up_answer(item.question.as_ref(), item.kind.as_ref())? {
        telemetry.cache_hit();
        (item.on_answer)(Ok(answer));
        return Ok(());
    }
    let context = AnswerContext::new(
        item.question,
        item.kind,
        Arc::clone(queue),
        Arc::clone(database),
        Arc::clone(registry),
        Arc::clone(telemetry),
        item.on_answer,
    );
    telemetry.question_dispatched();
    dispatcher.dispatch(context).map_err(|err| EngineError::Dispatch(err.to_string()))
}

// ============================================================================
// SECTION: Engine
// ============================================================================

/// Engine configuration.
///
/// # Invariants
/// - Fields have usable defaults; an all-default config is valid.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct EngineConfig {
    /// Whether `build` prunes stale facts before dispatching the root.
    #[serde(default = "default_recheck_on_build")]
    pub recheck_on_build: bool,
}

/// Returns the default for pruning stale facts on build.
const fn default_recheck_on_build() -> bool {
    true
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            recheck_on_build: default_recheck_on_build(),
        }
    }
}

/// Shared slot receiving the root question's outcome.
type RootOutcome = Arc<Mutex<Option<Result<Box<dyn Answer>, BuildFailure>>>>;

/// The build engine: database, kind registry, and dispatch loop.
pub struct Engine {
    /// Engine configuration.
    config: EngineConfig,
    /// Persistent fact store.
    database: Arc<dyn BuildDatabase>,
    /// Registered question kinds.
    registry: Arc<KindRegistry>,
    /// Telemetry sink.
    telemetry: Arc<dyn BuildTelemetry>,
}

impl Engine {
    /// Creates an engine with the default configuration and no telemetry.
    #[must_use]
    pub fn new(database: Arc<dyn BuildDatabase>, registry: Arc<KindRegistry>) -> Self {
        Self::with_config(EngineConfig::default(), database, registry, Arc::new(NoopTelemetry))
    }

    /// Creates an engine with explicit configuration and telemetry.
    #[must_use]
    pub fn with_config(
        config: EngineConfig,
        database: Arc<dyn BuildDatabase>,
        registry: Arc<KindRegistry>,
        telemetry: Arc<dyn BuildTelemetry>,
    ) -> Self {
        Self {
            config,
            database,
            registry,
            telemetry,
        }
    }

    /// Returns the engine's database handle.
    #[must_use]
    pub fn database(&self) -> &Arc<dyn BuildDatabase> {
        &self.database
    }

    /// Returns the engine's kind registry.
    #[must_use]
    pub fn registry(&self) -> &Arc<KindRegistry> {
        &self.registry
    }

    /// Answers `root` by draining the question queue through `dispatcher`
    /// until the root outcome closes it.
    ///
    /// # Errors
    ///
    /// Returns [`BuildError::Engine`] for operational failures and
    /// [`BuildError::Root`] when the build completes with the root question
    /// unanswered.
    pub fn build(
        &self,
        dispatcher: &dyn RuleDispatcher,
        root: Box<dyn Question>,
    ) -> Result<Box<dyn Answer>, BuildError> {
        if self.config.recheck_on_build {
            let deleted = self.database.recheck_all(&self.registry).map_err(EngineError::from)?;
            self.telemetry.recheck_completed(deleted);
        }

        let wake = Arc::new(WakeSignal::new());
        let queue = Arc::new(QuestionQueue::new(Arc::clone(&wake)));
        let uuid = root.kind_uuid();
        let kind = self.registry.get(uuid).ok_or(EngineError::MissingKind(uuid))?;

        // The root item closes the queue once its outcome lands, which is
        // what ends the drain loop below.
        let outcome: RootOutcome = Arc::new(Mutex::new(None));
        let outcome_slot = Arc::clone(&outcome);
        let closer = Arc::clone(&queue);
        queue
            .enqueue(QueueItem {
                question: root,
                kind,
                on_answer: Box::new(move |result| {
                    *outcome_slot.lock().unwrap_or_else(PoisonError::into_inner) = Some(result);
                    closer.close();
                }),
            })
            .map_err(EngineError::from)?;
        self.telemetry.question_enqueued();

        loop {
            wake.wait();
            loop {
                match queue.try_dequeue() {
                    Dequeue::Item(item) => dispatch_one(
                        item,
                        &queue,
                        &self.database,
                        &self.registry,
                        &self.telemetry,
                        dispatcher,
                    )
                    .map_err(BuildError::from)?,
                    Dequeue::Empty => break,
                    Dequeue::Closed => {
                        let result =
                            outcome.lock().unwrap_or_else(PoisonError::into_inner).take();
                        return match result {
                            Some(Ok(answer)) => Ok(answer),
                            Some(Err(failure)) => Err(BuildError::Root(failure)),
                            None => Err(BuildError::Root(BuildFailure::Cancelled)),
                        };
                    }
                }
            }
        }
    }
}
