// crates/buildfact-core/src/runtime/mod.rs
// ============================================================================
// Module: Engine Runtime
// Description: Futures, queueing, contexts, and the dispatch loop.
// Purpose: Group the scheduling layer built on the core model.
// Dependencies: crate::core, crate::interfaces
// ============================================================================

//! ## Overview
//! The runtime turns pending questions into running rule executions: the
//! question queue feeds the dispatch loop, answer contexts capture the
//! need/succeed/fail transitions of each rule, and answer futures carry
//! outcomes between continuations. An in-memory database backs tests and
//! embedded use.

/// Per-question handle threaded through rule dispatchers.
pub mod context;
/// Dispatch loop and build engine.
pub mod dispatch;
/// Single-assignment answer futures.
pub mod future;
/// In-memory database backend.
pub mod memory;
/// Thread-safe question FIFO.
pub mod queue;
/// Condvar wake primitive.
pub mod wake;

pub use context::AnswerContext;
pub use context::ContextError;
pub use dispatch::BuildError;
pub use dispatch::Engine;
pub use dispatch::EngineConfig;
pub use dispatch::EngineError;
pub use dispatch::dispatch_one;
pub use future::AnswerFuture;
pub use future::BuildFailure;
pub use future::FutureError;
pub use future::FutureState;
pub use memory::InMemoryDatabase;
pub use queue::AnswerDelivery;
pub use queue::Dequeue;
pub use queue::QueueError;
pub use queue::QueueItem;
pub use queue::QuestionQueue;
pub use wake::WakeSignal;
