// crates/buildfact-process/src/lib.rs
// ============================================================================
// Module: Buildfact Process Loop
// Description: Bounded-concurrency child-process executor.
// Purpose: Run commands on behalf of suspended rules and deliver exits.
// Dependencies: buildfact-core
// ============================================================================

//! ## Overview
//! Implementation of the core [`buildfact_core::ProcessRunner`] interface:
//! a process loop with a configurable concurrency budget, FIFO overflow
//! queueing, and exit delivery through callbacks. See
//! [`executor::ProcessLoop`].

/// The process loop implementation.
pub mod executor;

pub use executor::ProcessLoop;
pub use executor::ProcessLoopConfig;
pub use executor::ProcessLoopError;
