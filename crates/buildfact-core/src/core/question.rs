// crates/buildfact-core/src/core/question.rs
// ============================================================================
// Module: Question and Answer Model
// Description: Open trait-object model for questions, answers, and their kinds.
// Purpose: Let arbitrary build concerns be addressed, compared, and recomputed.
// Dependencies: crate::core::codec, crate::core::identifiers
// ============================================================================

//! ## Overview
//! A question asks for some fact about the current state of the system; an
//! answer is the value of that fact. Both are opaque to the engine: their
//! behavior lives in a [`QuestionKind`], the capability record replacing the
//! C-style vtable. Serialized bytes are the sole persistent identity of a
//! question, so serialization must be deterministic and stable across runs.
//! Invariants:
//! - `deserialize_*(serialize())` yields a value equal under `*_eq`.
//! - Equal serialized answer bytes imply semantically equal answers.
//! - `query_answer` is side-effect free.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::any::Any;
use std::fmt;

use thiserror::Error;

use crate::core::codec::CodecError;
use crate::core::identifiers::KindUuid;

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Errors produced while recomputing a live answer.
///
/// # Invariants
/// - Variants are stable for programmatic handling.
#[derive(Debug, Error)]
pub enum QueryError {
    /// The question has no answer in the current system state.
    #[error("question is unanswerable: {0}")]
    Unanswerable(String),
    /// Underlying I/O failed while computing the answer.
    #[error("answer query io error: {0}")]
    Io(String),
}

// ============================================================================
// SECTION: Question
// ============================================================================

/// A question about the current state of the system.
///
/// Examples of questions a host might define: "what is the content of this
/// file?", "what is this environment variable set to?", "what did this
/// command print?". Some questions are only answerable after a rule has run.
/// Questions are immutable after creation, so they are shared freely across
/// the dispatch and executor threads.
pub trait Question: fmt::Debug + Send + Sync + 'static {
    /// Returns the UUID of the kind this question belongs to.
    fn kind_uuid(&self) -> KindUuid;

    /// Serializes the question to its stable byte form.
    fn serialize(&self) -> Vec<u8>;

    /// Compares against another question of any kind.
    fn question_eq(&self, other: &dyn Question) -> bool;

    /// Replicates the question; ownership boundaries clone instead of share.
    fn clone_question(&self) -> Box<dyn Question>;

    /// Exposes the concrete value for downcasting.
    fn as_any(&self) -> &dyn Any;
}

/// Downcasts a question to its concrete type.
#[must_use]
pub fn downcast_question<T: Question>(question: &dyn Question) -> Option<&T> {
    question.as_any().downcast_ref::<T>()
}

// ============================================================================
// SECTION: Answer
// ============================================================================

/// The value produced by answering a question. Immutable after creation,
/// like questions.
pub trait Answer: fmt::Debug + Send + Sync + 'static {
    /// Serializes the answer to its stable byte form.
    fn serialize(&self) -> Vec<u8>;

    /// Compares against another answer of any kind.
    fn answer_eq(&self, other: &dyn Answer) -> bool;

    /// Replicates the answer; ownership boundaries clone instead of share.
    fn clone_answer(&self) -> Box<dyn Answer>;

    /// Exposes the concrete value for downcasting.
    fn as_any(&self) -> &dyn Any;
}

/// Downcasts an answer to its concrete type.
#[must_use]
pub fn downcast_answer<T: Answer>(answer: &dyn Answer) -> Option<&T> {
    answer.as_any().downcast_ref::<T>()
}

// ============================================================================
// SECTION: Question Kind
// ============================================================================

/// Capability record for one class of questions.
///
/// # Invariants
/// - `uuid` is stable across runs; it is the registration key and the
///   on-disk dispatch key for invalidation.
/// - `query_answer` recomputes the current real-world answer without side
///   effects.
pub trait QuestionKind: Send + Sync {
    /// Returns the stable identity of this kind.
    fn uuid(&self) -> KindUuid;

    /// Recomputes the live answer for a question of this kind.
    ///
    /// # Errors
    ///
    /// Returns [`QueryError`] when the fact cannot be computed; an
    /// unanswerable question is not an engine error.
    fn query_answer(&self, question: &dyn Question) -> Result<Box<dyn Answer>, QueryError>;

    /// Deserializes a question from its stable byte form.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError`] on malformed bytes.
    fn deserialize_question(&self, bytes: &[u8]) -> Result<Box<dyn Question>, CodecError>;

    /// Deserializes an answer from its stable byte form.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError`] on malformed bytes.
    fn deserialize_answer(&self, bytes: &[u8]) -> Result<Box<dyn Answer>, CodecError>;
}
