// crates/buildfact-core/src/lib.rs
// ============================================================================
// Module: Buildfact Core
// Description: Incremental build engine core: model, interfaces, runtime.
// Purpose: Answer questions through rules and memoize facts with edges.
// Dependencies: serde, thiserror, uuid
// ============================================================================

//! ## Overview
//! Buildfact answers *questions* about the state of a system by executing
//! host-supplied *rules*, recording the resulting question→answer facts and
//! their dependency edges in a store so future runs reanswer only what
//! changed. This crate holds the open question/answer model, the
//! backend-agnostic interfaces, and the cooperative dispatch runtime; the
//! durable store and the child-process executor live in sibling crates.

/// Core data model: identities, traits, codec, registry.
pub mod core;
/// Backend-agnostic contract surfaces.
pub mod interfaces;
/// Scheduling runtime: queue, futures, contexts, dispatch.
pub mod runtime;
/// Dependency-light observability hooks.
pub mod telemetry;

pub use crate::core::codec;
pub use crate::core::codec::ByteReader;
pub use crate::core::codec::ByteWriter;
pub use crate::core::codec::CodecError;
pub use crate::core::identifiers::KindUuid;
pub use crate::core::question::Answer;
pub use crate::core::question::Question;
pub use crate::core::question::QuestionKind;
pub use crate::core::question::QueryError;
pub use crate::core::question::downcast_answer;
pub use crate::core::question::downcast_question;
pub use crate::core::registry::KindRegistry;
pub use crate::core::registry::RegistryError;
pub use crate::interfaces::BuildDatabase;
pub use crate::interfaces::DispatchError;
pub use crate::interfaces::ErrorCallback;
pub use crate::interfaces::ExitCallback;
pub use crate::interfaces::ExitOutcome;
pub use crate::interfaces::ProcessError;
pub use crate::interfaces::ProcessRunner;
pub use crate::interfaces::RuleDispatcher;
pub use crate::interfaces::StoreError;
pub use crate::telemetry::BuildTelemetry;
pub use crate::telemetry::CountingTelemetry;
pub use crate::telemetry::NoopTelemetry;
pub use crate::telemetry::TelemetryCounts;
