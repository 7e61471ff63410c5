// crates/buildfact-core/src/core/registry.rs
// ============================================================================
// Module: Kind Registry
// Description: Registry of question kinds keyed by their stable UUID.
// Purpose: Route dispatch, deserialization, and invalidation by kind identity.
// Dependencies: crate::core::identifiers, crate::core::question
// ============================================================================

//! ## Overview
//! The kind registry resolves a [`KindUuid`] to its [`QuestionKind`]
//! capability record. The engine consults it on every dispatch and the
//! database consults it during invalidation; a stored row whose UUID is not
//! registered is conservatively treated as stale.
//! Invariants:
//! - Kind UUIDs are unique within the registry.
//! - Registered kinds are shared behind `Arc` trait objects.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::sync::Arc;

use thiserror::Error;

use crate::core::identifiers::KindUuid;
use crate::core::question::QuestionKind;

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Registry errors for kind registration.
///
/// # Invariants
/// - Variants are stable for programmatic handling.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// A kind with the same UUID is already registered.
    #[error("question kind already registered: {0}")]
    DuplicateKind(KindUuid),
}

// ============================================================================
// SECTION: Kind Registry
// ============================================================================

/// Registry of question kinds keyed by UUID.
#[derive(Clone, Default)]
pub struct KindRegistry {
    /// Kind implementations keyed by their stable UUID.
    kinds: BTreeMap<KindUuid, Arc<dyn QuestionKind>>,
}

impl KindRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a kind under its own UUID.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::DuplicateKind`] when the UUID is taken; two
    /// kinds sharing a UUID are a programming error in the host.
    pub fn register(&mut self, kind: Arc<dyn QuestionKind>) -> Result<(), RegistryError> {
        let uuid = kind.uuid();
        if self.kinds.contains_key(&uuid) {
            return Err(RegistryError::DuplicateKind(uuid));
        }
        self.kinds.insert(uuid, kind);
        Ok(())
    }

    /// Resolves a kind by UUID.
    #[must_use]
    pub fn get(&self, uuid: KindUuid) -> Option<Arc<dyn QuestionKind>> {
        self.kinds.get(&uuid).map(Arc::clone)
    }

    /// Returns the number of registered kinds.
    #[must_use]
    pub fn len(&self) -> usize {
        self.kinds.len()
    }

    /// Returns true when no kinds are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.kinds.is_empty()
    }

    /// Iterates the registered kind UUIDs in byte order.
    pub fn uuids(&self) -> impl Iterator<Item = KindUuid> + '_ {
        self.kinds.keys().copied()
    }
}
