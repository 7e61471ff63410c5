// crates/buildfact-core/src/core/identifiers.rs
// ============================================================================
// Module: Kind Identifiers
// Description: Stable identity for question classes across runs.
// Purpose: Key the kind registry and the persistent answer/dependency tables.
// Dependencies: uuid
// ============================================================================

//! ## Overview
//! A question class is identified by a 16-byte UUID that stays stable across
//! runs and engine versions. The raw bytes are the on-disk identity in the
//! database BLOB columns; the in-memory value keys the kind registry.
//! Invariants:
//! - The UUID of a kind never changes once answers are persisted under it.
//! - Two kinds sharing a UUID are a caller error surfaced at registration.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fmt;

use uuid::Uuid;

// ============================================================================
// SECTION: Kind UUID
// ============================================================================

/// Stable 16-byte identity for a question class.
///
/// # Invariants
/// - The byte representation is the sole persistent identity of a kind.
/// - Ordering is the byte ordering, so the value can key a `BTreeMap`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct KindUuid(Uuid);

impl KindUuid {
    /// Creates a kind UUID from a 128-bit literal.
    ///
    /// Usable in `const` position so kinds can declare their identity as an
    /// associated constant.
    #[must_use]
    pub const fn from_u128(value: u128) -> Self {
        Self(Uuid::from_u128(value))
    }

    /// Creates a kind UUID from raw bytes.
    #[must_use]
    pub const fn from_bytes(bytes: [u8; 16]) -> Self {
        Self(Uuid::from_bytes(bytes))
    }

    /// Parses a kind UUID from a byte slice, returning `None` unless the
    /// slice is exactly 16 bytes.
    #[must_use]
    pub fn from_slice(bytes: &[u8]) -> Option<Self> {
        let bytes: [u8; 16] = bytes.try_into().ok()?;
        Some(Self::from_bytes(bytes))
    }

    /// Returns the raw 16 bytes stored in the database.
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; 16] {
        self.0.as_bytes()
    }
}

impl fmt::Display for KindUuid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}
