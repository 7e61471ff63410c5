// crates/buildfact-core/src/core/codec.rs
// ============================================================================
// Module: Payload Codec
// Description: Deterministic byte codec for question and answer payloads.
// Purpose: Give kind implementations a stable serialized form for database keys.
// Dependencies: thiserror
// ============================================================================

//! ## Overview
//! Questions and answers persist as opaque byte strings; the serialized form
//! is their sole identity in the database. This module provides the writer
//! and reader kinds use to produce that form deterministically: big-endian
//! fixed-width integers and length-prefixed byte strings, nothing
//! self-describing.
//! Invariants:
//! - Writing then reading the same field sequence round-trips exactly.
//! - A reader never panics on malformed input; it fails with a stable error.

// ============================================================================
// SECTION: Imports
// ============================================================================

use thiserror::Error;

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Codec errors for payload (de)serialization.
///
/// # Invariants
/// - Variants are stable for programmatic handling.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CodecError {
    /// Input ended before the requested field.
    #[error("payload truncated")]
    Truncated,
    /// Input contained bytes past the final field.
    #[error("payload has {remaining} trailing bytes")]
    Trailing {
        /// Number of unread bytes.
        remaining: usize,
    },
    /// Input decoded but violated a field constraint.
    #[error("payload invalid: {0}")]
    Invalid(String),
}

// ============================================================================
// SECTION: Writer
// ============================================================================

/// Appends big-endian fields to an owned buffer.
#[derive(Debug, Default)]
pub struct ByteWriter {
    /// Accumulated output bytes.
    buffer: Vec<u8>,
}

impl ByteWriter {
    /// Creates an empty writer.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            buffer: Vec::new(),
        }
    }

    /// Appends a single byte.
    pub fn put_u8(&mut self, value: u8) {
        self.buffer.push(value);
    }

    /// Appends a big-endian `u32`.
    pub fn put_u32(&mut self, value: u32) {
        self.buffer.extend_from_slice(&value.to_be_bytes());
    }

    /// Appends a big-endian `u64`.
    pub fn put_u64(&mut self, value: u64) {
        self.buffer.extend_from_slice(&value.to_be_bytes());
    }

    /// Appends a `u32`-length-prefixed byte string. Payloads past the
    /// four-byte length prefix are truncated to keep the prefix honest.
    pub fn put_bytes(&mut self, bytes: &[u8]) {
        let length = u32::try_from(bytes.len()).unwrap_or(u32::MAX);
        self.put_u32(length);
        self.buffer.extend_from_slice(bytes.get(.. length as usize).unwrap_or(bytes));
    }

    /// Appends a `u32`-length-prefixed UTF-8 string.
    pub fn put_str(&mut self, value: &str) {
        self.put_bytes(value.as_bytes());
    }

    /// Returns the accumulated bytes.
    #[must_use]
    pub fn into_bytes(self) -> Vec<u8> {
        self.buffer
    }
}

// ============================================================================
// SECTION: Reader
// ============================================================================

/// Consumes big-endian fields from a borrowed buffer.
#[derive(Debug)]
pub struct ByteReader<'a> {
    /// Unread remainder of the input.
    bytes: &'a [u8],
}

impl<'a> ByteReader<'a> {
    /// Creates a reader over `bytes`.
    #[must_use]
    pub const fn new(bytes: &'a [u8]) -> Self {
        Self {
            bytes,
        }
    }

    /// Splits `count` bytes off the front of the input.
    fn take(&mut self, count: usize) -> Result<&'a [u8], CodecError> {
        if self.bytes.len() < count {
            return Err(CodecError::Truncated);
        }
        let (head, tail) = self.bytes.split_at(count);
        self.bytes = tail;
        Ok(head)
    }

    /// Reads a single byte.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::Truncated`] when the input is exhausted.
    pub fn take_u8(&mut self) -> Result<u8, CodecError> {
        Ok(self.take(1)?[0])
    }

    /// Reads a big-endian `u32`.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::Truncated`] when fewer than four bytes remain.
    pub fn take_u32(&mut self) -> Result<u32, CodecError> {
        let bytes = self.take(4)?;
        let bytes: [u8; 4] = bytes.try_into().map_err(|_| CodecError::Truncated)?;
        Ok(u32::from_be_bytes(bytes))
    }

    /// Reads a big-endian `u64`.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::Truncated`] when fewer than eight bytes remain.
    pub fn take_u64(&mut self) -> Result<u64, CodecError> {
        let bytes = self.take(8)?;
        let bytes: [u8; 8] = bytes.try_into().map_err(|_| CodecError::Truncated)?;
        Ok(u64::from_be_bytes(bytes))
    }

    /// Reads a `u32`-length-prefixed byte string.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::Truncated`] when the prefix or body is short.
    pub fn take_bytes(&mut self) -> Result<&'a [u8], CodecError> {
        let length = self.take_u32()? as usize;
        self.take(length)
    }

    /// Reads a `u32`-length-prefixed UTF-8 string.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::Truncated`] on short input and
    /// [`CodecError::Invalid`] on non-UTF-8 bytes.
    pub fn take_str(&mut self) -> Result<String, CodecError> {
        let bytes = self.take_bytes()?;
        String::from_utf8(bytes.to_vec())
            .map_err(|err| CodecError::Invalid(format!("string field not utf-8: {err}")))
    }

    /// Asserts the input is fully consumed.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::Trailing`] when unread bytes remain.
    pub fn finish(self) -> Result<(), CodecError> {
        if self.bytes.is_empty() {
            Ok(())
        } else {
            Err(CodecError::Trailing {
                remaining: self.bytes.len(),
            })
        }
    }
}
