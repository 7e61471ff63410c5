// crates/buildfact-core/tests/proptest_codec.rs
// ============================================================================
// Module: Codec Property-Based Tests
// Description: Round-trip and robustness properties for the payload codec.
// Purpose: Detect panics and asymmetries across wide input ranges.
// ============================================================================

//! Property-based tests for the payload codec:
//! - Writing then reading any field sequence round-trips exactly.
//! - Readers never panic on arbitrary input; they fail with stable errors.

#![allow(
    clippy::panic,
    clippy::print_stdout,
    clippy::print_stderr,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::use_debug,
    clippy::dbg_macro,
    clippy::panic_in_result_fn,
    clippy::unwrap_in_result,
    reason = "Test-only assertions and helpers are permitted."
)]

use buildfact_core::ByteReader;
use buildfact_core::ByteWriter;
use buildfact_core::CodecError;
use proptest::prelude::*;

proptest! {
    #[test]
    fn scalar_fields_round_trip(a in any::<u8>(), b in any::<u32>(), c in any::<u64>()) {
        let mut writer = ByteWriter::new();
        writer.put_u8(a);
        writer.put_u32(b);
        writer.put_u64(c);
        let bytes = writer.into_bytes();

        let mut reader = ByteReader::new(&bytes);
        prop_assert_eq!(reader.take_u8().unwrap(), a);
        prop_assert_eq!(reader.take_u32().unwrap(), b);
        prop_assert_eq!(reader.take_u64().unwrap(), c);
        prop_assert!(reader.finish().is_ok());
    }

    #[test]
    fn strings_and_bytes_round_trip(text in ".*", blob in prop::collection::vec(any::<u8>(), 0 .. 512)) {
        let mut writer = ByteWriter::new();
        writer.put_str(&text);
        writer.put_bytes(&blob);
        let bytes = writer.into_bytes();

        let mut reader = ByteReader::new(&bytes);
        prop_assert_eq!(reader.take_str().unwrap(), text);
        prop_assert_eq!(reader.take_bytes().unwrap(), blob.as_slice());
        prop_assert!(reader.finish().is_ok());
    }

    #[test]
    fn serialization_is_deterministic(text in ".*") {
        let encode = |value: &str| {
            let mut writer = ByteWriter::new();
            writer.put_str(value);
            writer.into_bytes()
        };
        prop_assert_eq!(encode(&text), encode(&text));
    }

    #[test]
    fn truncated_input_is_rejected_without_panicking(
        text in ".{1,64}",
        cut in any::<prop::sample::Index>(),
    ) {
        let mut writer = ByteWriter::new();
        writer.put_str(&text);
        let bytes = writer.into_bytes();
        let cut = cut.index(bytes.len());

        let mut reader = ByteReader::new(&bytes[.. cut]);
        let result = reader.take_str();
        prop_assert!(matches!(result, Err(CodecError::Truncated) | Err(CodecError::Invalid(_))));
    }

    #[test]
    fn trailing_bytes_are_reported(extra in prop::collection::vec(any::<u8>(), 1 .. 32)) {
        let mut writer = ByteWriter::new();
        writer.put_u32(7);
        let mut bytes = writer.into_bytes();
        bytes.extend_from_slice(&extra);

        let mut reader = ByteReader::new(&bytes);
        reader.take_u32().unwrap();
        let finish = reader.finish();
        let is_trailing_with_len = matches!(finish, Err(CodecError::Trailing { remaining }) if remaining == extra.len());
        prop_assert!(is_trailing_with_len);
    }
}
