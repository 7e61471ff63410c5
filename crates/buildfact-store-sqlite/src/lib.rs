// crates/buildfact-store-sqlite/src/lib.rs
// ============================================================================
// Module: Buildfact SQLite Store
// Description: Durable BuildDatabase backed by SQLite.
// Purpose: Persist memoized facts and dependency edges across runs.
// Dependencies: buildfact-core, rusqlite
// ============================================================================

//! ## Overview
//! Durable [`buildfact_core::BuildDatabase`] implementation over SQLite.
//! See [`store::SqliteDatabase`] for the schema and invalidation query.

/// SQLite-backed build database implementation.
pub mod store;

pub use store::SqliteDatabase;
pub use store::SqliteDatabaseConfig;
pub use store::SqliteDatabaseError;
pub use store::SqliteJournalMode;
pub use store::SqliteSyncMode;
