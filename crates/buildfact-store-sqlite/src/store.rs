// crates/buildfact-store-sqlite/src/store.rs
// ============================================================================
// Module: SQLite Build Database
// Description: Durable BuildDatabase backed by SQLite.
// Purpose: Persist question→answer facts and dependency edges across runs.
// Dependencies: buildfact-core, rusqlite, serde, thiserror
// ============================================================================

//! ## Overview
//! This module implements the durable [`BuildDatabase`] over two SQLite
//! tables: memoized `answers` and `dependencies` edges. Invalidation runs a
//! recursive CTE seeded by a scalar UDF that recomputes each stored fact
//! through the caller's kind registry; rows whose kind is unknown are
//! conservatively treated as stale. The engine refuses databases linked
//! against a SQLite without recursive CTE support.
//! Invariants:
//! - Serialized bytes are the sole identity of a question.
//! - Dependency edges are never uniqued; duplicates are tolerated.
//! - Rows are deleted only by `recheck_all`.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::panic::AssertUnwindSafe;
use std::path::Path;
use std::path::PathBuf;
use std::sync::Mutex;
use std::time::Duration;

use buildfact_core::BuildDatabase;
use buildfact_core::KindRegistry;
use buildfact_core::KindUuid;
use buildfact_core::StoreError;
use buildfact_core::core::question::Answer;
use buildfact_core::core::question::Question;
use buildfact_core::core::question::QuestionKind;
use rusqlite::Connection;
use rusqlite::OpenFlags;
use rusqlite::OptionalExtension;
use rusqlite::functions::FunctionFlags;
use rusqlite::params;
use serde::Deserialize;
use thiserror::Error;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Default busy timeout (ms).
const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5_000;

/// Oldest SQLite release with recursive CTE support.
const MIN_SQLITE_VERSION_NUMBER: i32 = 3_008_003;

/// Schema creation for the two relations.
const SQL_CREATE_TABLES: &str = "\
CREATE TABLE IF NOT EXISTS dependencies(
    from_question_uuid BLOB NOT NULL,
    from_question_data BLOB NOT NULL,
    to_question_uuid BLOB NOT NULL,
    to_question_data BLOB NOT NULL);
CREATE TABLE IF NOT EXISTS answers(
    question_uuid BLOB NOT NULL,
    question_data BLOB NOT NULL,
    answer_data BLOB NOT NULL);
";

/// Insert of one dependency edge.
const SQL_INSERT_DEPENDENCY: &str = "\
INSERT INTO dependencies(
    from_question_uuid,
    from_question_data,
    to_question_uuid,
    to_question_data)
VALUES (?1, ?2, ?3, ?4)";

/// Insert of one memoized fact.
const SQL_INSERT_ANSWER: &str = "\
INSERT INTO answers(
    question_uuid,
    question_data,
    answer_data)
VALUES (?1, ?2, ?3)";

/// Lookup of a memoized fact by question identity.
const SQL_SELECT_ANSWER: &str = "\
SELECT answer_data
    FROM answers
    WHERE question_uuid = ?1
      AND question_data = ?2";

/// Transitive invalidation: seed with facts whose recomputed answer no
/// longer matches, walk up the dependency graph, delete every row reached.
const SQL_RECHECK_ALL: &str = "\
WITH RECURSIVE invalid_answers(
        question_uuid,
        question_data) AS (
    SELECT question_uuid, question_data
        FROM answers
        WHERE question_answer_matches(
                  question_uuid,
                  question_data,
                  answer_data) = 0

    UNION ALL

    SELECT dep.from_question_uuid,
           dep.from_question_data
        FROM invalid_answers AS invalid
        INNER JOIN dependencies AS dep
        ON dep.to_question_uuid = invalid.question_uuid
           AND dep.to_question_data = invalid.question_data
)
DELETE FROM answers WHERE _rowid_ IN (
    SELECT answers._rowid_ FROM answers
        INNER JOIN invalid_answers AS invalid
        ON answers.question_uuid = invalid.question_uuid
           AND answers.question_data = invalid.question_data)";

// ============================================================================
// SECTION: Config
// ============================================================================

/// SQLite journal mode configuration.
///
/// # Invariants
/// - Values map 1:1 to SQLite `journal_mode` pragma settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SqliteJournalMode {
    /// WAL journal mode (recommended).
    #[default]
    Wal,
    /// Delete journal mode (legacy).
    Delete,
}

impl SqliteJournalMode {
    /// Returns the SQLite pragma value.
    #[must_use]
    pub const fn pragma_value(self) -> &'static str {
        match self {
            Self::Wal => "wal",
            Self::Delete => "delete",
        }
    }
}

/// SQLite sync mode configuration.
///
/// # Invariants
/// - Values map 1:1 to SQLite `synchronous` pragma settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SqliteSyncMode {
    /// Full synchronous mode (safest).
    #[default]
    Full,
    /// Normal synchronous mode (balanced).
    Normal,
}

impl SqliteSyncMode {
    /// Returns the SQLite pragma value.
    #[must_use]
    pub const fn pragma_value(self) -> &'static str {
        match self {
            Self::Full => "full",
            Self::Normal => "normal",
        }
    }
}

/// Configuration for the SQLite build database.
///
/// # Invariants
/// - `path` must resolve to a file path (not a directory).
/// - `busy_timeout_ms` is interpreted as milliseconds.
#[derive(Debug, Clone, Deserialize)]
pub struct SqliteDatabaseConfig {
    /// Path to the SQLite database file; created when missing.
    pub path: PathBuf,
    /// Busy timeout in milliseconds; the retry arm of the error policy.
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,
    /// SQLite journal mode.
    #[serde(default)]
    pub journal_mode: SqliteJournalMode,
    /// SQLite sync mode.
    #[serde(default)]
    pub sync_mode: SqliteSyncMode,
}

impl SqliteDatabaseConfig {
    /// Creates a config for `path` with defaults everywhere else.
    #[must_use]
    pub fn for_path(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            busy_timeout_ms: default_busy_timeout_ms(),
            journal_mode: SqliteJournalMode::default(),
            sync_mode: SqliteSyncMode::default(),
        }
    }
}

/// Returns the default busy timeout for SQLite connections.
const fn default_busy_timeout_ms() -> u64 {
    DEFAULT_BUSY_TIMEOUT_MS
}

// ============================================================================
// SECTION: Errors
// ============================================================================

/// SQLite build database errors.
///
/// # Invariants
/// - Variants are stable for programmatic handling.
/// - Messages avoid embedding raw payload bytes.
#[derive(Debug, Error, Clone)]
pub enum SqliteDatabaseError {
    /// Database I/O error.
    #[error("sqlite build database io error: {0}")]
    Io(String),
    /// SQLite engine error.
    #[error("sqlite build database db error: {0}")]
    Db(String),
    /// A stored payload failed to deserialize.
    #[error("sqlite build database codec error: {0}")]
    Codec(String),
    /// Invalid configuration or arguments.
    #[error("sqlite build database invalid data: {0}")]
    Invalid(String),
    /// The linked SQLite lacks a required capability.
    #[error("sqlite build database unsupported: {0}")]
    Unsupported(String),
}

impl From<SqliteDatabaseError> for StoreError {
    fn from(error: SqliteDatabaseError) -> Self {
        match error {
            SqliteDatabaseError::Io(message) => Self::Io(message),
            SqliteDatabaseError::Db(message) => Self::Db(message),
            SqliteDatabaseError::Codec(message) => Self::Codec(message),
            SqliteDatabaseError::Invalid(message) => Self::Invalid(message),
            SqliteDatabaseError::Unsupported(message) => Self::Unsupported(message),
        }
    }
}

/// Maps a rusqlite error onto the store error space.
fn db_error(error: &rusqlite::Error) -> SqliteDatabaseError {
    SqliteDatabaseError::Db(error.to_string())
}

// ============================================================================
// SECTION: Open Helpers
// ============================================================================

/// Validates the configured database path.
fn validate_database_path(path: &Path) -> Result<(), SqliteDatabaseError> {
    if path.as_os_str().is_empty() {
        return Err(SqliteDatabaseError::Invalid("database path is empty".to_string()));
    }
    if path.is_dir() {
        return Err(SqliteDatabaseError::Invalid(format!(
            "database path is a directory: {}",
            path.display()
        )));
    }
    Ok(())
}

/// Creates the parent directory of the database file when missing.
fn ensure_parent_dir(path: &Path) -> Result<(), SqliteDatabaseError> {
    let Some(parent) = path.parent() else {
        return Ok(());
    };
    if parent.as_os_str().is_empty() {
        return Ok(());
    }
    std::fs::create_dir_all(parent).map_err(|err| SqliteDatabaseError::Io(err.to_string()))
}

/// Refuses SQLite builds predating recursive CTE support.
fn ensure_sqlite_version() -> Result<(), SqliteDatabaseError> {
    let version = rusqlite::version_number();
    if version < MIN_SQLITE_VERSION_NUMBER {
        return Err(SqliteDatabaseError::Unsupported(format!(
            "sqlite {} lacks recursive common table expressions (need >= 3.8.3)",
            rusqlite::version()
        )));
    }
    Ok(())
}

/// Opens a connection and applies the configured pragmas.
fn open_connection(config: &SqliteDatabaseConfig) -> Result<Connection, SqliteDatabaseError> {
    let flags = OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_CREATE;
    let connection =
        Connection::open_with_flags(&config.path, flags).map_err(|err| db_error(&err))?;
    connection
        .busy_timeout(Duration::from_millis(config.busy_timeout_ms))
        .map_err(|err| db_error(&err))?;
    connection
        .pragma_update(None, "journal_mode", config.journal_mode.pragma_value())
        .map_err(|err| db_error(&err))?;
    connection
        .pragma_update(None, "synchronous", config.sync_mode.pragma_value())
        .map_err(|err| db_error(&err))?;
    Ok(connection)
}

/// Creates the two relations when missing.
fn initialize_schema(connection: &Connection) -> Result<(), SqliteDatabaseError> {
    connection.execute_batch(SQL_CREATE_TABLES).map_err(|err| db_error(&err))
}

/// Returns 1 when the stored fact still matches reality, resolving the kind
/// through `kinds`. Unknown kinds and codec or query failures return 0, so
/// pruning never depends on incomplete kind registration.
fn answer_matches(
    kinds: &KindRegistry,
    uuid_bytes: &[u8],
    question_bytes: &[u8],
    answer_bytes: &[u8],
) -> bool {
    let Some(uuid) = KindUuid::from_slice(uuid_bytes) else {
        return false;
    };
    let Some(kind) = kinds.get(uuid) else {
        return false;
    };
    let Ok(question) = kind.deserialize_question(question_bytes) else {
        return false;
    };
    let Ok(answer) = kind.query_answer(question.as_ref()) else {
        return false;
    };
    answer.serialize() == answer_bytes
}

// ============================================================================
// SECTION: Database
// ============================================================================

/// SQLite-backed build database.
///
/// # Invariants
/// - All operations serialize on the database-wide mutex.
/// - `recheck_all` is the only operation that deletes rows.
pub struct SqliteDatabase {
    /// The single connection guarded by the database-wide mutex.
    connection: Mutex<Connection>,
}

impl SqliteDatabase {
    /// Opens or creates the database at the configured path.
    ///
    /// # Errors
    ///
    /// Returns [`SqliteDatabaseError`] when the path is invalid, the linked
    /// SQLite is too old for recursive CTEs, or opening fails.
    pub fn open(config: &SqliteDatabaseConfig) -> Result<Self, SqliteDatabaseError> {
        ensure_sqlite_version()?;
        validate_database_path(&config.path)?;
        ensure_parent_dir(&config.path)?;
        let connection = open_connection(config)?;
        initialize_schema(&connection)?;
        Ok(Self {
            connection: Mutex::new(connection),
        })
    }

    /// Locks the connection, surfacing poisoning as an I/O error.
    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>, SqliteDatabaseError> {
        self.connection
            .lock()
            .map_err(|_| SqliteDatabaseError::Io("sqlite mutex poisoned".to_string()))
    }

    /// Returns the number of rows in `answers`.
    ///
    /// # Errors
    ///
    /// Returns [`SqliteDatabaseError`] when the count query fails.
    pub fn answer_count(&self) -> Result<u64, SqliteDatabaseError> {
        let connection = self.lock()?;
        let count: i64 = connection
            .query_row("SELECT COUNT(*) FROM answers", [], |row| row.get(0))
            .map_err(|err| db_error(&err))?;
        Ok(u64::try_from(count).unwrap_or(0))
    }

    /// Returns the number of rows in `dependencies`, duplicates included.
    ///
    /// # Errors
    ///
    /// Returns [`SqliteDatabaseError`] when the count query fails.
    pub fn dependency_count(&self) -> Result<u64, SqliteDatabaseError> {
        let connection = self.lock()?;
        let count: i64 = connection
            .query_row("SELECT COUNT(*) FROM dependencies", [], |row| row.get(0))
            .map_err(|err| db_error(&err))?;
        Ok(u64::try_from(count).unwrap_or(0))
    }
}

impl BuildDatabase for SqliteDatabase {
    fn record_dependency(
        &self,
        from: &dyn Question,
        to: &dyn Question,
    ) -> Result<(), StoreError> {
        let connection = self.lock().map_err(StoreError::from)?;
        let mut statement =
            connection.prepare_cached(SQL_INSERT_DEPENDENCY).map_err(|err| db_error(&err))?;
        statement
            .execute(params![
                from.kind_uuid().as_bytes().as_slice(),
                from.serialize(),
                to.kind_uuid().as_bytes().as_slice(),
                to.serialize(),
            ])
            .map_err(|err| db_error(&err))?;
        Ok(())
    }

    fn record_answer(
        &self,
        question: &dyn Question,
        answer: &dyn Answer,
    ) -> Result<(), StoreError> {
        let connection = self.lock().map_err(StoreError::from)?;
        let mut statement =
            connection.prepare_cached(SQL_INSERT_ANSWER).map_err(|err| db_error(&err))?;
        statement
            .execute(params![
                question.kind_uuid().as_bytes().as_slice(),
                question.serialize(),
                answer.serialize(),
            ])
            .map_err(|err| db_error(&err))?;
        Ok(())
    }

    fn look_up_answer(
        &self,
        question: &dyn Question,
        kind: &dyn QuestionKind,
    ) -> Result<Option<Box<dyn Answer>>, StoreError> {
        if kind.uuid() != question.kind_uuid() {
            return Err(StoreError::Invalid(format!(
                "kind mismatch: question {} looked up through kind {}",
                question.kind_uuid(),
                kind.uuid()
            )));
        }
        let bytes: Option<Vec<u8>> = {
            let connection = self.lock().map_err(StoreError::from)?;
            let mut statement =
                connection.prepare_cached(SQL_SELECT_ANSWER).map_err(|err| db_error(&err))?;
            statement
                .query_row(
                    params![
                        question.kind_uuid().as_bytes().as_slice(),
                        question.serialize(),
                    ],
                    |row| row.get(0),
                )
                .optional()
                .map_err(|err| db_error(&err))?
        };
        let Some(bytes) = bytes else {
            return Ok(None);
        };
        let answer = kind
            .deserialize_answer(&bytes)
            .map_err(|err| StoreError::Codec(err.to_string()))?;
        Ok(Some(answer))
    }

    fn recheck_all(&self, kinds: &KindRegistry) -> Result<u64, StoreError> {
        let connection = self.lock().map_err(StoreError::from)?;
        // Kind trait objects carry no unwind guarantees; the UDF body never
        // panics across the FFI boundary, it only compares bytes.
        let registry = AssertUnwindSafe(kinds.clone());
        connection
            .create_scalar_function(
                "question_answer_matches",
                3,
                FunctionFlags::SQLITE_UTF8 | FunctionFlags::SQLITE_DETERMINISTIC,
                move |ctx| {
                    let uuid_bytes: Vec<u8> = ctx.get(0)?;
                    let question_bytes: Vec<u8> = ctx.get(1)?;
                    let answer_bytes: Vec<u8> = ctx.get(2)?;
                    Ok(i64::from(answer_matches(
                        &registry.0,
                        &uuid_bytes,
                        &question_bytes,
                        &answer_bytes,
                    )))
                },
            )
            .map_err(|err| db_error(&err))?;
        let deleted = connection.execute(SQL_RECHECK_ALL, []).map_err(|err| db_error(&err))?;
        Ok(u64::try_from(deleted).unwrap_or(u64::MAX))
    }
}
