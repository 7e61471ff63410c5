// crates/buildfact-core/src/runtime/memory.rs
// ============================================================================
// Module: In-Memory Database
// Description: BuildDatabase over in-memory maps, for tests and embedding.
// Purpose: Honor the full store contract without a file on disk.
// Dependencies: crate::core, crate::interfaces
// ============================================================================

//! ## Overview
//! The in-memory database implements the same contract as the durable
//! store: serialized bytes are the sole identity, dependency edges tolerate
//! duplicates, and `recheck_all` performs the same transitive invalidation
//! by recomputing answers through the registry. Nothing survives the
//! process; use the SQLite store for persistence.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::sync::Mutex;
use std::sync::PoisonError;

use crate::core::identifiers::KindUuid;
use crate::core::question::Answer;
use crate::core::question::Question;
use crate::core::question::QuestionKind;
use crate::core::registry::KindRegistry;
use crate::interfaces::BuildDatabase;
use crate::interfaces::StoreError;

// ============================================================================
// SECTION: State
// ============================================================================

/// Identity of a question in the store: kind UUID plus serialized bytes.
type FactKey = (KindUuid, Vec<u8>);

/// Interior tables.
#[derive(Default)]
struct MemoryState {
    /// Memoized facts keyed by question identity.
    answers: BTreeMap<FactKey, Vec<u8>>,
    /// Dependency edges, direction `from` depends on `to`. Duplicates kept.
    dependencies: Vec<(FactKey, FactKey)>,
}

/// In-memory `BuildDatabase`.
#[derive(Default)]
pub struct InMemoryDatabase {
    /// Tables behind the database-wide lock.
    state: Mutex<MemoryState>,
}

impl InMemoryDatabase {
    /// Creates an empty database.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of memoized facts.
    #[must_use]
    pub fn answer_count(&self) -> usize {
        self.lock().answers.len()
    }

    /// Returns the number of recorded dependency edges, duplicates included.
    #[must_use]
    pub fn dependency_count(&self) -> usize {
        self.lock().dependencies.len()
    }

    /// Locks the state, recovering from poisoning.
    fn lock(&self) -> std::sync::MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Returns the identity key of `question`.
    fn key_of(question: &dyn Question) -> FactKey {
        (question.kind_uuid(), question.serialize())
    }

    /// Returns true when the stored fact still matches reality, resolving
    /// the kind through `kinds`. Unknown kinds are conservatively stale.
    fn fact_matches(kinds: &KindRegistry, key: &FactKey, answer_bytes: &[u8]) -> bool {
        let Some(kind) = kinds.get(key.0) else {
            return false;
        };
        let Ok(question) = kind.deserialize_question(&key.1) else {
            return false;
        };
        let Ok(answer) = kind.query_answer(question.as_ref()) else {
            return false;
        };
        answer.serialize() == answer_bytes
    }
}

impl BuildDatabase for InMemoryDatabase {
    fn record_dependency(
        &self,
        from: &dyn Question,
        to: &dyn Question,
    ) -> Result<(), StoreError> {
        let edge = (Self::key_of(from), Self::key_of(to));
        self.lock().dependencies.push(edge);
        Ok(())
    }

    fn record_answer(
        &self,
        question: &dyn Question,
        answer: &dyn Answer,
    ) -> Result<(), StoreError> {
        let key = Self::key_of(question);
        self.lock().answers.insert(key, answer.serialize());
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
        let key = Self::key_of(question);
        let bytes = {
            let state = self.lock();
            let Some(bytes) = state.answers.get(&key) else {
                return Ok(None);
            };
            bytes.clone()
        };
        let answer = kind
            .deserialize_answer(&bytes)
            .map_err(|err| StoreError::Codec(err.to_string()))?;
        Ok(Some(answer))
    }

    fn recheck_all(&self, kinds: &KindRegistry) -> Result<u64, StoreError> {
        let mut state = self.lock();

        // Seed with facts that no longer match reality.
        let mut invalid: BTreeSet<FactKey> = state
            .answers
            .iter()
            .filter(|(key, answer_bytes)| !Self::fact_matches(kinds, key, answer_bytes))
            .map(|(key, _)| key.clone())
            .collect();

        // Walk up the dependency graph to a fixpoint.
        loop {
            let mut grew = false;
            for (from, to) in &state.dependencies {
                if invalid.contains(to) && !invalid.contains(from) {
                    invalid.insert(from.clone());
                    grew = true;
                }
            }
            if !grew {
                break;
            }
        }

        let before = state.answers.len();
        state.answers.retain(|key, _| !invalid.contains(key));
        Ok(u64::try_from(before - state.answers.len()).unwrap_or(u64::MAX))
    }
}
