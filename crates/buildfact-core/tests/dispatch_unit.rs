// crates/buildfact-core/tests/dispatch_unit.rs
// ============================================================================
// Module: Dispatch Loop Unit Tests
// Description: End-to-end engine runs over the in-memory database.
// Purpose: Validate cache short-circuit, need continuations, and failure
//          propagation through the dispatch loop.
// ============================================================================

//! Engine tests over the in-memory database:
//! - A rule needing two children receives both answers and records three
//!   facts plus two dependency edges.
//! - A failed child fails the root without writing a root answer row.
//! - Cached answers short-circuit dispatch entirely.
//! - Stale facts are invalidated and reanswered on the next build.

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

use std::any::Any;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::Mutex;

use buildfact_core::Answer;
use buildfact_core::BuildDatabase;
use buildfact_core::BuildTelemetry;
use buildfact_core::ByteReader;
use buildfact_core::ByteWriter;
use buildfact_core::CodecError;
use buildfact_core::CountingTelemetry;
use buildfact_core::DispatchError;
use buildfact_core::KindRegistry;
use buildfact_core::KindUuid;
use buildfact_core::Question;
use buildfact_core::QuestionKind;
use buildfact_core::QueryError;
use buildfact_core::RuleDispatcher;
use buildfact_core::downcast_answer;
use buildfact_core::downcast_question;
use buildfact_core::runtime::AnswerContext;
use buildfact_core::runtime::BuildError;
use buildfact_core::runtime::BuildFailure;
use buildfact_core::runtime::Engine;
use buildfact_core::runtime::EngineConfig;
use buildfact_core::runtime::EngineError;
use buildfact_core::runtime::FutureState;
use buildfact_core::runtime::InMemoryDatabase;

// ============================================================================
// SECTION: Kinds
// ============================================================================

const CELL_KIND_UUID: KindUuid = KindUuid::from_u128(0x5a1d_07c9_84f2_4f6e_b93a_6c0d_4af1_9e55);
const CONCAT_KIND_UUID: KindUuid = KindUuid::from_u128(0xc4e7_3b62_5d80_4c11_a2f6_98d3_07bb_421e);

/// Shared name→value map standing in for the state of the world.
type CellMap = Arc<Mutex<BTreeMap<String, String>>>;

fn cell_map(cells: &[(&str, &str)]) -> CellMap {
    Arc::new(Mutex::new(
        cells.iter().map(|(name, value)| ((*name).to_string(), (*value).to_string())).collect(),
    ))
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct CellQuestion {
    name: String,
}

impl CellQuestion {
    fn boxed(name: &str) -> Box<dyn Question> {
        Box::new(Self {
            name: name.to_string(),
        })
    }
}

impl Question for CellQuestion {
    fn kind_uuid(&self) -> KindUuid {
        CELL_KIND_UUID
    }

    fn serialize(&self) -> Vec<u8> {
        let mut writer = ByteWriter::new();
        writer.put_str(&self.name);
        writer.into_bytes()
    }

    fn question_eq(&self, other: &dyn Question) -> bool {
        downcast_question::<Self>(other).is_some_and(|question| question == self)
    }

    fn clone_question(&self) -> Box<dyn Question> {
        Box::new(self.clone())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct ConcatQuestion {
    left: String,
    right: String,
}

impl ConcatQuestion {
    fn boxed(left: &str, right: &str) -> Box<dyn Question> {
        Box::new(Self {
            left: left.to_string(),
            right: right.to_string(),
        })
    }
}

impl Question for ConcatQuestion {
    fn kind_uuid(&self) -> KindUuid {
        CONCAT_KIND_UUID
    }

    fn serialize(&self) -> Vec<u8> {
        let mut writer = ByteWriter::new();
        writer.put_str(&self.left);
        writer.put_str(&self.right);
        writer.into_bytes()
    }

    fn question_eq(&self, other: &dyn Question) -> bool {
        downcast_question::<Self>(other).is_some_and(|question| question == self)
    }

    fn clone_question(&self) -> Box<dyn Question> {
        Box::new(self.clone())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct TextAnswer {
    text: String,
}

impl TextAnswer {
    fn boxed(text: &str) -> Box<dyn Answer> {
        Box::new(Self {
            text: text.to_string(),
        })
    }
}

impl Answer for TextAnswer {
    fn serialize(&self) -> Vec<u8> {
        let mut writer = ByteWriter::new();
        writer.put_str(&self.text);
        writer.into_bytes()
    }

    fn answer_eq(&self, other: &dyn Answer) -> bool {
        downcast_answer::<Self>(other).is_some_and(|answer| answer == self)
    }

    fn clone_answer(&self) -> Box<dyn Answer> {
        Box::new(self.clone())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

fn deserialize_text_answer(bytes: &[u8]) -> Result<Box<dyn Answer>, CodecError> {
    let mut reader = ByteReader::new(bytes);
    let text = reader.take_str()?;
    reader.finish()?;
    Ok(Box::new(TextAnswer {
        text,
    }))
}

struct CellKind {
    cells: CellMap,
}

impl QuestionKind for CellKind {
    fn uuid(&self) -> KindUuid {
        CELL_KIND_UUID
    }

    fn query_answer(&self, question: &dyn Question) -> Result<Box<dyn Answer>, QueryError> {
        let question = downcast_question::<CellQuestion>(question)
            .ok_or_else(|| QueryError::Unanswerable("not a cell question".to_string()))?;
        let cells = self.cells.lock().unwrap();
        let value = cells
            .get(&question.name)
            .ok_or_else(|| QueryError::Unanswerable(format!("no cell named {}", question.name)))?;
        Ok(Box::new(TextAnswer {
            text: value.clone(),
        }))
    }

    fn deserialize_question(&self, bytes: &[u8]) -> Result<Box<dyn Question>, CodecError> {
        let mut reader = ByteReader::new(bytes);
        let name = reader.take_str()?;
        reader.finish()?;
        Ok(Box::new(CellQuestion {
            name,
        }))
    }

    fn deserialize_answer(&self, bytes: &[u8]) -> Result<Box<dyn Answer>, CodecError> {
        deserialize_text_answer(bytes)
    }
}

struct ConcatKind {
    cells: CellMap,
}

impl QuestionKind for ConcatKind {
    fn uuid(&self) -> KindUuid {
        CONCAT_KIND_UUID
    }

    fn query_answer(&self, question: &dyn Question) -> Result<Box<dyn Answer>, QueryError> {
        let question = downcast_question::<ConcatQuestion>(question)
            .ok_or_else(|| QueryError::Unanswerable("not a concat question".to_string()))?;
        let cells = self.cells.lock().unwrap();
        let left = cells
            .get(&question.left)
            .ok_or_else(|| QueryError::Unanswerable(format!("no cell named {}", question.left)))?;
        let right = cells.get(&question.right).ok_or_else(|| {
            QueryError::Unanswerable(format!("no cell named {}", question.right))
        })?;
        Ok(Box::new(TextAnswer {
            text: format!("{left}{right}"),
        }))
    }

    fn deserialize_question(&self, bytes: &[u8]) -> Result<Box<dyn Question>, CodecError> {
        let mut reader = ByteReader::new(bytes);
        let left = reader.take_str()?;
        let right = reader.take_str()?;
        reader.finish()?;
        Ok(Box::new(ConcatQuestion {
            left,
            right,
        }))
    }

    fn deserialize_answer(&self, bytes: &[u8]) -> Result<Box<dyn Answer>, CodecError> {
        deserialize_text_answer(bytes)
    }
}

// ============================================================================
// SECTION: Dispatcher
// ============================================================================

/// Answers cell questions directly and concat questions by needing both
/// cells and concatenating in the continuation.
struct TestDispatcher;

impl RuleDispatcher for TestDispatcher {
    fn dispatch(&self, ctx: Arc<AnswerContext>) -> Result<(), DispatchError> {
        if ctx.question().kind_uuid() == CELL_KIND_UUID {
            if let Err(error) = ctx.succeed() {
                ctx.fail(BuildFailure::Rule(error.to_string()))
                    .map_err(|err| DispatchError::Failed(err.to_string()))?;
            }
            return Ok(());
        }

        let question = downcast_question::<ConcatQuestion>(ctx.question())
            .ok_or_else(|| DispatchError::Failed("unknown question kind".to_string()))?
            .clone();
        let needs =
            vec![CellQuestion::boxed(&question.left), CellQuestion::boxed(&question.right)];
        let future = ctx.need(needs).map_err(|err| DispatchError::Failed(err.to_string()))?;
        let continuation = Arc::clone(&ctx);
        future.add_callback(move |completed| match completed.state() {
            FutureState::Resolved => {
                let left = completed
                    .answer_clone(0)
                    .and_then(|answer| {
                        downcast_answer::<TextAnswer>(answer.as_ref()).map(|a| a.text.clone())
                    })
                    .unwrap_or_default();
                let right = completed
                    .answer_clone(1)
                    .and_then(|answer| {
                        downcast_answer::<TextAnswer>(answer.as_ref()).map(|a| a.text.clone())
                    })
                    .unwrap_or_default();
                let _ = continuation.succeed_with(TextAnswer::boxed(&format!("{left}{right}")));
            }
            FutureState::Failed => {
                let failure = completed.failure().unwrap_or(BuildFailure::Cancelled);
                let _ = continuation.fail(failure);
            }
            FutureState::Pending => {}
        });
        Ok(())
    }
}

/// Dispatcher that must never run; used to prove cache short-circuits.
struct RefusingDispatcher;

impl RuleDispatcher for RefusingDispatcher {
    fn dispatch(&self, _ctx: Arc<AnswerContext>) -> Result<(), DispatchError> {
        Err(DispatchError::Failed("dispatch was not expected".to_string()))
    }
}

// ============================================================================
// SECTION: Harness
// ============================================================================

struct Harness {
    cells: CellMap,
    database: Arc<InMemoryDatabase>,
    telemetry: Arc<CountingTelemetry>,
    engine: Engine,
}

impl Harness {
    fn new(cells: &[(&str, &str)]) -> Self {
        let map = cell_map(cells);
        let mut registry = KindRegistry::new();
        registry
            .register(Arc::new(CellKind {
                cells: Arc::clone(&map),
            }))
            .expect("register cell kind");
        registry
            .register(Arc::new(ConcatKind {
                cells: Arc::clone(&map),
            }))
            .expect("register concat kind");
        let database = Arc::new(InMemoryDatabase::new());
        let telemetry = Arc::new(CountingTelemetry::new());
        let engine = Engine::with_config(
            EngineConfig::default(),
            Arc::clone(&database) as Arc<dyn BuildDatabase>,
            Arc::new(registry),
            Arc::clone(&telemetry) as Arc<dyn BuildTelemetry>,
        );
        Self {
            cells: map,
            database,
            telemetry,
            engine,
        }
    }

    fn set_cell(&self, name: &str, value: &str) {
        self.cells.lock().unwrap().insert(name.to_string(), value.to_string());
    }
}

fn answer_text(answer: &dyn Answer) -> String {
    downcast_answer::<TextAnswer>(answer).expect("text answer").text.clone()
}

// ============================================================================
// SECTION: Tests
// ============================================================================

#[test]
fn rule_needing_two_children_concatenates_their_answers() {
    let harness = Harness::new(&[("left", "foo"), ("right", "bar")]);
    let answer = harness
        .engine
        .build(&TestDispatcher, ConcatQuestion::boxed("left", "right"))
        .expect("build");

    assert_eq!(answer_text(answer.as_ref()), "foobar");
    assert_eq!(harness.database.answer_count(), 3);
    assert_eq!(harness.database.dependency_count(), 2);
    let counts = harness.telemetry.snapshot();
    assert_eq!(counts.dispatched, 3);
    assert_eq!(counts.cache_hits, 0);
}

#[test]
fn failed_child_fails_the_root_without_a_root_answer_row() {
    let harness = Harness::new(&[("left", "foo")]);
    let result = harness.engine.build(&TestDispatcher, ConcatQuestion::boxed("left", "missing"));

    assert!(matches!(result, Err(BuildError::Root(BuildFailure::Rule(_)))));
    // Only the answerable child recorded a fact; dependency edges for both
    // children were still recorded before dispatch.
    assert_eq!(harness.database.answer_count(), 1);
    assert_eq!(harness.database.dependency_count(), 2);
}

#[test]
fn cached_answer_short_circuits_dispatch() {
    let harness = Harness::new(&[("left", "foo")]);
    let question = CellQuestion {
        name: "left".to_string(),
    };
    let answer = TextAnswer {
        text: "foo".to_string(),
    };
    harness.database.record_answer(&question, &answer).expect("seed cache");

    let built = harness
        .engine
        .build(&RefusingDispatcher, CellQuestion::boxed("left"))
        .expect("cached build");
    assert_eq!(answer_text(built.as_ref()), "foo");
    let counts = harness.telemetry.snapshot();
    assert_eq!(counts.cache_hits, 1);
    assert_eq!(counts.dispatched, 0);
}

#[test]
fn stale_fact_is_invalidated_and_reanswered() {
    let harness = Harness::new(&[("left", "old")]);
    let question = CellQuestion {
        name: "left".to_string(),
    };
    let stale = TextAnswer {
        text: "old".to_string(),
    };
    harness.database.record_answer(&question, &stale).expect("seed matching fact");
    harness.set_cell("left", "new");

    let built = harness
        .engine
        .build(&TestDispatcher, CellQuestion::boxed("left"))
        .expect("rebuild");
    assert_eq!(answer_text(built.as_ref()), "new");
    let counts = harness.telemetry.snapshot();
    assert_eq!(counts.invalidated_rows, 1);
    assert_eq!(counts.dispatched, 1);
}

#[test]
fn root_without_a_registered_kind_is_an_engine_error() {
    let harness = Harness::new(&[]);

    #[derive(Debug, Clone, PartialEq, Eq)]
    struct StrangerQuestion;

    impl Question for StrangerQuestion {
        fn kind_uuid(&self) -> KindUuid {
            KindUuid::from_u128(0xfeed_face)
        }

        fn serialize(&self) -> Vec<u8> {
            Vec::new()
        }

        fn question_eq(&self, other: &dyn Question) -> bool {
            downcast_question::<Self>(other).is_some()
        }

        fn clone_question(&self) -> Box<dyn Question> {
            Box::new(self.clone())
        }

        fn as_any(&self) -> &dyn Any {
            self
        }
    }

    let result = harness.engine.build(&TestDispatcher, Box::new(StrangerQuestion));
    assert!(matches!(result, Err(BuildError::Engine(EngineError::MissingKind(_)))));
}
