// crates/buildfact-core/examples/minimal.rs
// ============================================================================
// Module: Buildfact Minimal Example
// Description: Minimal end-to-end build using the in-memory database.
// Purpose: Demonstrate kinds, a dispatcher, and Engine::build.
// Dependencies: buildfact-core
// ============================================================================

//! ## Overview
//! Runs a minimal build: a root question needs two literal questions, the
//! dispatcher answers them, and the continuation concatenates the results.
//! This example is backend-agnostic and suitable for quick verification.

use std::any::Any;
use std::sync::Arc;

use buildfact_core::Answer;
use buildfact_core::BuildDatabase;
use buildfact_core::ByteReader;
use buildfact_core::ByteWriter;
use buildfact_core::CodecError;
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
use buildfact_core::runtime::BuildFailure;
use buildfact_core::runtime::Engine;
use buildfact_core::runtime::FutureState;
use buildfact_core::runtime::InMemoryDatabase;

/// Kind identity for literal questions.
const LITERAL_KIND_UUID: KindUuid =
    KindUuid::from_u128(0x9c2f_4b81_6e05_42da_b1c7_30aa_58e6_fd12);

/// Error type for example preconditions.
#[derive(Debug)]
struct ExampleError(&'static str);

impl std::fmt::Display for ExampleError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

impl std::error::Error for ExampleError {}

/// A question whose answer is its own text.
#[derive(Debug, Clone, PartialEq, Eq)]
struct LiteralQuestion {
    /// The literal text.
    text: String,
}

impl LiteralQuestion {
    /// Boxes a literal question for `need` and `build`.
    fn boxed(text: &str) -> Box<dyn Question> {
        Box::new(Self {
            text: text.to_string(),
        })
    }
}

impl Question for LiteralQuestion {
    fn kind_uuid(&self) -> KindUuid {
        LITERAL_KIND_UUID
    }

    fn serialize(&self) -> Vec<u8> {
        let mut writer = ByteWriter::new();
        writer.put_str(&self.text);
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

/// The literal text, as an answer.
#[derive(Debug, Clone, PartialEq, Eq)]
struct LiteralAnswer {
    /// The literal text.
    text: String,
}

impl Answer for LiteralAnswer {
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

/// Kind for literal questions.
struct LiteralKind;

impl QuestionKind for LiteralKind {
    fn uuid(&self) -> KindUuid {
        LITERAL_KIND_UUID
    }

    fn query_answer(&self, question: &dyn Question) -> Result<Box<dyn Answer>, QueryError> {
        let question = downcast_question::<LiteralQuestion>(question)
            .ok_or_else(|| QueryError::Unanswerable("not a literal question".to_string()))?;
        Ok(Box::new(LiteralAnswer {
            text: question.text.clone(),
        }))
    }

    fn deserialize_question(&self, bytes: &[u8]) -> Result<Box<dyn Question>, CodecError> {
        let mut reader = ByteReader::new(bytes);
        let text = reader.take_str()?;
        reader.finish()?;
        Ok(Box::new(LiteralQuestion {
            text,
        }))
    }

    fn deserialize_answer(&self, bytes: &[u8]) -> Result<Box<dyn Answer>, CodecError> {
        let mut reader = ByteReader::new(bytes);
        let text = reader.take_str()?;
        reader.finish()?;
        Ok(Box::new(LiteralAnswer {
            text,
        }))
    }
}

/// Dispatcher answering every literal question from its own text; a root
/// question spelled `a+b` needs `a` and `b` first.
struct ExampleDispatcher;

impl RuleDispatcher for ExampleDispatcher {
    fn dispatch(&self, ctx: Arc<AnswerContext>) -> Result<(), DispatchError> {
        let question = downcast_question::<LiteralQuestion>(ctx.question())
            .ok_or_else(|| DispatchError::Failed("unexpected question kind".to_string()))?;
        let Some((left, right)) = question.text.split_once('+') else {
            return ctx.succeed().map_err(|err| DispatchError::Failed(err.to_string()));
        };
        let needs = vec![LiteralQuestion::boxed(left), LiteralQuestion::boxed(right)];
        let future = ctx.need(needs).map_err(|err| DispatchError::Failed(err.to_string()))?;
        let continuation = Arc::clone(&ctx);
        future.add_callback(move |completed| match completed.state() {
            FutureState::Resolved => {
                let mut joined = String::new();
                for index in 0 .. completed.answer_count() {
                    if let Some(answer) = completed.answer_clone(index)
                        && let Some(literal) = downcast_answer::<LiteralAnswer>(answer.as_ref())
                    {
                        joined.push_str(&literal.text);
                    }
                }
                let _ = continuation.succeed_with(Box::new(LiteralAnswer {
                    text: joined,
                }));
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

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let mut registry = KindRegistry::new();
    registry.register(Arc::new(LiteralKind))?;
    let database: Arc<dyn BuildDatabase> = Arc::new(InMemoryDatabase::new());
    let engine = Engine::new(database, Arc::new(registry));

    let answer = engine.build(&ExampleDispatcher, LiteralQuestion::boxed("hello+world"))?;
    let expected = LiteralAnswer {
        text: "helloworld".to_string(),
    };
    if !expected.answer_eq(answer.as_ref()) {
        return Err(Box::new(ExampleError("unexpected root answer")));
    }
    Ok(())
}
