// system-tests/src/lib.rs
// ============================================================================
// Module: Buildfact System Test Fixtures
// Description: Question kinds shared by the end-to-end scenarios.
// Purpose: Give the system tests file- and command-backed questions.
// Dependencies: buildfact-core
// ============================================================================

//! ## Overview
//! Shared fixtures for the end-to-end scenarios: a file-contents question
//! kind whose answers track real files on disk, and a command-output
//! question kind whose answers are produced by running a child process.
//! Both kinds serialize deterministically so they can live in the SQLite
//! store across engine restarts.

use std::any::Any;
use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;

use buildfact_core::Answer;
use buildfact_core::ByteReader;
use buildfact_core::ByteWriter;
use buildfact_core::CodecError;
use buildfact_core::DispatchError;
use buildfact_core::KindUuid;
use buildfact_core::ProcessRunner;
use buildfact_core::Question;
use buildfact_core::QuestionKind;
use buildfact_core::QueryError;
use buildfact_core::RuleDispatcher;
use buildfact_core::downcast_answer;
use buildfact_core::downcast_question;
use buildfact_core::runtime::AnswerContext;
use buildfact_core::runtime::BuildFailure;
use buildfact_core::runtime::FutureState;

// ============================================================================
// SECTION: Identities
// ============================================================================

/// Kind identity for file-contents questions.
pub const FILE_KIND_UUID: KindUuid =
    KindUuid::from_u128(0x41c8_9d26_75b0_4f3a_8e19_d07c_52fa_6b88);

/// Kind identity for command-output questions.
pub const COMMAND_KIND_UUID: KindUuid =
    KindUuid::from_u128(0xb35a_f017_29c6_4e88_a4d2_1fe8_90cb_5d61);

// ============================================================================
// SECTION: Answers
// ============================================================================

/// Raw bytes of a file, as an answer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BytesAnswer {
    /// The file contents.
    pub bytes: Vec<u8>,
}

impl BytesAnswer {
    /// Creates an answer holding `bytes`.
    #[must_use]
    pub fn new(bytes: Vec<u8>) -> Self {
        Self {
            bytes,
        }
    }
}

impl Answer for BytesAnswer {
    fn serialize(&self) -> Vec<u8> {
        let mut writer = ByteWriter::new();
        writer.put_bytes(&self.bytes);
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

/// Deserializes a [`BytesAnswer`] payload.
fn deserialize_bytes_answer(bytes: &[u8]) -> Result<Box<dyn Answer>, CodecError> {
    let mut reader = ByteReader::new(bytes);
    let content = reader.take_bytes()?.to_vec();
    reader.finish()?;
    Ok(Box::new(BytesAnswer::new(content)))
}

/// Extracts the bytes from a [`BytesAnswer`] trait object.
#[must_use]
pub fn answer_bytes(answer: &dyn Answer) -> Option<Vec<u8>> {
    downcast_answer::<BytesAnswer>(answer).map(|answer| answer.bytes.clone())
}

/// Reads a file into a query-side answer, mapping missing files to an
/// unanswerable question.
fn read_file_answer(path: &Path) -> Result<Box<dyn Answer>, QueryError> {
    match std::fs::read(path) {
        Ok(bytes) => Ok(Box::new(BytesAnswer::new(bytes))),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            Err(QueryError::Unanswerable(format!("no such file: {}", path.display())))
        }
        Err(err) => Err(QueryError::Io(err.to_string())),
    }
}

// ============================================================================
// SECTION: File Questions
// ============================================================================

/// "What is the content of this file?"
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileQuestion {
    /// Path of the file under question.
    pub path: PathBuf,
}

impl FileQuestion {
    /// Boxes a file question for `need` and `build`.
    #[must_use]
    pub fn boxed(path: impl Into<PathBuf>) -> Box<dyn Question> {
        Box::new(Self {
            path: path.into(),
        })
    }
}

impl Question for FileQuestion {
    fn kind_uuid(&self) -> KindUuid {
        FILE_KIND_UUID
    }

    fn serialize(&self) -> Vec<u8> {
        let mut writer = ByteWriter::new();
        writer.put_str(&self.path.to_string_lossy());
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

/// Kind for [`FileQuestion`].
pub struct FileKind;

impl QuestionKind for FileKind {
    fn uuid(&self) -> KindUuid {
        FILE_KIND_UUID
    }

    fn query_answer(&self, question: &dyn Question) -> Result<Box<dyn Answer>, QueryError> {
        let question = downcast_question::<FileQuestion>(question)
            .ok_or_else(|| QueryError::Unanswerable("not a file question".to_string()))?;
        read_file_answer(&question.path)
    }

    fn deserialize_question(&self, bytes: &[u8]) -> Result<Box<dyn Question>, CodecError> {
        let mut reader = ByteReader::new(bytes);
        let path = reader.take_str()?;
        reader.finish()?;
        Ok(Box::new(FileQuestion {
            path: PathBuf::from(path),
        }))
    }

    fn deserialize_answer(&self, bytes: &[u8]) -> Result<Box<dyn Answer>, CodecError> {
        deserialize_bytes_answer(bytes)
    }
}

// ============================================================================
// SECTION: Command Output Questions
// ============================================================================

/// "What is the content of the file this command produces?"
///
/// The question carries the input files the command consumes; answering it
/// first needs the content of every input, then runs the command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutputQuestion {
    /// Command line producing the output, program first.
    pub argv: Vec<String>,
    /// Input files the command consumes.
    pub inputs: Vec<PathBuf>,
    /// Path of the produced file.
    pub output: PathBuf,
}

impl CommandOutputQuestion {
    /// Boxes a command-output question for `need` and `build`.
    #[must_use]
    pub fn boxed(argv: &[&str], inputs: &[&Path], output: impl Into<PathBuf>) -> Box<dyn Question> {
        Box::new(Self {
            argv: argv.iter().map(|part| (*part).to_string()).collect(),
            inputs: inputs.iter().map(|input| input.to_path_buf()).collect(),
            output: output.into(),
        })
    }
}

impl Question for CommandOutputQuestion {
    fn kind_uuid(&self) -> KindUuid {
        COMMAND_KIND_UUID
    }

    fn serialize(&self) -> Vec<u8> {
        let mut writer = ByteWriter::new();
        writer.put_u32(u32::try_from(self.argv.len()).unwrap_or(u32::MAX));
        for part in &self.argv {
            writer.put_str(part);
        }
        writer.put_u32(u32::try_from(self.inputs.len()).unwrap_or(u32::MAX));
        for input in &self.inputs {
            writer.put_str(&input.to_string_lossy());
        }
        writer.put_str(&self.output.to_string_lossy());
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

/// Kind for [`CommandOutputQuestion`].
pub struct CommandOutputKind;

impl QuestionKind for CommandOutputKind {
    fn uuid(&self) -> KindUuid {
        COMMAND_KIND_UUID
    }

    fn query_answer(&self, question: &dyn Question) -> Result<Box<dyn Answer>, QueryError> {
        let question = downcast_question::<CommandOutputQuestion>(question)
            .ok_or_else(|| QueryError::Unanswerable("not a command question".to_string()))?;
        read_file_answer(&question.output)
    }

    fn deserialize_question(&self, bytes: &[u8]) -> Result<Box<dyn Question>, CodecError> {
        let mut reader = ByteReader::new(bytes);
        let argv_count = reader.take_u32()? as usize;
        let mut argv = Vec::new();
        for _ in 0 .. argv_count {
            argv.push(reader.take_str()?);
        }
        let input_count = reader.take_u32()? as usize;
        let mut inputs = Vec::new();
        for _ in 0 .. input_count {
            inputs.push(PathBuf::from(reader.take_str()?));
        }
        let output = reader.take_str()?;
        reader.finish()?;
        Ok(Box::new(CommandOutputQuestion {
            argv,
            inputs,
            output: PathBuf::from(output),
        }))
    }

    fn deserialize_answer(&self, bytes: &[u8]) -> Result<Box<dyn Answer>, CodecError> {
        deserialize_bytes_answer(bytes)
    }
}

// ============================================================================
// SECTION: Build Rules
// ============================================================================

/// Dispatcher for the system scenarios: file questions answer from disk;
/// command questions need every input file, then run their command and
/// answer from the produced output.
pub struct BuildRules {
    /// Executor running command questions.
    pub runner: Arc<dyn ProcessRunner>,
}

impl RuleDispatcher for BuildRules {
    fn dispatch(&self, ctx: Arc<AnswerContext>) -> Result<(), DispatchError> {
        let uuid = ctx.question().kind_uuid();
        if uuid == FILE_KIND_UUID {
            if let Err(error) = ctx.succeed() {
                ctx.fail(BuildFailure::Rule(error.to_string()))
                    .map_err(|err| DispatchError::Failed(err.to_string()))?;
            }
            return Ok(());
        }
        if uuid != COMMAND_KIND_UUID {
            return Err(DispatchError::Failed(format!("no rule for question kind {uuid}")));
        }
        let question = downcast_question::<CommandOutputQuestion>(ctx.question())
            .ok_or_else(|| DispatchError::Failed("malformed command question".to_string()))?
            .clone();
        let needs: Vec<Box<dyn Question>> =
            question.inputs.iter().map(|input| FileQuestion::boxed(input.clone())).collect();
        let future = ctx.need(needs).map_err(|err| DispatchError::Failed(err.to_string()))?;
        let runner = Arc::clone(&self.runner);
        let continuation = Arc::clone(&ctx);
        future.add_callback(move |completed| match completed.state() {
            FutureState::Resolved => {
                let _ = continuation.exec(runner.as_ref(), question.argv.clone());
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
