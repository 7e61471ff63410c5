// crates/buildfact-core/tests/queue_unit.rs
// ============================================================================
// Module: Question Queue Unit Tests
// Description: FIFO ordering, wake signaling, and close semantics.
// Purpose: Validate the queue contract the dispatch loop relies on.
// ============================================================================

//! Unit tests for the question queue:
//! - Items dequeue in enqueue order.
//! - Enqueue and close raise the construction-time wake signal.
//! - A closed queue drains remaining items before reporting closed.

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
use std::sync::Arc;

use buildfact_core::Answer;
use buildfact_core::ByteReader;
use buildfact_core::ByteWriter;
use buildfact_core::CodecError;
use buildfact_core::KindUuid;
use buildfact_core::Question;
use buildfact_core::QuestionKind;
use buildfact_core::QueryError;
use buildfact_core::downcast_answer;
use buildfact_core::downcast_question;
use buildfact_core::runtime::Dequeue;
use buildfact_core::runtime::QueueError;
use buildfact_core::runtime::QueueItem;
use buildfact_core::runtime::QuestionQueue;
use buildfact_core::runtime::WakeSignal;

// ============================================================================
// SECTION: Helpers
// ============================================================================

const NAME_KIND_UUID: KindUuid = KindUuid::from_u128(0x6f40_91c2_aa10_4e36_9d0e_51b7_23c8_0d44);

#[derive(Debug, Clone, PartialEq, Eq)]
struct NameQuestion {
    name: String,
}

impl Question for NameQuestion {
    fn kind_uuid(&self) -> KindUuid {
        NAME_KIND_UUID
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
struct NameAnswer {
    value: String,
}

impl Answer for NameAnswer {
    fn serialize(&self) -> Vec<u8> {
        let mut writer = ByteWriter::new();
        writer.put_str(&self.value);
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

struct NameKind;

impl QuestionKind for NameKind {
    fn uuid(&self) -> KindUuid {
        NAME_KIND_UUID
    }

    fn query_answer(&self, question: &dyn Question) -> Result<Box<dyn Answer>, QueryError> {
        let question = downcast_question::<NameQuestion>(question)
            .ok_or_else(|| QueryError::Unanswerable("not a name question".to_string()))?;
        Ok(Box::new(NameAnswer {
            value: question.name.clone(),
        }))
    }

    fn deserialize_question(&self, bytes: &[u8]) -> Result<Box<dyn Question>, CodecError> {
        let mut reader = ByteReader::new(bytes);
        let name = reader.take_str()?;
        reader.finish()?;
        Ok(Box::new(NameQuestion {
            name,
        }))
    }

    fn deserialize_answer(&self, bytes: &[u8]) -> Result<Box<dyn Answer>, CodecError> {
        let mut reader = ByteReader::new(bytes);
        let value = reader.take_str()?;
        reader.finish()?;
        Ok(Box::new(NameAnswer {
            value,
        }))
    }
}

fn item_for(name: &str) -> QueueItem {
    QueueItem {
        question: Box::new(NameQuestion {
            name: name.to_string(),
        }),
        kind: Arc::new(NameKind),
        on_answer: Box::new(|_| {}),
    }
}

fn queue_with_wake() -> (Arc<WakeSignal>, QuestionQueue) {
    let wake = Arc::new(WakeSignal::new());
    let queue = QuestionQueue::new(Arc::clone(&wake));
    (wake, queue)
}

fn dequeued_name(queue: &QuestionQueue) -> String {
    match queue.try_dequeue() {
        Dequeue::Item(item) => {
            downcast_question::<NameQuestion>(item.question.as_ref())
                .expect("name question")
                .name
                .clone()
        }
        Dequeue::Empty => panic!("queue unexpectedly empty"),
        Dequeue::Closed => panic!("queue unexpectedly closed"),
    }
}

// ============================================================================
// SECTION: Tests
// ============================================================================

#[test]
fn items_dequeue_in_enqueue_order() {
    let (_wake, queue) = queue_with_wake();
    queue.enqueue(item_for("first")).expect("enqueue first");
    queue.enqueue(item_for("second")).expect("enqueue second");
    queue.enqueue(item_for("third")).expect("enqueue third");

    assert_eq!(queue.len(), 3);
    assert_eq!(dequeued_name(&queue), "first");
    assert_eq!(dequeued_name(&queue), "second");
    assert_eq!(dequeued_name(&queue), "third");
    assert!(matches!(queue.try_dequeue(), Dequeue::Empty));
}

#[test]
fn enqueue_raises_the_wake_signal() {
    let (wake, queue) = queue_with_wake();
    queue.enqueue(item_for("ping")).expect("enqueue");
    // Returns only because the enqueue raised the signal.
    wake.wait();
    assert_eq!(queue.len(), 1);
}

#[test]
fn close_drains_before_reporting_closed() {
    let (wake, queue) = queue_with_wake();
    queue.enqueue(item_for("leftover")).expect("enqueue");
    queue.close();
    assert!(queue.is_closed());
    wake.wait();

    assert_eq!(dequeued_name(&queue), "leftover");
    assert!(matches!(queue.try_dequeue(), Dequeue::Closed));
    assert!(matches!(queue.try_dequeue(), Dequeue::Closed));
}

#[test]
fn enqueue_after_close_is_rejected() {
    let (_wake, queue) = queue_with_wake();
    queue.close();
    queue.close();
    let result = queue.enqueue(item_for("late"));
    assert!(matches!(result, Err(QueueError::Closed)));
    assert!(queue.is_empty());
}
