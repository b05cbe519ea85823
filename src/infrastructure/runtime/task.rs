//! Task records - a unit of work paired with its outcome cell and courier

use std::panic::AssertUnwindSafe;

use futures::FutureExt;
use thiserror::Error;

use crate::core::error::panic_message;
use crate::core::{FatalSignal, TaskError, TaskFailure, TaskId, UnitOfWork};
use crate::infrastructure::runtime::delivery::{Courier, Delivery, Origin, Payload};

/// Result of running a unit of work
pub type Outcome<M> = Result<Option<M>, TaskError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("outcome cell already filled")]
pub struct AlreadyFilled;

#[derive(Debug)]
enum Slot<M> {
    Empty,
    Filled(Outcome<M>),
    Taken,
}

/// Write-once result slot, read exactly once
#[derive(Debug)]
pub struct OutcomeCell<M> {
    slot: Slot<M>,
}

impl<M> OutcomeCell<M> {
    pub fn new() -> Self {
        Self { slot: Slot::Empty }
    }

    pub fn fill(&mut self, outcome: Outcome<M>) -> Result<(), AlreadyFilled> {
        match self.slot {
            Slot::Empty => {
                self.slot = Slot::Filled(outcome);
                Ok(())
            }
            Slot::Filled(_) | Slot::Taken => Err(AlreadyFilled),
        }
    }

    pub fn take(&mut self) -> Option<Outcome<M>> {
        match std::mem::replace(&mut self.slot, Slot::Taken) {
            Slot::Filled(outcome) => Some(outcome),
            Slot::Empty => {
                self.slot = Slot::Empty;
                None
            }
            Slot::Taken => None,
        }
    }

    pub fn is_filled(&self) -> bool {
        matches!(self.slot, Slot::Filled(_))
    }
}

impl<M> Default for OutcomeCell<M> {
    fn default() -> Self {
        Self::new()
    }
}

/// How a spawned task ended, as seen by the dispatch loop
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskExit {
    Done,
    Fatal(FatalSignal),
}

/// A submitted command waiting to run on the background runtime
pub struct TaskRecord<M> {
    id: TaskId,
    work: UnitOfWork<M>,
    outcome: OutcomeCell<M>,
    courier: Courier<M>,
}

impl<M: Send + 'static> TaskRecord<M> {
    pub fn new(id: TaskId, work: UnitOfWork<M>, courier: Courier<M>) -> Self {
        Self {
            id,
            work,
            outcome: OutcomeCell::new(),
            courier,
        }
    }

    pub fn id(&self) -> TaskId {
        self.id
    }

    /// Drive the work to completion and deliver its outcome exactly once.
    pub async fn run(self, seq: u64) -> TaskExit {
        let TaskRecord {
            id,
            work,
            mut outcome,
            courier,
        } = self;

        let result = match AssertUnwindSafe(work).catch_unwind().await {
            Ok(result) => result,
            Err(payload) => Err(TaskError::Recoverable(anyhow::anyhow!(
                "task panicked: {}",
                panic_message(payload.as_ref())
            ))),
        };
        if outcome.fill(result).is_err() {
            tracing::error!(task = %id, "outcome recorded twice");
        }

        let (payload, exit) = match outcome.take() {
            Some(Ok(Some(message))) => (Payload::Message(message), TaskExit::Done),
            Some(Ok(None)) | None => (Payload::Empty, TaskExit::Done),
            Some(Err(TaskError::Recoverable(error))) => {
                tracing::debug!(task = %id, error = %format!("{error:#}"), "task failed");
                (
                    Payload::Failed(TaskFailure::Command { task: id, error }),
                    TaskExit::Done,
                )
            }
            Some(Err(TaskError::Fatal(signal))) => {
                tracing::error!(task = %id, %signal, "task raised a fatal signal");
                (Payload::Fatal(signal.clone()), TaskExit::Fatal(signal))
            }
        };

        courier.deliver(Delivery {
            origin: Origin::Command(id),
            seq,
            payload,
        });
        exit
    }
}
