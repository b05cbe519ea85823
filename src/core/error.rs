//! Error taxonomy for work flowing through the bridge

use thiserror::Error;

use super::command::TaskId;
use super::subscription::SubscriptionKey;

/// Explicit request to terminate the whole process
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("fatal signal (exit code {code}): {reason}")]
pub struct FatalSignal {
    pub code: i32,
    pub reason: String,
}

impl FatalSignal {
    pub fn new(code: i32, reason: impl Into<String>) -> Self {
        Self {
            code,
            reason: reason.into(),
        }
    }

    /// Exit request with no further explanation
    pub fn exit(code: i32) -> Self {
        Self::new(code, "exit requested")
    }
}

/// Error raised by a unit of work
#[derive(Debug, Error)]
pub enum TaskError {
    /// Ordinary failure, delivered to the application as data
    #[error(transparent)]
    Recoverable(anyhow::Error),
    /// Unwinds the background dispatch loop and terminates the process
    #[error(transparent)]
    Fatal(FatalSignal),
}

impl TaskError {
    /// Classify an arbitrary error, promoting a wrapped `FatalSignal`.
    pub fn classify(err: anyhow::Error) -> Self {
        match err.downcast::<FatalSignal>() {
            Ok(signal) => TaskError::Fatal(signal),
            Err(err) => TaskError::Recoverable(err),
        }
    }

    pub fn is_fatal(&self) -> bool {
        matches!(self, TaskError::Fatal(_))
    }
}

impl From<anyhow::Error> for TaskError {
    fn from(err: anyhow::Error) -> Self {
        TaskError::classify(err)
    }
}

impl From<FatalSignal> for TaskError {
    fn from(signal: FatalSignal) -> Self {
        TaskError::Fatal(signal)
    }
}

/// A non-fatal failure handed to `Application::on_failure`
#[derive(Debug, Error)]
pub enum TaskFailure {
    #[error("command {task} failed: {error:#}")]
    Command {
        task: TaskId,
        #[source]
        error: anyhow::Error,
    },
    #[error("subscription {key} failed: {error:#}")]
    Subscription {
        key: SubscriptionKey,
        #[source]
        error: anyhow::Error,
    },
}

impl TaskFailure {
    pub fn error(&self) -> &anyhow::Error {
        match self {
            TaskFailure::Command { error, .. } | TaskFailure::Subscription { error, .. } => error,
        }
    }
}

/// Render a caught panic payload as text
pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
