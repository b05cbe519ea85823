//! One-shot units of work returned by application callbacks

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use futures::future::BoxFuture;
use futures::FutureExt;

use super::error::{FatalSignal, TaskError};

/// A single asynchronous computation handed to the bridge
pub type UnitOfWork<M> = BoxFuture<'static, Result<Option<M>, TaskError>>;

/// Identity assigned to a unit of work when it is submitted
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TaskId(pub u64);

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Batch of one-shot units of work
pub struct Command<M> {
    units: Vec<UnitOfWork<M>>,
}

impl<M: Send + 'static> Command<M> {
    pub fn none() -> Self {
        Self { units: Vec::new() }
    }

    /// A message that is ready immediately but still routed through the bridge
    pub fn message(message: M) -> Self {
        Self::future(async move { Ok(Some(message)) })
    }

    /// Run `future` and turn its output into a message.
    pub fn perform<T, F, G>(future: F, map: G) -> Self
    where
        F: Future<Output = T> + Send + 'static,
        G: FnOnce(T) -> M + Send + 'static,
    {
        Self::future(async move { Ok(Some(map(future.await))) })
    }

    /// Run a fallible `future`. Errors become failures (or fatal signals
    /// when the error is a `FatalSignal`); the success value is mapped.
    pub fn try_perform<T, E, F, G>(future: F, map: G) -> Self
    where
        F: Future<Output = Result<T, E>> + Send + 'static,
        E: Into<anyhow::Error> + Send + 'static,
        G: FnOnce(T) -> M + Send + 'static,
    {
        Self::future(async move {
            match future.await {
                Ok(value) => Ok(Some(map(value))),
                Err(err) => Err(TaskError::classify(err.into())),
            }
        })
    }

    /// Wrap a raw unit of work.
    pub fn future<F>(future: F) -> Self
    where
        F: Future<Output = Result<Option<M>, TaskError>> + Send + 'static,
    {
        Self {
            units: vec![future.boxed()],
        }
    }

    /// Request process termination from the background runtime
    pub fn fatal(signal: FatalSignal) -> Self {
        Self::future(async move { Err(TaskError::Fatal(signal)) })
    }

    pub fn batch(commands: impl IntoIterator<Item = Command<M>>) -> Self {
        let units = commands
            .into_iter()
            .flat_map(|command| command.units)
            .collect();
        Self { units }
    }

    /// Convert the messages produced by every unit.
    pub fn map<N, F>(self, f: F) -> Command<N>
    where
        N: Send + 'static,
        F: Fn(M) -> N + Send + Sync + 'static,
    {
        let f = Arc::new(f);
        let units = self
            .units
            .into_iter()
            .map(|unit| {
                let f = Arc::clone(&f);
                unit.map(move |outcome| outcome.map(|message| message.map(|m| (*f)(m))))
                    .boxed()
            })
            .collect();
        Command { units }
    }

    pub fn len(&self) -> usize {
        self.units.len()
    }

    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }

    pub fn into_units(self) -> Vec<UnitOfWork<M>> {
        self.units
    }
}

impl<M: Send + 'static> Default for Command<M> {
    fn default() -> Self {
        Self::none()
    }
}

impl<M> fmt::Debug for Command<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Command")
            .field("units", &self.units.len())
            .finish()
    }
}
