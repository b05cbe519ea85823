//! Subscription multiplexer - one running stream per distinct key
//!
//! Lives entirely on the background runtime. Every reconcile diffs the
//! requested keys against the registry: dropped keys are cancelled (and the
//! cancellation awaited) before new keys start.

use std::collections::{HashMap, HashSet};
use std::panic::AssertUnwindSafe;

use futures::{FutureExt, StreamExt};
use tokio::sync::oneshot;
use tokio::task::{AbortHandle, JoinSet};

use crate::core::error::panic_message;
use crate::core::{Recipe, SubscriptionKey, TaskError, TaskFailure};
use crate::infrastructure::runtime::delivery::{Courier, Delivery, Origin, Payload};
use crate::infrastructure::runtime::task::TaskExit;

enum StreamState {
    Running {
        abort: AbortHandle,
        stopped: oneshot::Receiver<()>,
    },
    /// Exhausted or failed; kept so the key is not restarted while requested
    Finished,
}

/// Counts from one reconcile pass
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ReconcileReport {
    pub started: usize,
    pub kept: usize,
    pub cancelled: usize,
}

pub struct Multiplexer<M> {
    streams: HashMap<SubscriptionKey, StreamState>,
    courier: Courier<M>,
}

impl<M: Send + 'static> Multiplexer<M> {
    pub fn new(courier: Courier<M>) -> Self {
        Self {
            streams: HashMap::new(),
            courier,
        }
    }

    pub fn len(&self) -> usize {
        self.streams.len()
    }

    pub fn is_empty(&self) -> bool {
        self.streams.is_empty()
    }

    pub fn is_running(&self, key: &SubscriptionKey) -> bool {
        matches!(
            self.streams.get(key),
            Some(StreamState::Running { abort, .. }) if !abort.is_finished()
        )
    }

    /// Bring the registry in line with `recipes`.
    pub async fn reconcile(
        &mut self,
        recipes: Vec<Recipe<M>>,
        tasks: &mut JoinSet<TaskExit>,
        seq: u64,
    ) -> ReconcileReport {
        let mut report = ReconcileReport::default();

        let mut wanted = HashSet::with_capacity(recipes.len());
        let recipes: Vec<_> = recipes
            .into_iter()
            .filter(|recipe| wanted.insert(recipe.key()))
            .collect();

        for state in self.streams.values_mut() {
            let finished =
                matches!(state, StreamState::Running { abort, .. } if abort.is_finished());
            if finished {
                *state = StreamState::Finished;
            }
        }

        let dropped: Vec<SubscriptionKey> = self
            .streams
            .keys()
            .filter(|key| !wanted.contains(key))
            .copied()
            .collect();
        for key in dropped {
            if let Some(state) = self.streams.remove(&key) {
                cancel(key, state).await;
                report.cancelled += 1;
            }
        }

        for recipe in recipes {
            let key = recipe.key();
            if self.streams.contains_key(&key) {
                report.kept += 1;
                continue;
            }
            let (stop_tx, stopped) = oneshot::channel();
            let guard = StopGuard(Some(stop_tx));
            let abort = tasks.spawn(pump(recipe, self.courier.clone(), seq, guard));
            tracing::debug!(%key, "subscription started");
            self.streams.insert(key, StreamState::Running { abort, stopped });
            report.started += 1;
        }

        report
    }

    /// Cancel every running stream.
    pub async fn cancel_all(&mut self) {
        for (key, state) in self.streams.drain() {
            cancel(key, state).await;
        }
    }
}

async fn cancel(key: SubscriptionKey, state: StreamState) {
    match state {
        StreamState::Running { abort, stopped } => {
            abort.abort();
            // Resolves once the stream future has been dropped.
            let _ = stopped.await;
            tracing::debug!(%key, "subscription cancelled");
        }
        StreamState::Finished => {
            tracing::trace!(%key, "finished subscription released");
        }
    }
}

/// Signals the multiplexer when the stream future is dropped
struct StopGuard(Option<oneshot::Sender<()>>);

impl Drop for StopGuard {
    fn drop(&mut self) {
        if let Some(tx) = self.0.take() {
            let _ = tx.send(());
        }
    }
}

async fn pump<M: Send + 'static>(
    recipe: Recipe<M>,
    courier: Courier<M>,
    seq: u64,
    guard: StopGuard,
) -> TaskExit {
    let key = recipe.key();
    let exit = AssertUnwindSafe(drive(recipe, &courier, seq))
        .catch_unwind()
        .await
        .unwrap_or_else(|payload| {
            let error =
                anyhow::anyhow!("subscription panicked: {}", panic_message(payload.as_ref()));
            tracing::warn!(%key, error = %error, "subscription failed");
            courier.deliver(Delivery {
                origin: Origin::Subscription(key),
                seq,
                payload: Payload::Failed(TaskFailure::Subscription { key, error }),
            });
            TaskExit::Done
        });
    drop(guard);
    exit
}

async fn drive<M: Send + 'static>(recipe: Recipe<M>, courier: &Courier<M>, seq: u64) -> TaskExit {
    let key = recipe.key();
    let origin = Origin::Subscription(key);
    let mut stream = recipe.into_stream();

    while let Some(item) = stream.next().await {
        match item {
            Ok(message) => {
                courier.deliver(Delivery {
                    origin,
                    seq,
                    payload: Payload::Message(message),
                });
            }
            Err(TaskError::Recoverable(error)) => {
                tracing::warn!(%key, error = %format!("{error:#}"), "subscription failed");
                courier.deliver(Delivery {
                    origin,
                    seq,
                    payload: Payload::Failed(TaskFailure::Subscription { key, error }),
                });
                return TaskExit::Done;
            }
            Err(TaskError::Fatal(signal)) => {
                tracing::error!(%key, %signal, "subscription raised a fatal signal");
                courier.deliver(Delivery {
                    origin,
                    seq,
                    payload: Payload::Fatal(signal.clone()),
                });
                return TaskExit::Fatal(signal);
            }
        }
    }

    tracing::debug!(%key, "subscription exhausted");
    TaskExit::Done
}
