//! Async worker - dispatch loop running on the background runtime

use tokio::sync::mpsc::UnboundedReceiver;
use tokio::task::JoinSet;

use crate::core::{FatalSignal, Recipe};
use crate::infrastructure::runtime::delivery::Courier;
use crate::infrastructure::runtime::multiplexer::Multiplexer;
use crate::infrastructure::runtime::task::{TaskExit, TaskRecord};

/// Items sent from the host thread to the worker
pub enum Envelope<M> {
    Task(TaskRecord<M>),
    Reconcile(Vec<Recipe<M>>),
    /// Sentinel that ends the dispatch loop
    Stop,
}

/// Run the dispatch loop until the stop sentinel arrives, the channel
/// closes, or a task raises a fatal signal.
///
/// Each envelope is dequeued in submission order and spawned without
/// waiting for it, so completion order is unconstrained.
pub async fn run_dispatch_loop<M: Send + 'static>(
    mut envelopes: UnboundedReceiver<Envelope<M>>,
    courier: Courier<M>,
) -> Result<(), FatalSignal> {
    let mut tasks: JoinSet<TaskExit> = JoinSet::new();
    let mut subscriptions = Multiplexer::new(courier);
    let mut seq = 0u64;

    let result = loop {
        tokio::select! {
            Some(joined) = tasks.join_next(), if !tasks.is_empty() => {
                match joined {
                    Ok(TaskExit::Done) => {}
                    Ok(TaskExit::Fatal(signal)) => break Err(signal),
                    Err(err) if err.is_cancelled() => {}
                    Err(err) => tracing::warn!(error = %err, "task ended abnormally"),
                }
            }
            envelope = envelopes.recv() => {
                match envelope {
                    None => {
                        tracing::debug!("submission channel closed");
                        break Ok(());
                    }
                    Some(Envelope::Stop) => {
                        tracing::debug!(dequeued = seq, "stop sentinel received");
                        break Ok(());
                    }
                    Some(Envelope::Task(record)) => {
                        seq += 1;
                        tracing::trace!(task = %record.id(), seq, "task dequeued");
                        tasks.spawn(record.run(seq));
                    }
                    Some(Envelope::Reconcile(recipes)) => {
                        seq += 1;
                        let report = subscriptions.reconcile(recipes, &mut tasks, seq).await;
                        if report.started > 0 || report.cancelled > 0 {
                            tracing::debug!(
                                seq,
                                started = report.started,
                                kept = report.kept,
                                cancelled = report.cancelled,
                                "subscriptions reconciled"
                            );
                        }
                    }
                }
            }
        }
    };

    subscriptions.cancel_all().await;
    let outstanding = tasks.len();
    tasks.shutdown().await;
    if outstanding > 0 {
        tracing::debug!(outstanding, "aborted in-flight tasks");
    }
    if let Err(signal) = &result {
        tracing::error!(%signal, "dispatch loop unwound by fatal signal");
    }
    result
}
