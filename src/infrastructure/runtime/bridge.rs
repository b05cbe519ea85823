//! Runtime bridge - connects the sync host thread with a background Tokio runtime
//!
//! `start` spawns one dedicated thread hosting a current-thread runtime and
//! blocks until that thread publishes its runtime handle through a one-slot
//! rendezvous. Work then flows over an unbounded channel; results come back
//! through the [`Mailbox`].

use std::cell::RefCell;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::sync_channel;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use thiserror::Error;
use tokio::runtime::{Builder, Handle};
use tokio::sync::mpsc::{self, UnboundedSender};

use crate::config::RuntimeConfig;
use crate::core::error::panic_message;
use crate::core::{Command, FatalSignal, Subscription, TaskId, UnitOfWork};
use crate::infrastructure::runtime::delivery::{self, Courier, Mailbox, Waker};
use crate::infrastructure::runtime::task::TaskRecord;
use crate::infrastructure::runtime::worker::{run_dispatch_loop, Envelope};

#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("background runtime failed to start: {0}")]
    StartupFailure(String),
    #[error("bridge is shut down")]
    Closed,
    #[error(transparent)]
    Fatal(FatalSignal),
    #[error("background thread panicked: {0}")]
    WorkerPanicked(String),
}

type InitHook = Box<dyn FnOnce(&Handle) -> anyhow::Result<()> + Send>;

/// Cloneable, thread-safe submit capability
pub struct Submitter<M> {
    tx: UnboundedSender<Envelope<M>>,
    courier: Courier<M>,
    next_id: Arc<AtomicU64>,
}

impl<M> Clone for Submitter<M> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
            courier: self.courier.clone(),
            next_id: Arc::clone(&self.next_id),
        }
    }
}

impl<M: Send + 'static> Submitter<M> {
    /// Enqueue a unit of work. Never blocks.
    pub fn submit(&self, work: UnitOfWork<M>) -> Result<TaskId, BridgeError> {
        let id = TaskId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let record = TaskRecord::new(id, work, self.courier.clone());
        self.tx
            .send(Envelope::Task(record))
            .map_err(|_| BridgeError::Closed)?;
        Ok(id)
    }

    /// Enqueue every unit in `command`, in order.
    pub fn submit_command(&self, command: Command<M>) -> Result<Vec<TaskId>, BridgeError> {
        command
            .into_units()
            .into_iter()
            .map(|work| self.submit(work))
            .collect()
    }

    /// Hand the current cycle's subscriptions to the multiplexer.
    pub fn reconcile(&self, subscription: Subscription<M>) -> Result<(), BridgeError> {
        self.tx
            .send(Envelope::Reconcile(subscription.into_recipes()))
            .map_err(|_| BridgeError::Closed)
    }

    fn stop(&self) -> bool {
        self.tx.send(Envelope::Stop).is_ok()
    }
}

/// Configures and starts a bridge
pub struct BridgeBuilder {
    thread_name: String,
    shutdown_grace: Duration,
    waker: Option<Waker>,
    init: Option<InitHook>,
}

impl BridgeBuilder {
    pub fn new(config: &RuntimeConfig) -> Self {
        Self {
            thread_name: config.thread_name.clone(),
            shutdown_grace: config.shutdown_grace(),
            waker: None,
            init: None,
        }
    }

    /// Called from the background thread after every delivery.
    pub fn waker(mut self, waker: impl Fn() + Send + Sync + 'static) -> Self {
        self.waker = Some(Arc::new(waker));
        self
    }

    /// Runs on the background thread before the handshake. An error aborts
    /// startup.
    pub fn on_start(
        mut self,
        init: impl FnOnce(&Handle) -> anyhow::Result<()> + Send + 'static,
    ) -> Self {
        self.init = Some(Box::new(init));
        self
    }

    pub fn start<M: Send + 'static>(self) -> Result<BridgeHandle<M>, BridgeError> {
        let (courier, mailbox) = delivery::channel(self.waker);
        let (tx, rx) = mpsc::unbounded_channel();
        let (ready_tx, ready_rx) = sync_channel::<Result<Handle, String>>(1);
        let worker_courier = courier.clone();
        let init = self.init;
        let grace = self.shutdown_grace;

        let thread = thread::Builder::new()
            .name(self.thread_name.clone())
            .spawn(move || -> Result<(), FatalSignal> {
                let runtime = match Builder::new_current_thread().enable_all().build() {
                    Ok(runtime) => runtime,
                    Err(err) => {
                        let _ = ready_tx.send(Err(format!("building runtime: {err}")));
                        return Ok(());
                    }
                };
                if let Some(init) = init {
                    let handle = runtime.handle().clone();
                    let _guard = runtime.enter();
                    if let Err(err) = init(&handle) {
                        let _ = ready_tx.send(Err(format!("{err:#}")));
                        return Ok(());
                    }
                }
                if ready_tx.send(Ok(runtime.handle().clone())).is_err() {
                    return Ok(());
                }

                let result = runtime.block_on(run_dispatch_loop(rx, worker_courier));
                runtime.shutdown_timeout(grace);
                result
            })
            .map_err(|err| BridgeError::StartupFailure(format!("spawning thread: {err}")))?;

        let handle = match ready_rx.recv() {
            Ok(Ok(handle)) => handle,
            Ok(Err(reason)) => {
                let _ = thread.join();
                return Err(BridgeError::StartupFailure(reason));
            }
            Err(_) => {
                let reason = match thread.join() {
                    Err(payload) => panic_message(payload.as_ref()),
                    Ok(_) => "background thread exited during startup".to_string(),
                };
                return Err(BridgeError::StartupFailure(reason));
            }
        };

        tracing::info!(thread = %self.thread_name, "background runtime started");
        Ok(BridgeHandle {
            submitter: Submitter {
                tx,
                courier,
                next_id: Arc::new(AtomicU64::new(1)),
            },
            runtime: handle,
            mailbox,
            thread: RefCell::new(Some(thread)),
        })
    }
}

/// Start a bridge with default settings.
pub fn start_bridge<M: Send + 'static>(config: &RuntimeConfig) -> Result<BridgeHandle<M>, BridgeError> {
    BridgeBuilder::new(config).start()
}

/// Host-side handle to a running bridge
pub struct BridgeHandle<M: Send + 'static> {
    submitter: Submitter<M>,
    runtime: Handle,
    mailbox: Mailbox<M>,
    thread: RefCell<Option<JoinHandle<Result<(), FatalSignal>>>>,
}

impl<M: Send + 'static> BridgeHandle<M> {
    /// Enqueue a unit of work. If the dispatch loop has already exited,
    /// the thread is joined and a fatal exit is reported as `Fatal`.
    pub fn submit(&self, work: UnitOfWork<M>) -> Result<TaskId, BridgeError> {
        self.ensure_running()?;
        self.submitter.submit(work).map_err(|err| self.reap(err))
    }

    pub fn submit_command(&self, command: Command<M>) -> Result<Vec<TaskId>, BridgeError> {
        self.ensure_running()?;
        self.submitter
            .submit_command(command)
            .map_err(|err| self.reap(err))
    }

    pub fn reconcile(&self, subscription: Subscription<M>) -> Result<(), BridgeError> {
        self.ensure_running()?;
        self.submitter
            .reconcile(subscription)
            .map_err(|err| self.reap(err))
    }

    /// A submit capability that can move to other threads
    pub fn submitter(&self) -> Submitter<M> {
        self.submitter.clone()
    }

    /// Handle to the background runtime, for spawning outside the bridge
    pub fn runtime(&self) -> &Handle {
        &self.runtime
    }

    pub fn mailbox(&self) -> &Mailbox<M> {
        &self.mailbox
    }

    pub fn is_running(&self) -> bool {
        self.thread.borrow().is_some()
    }

    fn ensure_running(&self) -> Result<(), BridgeError> {
        if self.is_running() {
            Ok(())
        } else {
            Err(BridgeError::Closed)
        }
    }

    /// A send failed because the dispatch loop is gone. Join the thread so
    /// the caller sees why it stopped; `Closed` only after a clean exit.
    fn reap(&self, err: BridgeError) -> BridgeError {
        if !matches!(err, BridgeError::Closed) {
            return err;
        }
        let Some(thread) = self.thread.borrow_mut().take() else {
            return err;
        };
        self.mailbox.close();
        tracing::debug!("dispatch loop exited before submission, joining");
        match join(thread) {
            Ok(()) => BridgeError::Closed,
            Err(err) => err,
        }
    }

    /// Stop the background runtime and join its thread. Blocks until the
    /// thread is gone; calling it again is a no-op.
    pub fn shutdown(&mut self) -> Result<(), BridgeError> {
        let Some(thread) = self.thread.get_mut().take() else {
            return Ok(());
        };

        self.mailbox.close();
        if !self.submitter.stop() {
            tracing::debug!("dispatch loop already exited");
        }
        join(thread)
    }
}

fn join(thread: JoinHandle<Result<(), FatalSignal>>) -> Result<(), BridgeError> {
    match thread.join() {
        Ok(Ok(())) => {
            tracing::info!("background runtime stopped");
            Ok(())
        }
        Ok(Err(signal)) => Err(BridgeError::Fatal(signal)),
        Err(payload) => Err(BridgeError::WorkerPanicked(panic_message(payload.as_ref()))),
    }
}

impl<M: Send + 'static> Drop for BridgeHandle<M> {
    fn drop(&mut self) {
        if let Err(err) = self.shutdown() {
            tracing::warn!(error = %err, "bridge shutdown on drop");
        }
    }
}
