//! Delivery adapter - hands results from the background runtime to the host thread
//!
//! The background side holds a cloneable [`Courier`]; the host side owns the
//! single [`Mailbox`]. `Mailbox` is not `Sync`, so only the thread that owns
//! it can drain deliveries, which keeps `update()` calls serial no matter
//! how many tasks complete at once.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::time::Duration;

use crate::core::{FatalSignal, SubscriptionKey, TaskFailure, TaskId};

/// Hook the courier calls after each delivery so an idle host can wake up
pub type Waker = Arc<dyn Fn() + Send + Sync>;

/// Where a delivery came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    Command(TaskId),
    Subscription(SubscriptionKey),
}

#[derive(Debug)]
pub enum Payload<M> {
    Message(M),
    /// The unit of work completed without producing a message
    Empty,
    Failed(TaskFailure),
    Fatal(FatalSignal),
}

/// A completed result crossing from the background runtime to the host
#[derive(Debug)]
pub struct Delivery<M> {
    pub origin: Origin,
    /// Dequeue sequence number of the envelope that produced this delivery
    pub seq: u64,
    pub payload: Payload<M>,
}

/// Background-side handle used to send deliveries to the host
pub struct Courier<M> {
    tx: Sender<Delivery<M>>,
    open: Arc<AtomicBool>,
    waker: Option<Waker>,
}

impl<M> Clone for Courier<M> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
            open: Arc::clone(&self.open),
            waker: self.waker.clone(),
        }
    }
}

impl<M> Courier<M> {
    /// Send a delivery. Returns false once the bridge is shutting down or
    /// the host side is gone.
    pub fn deliver(&self, delivery: Delivery<M>) -> bool {
        if !self.open.load(Ordering::Acquire) {
            tracing::trace!(origin = ?delivery.origin, "dropping delivery after shutdown");
            return false;
        }
        if self.tx.send(delivery).is_err() {
            return false;
        }
        if let Some(wake) = &self.waker {
            wake();
        }
        true
    }
}

/// Host-side receiving end
pub struct Mailbox<M> {
    rx: Receiver<Delivery<M>>,
    open: Arc<AtomicBool>,
}

impl<M> Mailbox<M> {
    /// Take every delivery that is ready (non-blocking)
    pub fn drain(&self) -> Vec<Delivery<M>> {
        let mut deliveries = Vec::new();
        while let Some(delivery) = self.try_recv() {
            deliveries.push(delivery);
        }
        deliveries
    }

    pub fn try_recv(&self) -> Option<Delivery<M>> {
        if !self.is_open() {
            return None;
        }
        self.rx.try_recv().ok()
    }

    /// Block for at most `timeout` waiting for the next delivery.
    pub fn recv_timeout(&self, timeout: Duration) -> Option<Delivery<M>> {
        if !self.is_open() {
            return None;
        }
        match self.rx.recv_timeout(timeout) {
            Ok(delivery) if self.is_open() => Some(delivery),
            Ok(_) | Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => None,
        }
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }

    /// Stop accepting deliveries on both sides.
    pub(crate) fn close(&self) {
        self.open.store(false, Ordering::Release);
        while self.rx.try_recv().is_ok() {}
    }
}

/// Create a connected courier/mailbox pair.
pub fn channel<M>(waker: Option<Waker>) -> (Courier<M>, Mailbox<M>) {
    let (tx, rx) = mpsc::channel();
    let open = Arc::new(AtomicBool::new(true));
    (
        Courier {
            tx,
            open: Arc::clone(&open),
            waker,
        },
        Mailbox { rx, open },
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::thread;

    fn message(seq: u64, value: u32) -> Delivery<u32> {
        Delivery {
            origin: Origin::Command(TaskId(seq)),
            seq,
            payload: Payload::Message(value),
        }
    }

    #[test]
    fn test_deliveries_from_many_threads_arrive_on_host() {
        let (courier, mailbox) = channel::<u32>(None);
        let handles: Vec<_> = (0..4)
            .map(|i| {
                let courier = courier.clone();
                thread::spawn(move || assert!(courier.deliver(message(i, i as u32))))
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        let mut values: Vec<u32> = mailbox
            .drain()
            .into_iter()
            .map(|d| match d.payload {
                Payload::Message(v) => v,
                other => panic!("unexpected payload {other:?}"),
            })
            .collect();
        values.sort_unstable();
        assert_eq!(values, vec![0, 1, 2, 3]);
    }

    #[test]
    fn test_closed_mailbox_refuses_deliveries() {
        let (courier, mailbox) = channel::<u32>(None);
        assert!(courier.deliver(message(1, 1)));
        mailbox.close();
        assert!(!courier.deliver(message(2, 2)));
        assert!(mailbox.drain().is_empty());
        assert!(mailbox.recv_timeout(Duration::from_millis(5)).is_none());
    }

    #[test]
    fn test_waker_runs_per_delivery() {
        let woken = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&woken);
        let waker: Waker = Arc::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        let (courier, mailbox) = channel::<u32>(Some(waker));
        courier.deliver(message(1, 1));
        courier.deliver(message(2, 2));
        assert_eq!(woken.load(Ordering::SeqCst), 2);
        assert_eq!(mailbox.drain().len(), 2);
    }

    #[test]
    fn test_recv_timeout_waits_for_delivery() {
        let (courier, mailbox) = channel::<u32>(None);
        let sender = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            courier.deliver(message(5, 50));
        });
        let delivery = mailbox.recv_timeout(Duration::from_secs(2)).unwrap();
        assert_eq!(delivery.seq, 5);
        sender.join().unwrap();
    }
}
