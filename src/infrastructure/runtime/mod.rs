//! Runtime infrastructure - background Tokio runtime bridge for async work

mod bridge;
pub mod delivery;
mod multiplexer;
mod task;
mod worker;

pub use bridge::{start_bridge, BridgeBuilder, BridgeError, BridgeHandle, Submitter};
pub use delivery::{Courier, Delivery, Mailbox, Origin, Payload, Waker};
pub use multiplexer::{Multiplexer, ReconcileReport};
pub use task::{AlreadyFilled, Outcome, OutcomeCell, TaskExit, TaskRecord};
pub use worker::{run_dispatch_loop, Envelope};
