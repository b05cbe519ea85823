//! Bridge between a single-threaded host loop and a background Tokio runtime
//!
//! Application callbacks run on the host thread and return [`Command`]s and
//! [`Subscription`]s. The bridge executes them on a dedicated runtime thread
//! and hands results back through a mailbox drained by the host.

pub mod app;
pub mod config;
pub mod core;
pub mod host;
pub mod infrastructure;
pub mod ui;

pub use crate::core::{Application, Command, FatalSignal, Subscription, TaskError, TaskFailure};
pub use crate::infrastructure::runtime::{start_bridge, BridgeBuilder, BridgeError, BridgeHandle};
