//! Infrastructure layer - execution machinery behind the application contract
//!
//! This layer contains:
//! - The background Tokio runtime and its thread lifecycle
//! - The submission channel and dispatch loop
//! - The subscription multiplexer and delivery adapter

pub mod runtime;

pub use runtime::{start_bridge, BridgeBuilder, BridgeError, BridgeHandle, Delivery, Payload};
