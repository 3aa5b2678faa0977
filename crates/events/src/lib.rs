//! Event system for phaseflow
//!
//! This crate provides the event bus and event types through which the
//! orchestration engine reports state changes to observers.

mod bus;
mod types;

pub use bus::{EventBus, SessionSubscription};
pub use types::*;
