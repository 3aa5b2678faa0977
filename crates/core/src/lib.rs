//! Domain types for schedule/process orchestration.
//!
//! This crate holds the serializable state record shared by the engine,
//! the event stream and the persistence layer.

pub mod domain;
pub mod error;

pub use domain::*;
pub use error::{CoreError, Result};
