mod error;
pub mod models;
mod pool;
pub mod repositories;

pub use error::*;
pub use models::{SnapshotRecord, SnapshotRow};
pub use pool::*;
pub use repositories::*;
