pub mod accessor;
pub mod config;
pub mod encoding;
pub mod error;
pub mod memory;
pub mod queue;
pub mod redis;
pub mod retry;
pub mod types;

pub use error::{StoreError, StoreResult};
