pub mod cli;
pub mod config;
pub mod consul;
pub mod error;
pub mod marathon;
pub mod metrics;

#[cfg(test)]
mod testing;

pub use error::{AggregateError, Result, SyncError};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
