use marathon_consul_common::TaskId;
use std::fmt;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SyncError {
    #[error("No Consul agents available")]
    NoAgentsAvailable,

    #[error("Cannot connect to Consul agent at '{address}': {reason}")]
    AgentConnect { address: String, reason: String },

    #[error("Consul query failed: {0}")]
    CatalogQuery(String),

    #[error("Consul update failed: {0}")]
    CatalogUpdate(String),

    #[error("An error occurred getting services from Consul after {attempts} attempts. Giving up")]
    RetriesExhausted { attempts: u32 },

    #[error("Cannot resolve host '{host}' to an IPv4 address: {reason}")]
    AddressResolution { host: String, reason: String },

    #[error("Couldn't find any service matching task id {0}")]
    NoMatchingService(TaskId),

    #[error(transparent)]
    Aggregate(#[from] AggregateError),

    #[error("Marathon error: {0}")]
    Marathon(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Metrics error: {0}")]
    Metrics(#[from] prometheus::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Independent per-item failures of one batch operation, in submission order
#[derive(Debug)]
pub struct AggregateError {
    pub context: String,
    pub errors: Vec<SyncError>,
}

impl AggregateError {
    /// `Ok(())` for an empty list, otherwise every error wrapped in one value
    pub fn merge(errors: Vec<SyncError>, context: impl Into<String>) -> Result<()> {
        if errors.is_empty() {
            return Ok(());
        }
        Err(SyncError::Aggregate(AggregateError {
            context: context.into(),
            errors,
        }))
    }

    pub fn len(&self) -> usize {
        self.errors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }
}

impl fmt::Display for AggregateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} errors occurred {}", self.errors.len(), self.context)?;
        for (i, err) in self.errors.iter().enumerate() {
            let sep = if i == 0 { ": " } else { ", " };
            write!(f, "{}{}", sep, err)?;
        }
        Ok(())
    }
}

impl std::error::Error for AggregateError {}

pub type Result<T> = std::result::Result<T, SyncError>;
