use crate::consul::RetryPolicy;
use crate::{Result, SyncError};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::debug;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub consul: ConsulConfig,
    pub marathon: MarathonConfig,
    pub sync: SyncConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsulConfig {
    /// Agents the pool starts with
    pub agents: Vec<String>,
    pub port: u16,
    pub ssl: bool,
    pub token: Option<String>,
    pub timeout_secs: u64,
    pub request_retries: u32,
    pub agent_failures_tolerance: u32,
    /// Tag put on every registration and required on every lookup
    pub tag: String,
    pub name_separator: String,
    /// Comma-separated Marathon health check protocols to leave out
    pub ignored_healthchecks: String,
}

impl Default for ConsulConfig {
    fn default() -> Self {
        Self {
            agents: vec!["localhost".to_string()],
            port: 8500,
            ssl: false,
            token: None,
            timeout_secs: 3,
            request_retries: 5,
            agent_failures_tolerance: 3,
            tag: "marathon".to_string(),
            name_separator: ".".to_string(),
            ignored_healthchecks: String::new(),
        }
    }
}

impl ConsulConfig {
    pub fn scheme(&self) -> &'static str {
        if self.ssl {
            "https"
        } else {
            "http"
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            request_retries: self.request_retries,
            agent_failures_tolerance: self.agent_failures_tolerance,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MarathonConfig {
    /// host:port of the Marathon API
    pub location: String,
    pub protocol: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub timeout_secs: u64,
}

impl Default for MarathonConfig {
    fn default() -> Self {
        Self {
            location: "localhost:8080".to_string(),
            protocol: "http".to_string(),
            username: None,
            password: None,
            timeout_secs: 5,
        }
    }
}

impl MarathonConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Registrations in flight at once during `sync`
    pub concurrency: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self { concurrency: 8 }
    }
}

impl Config {
    /// Defaults, overlaid with the YAML file at `path` when given
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let config = match path {
            Some(path) => {
                debug!("Loading configuration from {}", path.display());
                let contents = std::fs::read_to_string(path).map_err(|e| {
                    SyncError::Config(format!("Failed to read {}: {}", path.display(), e))
                })?;
                Self::from_yaml(&contents)?
            }
            None => Self::default(),
        };
        config.validate()?;
        Ok(config)
    }

    pub fn from_yaml(contents: &str) -> Result<Self> {
        serde_yaml::from_str(contents)
            .map_err(|e| SyncError::Config(format!("Invalid configuration: {}", e)))
    }

    pub fn validate(&self) -> Result<()> {
        if self.consul.tag.trim().is_empty() {
            return Err(SyncError::Config("consul.tag must not be empty".to_string()));
        }
        if self.consul.timeout_secs == 0 || self.marathon.timeout_secs == 0 {
            return Err(SyncError::Config("timeouts must be positive".to_string()));
        }
        if self.sync.concurrency == 0 {
            return Err(SyncError::Config(
                "sync.concurrency must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}
