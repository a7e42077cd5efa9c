use crate::consul::agent::{Agent, AgentPool};
use crate::consul::datacenters::{instances_in_all_datacenters, tagged_instances_in_all_datacenters};
use crate::consul::service::Service;
use crate::{Result, SyncError};
use async_trait::async_trait;
use tracing::{error, warn};

/// Unit of catalog work that can run against any agent
#[async_trait]
pub trait AgentOperation: Send + Sync {
    type Output: Send;

    async fn execute(&self, agent: &Agent) -> Result<Self::Output>;
}

/// Retry bounds taken from the Consul configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Extra attempts after the first one
    pub request_retries: u32,
    /// Failures an agent may accumulate before it is evicted
    pub agent_failures_tolerance: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            request_retries: 5,
            agent_failures_tolerance: 3,
        }
    }
}

/// Runs read operations with failover across the agent pool.
///
/// Each attempt picks an agent from the pool. A failing agent gets its failure
/// counter bumped and is evicted once the counter exceeds the tolerance; a
/// succeeding agent gets its counter reset. There is no backoff between
/// attempts, and only the attempt count bounds the loop.
pub struct Retrier {
    pool: AgentPool,
    policy: RetryPolicy,
}

impl Retrier {
    pub fn new(pool: AgentPool, policy: RetryPolicy) -> Self {
        Self { pool, policy }
    }

    pub async fn with_retry<O: AgentOperation>(&self, operation: &O) -> Result<O::Output> {
        let attempts = self.policy.request_retries.saturating_add(1);

        for attempt in 1..=attempts {
            let agent = self.pool.get_any_agent()?;

            match operation.execute(&agent).await {
                Ok(output) => {
                    agent.clear_failures();
                    return Ok(output);
                }
                Err(e) => {
                    error!(
                        address = %agent.address(),
                        attempt,
                        error = %e,
                        "An error occurred getting services from Consul, retrying with another agent"
                    );
                    let failures = agent.inc_failures();
                    if failures > self.policy.agent_failures_tolerance {
                        warn!(
                            address = %agent.address(),
                            failures,
                            "Removing agent due to too many failures"
                        );
                        self.pool.remove_agent_if_same(&agent);
                    }
                }
            }
        }

        Err(SyncError::RetriesExhausted { attempts })
    }
}

/// Instances of one service name carrying the global tag
pub struct ServicesByName<'a> {
    pub name: &'a str,
    pub tag: &'a str,
}

#[async_trait]
impl AgentOperation for ServicesByName<'_> {
    type Output = Vec<Service>;

    async fn execute(&self, agent: &Agent) -> Result<Vec<Service>> {
        instances_in_all_datacenters(agent.catalog(), self.name, self.tag).await
    }
}

/// Instances tagged `tag` of every service listing that tag
pub struct ServicesByTag<'a> {
    pub tag: &'a str,
}

#[async_trait]
impl AgentOperation for ServicesByTag<'_> {
    type Output = Vec<Service>;

    async fn execute(&self, agent: &Agent) -> Result<Vec<Service>> {
        tagged_instances_in_all_datacenters(agent.catalog(), self.tag).await
    }
}
