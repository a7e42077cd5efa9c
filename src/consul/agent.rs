//! Pool of known Consul agents
//!
//! Every agent the bridge ever talked to lives here, keyed by address, with a
//! failure counter the retry loop uses to decide when to evict it. The pool is
//! the only state shared between concurrent operations.

use crate::consul::catalog::{Catalog, Connector};
use crate::{Result, SyncError};
use dashmap::DashMap;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// One reachable Consul agent
pub struct Agent {
    address: String,
    catalog: Arc<dyn Catalog>,
    failures: AtomicU32,
}

impl Agent {
    pub fn new(address: impl Into<String>, catalog: Arc<dyn Catalog>) -> Self {
        Self {
            address: address.into(),
            catalog,
            failures: AtomicU32::new(0),
        }
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn catalog(&self) -> &dyn Catalog {
        self.catalog.as_ref()
    }

    /// Records one failure and returns the new count
    pub fn inc_failures(&self) -> u32 {
        self.failures.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub fn clear_failures(&self) {
        self.failures.store(0, Ordering::SeqCst);
    }

    pub fn failures(&self) -> u32 {
        self.failures.load(Ordering::SeqCst)
    }
}

impl std::fmt::Debug for Agent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Agent")
            .field("address", &self.address)
            .field("failures", &self.failures())
            .finish()
    }
}

/// Thread-safe map from agent address to agent
#[derive(Clone)]
pub struct AgentPool {
    agents: Arc<DashMap<String, Arc<Agent>>>,
    connector: Arc<dyn Connector>,
    cursor: Arc<AtomicUsize>,
}

impl AgentPool {
    /// Create an empty pool opening new agents through `connector`
    pub fn new(connector: Arc<dyn Connector>) -> Self {
        Self {
            agents: Arc::new(DashMap::new()),
            connector,
            cursor: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Connect every seed address, skipping the ones that fail
    pub fn seed(&self, addresses: &[String]) {
        for address in addresses {
            if let Err(e) = self.get_agent(address) {
                warn!(address = %address, error = %e, "Can't add seed agent");
            }
        }
    }

    /// Any known agent. Consecutive calls rotate over the agents ordered by
    /// address.
    pub fn get_any_agent(&self) -> Result<Arc<Agent>> {
        let mut agents: Vec<Arc<Agent>> = self.agents.iter().map(|r| r.value().clone()).collect();
        if agents.is_empty() {
            return Err(SyncError::NoAgentsAvailable);
        }
        agents.sort_by(|a, b| a.address.cmp(&b.address));

        let index = self.cursor.fetch_add(1, Ordering::Relaxed) % agents.len();
        Ok(agents.swap_remove(index))
    }

    /// The agent at `address`, connecting it on first use
    pub fn get_agent(&self, address: &str) -> Result<Arc<Agent>> {
        if let Some(agent) = self.agents.get(address) {
            return Ok(agent.clone());
        }

        if address.trim().is_empty() {
            return Err(SyncError::AgentConnect {
                address: address.to_string(),
                reason: "empty agent address".to_string(),
            });
        }

        let catalog = self.connector.connect(address)?;
        let agent = self
            .agents
            .entry(address.to_string())
            .or_insert_with(|| Arc::new(Agent::new(address, catalog)))
            .clone();

        info!(address = %address, "Added Consul agent");
        Ok(agent)
    }

    /// Evict the agent at `address`; no-op when unknown
    pub fn remove_agent(&self, address: &str) {
        if self.agents.remove(address).is_some() {
            debug!(address = %address, "Removed Consul agent");
        }
    }

    /// Evict `agent` only if the pool still holds that same handle; a newer
    /// agent at the same address stays
    pub fn remove_agent_if_same(&self, agent: &Arc<Agent>) -> bool {
        let removed = self
            .agents
            .remove_if(agent.address(), |_, current| Arc::ptr_eq(current, agent))
            .is_some();
        if removed {
            debug!(address = %agent.address(), "Removed Consul agent");
        }
        removed
    }

    pub fn contains(&self, address: &str) -> bool {
        self.agents.contains_key(address)
    }

    /// Get the number of known agents
    pub fn len(&self) -> usize {
        self.agents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.agents.is_empty()
    }

    /// Addresses of all known agents, sorted
    pub fn addresses(&self) -> Vec<String> {
        let mut addresses: Vec<String> = self.agents.iter().map(|r| r.key().clone()).collect();
        addresses.sort();
        addresses
    }
}
