//! Catalog records: what Consul returns for a query and what we submit to an
//! agent on registration

use marathon_consul_common::TaskId;
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::warn;

/// Prefix of the tag linking a registration back to its Marathon task
pub const MARATHON_TASK_TAG_PREFIX: &str = "marathon-task:";

/// Tag enabling reverse lookup of every service produced by `task_id`
pub fn marathon_task_tag(task_id: &TaskId) -> String {
    format!("{}{}", MARATHON_TASK_TAG_PREFIX, task_id)
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ServiceId(pub String);

impl ServiceId {
    /// Deterministic ID of one task's registration under `name` on `port`
    pub fn for_task(task_id: &TaskId, name: &str, port: u16) -> Self {
        Self(format!("{}_{}_{}", task_id, name, port))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ServiceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A service instance as observed in the catalog
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Service {
    pub id: ServiceId,
    pub name: String,
    pub tags: Vec<String>,
    /// Node address of the agent that registered the instance; deregistration
    /// must go through that agent
    pub registering_agent_address: String,
}

impl Service {
    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.iter().any(|t| t == tag)
    }

    /// Converts one catalog entry, dropping entries without a node address
    pub fn from_catalog(entry: CatalogService) -> Option<Self> {
        if entry.address.is_empty() {
            warn!(id = %entry.service_id, name = %entry.service_name, "Skipping catalog entry without node address");
            return None;
        }
        Some(Self {
            id: ServiceId(entry.service_id),
            name: entry.service_name,
            tags: entry.service_tags.unwrap_or_default(),
            registering_agent_address: entry.address,
        })
    }

    pub fn from_catalog_entries(entries: Vec<CatalogService>) -> Vec<Self> {
        entries.into_iter().filter_map(Self::from_catalog).collect()
    }
}

/// Entry of `/v1/catalog/service/<name>`
#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize)]
pub struct CatalogService {
    #[serde(rename = "Node", default)]
    pub node: String,
    #[serde(rename = "Address", default)]
    pub address: String,
    #[serde(rename = "ServiceID", default)]
    pub service_id: String,
    #[serde(rename = "ServiceName", default)]
    pub service_name: String,
    #[serde(rename = "ServiceTags", default)]
    pub service_tags: Option<Vec<String>>,
    #[serde(rename = "ServicePort", default)]
    pub service_port: u16,
}

/// Health check attached to a registration, in agent API form
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct Check {
    #[serde(rename = "Interval")]
    pub interval: String,
    #[serde(rename = "Timeout")]
    pub timeout: String,
    #[serde(rename = "Status")]
    pub status: String,
    #[serde(rename = "HTTP", skip_serializing_if = "Option::is_none")]
    pub http: Option<String>,
    #[serde(rename = "TCP", skip_serializing_if = "Option::is_none")]
    pub tcp: Option<String>,
    #[serde(rename = "Script", skip_serializing_if = "Option::is_none")]
    pub script: Option<String>,
}

/// Body of `PUT /v1/agent/service/register`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ServiceRegistration {
    #[serde(rename = "ID")]
    pub id: ServiceId,
    #[serde(rename = "Name")]
    pub name: String,
    #[serde(rename = "Port")]
    pub port: u16,
    #[serde(rename = "Address")]
    pub address: String,
    #[serde(rename = "Tags")]
    pub tags: Vec<String>,
    #[serde(rename = "Checks")]
    pub checks: Vec<Check>,
}
