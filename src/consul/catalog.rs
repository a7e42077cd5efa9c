use crate::consul::service::{CatalogService, ServiceId, ServiceRegistration};
use crate::Result;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Datacenter a catalog read is scoped to; empty means the agent's own
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueryOptions {
    pub datacenter: String,
}

impl QueryOptions {
    pub fn for_datacenter(datacenter: impl Into<String>) -> Self {
        Self {
            datacenter: datacenter.into(),
        }
    }
}

/// Connection to one Consul agent
#[async_trait]
pub trait Catalog: Send + Sync {
    async fn datacenters(&self) -> Result<Vec<String>>;

    /// Instances of `name` carrying `tag`
    async fn service(
        &self,
        name: &str,
        tag: &str,
        query: &QueryOptions,
    ) -> Result<Vec<CatalogService>>;

    /// Every service name with the union of its instances' tags
    async fn services(&self, query: &QueryOptions) -> Result<BTreeMap<String, Vec<String>>>;

    async fn register(&self, registration: &ServiceRegistration) -> Result<()>;

    async fn deregister(&self, service_id: &ServiceId) -> Result<()>;
}

/// Opens a catalog handle for an agent address
pub trait Connector: Send + Sync {
    fn connect(&self, address: &str) -> Result<Arc<dyn Catalog>>;
}
