//! Datacenter fan-out
//!
//! A catalog read issued through one agent only sees that agent's datacenter
//! unless it names another one. These helpers discover every datacenter the
//! agent knows and repeat the read once per datacenter, sequentially. The
//! first failing datacenter aborts the whole read.

use crate::consul::catalog::{Catalog, QueryOptions};
use crate::consul::service::Service;
use crate::Result;
use tracing::debug;

/// One query context per datacenter known to `catalog`, in the order the
/// agent lists them
pub async fn dc_aware_queries(catalog: &dyn Catalog) -> Result<Vec<QueryOptions>> {
    let datacenters = catalog.datacenters().await?;
    debug!(datacenters = ?datacenters, "Discovered datacenters");
    Ok(datacenters
        .into_iter()
        .map(QueryOptions::for_datacenter)
        .collect())
}

/// Instances of `name` tagged `tag` across all datacenters
pub async fn instances_in_all_datacenters(
    catalog: &dyn Catalog,
    name: &str,
    tag: &str,
) -> Result<Vec<Service>> {
    let mut all = Vec::new();
    for query in dc_aware_queries(catalog).await? {
        let entries = catalog.service(name, tag, &query).await?;
        all.extend(Service::from_catalog_entries(entries));
    }
    Ok(all)
}

/// Instances tagged `tag` of every service whose tag set includes `tag`,
/// across all datacenters
pub async fn tagged_instances_in_all_datacenters(
    catalog: &dyn Catalog,
    tag: &str,
) -> Result<Vec<Service>> {
    let mut all = Vec::new();
    for query in dc_aware_queries(catalog).await? {
        let services = catalog.services(&query).await?;
        for (name, tags) in services {
            if !tags.iter().any(|t| t == tag) {
                continue;
            }
            let entries = catalog.service(&name, tag, &query).await?;
            all.extend(Service::from_catalog_entries(entries));
        }
    }
    Ok(all)
}
