//! In-memory catalog used by the unit tests

use crate::consul::catalog::{Catalog, Connector, QueryOptions};
use crate::consul::service::{CatalogService, ServiceId, ServiceRegistration};
use crate::{Result, SyncError};
use async_trait::async_trait;
use dashmap::DashMap;
use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

pub(crate) struct FakeCatalog {
    datacenters: Mutex<Vec<String>>,
    instances: Mutex<Vec<(String, CatalogService)>>,
    failing_datacenters: Mutex<HashSet<String>>,
    fail_reads: AtomicBool,
    fail_writes: AtomicBool,
    registered: Mutex<Vec<ServiceRegistration>>,
    deregistered: Mutex<Vec<ServiceId>>,
    service_queries: Mutex<Vec<String>>,
}

impl FakeCatalog {
    pub fn new() -> Self {
        Self::with_datacenters(&["dc1"])
    }

    pub fn with_datacenters(datacenters: &[&str]) -> Self {
        Self {
            datacenters: Mutex::new(datacenters.iter().map(|d| d.to_string()).collect()),
            instances: Mutex::new(Vec::new()),
            failing_datacenters: Mutex::new(HashSet::new()),
            fail_reads: AtomicBool::new(false),
            fail_writes: AtomicBool::new(false),
            registered: Mutex::new(Vec::new()),
            deregistered: Mutex::new(Vec::new()),
            service_queries: Mutex::new(Vec::new()),
        }
    }

    pub fn add_instance(&self, datacenter: &str, name: &str, id: &str, address: &str, tags: &[&str]) {
        self.instances.lock().unwrap().push((
            datacenter.to_string(),
            CatalogService {
                node: format!("node-{}", address),
                address: address.to_string(),
                service_id: id.to_string(),
                service_name: name.to_string(),
                service_tags: Some(tags.iter().map(|t| t.to_string()).collect()),
                service_port: 0,
            },
        ));
    }

    pub fn fail_datacenter(&self, datacenter: &str) {
        self.failing_datacenters
            .lock()
            .unwrap()
            .insert(datacenter.to_string());
    }

    pub fn set_fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    pub fn registered(&self) -> Vec<ServiceRegistration> {
        self.registered.lock().unwrap().clone()
    }

    pub fn deregistered(&self) -> Vec<ServiceId> {
        self.deregistered.lock().unwrap().clone()
    }

    /// Datacenters of every `service` call, in call order
    pub fn service_queries(&self) -> Vec<String> {
        self.service_queries.lock().unwrap().clone()
    }

    fn check_read(&self, query: Option<&QueryOptions>) -> Result<()> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(SyncError::CatalogQuery("agent unreachable".to_string()));
        }
        if let Some(query) = query {
            if self
                .failing_datacenters
                .lock()
                .unwrap()
                .contains(&query.datacenter)
            {
                return Err(SyncError::CatalogQuery(format!(
                    "datacenter {} unavailable",
                    query.datacenter
                )));
            }
        }
        Ok(())
    }

    fn check_write(&self) -> Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(SyncError::CatalogUpdate("agent rejected write".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl Catalog for FakeCatalog {
    async fn datacenters(&self) -> Result<Vec<String>> {
        self.check_read(None)?;
        Ok(self.datacenters.lock().unwrap().clone())
    }

    async fn service(
        &self,
        name: &str,
        tag: &str,
        query: &QueryOptions,
    ) -> Result<Vec<CatalogService>> {
        self.check_read(Some(query))?;
        self.service_queries
            .lock()
            .unwrap()
            .push(query.datacenter.clone());
        Ok(self
            .instances
            .lock()
            .unwrap()
            .iter()
            .filter(|(dc, s)| dc == &query.datacenter && s.service_name == name)
            .filter(|(_, s)| {
                tag.is_empty()
                    || s.service_tags
                        .as_ref()
                        .map(|tags| tags.iter().any(|t| t == tag))
                        .unwrap_or(false)
            })
            .map(|(_, s)| s.clone())
            .collect())
    }

    async fn services(&self, query: &QueryOptions) -> Result<BTreeMap<String, Vec<String>>> {
        self.check_read(Some(query))?;
        let mut services: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for (dc, s) in self.instances.lock().unwrap().iter() {
            if dc != &query.datacenter {
                continue;
            }
            let tags = services.entry(s.service_name.clone()).or_default();
            for tag in s.service_tags.iter().flatten() {
                if !tags.contains(tag) {
                    tags.push(tag.clone());
                }
            }
        }
        Ok(services)
    }

    async fn register(&self, registration: &ServiceRegistration) -> Result<()> {
        self.check_write()?;
        self.registered.lock().unwrap().push(registration.clone());
        Ok(())
    }

    async fn deregister(&self, service_id: &ServiceId) -> Result<()> {
        self.check_write()?;
        self.deregistered.lock().unwrap().push(service_id.clone());
        Ok(())
    }
}

/// Hands out one shared `FakeCatalog` per address
#[derive(Default)]
pub(crate) struct FakeConnector {
    catalogs: DashMap<String, Arc<FakeCatalog>>,
    refused: Mutex<HashSet<String>>,
    connects: AtomicUsize,
}

impl FakeConnector {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn catalog(&self, address: &str) -> Arc<FakeCatalog> {
        self.catalogs
            .entry(address.to_string())
            .or_insert_with(|| Arc::new(FakeCatalog::new()))
            .clone()
    }

    pub fn refuse(&self, address: &str) {
        self.refused.lock().unwrap().insert(address.to_string());
    }

    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }
}

impl Connector for FakeConnector {
    fn connect(&self, address: &str) -> Result<Arc<dyn Catalog>> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        if self.refused.lock().unwrap().contains(address) {
            return Err(SyncError::AgentConnect {
                address: address.to_string(),
                reason: "connection refused".to_string(),
            });
        }
        let catalog: Arc<dyn Catalog> = self.catalog(address);
        Ok(catalog)
    }
}
