//! Consul side of the bridge
//!
//! `Consul` ties the agent pool, the retrying read path and the task
//! translator together. Reads go through any healthy agent with failover;
//! writes go to the agent that owns the address being registered or
//! deregistered, with no retry.

pub mod agent;
pub mod catalog;
pub mod datacenters;
pub mod http;
pub mod retry;
pub mod service;
pub mod translate;

#[cfg(test)]
pub(crate) mod fake;

pub use agent::{Agent, AgentPool};
pub use catalog::{Catalog, Connector, QueryOptions};
pub use http::{HttpCatalog, HttpConnector};
pub use retry::{AgentOperation, Retrier, RetryPolicy, ServicesByName, ServicesByTag};
pub use service::{marathon_task_tag, Check, Service, ServiceId, ServiceRegistration};
pub use translate::ServiceTranslator;

use crate::config::ConsulConfig;
use crate::error::AggregateError;
use crate::metrics::SyncMetrics;
use crate::{Result, SyncError};
use marathon_consul_common::{App, Task, TaskId};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

pub struct Consul {
    pool: AgentPool,
    retrier: Retrier,
    translator: ServiceTranslator,
    tag: String,
    metrics: SyncMetrics,
}

impl Consul {
    /// Build the synchronizer and connect the configured seed agents. Seeds
    /// are keyed by their IPv4 address, like agents learned from task hosts.
    pub async fn new(config: &ConsulConfig, connector: Arc<dyn Connector>, metrics: SyncMetrics) -> Self {
        let mut seeds = Vec::with_capacity(config.agents.len());
        for host in &config.agents {
            match translate::resolve_ipv4(host).await {
                Ok(address) => seeds.push(address.to_string()),
                Err(e) => warn!(address = %host, error = %e, "Can't resolve seed agent"),
            }
        }

        let pool = AgentPool::new(connector);
        pool.seed(&seeds);

        Self {
            retrier: Retrier::new(pool.clone(), config.retry_policy()),
            pool,
            translator: ServiceTranslator::from_config(config),
            tag: config.tag.clone(),
            metrics,
        }
    }

    pub fn agents(&self) -> &AgentPool {
        &self.pool
    }

    pub fn metrics(&self) -> &SyncMetrics {
        &self.metrics
    }

    pub fn tag(&self) -> &str {
        &self.tag
    }

    /// Instances of `name` carrying the global tag, across all datacenters
    pub async fn get_services(&self, name: &str) -> Result<Vec<Service>> {
        self.retrier
            .with_retry(&ServicesByName {
                name,
                tag: &self.tag,
            })
            .await
    }

    /// Every instance carrying the global tag, across all datacenters
    pub async fn get_all_services(&self) -> Result<Vec<Service>> {
        self.retrier.with_retry(&ServicesByTag { tag: &self.tag }).await
    }

    pub async fn find_services_by_task(&self, task_id: &TaskId) -> Result<Vec<Service>> {
        let tag = marathon_task_tag(task_id);
        self.retrier.with_retry(&ServicesByTag { tag: &tag }).await
    }

    /// Register every service `task` exposes, each on the agent at the task's
    /// address. Registrations that succeeded stay in place when others fail.
    /// Translation failures return before anything is timed or counted.
    pub async fn register(&self, task: &Task, app: &App) -> Result<()> {
        let registrations = self.translator.to_registrations(task, app).await?;

        if app.uses_legacy_label() {
            warn!(
                id = %app.id,
                "Application uses the deprecated \"consul\": \"true\" label, use \"consul\": \"\" instead"
            );
        }
        if registrations.is_empty() {
            debug!(id = %task.id, "Task exposes no services");
        }

        let timer = self.metrics.start_register_timer();
        let result = self.submit_registrations(&registrations).await;
        timer.observe_duration();
        self.metrics.record_register(result.is_ok());

        result
    }

    async fn submit_registrations(&self, registrations: &[ServiceRegistration]) -> Result<()> {
        let mut errors = Vec::new();
        for registration in registrations {
            match self.register_on_agent(registration).await {
                Ok(()) => info!(
                    id = %registration.id,
                    name = %registration.name,
                    address = %registration.address,
                    port = registration.port,
                    tags = ?registration.tags,
                    "Service registered"
                ),
                Err(e) => {
                    error!(
                        id = %registration.id,
                        address = %registration.address,
                        error = %e,
                        "Unable to register service"
                    );
                    errors.push(e);
                }
            }
        }

        AggregateError::merge(errors, "registering services")
    }

    async fn register_on_agent(&self, registration: &ServiceRegistration) -> Result<()> {
        let agent = self.pool.get_agent(&registration.address)?;
        agent.catalog().register(registration).await
    }

    /// Deregister every service carrying the task's identity tag
    pub async fn deregister_by_task(&self, task_id: &TaskId) -> Result<()> {
        let services = self.find_services_by_task(task_id).await?;
        if services.is_empty() {
            return Err(SyncError::NoMatchingService(task_id.clone()));
        }

        let mut errors = Vec::new();
        for service in &services {
            if let Err(e) = self.deregister(service).await {
                errors.push(e);
            }
        }

        AggregateError::merge(errors, format!("deregistering by task {}", task_id))
    }

    /// Deregister `service` through the agent that registered it
    pub async fn deregister(&self, service: &Service) -> Result<()> {
        let timer = self.metrics.start_deregister_timer();
        let result = self.deregister_on_agent(service).await;
        timer.observe_duration();
        self.metrics.record_deregister(result.is_ok());

        match &result {
            Ok(()) => info!(
                id = %service.id,
                address = %service.registering_agent_address,
                "Service deregistered"
            ),
            Err(e) => error!(
                id = %service.id,
                address = %service.registering_agent_address,
                error = %e,
                "Unable to deregister service"
            ),
        }
        result
    }

    async fn deregister_on_agent(&self, service: &Service) -> Result<()> {
        let agent = self.pool.get_agent(&service.registering_agent_address)?;
        agent.catalog().deregister(&service.id).await
    }

    /// Make the host of every task of every integrated app a known agent
    pub async fn add_agents_from_apps(&self, apps: &[App]) {
        for app in apps.iter().filter(|app| app.is_consul_app()) {
            for task in &app.tasks {
                if let Err(e) = self.add_agent(&task.host).await {
                    error!(
                        id = %task.id,
                        address = %task.host,
                        error = %e,
                        "Can't add agent node"
                    );
                }
            }
        }
    }

    pub async fn add_agent(&self, host: &str) -> Result<Arc<Agent>> {
        let address = translate::resolve_ipv4(host).await?;
        self.pool.get_agent(&address.to_string())
    }

    /// Every catalog name `app` registers under
    pub fn service_names(&self, app: &App) -> Vec<String> {
        app.consul_names(self.translator.name_separator())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consul::fake::FakeConnector;
    use marathon_consul_common::{AppId, HealthCheck, HealthCheckResult};
    use std::collections::BTreeMap;

    fn config(agents: &[&str]) -> ConsulConfig {
        ConsulConfig {
            agents: agents.iter().map(|a| a.to_string()).collect(),
            request_retries: 2,
            agent_failures_tolerance: 2,
            ..Default::default()
        }
    }

    async fn consul(agents: &[&str]) -> (Consul, Arc<FakeConnector>) {
        let connector = FakeConnector::new();
        let consul = Consul::new(&config(agents), connector.clone(), SyncMetrics::new().unwrap()).await;
        (consul, connector)
    }

    fn app(id: &str, labels: &[(&str, &str)]) -> App {
        App {
            id: AppId(id.to_string()),
            labels: labels
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect::<BTreeMap<_, _>>(),
            health_checks: vec![HealthCheck {
                protocol: "TCP".to_string(),
                port_index: 0,
                interval_seconds: 10,
                timeout_seconds: 5,
                ..Default::default()
            }],
            port_definitions: Vec::new(),
            tasks: Vec::new(),
        }
    }

    fn task(id: &str, host: &str, ports: &[u16]) -> Task {
        Task {
            id: TaskId::from(id),
            app_id: AppId("/web".to_string()),
            host: host.to_string(),
            ports: ports.to_vec(),
            health_check_results: vec![HealthCheckResult { alive: true }],
        }
    }

    #[tokio::test]
    async fn test_new_seeds_configured_agents() {
        let (consul, _) = consul(&["10.0.0.1", "10.0.0.2"]).await;
        assert_eq!(
            consul.agents().addresses(),
            vec!["10.0.0.1".to_string(), "10.0.0.2".to_string()]
        );
    }

    #[tokio::test]
    async fn test_register_submits_to_task_agent() {
        let (consul, connector) = consul(&[]).await;
        let app = app("/web", &[("consul", ""), ("public", "tag")]);
        let task = task("web.1", "10.0.0.5", &[31000]);

        consul.register(&task, &app).await.unwrap();

        let registered = connector.catalog("10.0.0.5").registered();
        assert_eq!(registered.len(), 1);
        assert_eq!(registered[0].id.as_str(), "web.1_web_31000");
        assert_eq!(registered[0].name, "web");
        assert_eq!(registered[0].address, "10.0.0.5");
        assert_eq!(
            registered[0].tags,
            vec!["marathon", "public", "marathon-task:web.1"]
        );
        assert_eq!(registered[0].checks[0].tcp.as_deref(), Some("10.0.0.5:31000"));
        assert!(consul.agents().contains("10.0.0.5"));
        assert_eq!(consul.metrics().register_success(), 1);
        assert_eq!(consul.metrics().register_timings(), 1);
    }

    #[tokio::test]
    async fn test_register_twice_yields_identical_ids() {
        let (consul, connector) = consul(&[]).await;
        let app = app("/web", &[("consul", "")]);
        let task = task("web.1", "10.0.0.5", &[31000]);

        consul.register(&task, &app).await.unwrap();
        consul.register(&task, &app).await.unwrap();

        let registered = connector.catalog("10.0.0.5").registered();
        assert_eq!(registered.len(), 2);
        assert_eq!(registered[0].id, registered[1].id);
    }

    #[tokio::test]
    async fn test_register_failure_is_aggregated() {
        let (consul, connector) = consul(&[]).await;
        connector.catalog("10.0.0.5").set_fail_writes(true);
        let app = app("/web", &[("consul", "")]);
        let task = task("web.1", "10.0.0.5", &[31000]);

        let err = consul.register(&task, &app).await.unwrap_err();

        match err {
            SyncError::Aggregate(aggregate) => {
                assert_eq!(aggregate.len(), 1);
                assert!(matches!(aggregate.errors[0], SyncError::CatalogUpdate(_)));
            }
            other => panic!("expected aggregate error, got {:?}", other),
        }
        assert_eq!(consul.metrics().register_error(), 1);
        assert_eq!(consul.metrics().register_success(), 0);
    }

    #[tokio::test]
    async fn test_register_unreachable_agent_is_an_error() {
        let (consul, connector) = consul(&[]).await;
        connector.refuse("10.0.0.5");
        let app = app("/web", &[("consul", "")]);
        let task = task("web.1", "10.0.0.5", &[31000]);

        let err = consul.register(&task, &app).await.unwrap_err();
        assert!(err.to_string().contains("registering services"));
    }

    #[tokio::test]
    async fn test_register_without_ports_registers_nothing() {
        let (consul, connector) = consul(&[]).await;
        let app = app("/web", &[("consul", "")]);
        let task = task("web.1", "10.0.0.5", &[]);

        consul.register(&task, &app).await.unwrap();

        assert!(connector.catalog("10.0.0.5").registered().is_empty());
    }

    #[tokio::test]
    async fn test_get_services_reads_through_any_agent() {
        let (consul, connector) = consul(&["10.0.0.1"]).await;
        let catalog = connector.catalog("10.0.0.1");
        catalog.add_instance("dc1", "web", "web.1_web_31000", "10.0.0.5", &["marathon"]);
        catalog.add_instance("dc1", "web", "manual", "10.0.0.6", &["other"]);

        let services = consul.get_services("web").await.unwrap();

        assert_eq!(services.len(), 1);
        assert_eq!(services[0].registering_agent_address, "10.0.0.5");
    }

    #[tokio::test]
    async fn test_get_all_services_filters_by_tag() {
        let (consul, connector) = consul(&["10.0.0.1"]).await;
        let catalog = connector.catalog("10.0.0.1");
        catalog.add_instance("dc1", "web", "w", "10.0.0.5", &["marathon"]);
        catalog.add_instance("dc1", "db", "d", "10.0.0.6", &["manual"]);

        let services = consul.get_all_services().await.unwrap();

        assert_eq!(services.len(), 1);
        assert_eq!(services[0].name, "web");
    }

    #[tokio::test]
    async fn test_reads_exhaust_retries() {
        let (consul, connector) = consul(&["10.0.0.1"]).await;
        connector.catalog("10.0.0.1").set_fail_reads(true);

        let result = consul.get_all_services().await;

        assert!(matches!(
            result,
            Err(SyncError::RetriesExhausted { attempts: 3 })
        ));
        assert!(!consul.agents().contains("10.0.0.1"));
    }

    #[tokio::test]
    async fn test_deregister_by_task_without_match() {
        let (consul, connector) = consul(&["10.0.0.1"]).await;
        let catalog = connector.catalog("10.0.0.1");
        catalog.add_instance("dc1", "web", "w", "10.0.0.1", &["marathon", "marathon-task:other"]);

        let err = consul
            .deregister_by_task(&TaskId::from("web.1"))
            .await
            .unwrap_err();

        assert!(matches!(err, SyncError::NoMatchingService(_)));
        assert!(catalog.deregistered().is_empty());
        assert_eq!(consul.metrics().deregister_success(), 0);
    }

    #[tokio::test]
    async fn test_deregister_by_task_targets_registering_agent() {
        let (consul, connector) = consul(&["10.0.0.1"]).await;
        connector.catalog("10.0.0.1").add_instance(
            "dc1",
            "web",
            "web.1_web_31000",
            "10.0.0.5",
            &["marathon", "marathon-task:web.1"],
        );

        consul
            .deregister_by_task(&TaskId::from("web.1"))
            .await
            .unwrap();

        assert_eq!(
            connector.catalog("10.0.0.5").deregistered(),
            vec![ServiceId("web.1_web_31000".to_string())]
        );
        assert!(connector.catalog("10.0.0.1").deregistered().is_empty());
        assert_eq!(consul.metrics().deregister_success(), 1);
        assert_eq!(consul.metrics().deregister_timings(), 1);
    }

    #[tokio::test]
    async fn test_deregister_by_task_merges_errors() {
        let (consul, connector) = consul(&["10.0.0.1"]).await;
        let catalog = connector.catalog("10.0.0.1");
        catalog.add_instance("dc1", "web", "a", "10.0.0.5", &["marathon-task:web.1"]);
        catalog.add_instance("dc1", "api", "b", "10.0.0.6", &["marathon-task:web.1"]);
        connector.catalog("10.0.0.6").set_fail_writes(true);

        let err = consul
            .deregister_by_task(&TaskId::from("web.1"))
            .await
            .unwrap_err();

        assert!(err.to_string().contains("deregistering by task web.1"));
        assert_eq!(connector.catalog("10.0.0.5").deregistered().len(), 1);
        assert_eq!(consul.metrics().deregister_success(), 1);
        assert_eq!(consul.metrics().deregister_error(), 1);
    }

    #[tokio::test]
    async fn test_add_agents_from_apps_skips_other_apps() {
        let (consul, _) = consul(&[]).await;
        let mut integrated = app("/web", &[("consul", "")]);
        integrated.tasks = vec![task("web.1", "10.0.0.5", &[31000]), task("web.2", "", &[31001])];
        let mut other = app("/batch", &[]);
        other.tasks = vec![task("batch.1", "10.0.0.9", &[31002])];

        consul.add_agents_from_apps(&[integrated, other]).await;

        assert_eq!(consul.agents().addresses(), vec!["10.0.0.5".to_string()]);
    }

    #[tokio::test]
    async fn test_service_names() {
        let (consul, _) = consul(&[]).await;
        let app = app("/team/web", &[("consul", "")]);
        assert_eq!(consul.service_names(&app), vec!["team.web".to_string()]);
    }

    #[tokio::test]
    async fn test_seeds_are_keyed_by_resolved_address() {
        let (consul, connector) = consul(&["localhost", "127.0.0.1", ""]).await;

        assert_eq!(consul.agents().addresses(), vec!["127.0.0.1".to_string()]);
        assert_eq!(connector.connects(), 1);
    }

    #[tokio::test]
    async fn test_register_translation_failure_is_not_counted() {
        let (consul, _) = consul(&[]).await;
        let app = app("/web", &[("consul", "true")]);
        let task = task("web.1", "host.invalid", &[31000]);

        let err = consul.register(&task, &app).await.unwrap_err();

        assert!(matches!(err, SyncError::AddressResolution { .. }));
        assert_eq!(consul.metrics().register_error(), 0);
        assert_eq!(consul.metrics().register_success(), 0);
        assert_eq!(consul.metrics().register_timings(), 0);
    }
}
