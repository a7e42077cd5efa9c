//! Consul agent HTTP API adapter

use crate::config::ConsulConfig;
use crate::consul::catalog::{Catalog, Connector, QueryOptions};
use crate::consul::service::{CatalogService, ServiceId, ServiceRegistration};
use crate::{Result, SyncError};
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::debug;
use url::Url;

const TOKEN_HEADER: &str = "X-Consul-Token";

/// Opens `HttpCatalog` handles sharing one HTTP client
#[derive(Clone)]
pub struct HttpConnector {
    client: Client,
    scheme: &'static str,
    port: u16,
    token: Option<String>,
}

impl HttpConnector {
    pub fn new(config: &ConsulConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.timeout())
            .build()
            .map_err(|e| SyncError::Config(format!("Failed to build Consul HTTP client: {}", e)))?;

        Ok(Self {
            client,
            scheme: config.scheme(),
            port: config.port,
            token: config.token.clone().filter(|t| !t.is_empty()),
        })
    }
}

impl Connector for HttpConnector {
    fn connect(&self, address: &str) -> Result<Arc<dyn Catalog>> {
        let base = Url::parse(&format!("{}://{}:{}/", self.scheme, address, self.port)).map_err(
            |e| SyncError::AgentConnect {
                address: address.to_string(),
                reason: e.to_string(),
            },
        )?;
        debug!(address = %address, url = %base, "Connecting to Consul agent");

        let catalog: Arc<dyn Catalog> = Arc::new(HttpCatalog {
            client: self.client.clone(),
            address: address.to_string(),
            base,
            token: self.token.clone(),
        });
        Ok(catalog)
    }
}

/// Catalog handle talking to one agent over HTTP
pub struct HttpCatalog {
    client: Client,
    address: String,
    base: Url,
    token: Option<String>,
}

impl HttpCatalog {
    fn url(&self, segments: &[&str], query: &QueryOptions) -> Result<Url> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|_| SyncError::AgentConnect {
                address: self.address.clone(),
                reason: format!("{} cannot be a base URL", self.base),
            })?
            .pop_if_empty()
            .extend(segments);
        if !query.datacenter.is_empty() {
            url.query_pairs_mut().append_pair("dc", &query.datacenter);
        }
        Ok(url)
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.token {
            Some(token) => request.header(TOKEN_HEADER, token),
            None => request,
        }
    }

    async fn get_json<T: DeserializeOwned>(&self, url: Url) -> Result<T> {
        let query_error = |e: reqwest::Error| SyncError::CatalogQuery(format!("{}: {}", self.address, e));

        let response = self
            .authorized(self.client.get(url))
            .send()
            .await
            .and_then(Response::error_for_status)
            .map_err(query_error)?;
        response.json::<T>().await.map_err(query_error)
    }

    async fn put(&self, request: RequestBuilder) -> Result<()> {
        self.authorized(request)
            .send()
            .await
            .and_then(Response::error_for_status)
            .map_err(|e| SyncError::CatalogUpdate(format!("{}: {}", self.address, e)))?;
        Ok(())
    }
}

#[async_trait]
impl Catalog for HttpCatalog {
    async fn datacenters(&self) -> Result<Vec<String>> {
        let url = self.url(&["v1", "catalog", "datacenters"], &QueryOptions::default())?;
        self.get_json(url).await
    }

    async fn service(
        &self,
        name: &str,
        tag: &str,
        query: &QueryOptions,
    ) -> Result<Vec<CatalogService>> {
        let mut url = self.url(&["v1", "catalog", "service", name], query)?;
        if !tag.is_empty() {
            url.query_pairs_mut().append_pair("tag", tag);
        }
        self.get_json(url).await
    }

    async fn services(&self, query: &QueryOptions) -> Result<BTreeMap<String, Vec<String>>> {
        let url = self.url(&["v1", "catalog", "services"], query)?;
        let services: BTreeMap<String, Option<Vec<String>>> = self.get_json(url).await?;
        Ok(services
            .into_iter()
            .map(|(name, tags)| (name, tags.unwrap_or_default()))
            .collect())
    }

    async fn register(&self, registration: &ServiceRegistration) -> Result<()> {
        let url = self.url(&["v1", "agent", "service", "register"], &QueryOptions::default())?;
        self.put(self.client.put(url).json(registration)).await
    }

    async fn deregister(&self, service_id: &ServiceId) -> Result<()> {
        let url = self.url(
            &["v1", "agent", "service", "deregister", service_id.as_str()],
            &QueryOptions::default(),
        )?;
        self.put(self.client.put(url)).await
    }
}
