use crate::config::MarathonConfig;
use crate::{Result, SyncError};
use marathon_consul_common::App;
use reqwest::{Client, Response};
use serde::Deserialize;
use tracing::debug;
use url::Url;

#[derive(Debug, Deserialize)]
struct AppsResponse {
    #[serde(default)]
    apps: Vec<App>,
}

pub struct MarathonClient {
    client: Client,
    base: Url,
    username: Option<String>,
    password: Option<String>,
}

impl MarathonClient {
    pub fn new(config: &MarathonConfig) -> Result<Self> {
        let base = Url::parse(&format!("{}://{}/", config.protocol, config.location))
            .map_err(|e| SyncError::Config(format!("Invalid Marathon location '{}': {}", config.location, e)))?;
        let client = Client::builder()
            .timeout(config.timeout())
            .build()
            .map_err(|e| SyncError::Config(format!("Failed to build Marathon HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base,
            username: config.username.clone().filter(|u| !u.is_empty()),
            password: config.password.clone(),
        })
    }

    /// All apps with their tasks embedded
    pub async fn apps(&self) -> Result<Vec<App>> {
        let mut url = self
            .base
            .join("v2/apps")
            .map_err(|e| SyncError::Marathon(e.to_string()))?;
        url.query_pairs_mut().append_pair("embed", "apps.tasks");
        debug!(url = %url, "Fetching Marathon apps");

        let mut request = self.client.get(url);
        if let Some(username) = &self.username {
            request = request.basic_auth(username, self.password.as_ref());
        }

        let response = request
            .send()
            .await
            .and_then(Response::error_for_status)
            .map_err(|e| SyncError::Marathon(format!("Failed to fetch apps: {}", e)))?;
        let body: AppsResponse = response
            .json()
            .await
            .map_err(|e| SyncError::Marathon(format!("Failed to decode apps: {}", e)))?;

        debug!("Fetched {} Marathon apps", body.apps.len());
        Ok(body.apps)
    }
}
