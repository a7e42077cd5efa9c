//! Marathon app and task records shared between the feed client and the
//! Consul synchronizer
//!
//! The records mirror the JSON Marathon serves from `/v2/apps?embed=apps.tasks`.
//! Everything here is read-only input for the synchronizer: it never mutates
//! an app or a task, it only derives registration intents from them.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Label marking an app (or one of its port definitions) for registration
pub const CONSUL_LABEL: &str = "consul";

/// Label value that turns the label key into a service tag
pub const TAG_LABEL_VALUE: &str = "tag";

/// Deprecated `consul` label value meaning "register under the app name"
pub const LEGACY_CONSUL_VALUE: &str = "true";

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AppId(pub String);

impl AppId {
    /// Catalog name derived from the app ID: surrounding slashes dropped,
    /// inner slashes replaced by `separator`
    pub fn consul_service_name(&self, separator: &str) -> String {
        self.0.trim().trim_matches('/').replace('/', separator)
    }
}

impl fmt::Display for AppId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(pub String);

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TaskId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Command {
    #[serde(default)]
    pub value: String,
}

/// Marathon health check definition
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthCheck {
    #[serde(default)]
    pub protocol: String,
    #[serde(default)]
    pub path: String,
    /// Explicit port, 0 when the check targets `port_index` instead
    #[serde(default)]
    pub port: u16,
    #[serde(default)]
    pub port_index: usize,
    #[serde(default)]
    pub interval_seconds: u32,
    #[serde(default)]
    pub timeout_seconds: u32,
    #[serde(default)]
    pub command: Option<Command>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct HealthCheckResult {
    #[serde(default)]
    pub alive: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PortDefinition {
    #[serde(default)]
    pub port: u16,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub id: TaskId,
    pub app_id: AppId,
    #[serde(default)]
    pub host: String,
    #[serde(default)]
    pub ports: Vec<u16>,
    #[serde(default)]
    pub health_check_results: Vec<HealthCheckResult>,
}

impl Task {
    /// True when Marathon reported results and every one of them is alive
    pub fn is_healthy(&self) -> bool {
        !self.health_check_results.is_empty() && self.health_check_results.iter().all(|r| r.alive)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct App {
    pub id: AppId,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    #[serde(default)]
    pub health_checks: Vec<HealthCheck>,
    #[serde(default)]
    pub port_definitions: Vec<PortDefinition>,
    #[serde(default)]
    pub tasks: Vec<Task>,
}

/// One (name, port, tags) tuple an app exposes for catalog registration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistrationIntent {
    pub name: String,
    pub port: u16,
    pub tags: Vec<String>,
}

impl App {
    /// Whether the app opted into catalog registration, either app-wide or
    /// on one of its port definitions
    pub fn is_consul_app(&self) -> bool {
        self.labels.contains_key(CONSUL_LABEL) || self.has_port_definition_labels()
    }

    /// Whether the app still uses the deprecated `consul: "true"` label
    pub fn uses_legacy_label(&self) -> bool {
        self.labels.get(CONSUL_LABEL).map(String::as_str) == Some(LEGACY_CONSUL_VALUE)
    }

    /// Every catalog name the app registers under
    pub fn consul_names(&self, separator: &str) -> Vec<String> {
        if !self.has_port_definition_labels() {
            return vec![self.name_from_labels(&self.labels, separator)];
        }
        self.port_definitions
            .iter()
            .filter(|d| d.labels.contains_key(CONSUL_LABEL))
            .map(|d| self.name_from_labels(&d.labels, separator))
            .collect()
    }

    /// Registration intents of `task`: one app-wide intent on the first port,
    /// or one per labelled port definition
    pub fn registration_intents(&self, task: &Task, separator: &str) -> Vec<RegistrationIntent> {
        let common_tags = labels_to_tags(&self.labels);

        if !self.has_port_definition_labels() {
            return match task.ports.first() {
                Some(&port) => vec![RegistrationIntent {
                    name: self.name_from_labels(&self.labels, separator),
                    port,
                    tags: common_tags,
                }],
                None => Vec::new(),
            };
        }

        self.port_definitions
            .iter()
            .enumerate()
            .filter(|(_, definition)| definition.labels.contains_key(CONSUL_LABEL))
            .filter_map(|(index, definition)| {
                let port = *task.ports.get(index)?;
                let mut tags = labels_to_tags(&definition.labels);
                tags.extend(common_tags.iter().cloned());
                Some(RegistrationIntent {
                    name: self.name_from_labels(&definition.labels, separator),
                    port,
                    tags,
                })
            })
            .collect()
    }

    fn has_port_definition_labels(&self) -> bool {
        self.port_definitions
            .iter()
            .any(|d| d.labels.contains_key(CONSUL_LABEL))
    }

    fn name_from_labels(&self, labels: &BTreeMap<String, String>, separator: &str) -> String {
        match labels.get(CONSUL_LABEL) {
            Some(value) if !value.is_empty() && value != LEGACY_CONSUL_VALUE => value.clone(),
            _ => self.id.consul_service_name(separator),
        }
    }
}

fn labels_to_tags(labels: &BTreeMap<String, String>) -> Vec<String> {
    labels
        .iter()
        .filter(|(_, value)| value.as_str() == TAG_LABEL_VALUE)
        .map(|(key, _)| key.clone())
        .collect()
}
