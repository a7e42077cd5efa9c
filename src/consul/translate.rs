//! Marathon task → Consul registration translation
//!
//! Pure apart from host resolution: the same task and app always produce the
//! same registrations, with IDs derived from task ID, service name and port.
//! Health checks are mapped through a table of per-protocol builders; a check
//! that cannot be built is logged and dropped without failing the
//! registration.

use crate::config::ConsulConfig;
use crate::consul::service::{marathon_task_tag, Check, ServiceId, ServiceRegistration};
use crate::{Result, SyncError};
use marathon_consul_common::{App, HealthCheck, Task};
use std::net::{IpAddr, Ipv4Addr};
use tracing::{info, warn};
use url::{Position, Url};

const PASSING: &str = "passing";

/// Resolve a task host to an IPv4 address; literal addresses skip DNS
pub async fn resolve_ipv4(host: &str) -> Result<Ipv4Addr> {
    let host = host.trim();
    if host.is_empty() {
        return Err(SyncError::AddressResolution {
            host: host.to_string(),
            reason: "empty host".to_string(),
        });
    }
    if let Ok(ip) = host.parse::<Ipv4Addr>() {
        return Ok(ip);
    }

    let addrs = tokio::net::lookup_host((host, 0))
        .await
        .map_err(|e| SyncError::AddressResolution {
            host: host.to_string(),
            reason: e.to_string(),
        })?;

    addrs
        .filter_map(|addr| match addr.ip() {
            IpAddr::V4(ip) => Some(ip),
            IpAddr::V6(_) => None,
        })
        .next()
        .ok_or_else(|| SyncError::AddressResolution {
            host: host.to_string(),
            reason: "no IPv4 address".to_string(),
        })
}

/// Upper-cased, trimmed, non-empty entries of a comma-separated list
pub fn parse_ignored_check_types(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(|t| t.trim().to_uppercase())
        .filter(|t| !t.is_empty())
        .collect()
}

/// Inputs a check builder works from
struct CheckTarget<'a> {
    task: &'a Task,
    check: &'a HealthCheck,
    address: &'a str,
}

impl CheckTarget<'_> {
    /// Explicit port when set, otherwise the task port at `port_index`
    fn port(&self) -> std::result::Result<u16, String> {
        if self.check.port != 0 {
            return Ok(self.check.port);
        }
        self.task
            .ports
            .get(self.check.port_index)
            .copied()
            .ok_or_else(|| {
                format!(
                    "Port index {} out of range, task has {} ports",
                    self.check.port_index,
                    self.task.ports.len()
                )
            })
    }

    fn base(&self) -> Check {
        Check {
            interval: format!("{}s", self.check.interval_seconds),
            timeout: format!("{}s", self.check.timeout_seconds),
            status: PASSING.to_string(),
            ..Default::default()
        }
    }
}

type CheckBuilder = fn(&CheckTarget<'_>) -> std::result::Result<Check, String>;

const CHECK_BUILDERS: &[(&str, CheckBuilder)] = &[
    ("HTTP", build_http_check),
    ("HTTPS", build_http_check),
    ("TCP", build_tcp_check),
    ("COMMAND", build_command_check),
];

fn check_builder(protocol: &str) -> Option<CheckBuilder> {
    CHECK_BUILDERS
        .iter()
        .find(|(name, _)| *name == protocol)
        .map(|(_, builder)| *builder)
}

fn build_http_check(target: &CheckTarget<'_>) -> std::result::Result<Check, String> {
    let path = &target.check.path;
    let request_uri = request_uri(path)
        .ok_or_else(|| format!("Could not parse provided path: {}", path))?;
    let port = target.port()?;
    let scheme = target.check.protocol.trim().to_lowercase();

    let url = Url::parse(&format!("{}://{}:{}{}", scheme, target.address, port, request_uri))
        .map_err(|e| format!("Could not parse provided path: {} ({})", path, e))?;
    // Canonical (escaped) path and query; the port stays explicit even when
    // it is the scheme default.
    let http = format!(
        "{}://{}:{}{}",
        url.scheme(),
        target.address,
        port,
        &url[Position::BeforePath..]
    );

    Ok(Check {
        http: Some(http),
        ..target.base()
    })
}

fn build_tcp_check(target: &CheckTarget<'_>) -> std::result::Result<Check, String> {
    let port = target.port()?;
    Ok(Check {
        tcp: Some(format!("{}:{}", target.address, port)),
        ..target.base()
    })
}

fn build_command_check(target: &CheckTarget<'_>) -> std::result::Result<Check, String> {
    match &target.check.command {
        Some(command) if !command.value.trim().is_empty() => Ok(Check {
            script: Some(command.value.clone()),
            ..target.base()
        }),
        _ => Err("Command check without a command".to_string()),
    }
}

/// Path plus query of a request URI: either an absolute path or an absolute
/// URL whose scheme and host get replaced
fn request_uri(path: &str) -> Option<String> {
    if path.starts_with('/') {
        return Some(path.to_string());
    }
    let url = Url::parse(path).ok()?;
    if !url.has_host() {
        return None;
    }
    let mut uri = url.path().to_string();
    if let Some(query) = url.query() {
        uri.push('?');
        uri.push_str(query);
    }
    Some(uri)
}

/// Builds catalog registrations from Marathon tasks
#[derive(Debug, Clone)]
pub struct ServiceTranslator {
    tag: String,
    name_separator: String,
    ignored_check_types: Vec<String>,
}

impl ServiceTranslator {
    pub fn new(tag: impl Into<String>, name_separator: impl Into<String>, ignored_healthchecks: &str) -> Self {
        Self {
            tag: tag.into(),
            name_separator: name_separator.into(),
            ignored_check_types: parse_ignored_check_types(ignored_healthchecks),
        }
    }

    pub fn from_config(config: &ConsulConfig) -> Self {
        Self::new(
            config.tag.clone(),
            config.name_separator.clone(),
            &config.ignored_healthchecks,
        )
    }

    pub fn ignored_check_types(&self) -> &[String] {
        &self.ignored_check_types
    }

    pub fn name_separator(&self) -> &str {
        &self.name_separator
    }

    /// Resolve the task host and build one registration per intent
    pub async fn to_registrations(&self, task: &Task, app: &App) -> Result<Vec<ServiceRegistration>> {
        let address = resolve_ipv4(&task.host).await?;
        Ok(self.registrations_at(task, app, &address.to_string()))
    }

    /// Registrations for `task` served at an already resolved `address`
    pub fn registrations_at(&self, task: &Task, app: &App, address: &str) -> Vec<ServiceRegistration> {
        let checks = self.to_checks(task, &app.health_checks, address);
        let task_tag = marathon_task_tag(&task.id);

        app.registration_intents(task, &self.name_separator)
            .into_iter()
            .map(|intent| {
                let mut tags = Vec::with_capacity(intent.tags.len() + 2);
                tags.push(self.tag.clone());
                tags.extend(intent.tags);
                tags.push(task_tag.clone());

                ServiceRegistration {
                    id: ServiceId::for_task(&task.id, &intent.name, intent.port),
                    name: intent.name,
                    port: intent.port,
                    address: address.to_string(),
                    tags,
                    checks: checks.clone(),
                }
            })
            .collect()
    }

    /// Consul checks for the task's Marathon health checks; checks that
    /// cannot be built are logged and left out
    pub fn to_checks(&self, task: &Task, health_checks: &[HealthCheck], address: &str) -> Vec<Check> {
        let mut checks = Vec::with_capacity(health_checks.len());

        for check in health_checks {
            let protocol = check.protocol.trim().to_uppercase();

            if self.ignored_check_types.contains(&protocol) {
                info!(
                    id = %task.app_id,
                    address = %address,
                    "Ignoring health check of type {}",
                    check.protocol
                );
                continue;
            }

            let Some(builder) = check_builder(&protocol) else {
                warn!(
                    id = %task.app_id,
                    address = %address,
                    "Unrecognized check protocol {}",
                    check.protocol
                );
                continue;
            };

            let target = CheckTarget {
                task,
                check,
                address,
            };
            match builder(&target) {
                Ok(built) => checks.push(built),
                Err(reason) => {
                    warn!(id = %task.app_id, address = %address, "{}", reason);
                }
            }
        }

        checks
    }
}
