use crate::cli::Commands;
use crate::config::Config;
use crate::consul::{Consul, HttpConnector};
use crate::marathon::MarathonClient;
use crate::metrics::{PrometheusExporter, SyncMetrics};
use anyhow::{bail, Context, Result};
use futures::stream::{self, StreamExt};
use marathon_consul_common::{App, Task, TaskId};
use std::sync::Arc;
use tracing::{debug, error, info};

pub async fn handle_command(command: Commands, config: Config) -> Result<()> {
    match command {
        Commands::Services { name } => handle_services(&config, name).await,
        Commands::Sync { metrics } => handle_sync(&config, metrics).await,
        Commands::Deregister { task } => handle_deregister(&config, task).await,
    }
}

async fn connect_consul(config: &Config) -> Result<Consul> {
    let connector = HttpConnector::new(&config.consul).context("Failed to create Consul client")?;
    let metrics = SyncMetrics::new().context("Failed to create metrics registry")?;
    Ok(Consul::new(&config.consul, Arc::new(connector), metrics).await)
}

async fn handle_services(config: &Config, name: Option<String>) -> Result<()> {
    let consul = connect_consul(config).await?;

    let services = match &name {
        Some(name) => consul.get_services(name).await,
        None => consul.get_all_services().await,
    }
    .context("Failed to list services")?;

    info!("Found {} services", services.len());
    println!("{}", serde_json::to_string_pretty(&services)?);
    Ok(())
}

async fn handle_sync(config: &Config, print_metrics: bool) -> Result<()> {
    let marathon = MarathonClient::new(&config.marathon).context("Failed to create Marathon client")?;
    let apps = marathon
        .apps()
        .await
        .context("Failed to fetch apps from Marathon")?;

    let consul = connect_consul(config).await?;
    let report = sync_apps(&consul, &apps, config.sync.concurrency).await;

    info!(
        registered = report.registered,
        failed = report.failed,
        skipped = report.skipped,
        "Sync finished"
    );
    println!(
        "Registered {} tasks, {} failed, {} skipped",
        report.registered, report.failed, report.skipped
    );

    if print_metrics {
        let exporter = PrometheusExporter::new(consul.metrics().clone());
        print!("{}", exporter.format_current_metrics()?);
    }

    if report.failed > 0 {
        bail!("{} tasks failed to register", report.failed);
    }
    Ok(())
}

async fn handle_deregister(config: &Config, task: String) -> Result<()> {
    let consul = connect_consul(config).await?;
    let task_id = TaskId(task);

    consul
        .deregister_by_task(&task_id)
        .await
        .with_context(|| format!("Failed to deregister task {}", task_id))?;

    println!("Deregistered services of task {}", task_id);
    Ok(())
}

/// Outcome counts of one `sync_apps` pass
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SyncReport {
    pub registered: usize,
    pub failed: usize,
    /// Tasks left out because Marathon does not report them healthy
    pub skipped: usize,
}

/// Register the tasks of every integrated app, at most `concurrency` at a
/// time. Task hosts become known agents first.
pub async fn sync_apps(consul: &Consul, apps: &[App], concurrency: usize) -> SyncReport {
    consul.add_agents_from_apps(apps).await;

    let mut report = SyncReport::default();
    let mut pending: Vec<(&Task, &App)> = Vec::new();
    for app in apps.iter().filter(|app| app.is_consul_app()) {
        for task in &app.tasks {
            if task.is_healthy() || app.health_checks.is_empty() {
                pending.push((task, app));
            } else {
                debug!(id = %task.id, "Skipping task that is not healthy yet");
                report.skipped += 1;
            }
        }
    }

    let results: Vec<_> = stream::iter(pending)
        .map(|(task, app)| async move { (task, consul.register(task, app).await) })
        .buffer_unordered(concurrency.max(1))
        .collect()
        .await;

    for (task, result) in results {
        match result {
            Ok(()) => report.registered += 1,
            Err(e) => {
                error!(id = %task.id, error = %e, "Failed to register task");
                report.failed += 1;
            }
        }
    }

    report
}
