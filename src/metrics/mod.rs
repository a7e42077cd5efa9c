pub mod collector;
pub mod exporter;

pub use collector::SyncMetrics;
pub use exporter::PrometheusExporter;
