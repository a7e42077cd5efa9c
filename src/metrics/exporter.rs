use crate::metrics::collector::SyncMetrics;
use crate::Result;
use prometheus::{Encoder, TextEncoder};
use std::io::Write;
use tracing::debug;

/// Renders the synchronizer metrics in the Prometheus text format
pub struct PrometheusExporter {
    metrics: SyncMetrics,
}

impl PrometheusExporter {
    pub fn new(metrics: SyncMetrics) -> Self {
        Self { metrics }
    }

    pub fn format_current_metrics(&self) -> Result<String> {
        let families = self.metrics.registry().gather();
        Ok(TextEncoder::new().encode_to_string(&families)?)
    }

    pub fn write_to<W: Write>(&self, writer: &mut W) -> Result<()> {
        let families = self.metrics.registry().gather();
        debug!("Exporting {} metric families", families.len());
        TextEncoder::new().encode(&families, writer)?;
        Ok(())
    }
}
