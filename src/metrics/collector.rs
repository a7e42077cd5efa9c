use crate::Result;
use prometheus::{Histogram, HistogramOpts, HistogramTimer, IntCounter, Registry};

/// Registration and deregistration counters plus timings, held in a private
/// registry so several synchronizers can coexist in one process
#[derive(Clone)]
pub struct SyncMetrics {
    registry: Registry,
    register_success: IntCounter,
    register_error: IntCounter,
    register_duration: Histogram,
    deregister_success: IntCounter,
    deregister_error: IntCounter,
    deregister_duration: Histogram,
}

impl SyncMetrics {
    pub fn new() -> Result<Self> {
        let registry = Registry::new();

        let register_success = IntCounter::new(
            "consul_register_success_total",
            "Tasks whose services were all registered",
        )?;
        let register_error = IntCounter::new(
            "consul_register_error_total",
            "Tasks with at least one failed registration",
        )?;
        let register_duration = Histogram::with_opts(HistogramOpts::new(
            "consul_register_duration_seconds",
            "Time spent registering the services of one task",
        ))?;
        let deregister_success = IntCounter::new(
            "consul_deregister_success_total",
            "Services deregistered",
        )?;
        let deregister_error = IntCounter::new(
            "consul_deregister_error_total",
            "Failed service deregistrations",
        )?;
        let deregister_duration = Histogram::with_opts(HistogramOpts::new(
            "consul_deregister_duration_seconds",
            "Time spent deregistering one service",
        ))?;

        registry.register(Box::new(register_success.clone()))?;
        registry.register(Box::new(register_error.clone()))?;
        registry.register(Box::new(register_duration.clone()))?;
        registry.register(Box::new(deregister_success.clone()))?;
        registry.register(Box::new(deregister_error.clone()))?;
        registry.register(Box::new(deregister_duration.clone()))?;

        #[cfg(target_os = "linux")]
        registry.register(Box::new(
            prometheus::process_collector::ProcessCollector::for_self(),
        ))?;

        Ok(Self {
            registry,
            register_success,
            register_error,
            register_duration,
            deregister_success,
            deregister_error,
            deregister_duration,
        })
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Observes on drop or on `observe_duration`
    pub fn start_register_timer(&self) -> HistogramTimer {
        self.register_duration.start_timer()
    }

    pub fn start_deregister_timer(&self) -> HistogramTimer {
        self.deregister_duration.start_timer()
    }

    pub fn record_register(&self, success: bool) {
        if success {
            self.register_success.inc();
        } else {
            self.register_error.inc();
        }
    }

    pub fn record_deregister(&self, success: bool) {
        if success {
            self.deregister_success.inc();
        } else {
            self.deregister_error.inc();
        }
    }

    pub fn register_success(&self) -> u64 {
        self.register_success.get()
    }

    pub fn register_error(&self) -> u64 {
        self.register_error.get()
    }

    pub fn deregister_success(&self) -> u64 {
        self.deregister_success.get()
    }

    pub fn deregister_error(&self) -> u64 {
        self.deregister_error.get()
    }

    pub fn register_timings(&self) -> u64 {
        self.register_duration.get_sample_count()
    }

    pub fn deregister_timings(&self) -> u64 {
        self.deregister_duration.get_sample_count()
    }
}

impl std::fmt::Debug for SyncMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncMetrics")
            .field("register_success", &self.register_success())
            .field("register_error", &self.register_error())
            .field("deregister_success", &self.deregister_success())
            .field("deregister_error", &self.deregister_error())
            .finish()
    }
}
