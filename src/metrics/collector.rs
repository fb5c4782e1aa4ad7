// src/metrics/collector.rs
use anyhow::Result;
use prometheus::{
    Encoder, Histogram, HistogramOpts, IntCounter, IntCounterVec, IntGauge, Opts, Registry,
    TextEncoder,
};
use std::sync::Arc;

pub struct MetricsRegistry {
    registry: Registry,
    collector: Arc<MetricsCollector>,
}

impl MetricsRegistry {
    pub fn new() -> Result<Self> {
        let registry = Registry::new();
        let collector = Arc::new(MetricsCollector::new(&registry)?);

        Ok(Self {
            registry,
            collector,
        })
    }

    pub fn collector(&self) -> Arc<MetricsCollector> {
        self.collector.clone()
    }

    pub fn gather(&self) -> Vec<u8> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
            tracing::error!("Failed to encode metrics: {}", e);
        }
        buffer
    }
}

pub struct MetricsCollector {
    // Sync cycle metrics
    pub sync_cycles_total: IntCounterVec,
    pub sync_cycle_duration_seconds: Histogram,
    pub config_writes_total: IntCounter,
    pub jar_swaps_total: IntCounter,

    // Process control metrics
    pub restarts_total: IntCounterVec,
    pub proxy_up: IntGauge,

    // Prober metrics
    pub probe_results_total: IntCounterVec,
}

impl MetricsCollector {
    pub fn new(registry: &Registry) -> Result<Self> {
        let sync_cycles_total = IntCounterVec::new(
            Opts::new("syncd_cycles_total", "Total sync cycles by result"),
            &["result"],
        )?;
        registry.register(Box::new(sync_cycles_total.clone()))?;

        let sync_cycle_duration_seconds = Histogram::with_opts(HistogramOpts::new(
            "syncd_cycle_duration_seconds",
            "Sync cycle duration in seconds",
        ))?;
        registry.register(Box::new(sync_cycle_duration_seconds.clone()))?;

        let config_writes_total = IntCounter::new(
            "syncd_config_writes_total",
            "Times velocity.toml was rewritten",
        )?;
        registry.register(Box::new(config_writes_total.clone()))?;

        let jar_swaps_total =
            IntCounter::new("syncd_jar_swaps_total", "Times the proxy jar was replaced")?;
        registry.register(Box::new(jar_swaps_total.clone()))?;

        let restarts_total = IntCounterVec::new(
            Opts::new("syncd_restarts_total", "Proxy restarts by result"),
            &["result"],
        )?;
        registry.register(Box::new(restarts_total.clone()))?;

        let proxy_up = IntGauge::new(
            "syncd_proxy_up",
            "Whether the proxy unit reports active (1) or not (0)",
        )?;
        registry.register(Box::new(proxy_up.clone()))?;

        let probe_results_total = IntCounterVec::new(
            Opts::new("syncd_probe_results_total", "Backend probe results"),
            &["status"],
        )?;
        registry.register(Box::new(probe_results_total.clone()))?;

        Ok(Self {
            sync_cycles_total,
            sync_cycle_duration_seconds,
            config_writes_total,
            jar_swaps_total,
            restarts_total,
            proxy_up,
            probe_results_total,
        })
    }

    pub fn record_cycle(&self, result: &str, duration: std::time::Duration) {
        self.sync_cycles_total.with_label_values(&[result]).inc();
        self.sync_cycle_duration_seconds
            .observe(duration.as_secs_f64());
    }

    pub fn record_config_write(&self) {
        self.config_writes_total.inc();
    }

    pub fn record_jar_swap(&self) {
        self.jar_swaps_total.inc();
    }

    pub fn record_restart(&self, result: &str) {
        self.restarts_total.with_label_values(&[result]).inc();
    }

    pub fn set_proxy_up(&self, up: bool) {
        self.proxy_up.set(if up { 1 } else { 0 });
    }

    pub fn record_probe(&self, status: &str) {
        self.probe_results_total.with_label_values(&[status]).inc();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gather_includes_recorded_cycles() {
        let registry = MetricsRegistry::new().unwrap();
        let collector = registry.collector();

        collector.record_cycle("ok", std::time::Duration::from_millis(20));
        collector.record_probe("online");
        collector.set_proxy_up(true);

        let text = String::from_utf8(registry.gather()).unwrap();
        assert!(text.contains("syncd_cycles_total"));
        assert!(text.contains("syncd_proxy_up 1"));
    }
}
