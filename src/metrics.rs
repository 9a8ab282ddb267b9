use anyhow::Result;
use prometheus::{IntCounter, IntCounterVec, IntGauge, IntGaugeVec, Opts, Registry};
use std::sync::Arc;

/// 负载均衡状态事件计数器
///
/// 每个状态事件（接入、选中、后端不可达、无可用后端、转发结束、探测结果）
/// 都对应一个计数器。
#[derive(Clone)]
pub struct BalancerMetrics {
    registry: Arc<Registry>,

    // 连接指标
    pub connections_accepted: IntCounter,
    pub active_connections: IntGauge,
    pub relays_closed: IntCounterVec,
    pub bytes_relayed: IntCounterVec,

    // 调度指标
    pub backend_selected: IntCounterVec,
    pub backend_unreachable: IntCounterVec,
    pub no_backend_available: IntCounter,

    // 健康检查指标
    pub probes: IntCounterVec,
    pub backend_online: IntGaugeVec,
}

impl BalancerMetrics {
    pub fn new() -> Result<Self> {
        let registry = Arc::new(Registry::new());

        let connections_accepted = IntCounter::with_opts(Opts::new(
            "balancer_connections_accepted_total",
            "Total number of client connections accepted",
        ))?;

        let active_connections = IntGauge::with_opts(Opts::new(
            "balancer_active_connections",
            "Current number of relaying connection pairs",
        ))?;

        let relays_closed = IntCounterVec::new(
            Opts::new("balancer_relays_closed_total", "Total number of finished relays"),
            &["outcome"],
        )?;

        let bytes_relayed = IntCounterVec::new(
            Opts::new("balancer_bytes_relayed_total", "Total bytes relayed"),
            &["direction"],
        )?;

        let backend_selected = IntCounterVec::new(
            Opts::new(
                "balancer_backend_selected_total",
                "Total number of times a backend was selected",
            ),
            &["backend"],
        )?;

        let backend_unreachable = IntCounterVec::new(
            Opts::new(
                "balancer_backend_unreachable_total",
                "Total number of failed connects to a selected backend",
            ),
            &["backend"],
        )?;

        let no_backend_available = IntCounter::with_opts(Opts::new(
            "balancer_no_backend_available_total",
            "Total number of clients rejected because no backend was online",
        ))?;

        let probes = IntCounterVec::new(
            Opts::new("balancer_probes_total", "Total number of health probes"),
            &["backend", "result"],
        )?;

        let backend_online = IntGaugeVec::new(
            Opts::new(
                "balancer_backend_online",
                "Backend liveness (1 = online, 0 = offline)",
            ),
            &["backend"],
        )?;

        registry.register(Box::new(connections_accepted.clone()))?;
        registry.register(Box::new(active_connections.clone()))?;
        registry.register(Box::new(relays_closed.clone()))?;
        registry.register(Box::new(bytes_relayed.clone()))?;
        registry.register(Box::new(backend_selected.clone()))?;
        registry.register(Box::new(backend_unreachable.clone()))?;
        registry.register(Box::new(no_backend_available.clone()))?;
        registry.register(Box::new(probes.clone()))?;
        registry.register(Box::new(backend_online.clone()))?;

        Ok(Self {
            registry,
            connections_accepted,
            active_connections,
            relays_closed,
            bytes_relayed,
            backend_selected,
            backend_unreachable,
            no_backend_available,
            probes,
            backend_online,
        })
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn record_accepted(&self) {
        self.connections_accepted.inc();
    }

    pub fn record_selected(&self, backend: &str) {
        self.backend_selected.with_label_values(&[backend]).inc();
    }

    pub fn record_unreachable(&self, backend: &str) {
        self.backend_unreachable.with_label_values(&[backend]).inc();
    }

    pub fn record_no_backend(&self) {
        self.no_backend_available.inc();
    }

    pub fn record_relay_started(&self) {
        self.active_connections.inc();
    }

    pub fn record_relay_closed(&self, success: bool, to_backend: u64, to_client: u64) {
        self.active_connections.dec();
        self.relays_closed
            .with_label_values(&[if success { "success" } else { "error" }])
            .inc();
        self.bytes_relayed
            .with_label_values(&["client_to_backend"])
            .inc_by(to_backend);
        self.bytes_relayed
            .with_label_values(&["backend_to_client"])
            .inc_by(to_client);
    }

    pub fn record_probe(&self, backend: &str, online: bool) {
        self.probes
            .with_label_values(&[backend, if online { "success" } else { "failure" }])
            .inc();
        self.backend_online
            .with_label_values(&[backend])
            .set(online as i64);
    }

    pub fn export_metrics(&self) -> Result<String> {
        let encoder = prometheus::TextEncoder::new();
        let metric_families = self.registry.gather();
        encoder
            .encode_to_string(&metric_families)
            .map_err(|e| anyhow::anyhow!("Failed to encode metrics: {}", e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_counters() {
        let metrics = BalancerMetrics::new().unwrap();

        metrics.record_accepted();
        metrics.record_accepted();
        metrics.record_selected("service_1");
        metrics.record_no_backend();
        metrics.record_relay_started();
        metrics.record_relay_closed(true, 5, 7);

        assert_eq!(metrics.connections_accepted.get(), 2);
        assert_eq!(metrics.no_backend_available.get(), 1);
        assert_eq!(metrics.active_connections.get(), 0);
        assert_eq!(
            metrics
                .backend_selected
                .with_label_values(&["service_1"])
                .get(),
            1
        );
        assert_eq!(
            metrics
                .bytes_relayed
                .with_label_values(&["backend_to_client"])
                .get(),
            7
        );
    }

    #[test]
    fn test_export_contains_probe_gauge() {
        let metrics = BalancerMetrics::new().unwrap();
        metrics.record_probe("service_2", false);

        let output = metrics.export_metrics().unwrap();
        assert!(output.contains("balancer_backend_online{backend=\"service_2\"} 0"));
        assert!(output.contains("balancer_probes_total"));
    }
}
