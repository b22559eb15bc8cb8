use prometheus::{
    Encoder, HistogramVec, IntCounter, IntCounterVec, IntGauge, Opts, Registry, TextEncoder,
};

#[derive(Clone)]
pub struct Metrics {
    registry: Registry,
    pub actions_total: IntCounterVec,
    pub action_latency_seconds: HistogramVec,
    pub assignments_total: IntCounterVec,
    pub outbox_pending: IntGauge,
    pub outbox_delivery_failures_total: IntCounterVec,
    pub outbox_dead_lettered_total: IntCounter,
    pub stats_degraded_total: IntCounterVec,
}

impl Metrics {
    pub fn new() -> Self {
        let registry = Registry::new();

        let actions_total = IntCounterVec::new(
            Opts::new("engine_actions_total", "Engine actions by name and outcome"),
            &["action", "outcome"],
        )
        .expect("valid engine_actions_total metric");

        let action_latency_seconds = HistogramVec::new(
            prometheus::HistogramOpts::new(
                "engine_action_latency_seconds",
                "Latency of engine actions in seconds",
            ),
            &["action"],
        )
        .expect("valid engine_action_latency_seconds metric");

        let assignments_total = IntCounterVec::new(
            Opts::new("assignments_total", "Mission assignments by outcome"),
            &["outcome"],
        )
        .expect("valid assignments_total metric");

        let outbox_pending =
            IntGauge::new("outbox_pending", "Outbox events awaiting delivery")
                .expect("valid outbox_pending metric");

        let outbox_delivery_failures_total = IntCounterVec::new(
            Opts::new(
                "outbox_delivery_failures_total",
                "Failed outbox deliveries by side effect",
            ),
            &["step"],
        )
        .expect("valid outbox_delivery_failures_total metric");

        let outbox_dead_lettered_total = IntCounter::new(
            "outbox_dead_lettered_total",
            "Outbox events abandoned after exhausting their delivery attempts",
        )
        .expect("valid outbox_dead_lettered_total metric");

        let stats_degraded_total = IntCounterVec::new(
            Opts::new(
                "stats_degraded_total",
                "Dashboard metrics reported as zero because their query failed",
            ),
            &["metric"],
        )
        .expect("valid stats_degraded_total metric");

        registry
            .register(Box::new(actions_total.clone()))
            .expect("register engine_actions_total");
        registry
            .register(Box::new(action_latency_seconds.clone()))
            .expect("register engine_action_latency_seconds");
        registry
            .register(Box::new(assignments_total.clone()))
            .expect("register assignments_total");
        registry
            .register(Box::new(outbox_pending.clone()))
            .expect("register outbox_pending");
        registry
            .register(Box::new(outbox_delivery_failures_total.clone()))
            .expect("register outbox_delivery_failures_total");
        registry
            .register(Box::new(outbox_dead_lettered_total.clone()))
            .expect("register outbox_dead_lettered_total");
        registry
            .register(Box::new(stats_degraded_total.clone()))
            .expect("register stats_degraded_total");

        Self {
            registry,
            actions_total,
            action_latency_seconds,
            assignments_total,
            outbox_pending,
            outbox_delivery_failures_total,
            outbox_dead_lettered_total,
            stats_degraded_total,
        }
    }

    pub fn encode(&self) -> Result<String, String> {
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();

        TextEncoder::new()
            .encode(&metric_families, &mut buffer)
            .map_err(|err| format!("failed to encode metrics: {err}"))?;

        String::from_utf8(buffer).map_err(|err| format!("metrics are not valid utf8: {err}"))
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}
