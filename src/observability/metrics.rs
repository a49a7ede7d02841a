use prometheus::{
    Encoder, HistogramVec, IntCounterVec, IntGaugeVec, Opts, Registry, TextEncoder,
};

#[derive(Clone)]
pub struct Metrics {
    registry: Registry,
    pub dispatch_rounds_total: IntCounterVec,
    pub offers_total: IntCounterVec,
    pub accepts_total: IntCounterVec,
    pub dispatch_latency_seconds: HistogramVec,
    pub connected_actors: IntGaugeVec,
}

impl Metrics {
    pub fn new() -> Self {
        let registry = Registry::new();

        let dispatch_rounds_total = IntCounterVec::new(
            Opts::new("dispatch_rounds_total", "Dispatch rounds by outcome"),
            &["outcome"],
        )
        .expect("valid dispatch_rounds_total metric");

        let offers_total = IntCounterVec::new(
            Opts::new("offers_total", "Offers by delivery result"),
            &["result"],
        )
        .expect("valid offers_total metric");

        let accepts_total = IntCounterVec::new(
            Opts::new("accepts_total", "Acceptance attempts by outcome"),
            &["outcome"],
        )
        .expect("valid accepts_total metric");

        let dispatch_latency_seconds = HistogramVec::new(
            prometheus::HistogramOpts::new(
                "dispatch_latency_seconds",
                "Latency of a dispatch round in seconds",
            ),
            &["outcome"],
        )
        .expect("valid dispatch_latency_seconds metric");

        let connected_actors = IntGaugeVec::new(
            Opts::new("connected_actors", "Currently connected actors by role"),
            &["role"],
        )
        .expect("valid connected_actors metric");

        registry
            .register(Box::new(dispatch_rounds_total.clone()))
            .expect("register dispatch_rounds_total");
        registry
            .register(Box::new(offers_total.clone()))
            .expect("register offers_total");
        registry
            .register(Box::new(accepts_total.clone()))
            .expect("register accepts_total");
        registry
            .register(Box::new(dispatch_latency_seconds.clone()))
            .expect("register dispatch_latency_seconds");
        registry
            .register(Box::new(connected_actors.clone()))
            .expect("register connected_actors");

        // touch the known label values so every series is exported from the
        // first scrape instead of appearing on first increment
        for outcome in ["offered", "empty"] {
            dispatch_rounds_total.with_label_values(&[outcome]);
        }
        for result in ["sent", "unreachable"] {
            offers_total.with_label_values(&[result]);
        }
        for outcome in ["accepted", "conflict", "forbidden", "not_found"] {
            accepts_total.with_label_values(&[outcome]);
        }
        for role in ["customer", "driver", "admin"] {
            connected_actors.with_label_values(&[role]);
        }

        Self {
            registry,
            dispatch_rounds_total,
            offers_total,
            accepts_total,
            dispatch_latency_seconds,
            connected_actors,
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
