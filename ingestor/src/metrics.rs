use lazy_static::lazy_static;
use prometheus::{Counter, Encoder, Histogram, HistogramOpts, Opts, Registry, TextEncoder};
use std::sync::Once;
use tracing::error;

lazy_static! {
    pub static ref REGISTRY: Registry = Registry::new();
    pub static ref REQUESTS_TOTAL: Counter = Counter::with_opts(Opts::new(
        "ingestor_requests_total",
        "Total telemetry requests received over HTTP"
    ))
    .unwrap();
    pub static ref ACCEPTED_TOTAL: Counter = Counter::with_opts(Opts::new(
        "ingestor_accepted_total",
        "Total telemetry records persisted"
    ))
    .unwrap();
    pub static ref REJECTED_TOTAL: Counter = Counter::with_opts(Opts::new(
        "ingestor_rejected_total",
        "Total requests rejected by validation"
    ))
    .unwrap();
    pub static ref STORE_FAILURES_TOTAL: Counter = Counter::with_opts(Opts::new(
        "ingestor_store_failures_total",
        "Total document store write failures"
    ))
    .unwrap();
    pub static ref STORE_WRITE_LATENCY_SECONDS: Histogram = Histogram::with_opts(
        HistogramOpts::new(
            "ingestor_store_write_latency_seconds",
            "Time taken to write one record to the document store"
        )
        .buckets(vec![
            0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0
        ])
    )
    .unwrap();
}

static INIT: Once = Once::new();

pub fn init_metrics() {
    INIT.call_once(|| {
        REGISTRY.register(Box::new(REQUESTS_TOTAL.clone())).unwrap();
        REGISTRY.register(Box::new(ACCEPTED_TOTAL.clone())).unwrap();
        REGISTRY.register(Box::new(REJECTED_TOTAL.clone())).unwrap();
        REGISTRY
            .register(Box::new(STORE_FAILURES_TOTAL.clone()))
            .unwrap();
        REGISTRY
            .register(Box::new(STORE_WRITE_LATENCY_SECONDS.clone()))
            .unwrap();
    });
}

pub fn gather_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        error!("Failed to encode metrics: {}", e);
        return String::new();
    }
    String::from_utf8(buffer).unwrap_or_default()
}
