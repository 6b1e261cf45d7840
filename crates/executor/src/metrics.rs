use lazy_static::lazy_static;
use prometheus::{
    Encoder, Histogram, HistogramOpts, IntCounter, IntCounterVec, Opts, Registry, TextEncoder,
};

lazy_static! {
    pub static ref ALERTS_PROCESSED_TOTAL: IntCounter = IntCounter::new(
        "amexec_alerts_processed_total",
        "Total number of processed alerts."
    )
    .expect("valid metric definition");
    pub static ref HANDLER_INVOCATIONS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new(
            "amexec_handler_invocations_total",
            "Handler invocations by outcome."
        ),
        &["outcome"]
    )
    .expect("valid metric definition");
    pub static ref COMMAND_DURATION_SECONDS: Histogram = Histogram::with_opts(HistogramOpts::new(
        "amexec_command_duration_seconds",
        "Wall clock time of executed handler commands."
    ))
    .expect("valid metric definition");
    pub static ref REGISTRY: Registry = {
        let registry = Registry::new();
        registry
            .register(Box::new(ALERTS_PROCESSED_TOTAL.clone()))
            .expect("metric registered once");
        registry
            .register(Box::new(HANDLER_INVOCATIONS_TOTAL.clone()))
            .expect("metric registered once");
        registry
            .register(Box::new(COMMAND_DURATION_SECONDS.clone()))
            .expect("metric registered once");
        registry
    };
}

/// Count one handler invocation. `outcome` is one of succeeded, failed,
/// skipped (debug mode), filtered (status filter) or missing (meta-handler
/// not configured).
pub fn record_invocation(outcome: &str) {
    HANDLER_INVOCATIONS_TOTAL.with_label_values(&[outcome]).inc();
}

// Function to gather metrics for exposition
pub fn gather_metrics() -> crate::Result<String> {
    let mut buffer = vec![];
    let encoder = TextEncoder::new();
    encoder.encode(&REGISTRY.gather(), &mut buffer)?;
    String::from_utf8(buffer).map_err(|e| crate::Error::Internal(e.to_string()))
}
