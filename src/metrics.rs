// Prometheus metrics definitions for the tally bot.

use lazy_static::lazy_static;
use prometheus::{
    Encoder, Histogram, HistogramOpts, IntCounter, IntCounterVec, IntGauge, Opts, Registry,
    TextEncoder,
};

lazy_static! {
    pub static ref REGISTRY: Registry = Registry::new();

    // ── Gauges ───────────────────────────────────────────────────────

    /// Target chats with a registered roster.
    pub static ref ACTIVE_BOARDS: IntGauge =
        IntGauge::new("tally_active_boards", "Target chats with a live leaderboard").unwrap();

    // ── Counters ─────────────────────────────────────────────────────

    pub static ref LINKS_REQUESTED_TOTAL: IntCounter = IntCounter::new(
        "tally_links_requested_total",
        "Link requests issued with /start",
    )
    .unwrap();

    pub static ref LINKS_CONFIRMED_TOTAL: IntCounter = IntCounter::new(
        "tally_links_confirmed_total",
        "Target chats linked to a controller",
    )
    .unwrap();

    pub static ref ROSTERS_REGISTERED_TOTAL: IntCounter = IntCounter::new(
        "tally_rosters_registered_total",
        "Rosters accepted",
    )
    .unwrap();

    /// Points awarded, by source (button, batch).
    pub static ref VOTES_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("tally_votes_total", "Points awarded"),
        &["source"],
    )
    .unwrap();

    /// Inputs rejected with a reply, by reason.
    pub static ref REJECTED_INPUTS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("tally_rejected_inputs_total", "Rejected controller inputs"),
        &["reason"],
    )
    .unwrap();

    /// Failed Bot API calls, by method.
    pub static ref TRANSPORT_ERRORS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("tally_transport_errors_total", "Failed Bot API calls"),
        &["method"],
    )
    .unwrap();

    // ── Histograms ───────────────────────────────────────────────────

    pub static ref UPDATE_DURATION_SECONDS: Histogram = Histogram::with_opts(
        HistogramOpts::new("tally_update_duration_seconds", "Time to handle one inbound event")
            .buckets(vec![0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0]),
    )
    .unwrap();
}

/// Register all metrics with the custom registry. Call once at startup.
pub fn register_metrics() {
    let collectors: Vec<Box<dyn prometheus::core::Collector>> = vec![
        Box::new(ACTIVE_BOARDS.clone()),
        Box::new(LINKS_REQUESTED_TOTAL.clone()),
        Box::new(LINKS_CONFIRMED_TOTAL.clone()),
        Box::new(ROSTERS_REGISTERED_TOTAL.clone()),
        Box::new(VOTES_TOTAL.clone()),
        Box::new(REJECTED_INPUTS_TOTAL.clone()),
        Box::new(TRANSPORT_ERRORS_TOTAL.clone()),
        Box::new(UPDATE_DURATION_SECONDS.clone()),
    ];

    for c in collectors {
        if let Err(e) = REGISTRY.register(c) {
            tracing::warn!("Metric registration skipped: {e}");
        }
    }
}

/// Serialize all registered metrics to the Prometheus text exposition format.
pub fn gather_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        tracing::error!("Failed to encode metrics: {e}");
    }
    String::from_utf8_lossy(&buffer).into_owned()
}
