// Prometheus metrics definitions for the Fightclaw backend.

use lazy_static::lazy_static;
use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge, Opts, Registry,
    TextEncoder,
};

lazy_static! {
    pub static ref REGISTRY: Registry = Registry::new();

    // ── Gauges ───────────────────────────────────────────────────────

    /// Match actors currently alive (including ended matches in grace).
    pub static ref ACTIVE_MATCHES: IntGauge =
        IntGauge::new("fightclaw_active_matches", "Live match actors").unwrap();

    /// Whether an agent is holding the pending queue slot (0 or 1).
    pub static ref QUEUE_WAITING: IntGauge =
        IntGauge::new("fightclaw_queue_waiting", "Agents waiting in the pairing queue").unwrap();

    /// Live match-stream subscribers across all matches.
    pub static ref CONNECTED_SUBSCRIBERS: IntGauge = IntGauge::new(
        "fightclaw_connected_subscribers",
        "Live match stream subscribers",
    )
    .unwrap();

    // ── Counters ─────────────────────────────────────────────────────

    /// Matches created by pairing.
    pub static ref MATCHES_STARTED_TOTAL: IntCounter =
        IntCounter::new("fightclaw_matches_started_total", "Matches started").unwrap();

    /// Matches ended, by termination reason.
    pub static ref MATCHES_ENDED_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("fightclaw_matches_ended_total", "Matches ended"),
        &["reason"],
    )
    .unwrap();

    /// Accepted moves applied to match state.
    pub static ref MOVES_APPLIED_TOTAL: IntCounter =
        IntCounter::new("fightclaw_moves_applied_total", "Accepted moves").unwrap();

    /// Rejected move submissions, by rejection code.
    pub static ref MOVES_REJECTED_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("fightclaw_moves_rejected_total", "Rejected move submissions"),
        &["code"],
    )
    .unwrap();

    /// Subscribers dropped for falling behind the backlog limit.
    pub static ref SUBSCRIBERS_DROPPED_TOTAL: IntCounter = IntCounter::new(
        "fightclaw_subscribers_dropped_total",
        "Subscribers dropped for backpressure",
    )
    .unwrap();

    /// Matchmaker events discarded by per-agent buffer overflow.
    pub static ref MATCHMAKER_EVENTS_DROPPED_TOTAL: IntCounter = IntCounter::new(
        "fightclaw_matchmaker_events_dropped_total",
        "Pairing events dropped on buffer overflow",
    )
    .unwrap();

    /// Best-effort event-log appends that failed.
    pub static ref EVENT_APPEND_FAILURES_TOTAL: IntCounter = IntCounter::new(
        "fightclaw_event_append_failures_total",
        "Failed event log appends",
    )
    .unwrap();

    /// Failed attempts of the critical result write (retried with backoff).
    pub static ref RESULT_WRITE_RETRIES_TOTAL: IntCounter = IntCounter::new(
        "fightclaw_result_write_retries_total",
        "Failed match result write attempts",
    )
    .unwrap();

    /// Total API requests, by method/endpoint/status.
    pub static ref API_REQUESTS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("fightclaw_api_requests_total", "Total API requests"),
        &["method", "endpoint", "status"],
    )
    .unwrap();

    // ── Histograms ───────────────────────────────────────────────────

    /// End-to-end move handling time inside the match actor, in seconds.
    pub static ref MOVE_HANDLE_DURATION_SECONDS: HistogramVec = HistogramVec::new(
        HistogramOpts::new(
            "fightclaw_move_handle_duration_seconds",
            "Move submission handling time in seconds",
        )
        .buckets(vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0]),
        &["outcome"],
    )
    .unwrap();
}

/// Register all metrics with the custom registry. Call once at startup.
pub fn register_metrics() {
    let collectors: Vec<Box<dyn prometheus::core::Collector>> = vec![
        Box::new(ACTIVE_MATCHES.clone()),
        Box::new(QUEUE_WAITING.clone()),
        Box::new(CONNECTED_SUBSCRIBERS.clone()),
        Box::new(MATCHES_STARTED_TOTAL.clone()),
        Box::new(MATCHES_ENDED_TOTAL.clone()),
        Box::new(MOVES_APPLIED_TOTAL.clone()),
        Box::new(MOVES_REJECTED_TOTAL.clone()),
        Box::new(SUBSCRIBERS_DROPPED_TOTAL.clone()),
        Box::new(MATCHMAKER_EVENTS_DROPPED_TOTAL.clone()),
        Box::new(EVENT_APPEND_FAILURES_TOTAL.clone()),
        Box::new(RESULT_WRITE_RETRIES_TOTAL.clone()),
        Box::new(API_REQUESTS_TOTAL.clone()),
        Box::new(MOVE_HANDLE_DURATION_SECONDS.clone()),
    ];

    for c in collectors {
        REGISTRY.register(c).expect("failed to register metric");
    }
}

/// Serialize all registered metrics to the Prometheus text exposition format.
pub fn gather_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer).unwrap();
    String::from_utf8(buffer).unwrap()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metric_increments() {
        ACTIVE_MATCHES.set(1);
        assert_eq!(ACTIVE_MATCHES.get(), 1);
        ACTIVE_MATCHES.set(0);

        QUEUE_WAITING.set(1);
        assert_eq!(QUEUE_WAITING.get(), 1);
        QUEUE_WAITING.set(0);

        MATCHES_STARTED_TOTAL.inc();
        MATCHES_ENDED_TOTAL.with_label_values(&["turn_timeout"]).inc();
        MOVES_APPLIED_TOTAL.inc();
        MOVES_REJECTED_TOTAL.with_label_values(&["not_your_turn"]).inc();
        SUBSCRIBERS_DROPPED_TOTAL.inc();
        MATCHMAKER_EVENTS_DROPPED_TOTAL.inc();
        EVENT_APPEND_FAILURES_TOTAL.inc();
        RESULT_WRITE_RETRIES_TOTAL.inc();

        MOVE_HANDLE_DURATION_SECONDS
            .with_label_values(&["accepted"])
            .observe(0.01);
        API_REQUESTS_TOTAL
            .with_label_values(&["POST", "/v1/queue/join", "200"])
            .inc();
    }

    #[test]
    fn test_gather_metrics_returns_string() {
        register_metrics();
        let output = gather_metrics();
        assert!(output.is_empty() || output.contains("fightclaw_"));
    }
}
