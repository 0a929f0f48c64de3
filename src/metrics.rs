// Prometheus metrics definitions for the minefield backend.

use lazy_static::lazy_static;
use prometheus::{
    Encoder, Histogram, HistogramOpts, IntCounter, IntCounterVec, IntGauge, Opts, Registry,
    TextEncoder,
};

lazy_static! {
    pub static ref REGISTRY: Registry = Registry::new();

    // ── Gauges ───────────────────────────────────────────────────────

    /// Live WebSocket connections.
    pub static ref CONNECTED_WEBSOCKETS: IntGauge =
        IntGauge::new("minefield_connected_websockets", "Live WebSocket connections").unwrap();

    /// Players currently registered (connected or not).
    pub static ref REGISTERED_PLAYERS: IntGauge =
        IntGauge::new("minefield_registered_players", "Players currently registered").unwrap();

    /// Mines neutralized by flags so far.
    pub static ref FLAGGED_MINES: IntGauge =
        IntGauge::new("minefield_flagged_mines", "Mines neutralized by flags").unwrap();

    // ── Counters ─────────────────────────────────────────────────────

    /// Actions handled, by kind and outcome (accepted / rejected).
    pub static ref ACTIONS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("minefield_actions_total", "Actions handled"),
        &["kind", "outcome"],
    )
    .unwrap();

    /// Rejections, by severity.
    pub static ref REJECTIONS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("minefield_rejections_total", "Rejected actions"),
        &["severity"],
    )
    .unwrap();

    /// Explosions resolved, including chained waves.
    pub static ref EXPLOSIONS_TOTAL: IntCounter = IntCounter::new(
        "minefield_explosions_total",
        "Explosions resolved",
    )
    .unwrap();

    /// Chained detonations queued by earlier blasts.
    pub static ref CHAINED_DETONATIONS_TOTAL: IntCounter = IntCounter::new(
        "minefield_chained_detonations_total",
        "Chained detonations queued",
    )
    .unwrap();

    /// Players killed by explosions.
    pub static ref PLAYERS_KILLED_TOTAL: IntCounter = IntCounter::new(
        "minefield_players_killed_total",
        "Players killed by explosions",
    )
    .unwrap();

    /// Sessions created, split by fresh vs reconnection.
    pub static ref SESSIONS_CREATED_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("minefield_sessions_created_total", "Sessions created"),
        &["reconnection"],
    )
    .unwrap();

    /// Players evicted by the idle sweeper.
    pub static ref SESSIONS_EVICTED_TOTAL: IntCounter = IntCounter::new(
        "minefield_sessions_evicted_total",
        "Players evicted by the idle sweeper",
    )
    .unwrap();

    /// Broadcast frames fanned out to all clients.
    pub static ref BROADCASTS_TOTAL: IntCounter = IntCounter::new(
        "minefield_broadcasts_total",
        "Broadcast frames fanned out",
    )
    .unwrap();

    // ── Histograms ───────────────────────────────────────────────────

    /// Action pipeline handling time in milliseconds.
    pub static ref ACTION_DURATION_MS: Histogram = Histogram::with_opts(
        HistogramOpts::new("minefield_action_duration_ms", "Action handling time in ms")
            .buckets(vec![0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 25.0]),
    )
    .unwrap();
}

/// Register every metric with the shared registry. Called once at startup.
pub fn register_metrics() {
    REGISTRY
        .register(Box::new(CONNECTED_WEBSOCKETS.clone()))
        .unwrap();
    REGISTRY
        .register(Box::new(REGISTERED_PLAYERS.clone()))
        .unwrap();
    REGISTRY.register(Box::new(FLAGGED_MINES.clone())).unwrap();
    REGISTRY.register(Box::new(ACTIONS_TOTAL.clone())).unwrap();
    REGISTRY
        .register(Box::new(REJECTIONS_TOTAL.clone()))
        .unwrap();
    REGISTRY
        .register(Box::new(EXPLOSIONS_TOTAL.clone()))
        .unwrap();
    REGISTRY
        .register(Box::new(CHAINED_DETONATIONS_TOTAL.clone()))
        .unwrap();
    REGISTRY
        .register(Box::new(PLAYERS_KILLED_TOTAL.clone()))
        .unwrap();
    REGISTRY
        .register(Box::new(SESSIONS_CREATED_TOTAL.clone()))
        .unwrap();
    REGISTRY
        .register(Box::new(SESSIONS_EVICTED_TOTAL.clone()))
        .unwrap();
    REGISTRY.register(Box::new(BROADCASTS_TOTAL.clone())).unwrap();
    REGISTRY
        .register(Box::new(ACTION_DURATION_MS.clone()))
        .unwrap();
}

/// Render the registry in the Prometheus text exposition format.
pub fn render() -> String {
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&REGISTRY.gather(), &mut buffer) {
        tracing::error!("Failed to encode metrics: {e}");
        return String::new();
    }
    String::from_utf8(buffer).unwrap_or_default()
}
