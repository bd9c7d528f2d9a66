use prometheus_client::{
    metrics::{counter::Counter, gauge::Gauge},
    registry::Registry,
};

/// Campaign metrics.
#[derive(Clone, Default)]
pub struct Metrics {
    /// Combinations dispatched to the vehicle.
    pub dispatched: Counter,
    /// Missions that reported success.
    pub completed: Counter,
    /// Missions aborted by the watchdog.
    pub aborted: Counter,
    /// Status updates dropped without being acted on.
    pub dropped: Counter,
    /// Combinations not yet dispatched.
    pub remaining: Gauge,
}

impl Metrics {
    /// Create metrics and register them with `registry`.
    pub fn init(registry: &mut Registry) -> Self {
        let metrics = Self::default();
        registry.register(
            "dispatched",
            "combinations dispatched to the vehicle",
            metrics.dispatched.clone(),
        );
        registry.register(
            "completed",
            "missions that reported success",
            metrics.completed.clone(),
        );
        registry.register(
            "aborted",
            "missions aborted by the watchdog",
            metrics.aborted.clone(),
        );
        registry.register(
            "dropped_events",
            "status updates dropped without being acted on",
            metrics.dropped.clone(),
        );
        registry.register(
            "remaining",
            "combinations not yet dispatched",
            metrics.remaining.clone(),
        );
        metrics
    }
}
