use prometheus::{Encoder, IntCounterVec, Opts, Registry, TextEncoder};

/// Counters for the session lifecycle, owned by the service rather than a global registry.
/// Cloning shares the underlying counters.
#[derive(Clone)]
pub struct SessionMetrics {
    registry: Registry,
    session_events: IntCounterVec,
    validation_failures: IntCounterVec,
}

impl SessionMetrics {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let session_events = IntCounterVec::new(Opts::new("session_events_total", "Session lifecycle events by type"), &["event"])?;
        let validation_failures = IntCounterVec::new(
            Opts::new("token_validation_failures_total", "Rejected access tokens by reason"),
            &["reason"],
        )?;

        registry.register(Box::new(session_events.clone()))?;
        registry.register(Box::new(validation_failures.clone()))?;

        Ok(Self {
            registry,
            session_events,
            validation_failures,
        })
    }

    pub fn record_event(&self, event: &str) {
        self.record_events(event, 1);
    }

    pub fn record_events(&self, event: &str, count: u64) {
        self.session_events.with_label_values(&[event]).inc_by(count);
    }

    pub fn record_validation_failure(&self, reason: &str) {
        self.validation_failures.with_label_values(&[reason]).inc();
    }

    pub fn event_count(&self, event: &str) -> u64 {
        self.session_events.with_label_values(&[event]).get()
    }

    /// Prometheus text exposition of every registered metric.
    pub fn render(&self) -> String {
        let mut buffer = Vec::new();
        let encoder = TextEncoder::new();

        if let Err(e) = encoder.encode(&self.registry.gather(), &mut buffer) {
            tracing::error!("Failed to encode metrics: {}", e);
            return format!("# Failed to encode metrics: {}\n", e);
        }

        String::from_utf8(buffer).unwrap_or_else(|e| format!("# Failed to convert metrics to UTF-8: {}\n", e))
    }
}
