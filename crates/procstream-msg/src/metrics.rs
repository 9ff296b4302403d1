//! ---
//! ps_section: "02-messaging-wire-model"
//! ps_subsection: "module"
//! ps_type: "source"
//! ps_scope: "code"
//! ps_description: "Publish metrics and outbound event logging."
//! ps_version: "v0.1.0"
//! ps_owner: "tbd"
//! ---
use std::time::Duration;

use prometheus::{Histogram, HistogramOpts, IntCounter, Opts, Registry};
use tracing::trace;

use crate::WireEvent;

/// Emit a structured log entry for an outbound event.
pub fn log_wire_event(publisher: &str, event: &WireEvent) {
    trace!(
        publisher,
        process = %event.process_name,
        case_id = %event.case_id,
        activity = %event.activity,
        "event published"
    );
}

/// Prometheus metric handles for publish activity.
#[derive(Clone)]
pub struct PublishMetrics {
    sent: IntCounter,
    dropped: IntCounter,
    latency: Histogram,
}

impl PublishMetrics {
    /// Register publish metrics with the provided registry.
    pub fn register(registry: &Registry) -> Result<Self, prometheus::Error> {
        let sent = IntCounter::with_opts(Opts::new(
            "procstream_events_sent_total",
            "Events handed to the publisher successfully",
        ))?;
        let dropped = IntCounter::with_opts(Opts::new(
            "procstream_events_dropped_total",
            "Events dropped because the publisher rejected them",
        ))?;
        let latency = Histogram::with_opts(HistogramOpts::new(
            "procstream_publish_latency_seconds",
            "Time spent inside a single publisher send call",
        ))?;

        registry.register(Box::new(sent.clone()))?;
        registry.register(Box::new(dropped.clone()))?;
        registry.register(Box::new(latency.clone()))?;

        Ok(Self {
            sent,
            dropped,
            latency,
        })
    }

    /// Record a sent event.
    pub fn observe_sent(&self) {
        self.sent.inc();
    }

    /// Record a dropped event.
    pub fn observe_dropped(&self) {
        self.dropped.inc();
    }

    /// Record how long a send call took.
    pub fn observe_latency(&self, duration: Duration) {
        self.latency.observe(duration.as_secs_f64());
    }
}
