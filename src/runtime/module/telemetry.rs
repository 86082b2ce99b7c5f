//! Metrics and analytics events.
//!
//! Both are fire-and-forget: sinks never report failure back to scripts.

use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::Module;

/// Metric tags.
pub type Tags = HashMap<String, String>;

/// Destination for script metrics.
pub trait MetricsSink: Send + Sync {
    fn counter_add(&self, name: &str, tags: &Tags, delta: i64);
    fn gauge_set(&self, name: &str, tags: &Tags, value: f64);
    fn timer_record(&self, name: &str, tags: &Tags, value: Duration);
}

/// Custom analytics event.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Event {
    pub name: String,
    pub properties: HashMap<String, String>,
    pub timestamp: DateTime<Utc>,
    /// Whether the event originated outside the server.
    pub external: bool,
}

/// Destination for script events.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: Event);
}

/// Writes metrics as debug-level tracing events.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingMetricsSink;

impl MetricsSink for TracingMetricsSink {
    fn counter_add(&self, name: &str, tags: &Tags, delta: i64) {
        tracing::debug!(metric = name, ?tags, delta, "counter add");
    }

    fn gauge_set(&self, name: &str, tags: &Tags, value: f64) {
        tracing::debug!(metric = name, ?tags, value, "gauge set");
    }

    fn timer_record(&self, name: &str, tags: &Tags, value: Duration) {
        tracing::debug!(metric = name, ?tags, elapsed_ms = value.as_millis() as u64, "timer record");
    }
}

/// Writes events as info-level tracing events.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingEventSink;

impl EventSink for TracingEventSink {
    fn emit(&self, event: Event) {
        tracing::info!(
            event = %event.name,
            properties = ?event.properties,
            timestamp = %event.timestamp.to_rfc3339(),
            external = event.external,
            "event"
        );
    }
}

impl Module {
    pub fn metrics_counter_add(&self, name: &str, tags: &Tags, delta: i64) {
        self.metrics.counter_add(name, tags, delta);
    }

    pub fn metrics_gauge_set(&self, name: &str, tags: &Tags, value: f64) {
        self.metrics.gauge_set(name, tags, value);
    }

    pub fn metrics_timer_record(&self, name: &str, tags: &Tags, value: Duration) {
        self.metrics.timer_record(name, tags, value);
    }

    /// Publish an event. `timestamp` defaults to now.
    pub fn event(
        &self,
        name: &str,
        properties: HashMap<String, String>,
        timestamp: Option<DateTime<Utc>>,
        external: bool,
    ) {
        self.events.emit(Event {
            name: name.to_string(),
            properties,
            timestamp: timestamp.unwrap_or_else(Utc::now),
            external,
        });
    }
}
