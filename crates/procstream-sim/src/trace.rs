//! ---
//! ps_section: "11-simulation"
//! ps_subsection: "module"
//! ps_type: "source"
//! ps_scope: "code"
//! ps_description: "Trace and event types produced by generators."
//! ps_version: "v0.1.0"
//! ps_owner: "tbd"
//! ---
use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use procstream_msg::WireEvent;
use serde::{Deserialize, Serialize};

/// A single process-execution record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamEvent {
    case_id: String,
    activity: String,
    timestamp: DateTime<Utc>,
    #[serde(default)]
    attributes: BTreeMap<String, String>,
}

impl StreamEvent {
    pub fn new(
        case_id: impl Into<String>,
        activity: impl Into<String>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            case_id: case_id.into(),
            activity: activity.into(),
            timestamp,
            attributes: BTreeMap::new(),
        }
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    pub fn case_id(&self) -> &str {
        &self.case_id
    }

    pub fn activity(&self) -> &str {
        &self.activity
    }

    /// Generation-time timestamp until [`StreamEvent::restamp`] is called.
    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn attributes(&self) -> &BTreeMap<String, String> {
        &self.attributes
    }

    /// Replace the simulated timestamp with the actual send time.
    pub fn restamp(&mut self, sent_at: DateTime<Utc>) {
        self.timestamp = sent_at;
    }

    /// Convert to the transport representation for stream `process_name`.
    pub fn to_wire(&self, process_name: &str) -> WireEvent {
        WireEvent::new(
            process_name,
            self.case_id.as_str(),
            self.activity.as_str(),
            self.timestamp,
            &self.attributes,
        )
    }
}

/// One complete process-instance execution, produced atomically by a generator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trace {
    case_id: String,
    events: Vec<StreamEvent>,
}

impl Trace {
    pub fn new(case_id: impl Into<String>, events: Vec<StreamEvent>) -> Self {
        Self {
            case_id: case_id.into(),
            events,
        }
    }

    pub fn case_id(&self) -> &str {
        &self.case_id
    }

    pub fn events(&self) -> &[StreamEvent] {
        &self.events
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn into_events(self) -> Vec<StreamEvent> {
        self.events
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn restamp_is_reflected_on_the_wire() {
        let generated = Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap();
        let mut event = StreamEvent::new("case_1", "register", generated)
            .with_attribute("org:resource", "alice");
        let sent = Utc.with_ymd_and_hms(2024, 6, 1, 8, 30, 0).unwrap();
        event.restamp(sent);

        let wire = event.to_wire("claims");
        assert_eq!(wire.process_name, "claims");
        assert_eq!(wire.case_id, "case_1");
        assert_eq!(wire.timestamp(), Some(sent));
        assert_eq!(wire.payload["event"]["org:resource"], "alice");
    }

    #[test]
    fn trace_keeps_event_order() {
        let start = Utc::now();
        let events = vec![
            StreamEvent::new("c", "a", start),
            StreamEvent::new("c", "b", start),
        ];
        let trace = Trace::new("c", events);
        let names: Vec<_> = trace.events().iter().map(StreamEvent::activity).collect();
        assert_eq!(names, ["a", "b"]);
        assert_eq!(trace.len(), 2);
    }
}
