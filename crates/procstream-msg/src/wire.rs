//! ---
//! ps_section: "02-messaging-wire-model"
//! ps_subsection: "module"
//! ps_type: "source"
//! ps_scope: "code"
//! ps_description: "Transport-ready event model and topic layout."
//! ps_version: "v0.1.0"
//! ps_owner: "tbd"
//! ---
use std::collections::BTreeMap;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};

/// Attribute key carrying the case identifier or activity name.
pub const NAME_KEY: &str = "concept:name";
/// Attribute key carrying the emission timestamp.
pub const TIMESTAMP_KEY: &str = "time:timestamp";

/// Transport-ready form of a single process event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireEvent {
    /// Name of the process (stream) the event belongs to.
    pub process_name: String,
    /// Case identifier of the trace instance.
    pub case_id: String,
    /// Activity executed by the event.
    pub activity: String,
    /// JSON body with `trace` and `event` attribute maps.
    pub payload: JsonValue,
}

impl WireEvent {
    /// Build a wire event, folding the timestamp and extra attributes into the payload.
    pub fn new(
        process_name: impl Into<String>,
        case_id: impl Into<String>,
        activity: impl Into<String>,
        timestamp: DateTime<Utc>,
        attributes: &BTreeMap<String, String>,
    ) -> Self {
        let case_id = case_id.into();
        let activity = activity.into();

        let mut trace = Map::new();
        trace.insert(NAME_KEY.to_owned(), JsonValue::from(case_id.clone()));

        let mut event = Map::new();
        for (key, value) in attributes {
            event.insert(key.clone(), JsonValue::from(value.clone()));
        }
        event.insert(NAME_KEY.to_owned(), JsonValue::from(activity.clone()));
        event.insert(
            TIMESTAMP_KEY.to_owned(),
            JsonValue::from(timestamp.to_rfc3339_opts(SecondsFormat::Millis, true)),
        );

        let mut payload = Map::new();
        payload.insert("trace".to_owned(), JsonValue::Object(trace));
        payload.insert("event".to_owned(), JsonValue::Object(event));

        Self {
            process_name: process_name.into(),
            case_id,
            activity,
            payload: JsonValue::Object(payload),
        }
    }

    /// Topic this event is published on: `<base>/<process>/<case>/<activity>`.
    pub fn topic(&self, topic_base: &str) -> String {
        format!(
            "{}/{}/{}/{}",
            topic_base.trim_end_matches('/'),
            self.process_name,
            self.case_id,
            self.activity
        )
    }

    /// Timestamp carried in the payload, if present and well formed.
    pub fn timestamp(&self) -> Option<DateTime<Utc>> {
        self.payload
            .get("event")?
            .get(TIMESTAMP_KEY)?
            .as_str()?
            .parse()
            .ok()
    }
}

/// A wire event resolved against a topic base, as handed to the broker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PublishedEvent {
    /// Fully qualified topic.
    pub topic: String,
    /// Event body.
    pub payload: JsonValue,
}

impl PublishedEvent {
    /// Resolve `event` against `topic_base`.
    pub fn new(topic_base: &str, event: &WireEvent) -> Self {
        Self {
            topic: event.topic(topic_base),
            payload: event.payload.clone(),
        }
    }
}
