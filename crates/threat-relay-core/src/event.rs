//! # Threat Event Model
//!
//! Two shapes of the same event:
//! - [`ThreatEvent`] is what producers publish. Its JSON encoding is the
//!   message body carried by the broker.
//! - [`EventRecord`] is what the consumer posts to the ingestion endpoint.
//!
//! Decoding a body into an [`EventRecord`] is lenient. Any field may be
//! missing, and values are passed through without type coercion.

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

#[cfg(test)]
#[path = "event_tests.rs"]
mod tests;

/// Source recorded when a message body does not name one
pub const UNKNOWN_SOURCE: &str = "unknown";

// ============================================================================
// Published Event
// ============================================================================

/// Threat event as published to the broker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThreatEvent {
    /// Observed indicator, e.g. an IP address, domain, URL or file hash
    pub indicator: String,

    /// Kind of indicator (`ip`, `domain`, `url`, `hash`, ...)
    pub indicator_type: String,

    /// Feed or tool that reported the indicator
    pub source: String,

    /// RFC 3339 observation time, filled in at publish time when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,

    /// ATT&CK technique identifier, e.g. `T1059`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub related_technique: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<i64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,

    /// Fields this type does not model, forwarded untouched
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ThreatEvent {
    pub fn new(
        indicator: impl Into<String>,
        indicator_type: impl Into<String>,
        source: impl Into<String>,
    ) -> Self {
        Self {
            indicator: indicator.into(),
            indicator_type: indicator_type.into(),
            source: source.into(),
            timestamp: None,
            related_technique: None,
            confidence: None,
            metadata: None,
            extra: Map::new(),
        }
    }

    pub fn with_timestamp(mut self, timestamp: impl Into<String>) -> Self {
        self.timestamp = Some(timestamp.into());
        self
    }

    pub fn with_related_technique(mut self, technique: impl Into<String>) -> Self {
        self.related_technique = Some(technique.into());
        self
    }

    pub fn with_confidence(mut self, confidence: i64) -> Self {
        self.confidence = Some(confidence);
        self
    }

    pub fn with_metadata(mut self, metadata: Value) -> Self {
        self.metadata = Some(metadata);
        self
    }

    /// Set the timestamp to the current UTC time unless one is present
    pub fn stamp_if_missing(&mut self) {
        if self.timestamp.is_none() {
            self.timestamp = Some(Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true));
        }
    }

    /// Encode as a message body
    pub fn to_body(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

// ============================================================================
// Ingestion Record
// ============================================================================

/// Record posted to the ingestion endpoint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventRecord {
    pub timestamp: Value,
    pub source: Value,
    pub raw_indicator: Value,
    pub indicator_type: Value,
    pub related_technique: Value,
    pub confidence: Value,
    /// Event metadata, `{}` when the body carried none
    pub metadata_json: Value,
}

/// Message body fields as the consumer reads them
#[derive(Deserialize)]
struct WireEvent {
    #[serde(default)]
    timestamp: Value,
    #[serde(default = "unknown_source")]
    source: Value,
    #[serde(default)]
    indicator: Value,
    #[serde(default)]
    indicator_type: Value,
    #[serde(default)]
    related_technique: Value,
    #[serde(default)]
    confidence: Value,
    #[serde(default = "empty_metadata")]
    metadata: Value,
}

fn unknown_source() -> Value {
    Value::String(UNKNOWN_SOURCE.to_string())
}

fn empty_metadata() -> Value {
    Value::Object(Map::new())
}

/// Reasons a message body cannot be turned into an [`EventRecord`]
#[derive(Debug, thiserror::Error)]
pub enum EventDecodeError {
    #[error("Invalid JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),

    #[error("Expected a JSON object, found {found}")]
    NotAnObject { found: &'static str },
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

impl EventRecord {
    /// Decode a message body
    ///
    /// Absent fields become `null`, except `source` which becomes
    /// `"unknown"` and metadata which becomes `{}`. A field present with an
    /// explicit `null` stays `null`.
    pub fn from_body(body: &str) -> Result<Self, EventDecodeError> {
        let value: Value = serde_json::from_str(body)?;
        if !value.is_object() {
            return Err(EventDecodeError::NotAnObject {
                found: json_kind(&value),
            });
        }

        let wire: WireEvent = serde_json::from_value(value)?;
        Ok(Self {
            timestamp: wire.timestamp,
            source: wire.source,
            raw_indicator: wire.indicator,
            indicator_type: wire.indicator_type,
            related_technique: wire.related_technique,
            confidence: wire.confidence,
            metadata_json: wire.metadata,
        })
    }

    /// Indicator rendered for log lines
    pub fn indicator_label(&self) -> String {
        match &self.raw_indicator {
            Value::String(indicator) => indicator.clone(),
            other => other.to_string(),
        }
    }
}

impl From<&ThreatEvent> for EventRecord {
    fn from(event: &ThreatEvent) -> Self {
        Self {
            timestamp: event.timestamp.clone().map(Value::String).unwrap_or_default(),
            source: Value::String(event.source.clone()),
            raw_indicator: Value::String(event.indicator.clone()),
            indicator_type: Value::String(event.indicator_type.clone()),
            related_technique: event
                .related_technique
                .clone()
                .map(Value::String)
                .unwrap_or_default(),
            confidence: event.confidence.map(Value::from).unwrap_or_default(),
            metadata_json: event.metadata.clone().unwrap_or_else(empty_metadata),
        }
    }
}
