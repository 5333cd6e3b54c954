//! Event envelope types
//!
//! An [`Event`] is mostly opaque to this core. The fields modeled here
//! are the ones the delivery pipeline must read or write: the
//! stack-trace-bearing exception substructure, the tags/extra maps used
//! for enrichment, and the SDK identity. Anything else round-trips
//! through `passthrough` untouched.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use super::breadcrumb::Breadcrumb;
use super::errors::DomainError;

/// Event severity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Level {
    Debug,
    Info,
    Warning,
    Error,
    Fatal,
}

impl std::str::FromStr for Level {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "debug" => Ok(Level::Debug),
            "info" => Ok(Level::Info),
            "warning" => Ok(Level::Warning),
            "error" => Ok(Level::Error),
            "fatal" => Ok(Level::Fatal),
            other => Err(DomainError::InvalidLevel(other.to_string())),
        }
    }
}

/// A single stack frame
///
/// Line and column numbers are 1-based, unlike the debugger protocol's
/// call frames which are 0-based.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StackFrame {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub function: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub module: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lineno: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub colno: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub in_app: Option<bool>,
}

/// Frame list attached to an exception
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Stacktrace {
    pub frames: Vec<StackFrame>,
}

/// How an exception was captured
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Mechanism {
    #[serde(rename = "type")]
    pub ty: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub handled: Option<bool>,
}

/// A captured exception value
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Exception {
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub ty: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stacktrace: Option<Stacktrace>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mechanism: Option<Mechanism>,
}

/// The exception substructure of an event
///
/// Replaced wholesale during merges; the frame list has bespoke
/// serialization needs and must never be field-merged.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExceptionList {
    pub values: Vec<Exception>,
}

/// User identity attached to an event
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct User {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ip_address: Option<String>,
}

impl User {
    /// Shallow merge, `other` winning per field.
    pub fn merged_with(&self, other: &User) -> User {
        User {
            id: other.id.clone().or_else(|| self.id.clone()),
            username: other.username.clone().or_else(|| self.username.clone()),
            email: other.email.clone().or_else(|| self.email.clone()),
            ip_address: other.ip_address.clone().or_else(|| self.ip_address.clone()),
        }
    }
}

/// A package reported as part of the SDK identity
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SdkPackage {
    pub name: String,
    pub version: String,
}

/// SDK identity substructure
///
/// Shallow-merged during event merges with the incoming side winning
/// per field; the packages list is replaced wholesale so merges never
/// accumulate duplicates.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SdkInfo {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub packages: Vec<SdkPackage>,
}

/// Engine-private recorder attached to in-flight spans.
///
/// Never serialized; stripped before an event crosses a process
/// boundary or enters a merge.
#[derive(Debug, Clone, Default)]
pub struct SpanRecorder {
    pub collected: Vec<String>,
}

/// A tracing span carried on an event
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Span {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub span_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub op: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Back-reference to the owning transaction. Not serializable
    /// (cyclic), so always stripped before transmission.
    #[serde(skip)]
    pub transaction: Option<String>,
    #[serde(skip)]
    pub recorder: Option<SpanRecorder>,
}

/// A captured event
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Event {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub event_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub level: Option<Level>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub platform: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub release: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub environment: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exception: Option<ExceptionList>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub breadcrumbs: Vec<Breadcrumb>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub tags: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extra: BTreeMap<String, Value>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub contexts: BTreeMap<String, Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<User>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sdk: Option<SdkInfo>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub spans: Vec<Span>,
    /// Fields this core never inspects, carried through verbatim.
    #[serde(flatten)]
    pub passthrough: BTreeMap<String, Value>,
}

impl Event {
    /// Creates an empty event with a fresh id and the current time.
    pub fn new() -> Self {
        Event {
            event_id: Some(Uuid::new_v4()),
            timestamp: Some(Utc::now()),
            ..Default::default()
        }
    }

    /// Strips engine-private, non-serializable state from all spans.
    ///
    /// Must run before the event is merged or crosses a process
    /// boundary.
    pub fn strip_private(&mut self) {
        for span in &mut self.spans {
            span.recorder = None;
            span.transaction = None;
        }
    }

    /// Deep copy suitable for crossing a process boundary.
    ///
    /// The serde round trip both copies and drops every `#[serde(skip)]`
    /// field, so the result shares no state with `self`.
    pub fn sanitized_copy(&self) -> Event {
        let json = serde_json::to_value(self).unwrap_or(Value::Null);
        serde_json::from_value(json).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn level_round_trips_through_str() {
        for (s, level) in [
            ("debug", Level::Debug),
            ("info", Level::Info),
            ("warning", Level::Warning),
            ("error", Level::Error),
            ("fatal", Level::Fatal),
        ] {
            assert_eq!(s.parse::<Level>().unwrap(), level);
        }
        assert!("loud".parse::<Level>().is_err());
    }

    #[test]
    fn passthrough_preserves_unknown_fields() {
        let json = r#"{
            "level": "error",
            "message": "boom",
            "server_name": "devbox",
            "fingerprint": ["{{ default }}"]
        }"#;

        let event: Event = serde_json::from_str(json).unwrap();
        assert_eq!(event.level, Some(Level::Error));
        assert_eq!(event.passthrough["server_name"], "devbox");

        let back = serde_json::to_value(&event).unwrap();
        assert_eq!(back["fingerprint"][0], "{{ default }}");
    }

    #[test]
    fn sanitized_copy_drops_span_recorders() {
        let mut event = Event::new();
        event.spans.push(Span {
            span_id: Some("abc".to_string()),
            recorder: Some(SpanRecorder {
                collected: vec!["child".to_string()],
            }),
            transaction: Some("tx".to_string()),
            ..Default::default()
        });

        let copy = event.sanitized_copy();
        assert_eq!(copy.spans.len(), 1);
        assert!(copy.spans[0].recorder.is_none());
        assert!(copy.spans[0].transaction.is_none());
        // Original is untouched
        assert!(event.spans[0].recorder.is_some());
    }

    #[test]
    fn user_merge_is_right_biased_per_field() {
        let base = User {
            id: Some("1".to_string()),
            email: Some("a@example.com".to_string()),
            ..Default::default()
        };
        let incoming = User {
            email: Some("b@example.com".to_string()),
            username: Some("b".to_string()),
            ..Default::default()
        };

        let merged = base.merged_with(&incoming);
        assert_eq!(merged.id.as_deref(), Some("1"));
        assert_eq!(merged.email.as_deref(), Some("b@example.com"));
        assert_eq!(merged.username.as_deref(), Some("b"));
    }
}
