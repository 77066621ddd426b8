//! Event Line Parser
//!
//! Classifies each complete line from the frame decoder into a typed
//! [`DeltaEvent`]. Anything that is not a well-formed event (keep-alive
//! comments, blank separators, truncated JSON, unexpected field types) becomes
//! `DeltaEvent::Unknown` and is dropped by the caller. Parsing never fails.
//!
//! # Wire Format
//!
//! ```text
//! data: [START]
//! data: {"content":"Hel"}
//! data: {"content":"lo"}
//! data: {"content":"!","done":true}
//! ```
//!
//! A payload may combine a content fragment with a terminal flag; the fragment
//! is carried in the terminal event so it is applied before termination.

use serde::{Deserialize, Serialize};

/// Event-line conventions of the server
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireFormat {
    /// Literal marker every event line starts with
    pub event_prefix: String,
    /// Payload announcing the start of a stream (ignored)
    pub start_sentinel: String,
}

impl Default for WireFormat {
    fn default() -> Self {
        Self {
            event_prefix: "data: ".to_string(),
            start_sentinel: "[START]".to_string(),
        }
    }
}

/// One parsed event
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DeltaEvent {
    /// A fragment of generated text
    ContentDelta(String),
    /// The server finished the response
    Done {
        /// Final fragment delivered together with the completion flag
        trailing: Option<String>,
    },
    /// The server reported a failure mid-stream
    Error {
        /// Error description from the server
        message: String,
        /// Fragment delivered together with the error
        trailing: Option<String>,
    },
    /// Noise: not an event, a start marker, or an unparseable payload
    Unknown,
}

impl DeltaEvent {
    /// Whether this event ends the stream
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done { .. } | Self::Error { .. })
    }

    /// Text this event contributes to the response
    #[must_use]
    pub fn text(&self) -> Option<&str> {
        match self {
            Self::ContentDelta(text) => Some(text),
            Self::Done { trailing } | Self::Error { trailing, .. } => trailing.as_deref(),
            Self::Unknown => None,
        }
    }
}

/// Structured payload after the event prefix
#[derive(Debug, Default, Deserialize)]
struct EventPayload {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    done: Option<bool>,
    #[serde(default)]
    error: Option<serde_json::Value>,
}

/// Human-readable text of an `error` field, if it reports anything
///
/// Servers send a bare string, an object with a `message`, or occasionally a
/// flag. `null`, `false` and blank strings mean no error.
fn error_message(value: &serde_json::Value) -> Option<String> {
    use serde_json::Value;

    match value {
        Value::Null | Value::Bool(false) => None,
        Value::Bool(true) => Some("unspecified error".to_string()),
        Value::String(s) => {
            let s = s.trim();
            (!s.is_empty()).then(|| s.to_string())
        }
        Value::Number(n) => Some(n.to_string()),
        Value::Object(map) => match map.get("message").and_then(error_message) {
            Some(message) => Some(message),
            None if map.is_empty() => None,
            None => Some(value.to_string()),
        },
        Value::Array(items) => (!items.is_empty()).then(|| value.to_string()),
    }
}

/// Line classifier
#[derive(Clone, Debug, Default)]
pub struct EventParser {
    wire: WireFormat,
}

impl EventParser {
    /// Create a parser for the given conventions
    #[must_use]
    pub fn new(wire: WireFormat) -> Self {
        Self { wire }
    }

    /// Classify one complete line
    #[must_use]
    pub fn parse(&self, line: &str) -> DeltaEvent {
        let Some(payload) = line.strip_prefix(self.wire.event_prefix.as_str()) else {
            return DeltaEvent::Unknown;
        };
        let payload = payload.trim();
        if payload.is_empty() || payload == self.wire.start_sentinel {
            return DeltaEvent::Unknown;
        }

        let parsed: EventPayload = match serde_json::from_str(payload) {
            Ok(parsed) => parsed,
            Err(e) => {
                tracing::debug!(error = %e, len = payload.len(), "Dropping malformed event payload");
                return DeltaEvent::Unknown;
            }
        };

        let trailing = parsed.content.filter(|c| !c.is_empty());

        if let Some(message) = parsed.error.as_ref().and_then(error_message) {
            return DeltaEvent::Error { message, trailing };
        }
        if parsed.done.unwrap_or(false) {
            return DeltaEvent::Done { trailing };
        }
        match trailing {
            Some(text) => DeltaEvent::ContentDelta(text),
            None => DeltaEvent::Unknown,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(line: &str) -> DeltaEvent {
        EventParser::default().parse(line)
    }

    #[test]
    fn test_content_delta() {
        assert_eq!(
            parse(r#"data: {"content":"Hel"}"#),
            DeltaEvent::ContentDelta("Hel".to_string())
        );
    }

    #[test]
    fn test_done_without_content() {
        assert_eq!(
            parse(r#"data: {"done":true}"#),
            DeltaEvent::Done { trailing: None }
        );
    }

    #[test]
    fn test_content_and_done_in_one_payload() {
        let event = parse(r#"data: {"content":"!","done":true}"#);
        assert_eq!(
            event,
            DeltaEvent::Done {
                trailing: Some("!".to_string())
            }
        );
        assert!(event.is_terminal());
        assert_eq!(event.text(), Some("!"));
    }

    #[test]
    fn test_done_false_with_content_is_delta() {
        assert_eq!(
            parse(r#"data: {"content":"x","done":false}"#),
            DeltaEvent::ContentDelta("x".to_string())
        );
    }

    #[test]
    fn test_error_takes_precedence() {
        assert_eq!(
            parse(r#"data: {"error":"model crashed","done":true,"content":"par"}"#),
            DeltaEvent::Error {
                message: "model crashed".to_string(),
                trailing: Some("par".to_string())
            }
        );
    }

    #[test]
    fn test_structured_error_object() {
        assert_eq!(
            parse(r#"data: {"error":{"message":"boom","code":500}}"#),
            DeltaEvent::Error {
                message: "boom".to_string(),
                trailing: None
            }
        );
        assert_eq!(
            parse(r#"data: {"error":{"code":500}}"#),
            DeltaEvent::Error {
                message: r#"{"code":500}"#.to_string(),
                trailing: None
            }
        );
    }

    #[test]
    fn test_blank_error_is_not_an_error() {
        assert_eq!(
            parse(r#"data: {"error":"","content":"x"}"#),
            DeltaEvent::ContentDelta("x".to_string())
        );
        assert_eq!(
            parse(r#"data: {"error":null,"done":true}"#),
            DeltaEvent::Done { trailing: None }
        );
        assert_eq!(
            parse(r#"data: {"error":"  ","done":false}"#),
            DeltaEvent::Unknown
        );
        assert_eq!(parse(r#"data: {"error":{}}"#), DeltaEvent::Unknown);
    }

    #[test]
    fn test_start_sentinel_ignored() {
        assert_eq!(parse("data: [START]"), DeltaEvent::Unknown);
        assert_eq!(parse("data:  [START] "), DeltaEvent::Unknown);
    }

    #[test]
    fn test_noise_lines_are_unknown() {
        assert_eq!(parse(""), DeltaEvent::Unknown);
        assert_eq!(parse(": keep-alive"), DeltaEvent::Unknown);
        assert_eq!(parse("event: message"), DeltaEvent::Unknown);
        assert_eq!(parse("data: "), DeltaEvent::Unknown);
        assert_eq!(parse("data: {\"content\":\"trunc"), DeltaEvent::Unknown);
        assert_eq!(parse("data: not json"), DeltaEvent::Unknown);
        assert_eq!(parse(r#"data: {"content":42}"#), DeltaEvent::Unknown);
        assert_eq!(parse(r#"data: {"other":"field"}"#), DeltaEvent::Unknown);
        assert_eq!(parse(r#"data: {"content":""}"#), DeltaEvent::Unknown);
        assert_eq!(parse(r#"data: [1,2,3]"#), DeltaEvent::Unknown);
    }

    #[test]
    fn test_custom_wire_format() {
        let parser = EventParser::new(WireFormat {
            event_prefix: "event:".to_string(),
            start_sentinel: "BEGIN".to_string(),
        });
        assert_eq!(parser.parse("event: BEGIN"), DeltaEvent::Unknown);
        assert_eq!(
            parser.parse(r#"event:{"content":"a"}"#),
            DeltaEvent::ContentDelta("a".to_string())
        );
        assert_eq!(parser.parse(r#"data: {"content":"a"}"#), DeltaEvent::Unknown);
    }

    #[test]
    fn test_unicode_content_preserved() {
        assert_eq!(
            parse(r#"data: {"content":"hé 🦀"}"#),
            DeltaEvent::ContentDelta("hé 🦀".to_string())
        );
    }
}
