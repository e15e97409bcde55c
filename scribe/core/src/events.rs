//! Inbound Events
//!
//! Typed view of the frames an agent server pushes over a conversation
//! connection. Every frame is a UTF-8 JSON object:
//!
//! ```text
//! { "type": "text_chunk", "data": { "delta": "Hel" } }
//! ```
//!
//! Known tags decode into dedicated variants. Tags this client does not know
//! about, and known tags whose payload has an unexpected shape, decode into
//! [`InboundEvent::Unknown`] with the payload and any extra top-level fields
//! untouched, so newer servers keep working and subscribers still see
//! everything.

use std::str::FromStr;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use thiserror::Error;

/// Wire tags of the variants this client understands
pub mod tags {
    /// A new assistant turn begins
    pub const TEXT_START: &str = "text_start";
    /// Incremental text of the current turn
    pub const TEXT_CHUNK: &str = "text_chunk";
    /// End of the textual portion of the turn
    pub const TEXT_END: &str = "text_end";
    /// A tool invocation started
    pub const TOOL_START: &str = "tool_start";
    /// A tool invocation finished
    pub const TOOL_END: &str = "tool_end";
    /// A tool invocation failed
    pub const TOOL_ERROR: &str = "tool_error";
    /// The turn is complete
    pub const DONE: &str = "done";
    /// Server-side failure
    pub const ERROR: &str = "error";
    /// Agent state transition
    pub const STATE_CHANGED: &str = "state_changed";
    /// Token accounting for the turn
    pub const TOKEN_USAGE: &str = "token_usage";
}

/// Errors produced while decoding a frame
#[derive(Debug, Error)]
pub enum FrameError {
    /// The frame was not valid JSON
    #[error("frame is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),

    /// The JSON object had no string `type` field
    #[error("frame has no \"type\" field")]
    MissingType,

    /// The payload did not match what the tag requires
    #[error("invalid payload for {kind:?}: {source}")]
    InvalidPayload {
        /// The frame's tag
        kind: String,
        /// Why the payload was rejected
        source: serde_json::Error,
    },

    /// A binary frame did not contain UTF-8 text
    #[error("binary frame is not UTF-8")]
    NotUtf8,
}

/// An event received on a conversation connection
#[derive(Clone, Debug, PartialEq)]
pub enum InboundEvent {
    /// A new assistant turn is beginning
    TextStart,

    /// Incremental fragment of the assistant's current turn
    TextChunk {
        /// The text fragment
        delta: String,
    },

    /// End of the textual portion of the turn (not full completion)
    TextEnd,

    /// A tool invocation has begun
    ToolStart {
        /// Tool name
        name: String,
    },

    /// A tool invocation completed
    ToolEnd {
        /// Tool name
        name: String,
        /// Final call state reported by the server, if any
        state: Option<String>,
    },

    /// A tool invocation failed
    ToolError {
        /// Tool name
        name: String,
        /// Failure description
        error: String,
    },

    /// The turn is fully complete
    Done {
        /// Why the turn ended
        reason: String,
    },

    /// Transport- or server-level failure, payload kept as sent
    Error {
        /// Raw payload
        data: Value,
    },

    /// Agent state change, payload kept as sent
    StateChanged {
        /// Raw payload
        data: Value,
    },

    /// Token usage report, payload kept as sent
    TokenUsage {
        /// Raw payload
        data: Value,
    },

    /// A tag this client does not recognise, or a known tag whose payload
    /// could not be read
    Unknown {
        /// The frame's `type`
        kind: String,
        /// The frame's `data`
        data: Value,
        /// Top-level fields other than `type` and `data`
        extra: Map<String, Value>,
    },
}

/// Typed reading of a `token_usage` payload
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TokenUsage {
    /// Prompt tokens
    pub input_tokens: u64,
    /// Completion tokens
    pub output_tokens: u64,
    /// Sum reported by the server
    pub total_tokens: u64,
}

#[derive(Deserialize)]
struct RawFrame {
    #[serde(rename = "type")]
    kind: Option<String>,
    #[serde(default)]
    data: Value,
    #[serde(flatten)]
    extra: Map<String, Value>,
}

#[derive(Deserialize)]
struct ChunkPayload {
    delta: String,
}

#[derive(Deserialize)]
struct ToolPayload {
    name: String,
    #[serde(default)]
    state: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Default, Deserialize)]
#[serde(default)]
struct DonePayload {
    reason: String,
}

fn payload<T: DeserializeOwned>(kind: &str, data: &Value) -> Result<T, FrameError> {
    T::deserialize(data).map_err(|source| FrameError::InvalidPayload {
        kind: kind.to_string(),
        source,
    })
}

impl InboundEvent {
    /// Decode one text frame
    ///
    /// # Errors
    ///
    /// Returns a [`FrameError`] if the frame is not a JSON object or has no
    /// string `type`. A known tag with a payload it cannot accept is logged
    /// and returned as [`InboundEvent::Unknown`].
    pub fn parse(frame: &str) -> Result<Self, FrameError> {
        let RawFrame { kind, data, extra } = serde_json::from_str(frame)?;
        let kind = kind.ok_or(FrameError::MissingType)?;

        let event = match kind.as_str() {
            tags::ERROR => Self::Error { data },
            tags::STATE_CHANGED => Self::StateChanged { data },
            tags::TOKEN_USAGE => Self::TokenUsage { data },
            _ => match Self::decode_typed(&kind, &data) {
                Ok(Some(event)) => event,
                Ok(None) => Self::Unknown { kind, data, extra },
                Err(e) => {
                    tracing::warn!(error = %e, "Unexpected payload shape, forwarding as unknown");
                    Self::Unknown { kind, data, extra }
                }
            },
        };

        Ok(event)
    }

    /// Typed variants; `None` for tags without one
    fn decode_typed(kind: &str, data: &Value) -> Result<Option<Self>, FrameError> {
        let event = match kind {
            tags::TEXT_START => Self::TextStart,
            tags::TEXT_CHUNK => {
                let ChunkPayload { delta } = payload(kind, data)?;
                Self::TextChunk { delta }
            }
            tags::TEXT_END => Self::TextEnd,
            tags::TOOL_START => {
                let tool: ToolPayload = payload(kind, data)?;
                Self::ToolStart { name: tool.name }
            }
            tags::TOOL_END => {
                let tool: ToolPayload = payload(kind, data)?;
                Self::ToolEnd {
                    name: tool.name,
                    state: tool.state,
                }
            }
            tags::TOOL_ERROR => {
                let tool: ToolPayload = payload(kind, data)?;
                Self::ToolError {
                    name: tool.name,
                    error: tool.error.unwrap_or_default(),
                }
            }
            tags::DONE => {
                let DonePayload { reason } = if data.is_null() {
                    DonePayload::default()
                } else {
                    payload(kind, data)?
                };
                Self::Done { reason }
            }
            _ => return Ok(None),
        };
        Ok(Some(event))
    }

    /// Decode a binary frame holding UTF-8 JSON
    ///
    /// # Errors
    ///
    /// Returns [`FrameError::NotUtf8`] for non-UTF-8 bytes, otherwise as
    /// [`InboundEvent::parse`].
    pub fn parse_bytes(frame: &[u8]) -> Result<Self, FrameError> {
        let text = std::str::from_utf8(frame).map_err(|_| FrameError::NotUtf8)?;
        Self::parse(text)
    }

    /// The wire tag of this event
    #[must_use]
    pub fn kind(&self) -> &str {
        match self {
            Self::TextStart => tags::TEXT_START,
            Self::TextChunk { .. } => tags::TEXT_CHUNK,
            Self::TextEnd => tags::TEXT_END,
            Self::ToolStart { .. } => tags::TOOL_START,
            Self::ToolEnd { .. } => tags::TOOL_END,
            Self::ToolError { .. } => tags::TOOL_ERROR,
            Self::Done { .. } => tags::DONE,
            Self::Error { .. } => tags::ERROR,
            Self::StateChanged { .. } => tags::STATE_CHANGED,
            Self::TokenUsage { .. } => tags::TOKEN_USAGE,
            Self::Unknown { kind, .. } => kind,
        }
    }

    /// The `data` payload as it would appear on the wire
    #[must_use]
    pub fn data(&self) -> Value {
        match self {
            Self::TextStart | Self::TextEnd => Value::Null,
            Self::TextChunk { delta } => json!({ "delta": delta }),
            Self::ToolStart { name } => json!({ "name": name }),
            Self::ToolEnd { name, state } => match state {
                Some(state) => json!({ "name": name, "state": state }),
                None => json!({ "name": name }),
            },
            Self::ToolError { name, error } => json!({ "name": name, "error": error }),
            Self::Done { reason } => json!({ "reason": reason }),
            Self::Error { data }
            | Self::StateChanged { data }
            | Self::TokenUsage { data }
            | Self::Unknown { data, .. } => data.clone(),
        }
    }

    /// Encode this event as a text frame
    #[must_use]
    pub fn to_frame(&self) -> String {
        let mut frame = match self {
            Self::Unknown { extra, .. } => extra.clone(),
            _ => Map::new(),
        };
        frame.insert("type".to_string(), Value::from(self.kind()));
        frame.insert("data".to_string(), self.data());
        Value::Object(frame).to_string()
    }

    /// Typed token counts, for `token_usage` events
    #[must_use]
    pub fn token_usage(&self) -> Option<TokenUsage> {
        match self {
            Self::TokenUsage { data } => serde_json::from_value(data.clone()).ok(),
            _ => None,
        }
    }

    /// Whether this event is one of the tool lifecycle events
    #[must_use]
    pub fn is_tool_event(&self) -> bool {
        matches!(
            self,
            Self::ToolStart { .. } | Self::ToolEnd { .. } | Self::ToolError { .. }
        )
    }
}

impl FromStr for InboundEvent {
    type Err = FrameError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_parse_text_events() {
        assert_eq!(
            InboundEvent::parse(r#"{"type":"text_start","data":null}"#).unwrap(),
            InboundEvent::TextStart
        );
        assert_eq!(
            InboundEvent::parse(r#"{"type":"text_chunk","data":{"delta":"你好，"}}"#).unwrap(),
            InboundEvent::TextChunk {
                delta: "你好，".to_string()
            }
        );
        // data may be omitted entirely for payload-less tags
        assert_eq!(
            InboundEvent::parse(r#"{"type":"text_end"}"#).unwrap(),
            InboundEvent::TextEnd
        );
    }

    #[test]
    fn test_parse_tool_events() {
        assert_eq!(
            InboundEvent::parse(r#"{"type":"tool_start","data":{"name":"search"}}"#).unwrap(),
            InboundEvent::ToolStart {
                name: "search".to_string()
            }
        );
        assert_eq!(
            InboundEvent::parse(r#"{"type":"tool_end","data":{"name":"search","state":"completed"}}"#)
                .unwrap(),
            InboundEvent::ToolEnd {
                name: "search".to_string(),
                state: Some("completed".to_string()),
            }
        );
        assert_eq!(
            InboundEvent::parse(r#"{"type":"tool_error","data":{"name":"fetch","error":"timeout"}}"#)
                .unwrap(),
            InboundEvent::ToolError {
                name: "fetch".to_string(),
                error: "timeout".to_string(),
            }
        );
    }

    #[test]
    fn test_parse_done_reason() {
        assert_eq!(
            InboundEvent::parse(r#"{"type":"done","data":{"reason":"completed"}}"#).unwrap(),
            InboundEvent::Done {
                reason: "completed".to_string()
            }
        );
        assert_eq!(
            InboundEvent::parse(r#"{"type":"done"}"#).unwrap(),
            InboundEvent::Done {
                reason: String::new()
            }
        );
    }

    #[test]
    fn test_informational_payloads_kept_verbatim() {
        let event = InboundEvent::parse(
            r#"{"type":"error","data":{"severity":"high","phase":"tool","message":"boom","extra":[1,2]}}"#,
        )
        .unwrap();
        let InboundEvent::Error { data } = &event else {
            panic!("expected error event, got {event:?}");
        };
        assert_eq!(data["extra"], json!([1, 2]));

        let usage = InboundEvent::parse(
            r#"{"type":"token_usage","data":{"input_tokens":10,"output_tokens":5,"total_tokens":15}}"#,
        )
        .unwrap();
        assert_eq!(
            usage.token_usage(),
            Some(TokenUsage {
                input_tokens: 10,
                output_tokens: 5,
                total_tokens: 15,
            })
        );
        assert_eq!(InboundEvent::TextStart.token_usage(), None);
    }

    #[test]
    fn test_unknown_tag_is_forwarded() {
        let frame = r#"{"type":"artifact_ready","data":{"id":7,"tags":["a"]}}"#;
        let event = InboundEvent::parse(frame).unwrap();
        assert_eq!(
            event,
            InboundEvent::Unknown {
                kind: "artifact_ready".to_string(),
                data: json!({"id": 7, "tags": ["a"]}),
                extra: Map::new(),
            }
        );
        assert_eq!(event.kind(), "artifact_ready");

        let reencoded: Value = serde_json::from_str(&event.to_frame()).unwrap();
        let original: Value = serde_json::from_str(frame).unwrap();
        assert_eq!(reencoded, original);
    }

    #[test]
    fn test_malformed_frames_are_errors() {
        assert!(matches!(
            InboundEvent::parse("{not json"),
            Err(FrameError::Json(_))
        ));
        assert!(matches!(
            InboundEvent::parse(r#"{"data":{}}"#),
            Err(FrameError::MissingType)
        ));
        assert!(matches!(
            InboundEvent::parse_bytes(&[0xff, 0xfe]),
            Err(FrameError::NotUtf8)
        ));
    }

    #[test]
    fn test_unknown_keeps_extra_top_level_fields() {
        let frame = r#"{"type":"mystery","data":1,"extra":{"trace":"t-9"},"seq":4}"#;
        let event = InboundEvent::parse(frame).unwrap();
        let InboundEvent::Unknown { kind, data, extra } = &event else {
            panic!("expected unknown event, got {event:?}");
        };
        assert_eq!(kind, "mystery");
        assert_eq!(data, &json!(1));
        assert_eq!(extra["extra"], json!({"trace": "t-9"}));
        assert_eq!(extra["seq"], json!(4));

        let reencoded: Value = serde_json::from_str(&event.to_frame()).unwrap();
        let original: Value = serde_json::from_str(frame).unwrap();
        assert_eq!(reencoded, original);
    }

    #[test]
    fn test_mismatched_payload_of_known_tag_is_forwarded_as_unknown() {
        let event = InboundEvent::parse(r#"{"type":"tool_start","data":{"tool":"x"}}"#).unwrap();
        assert_eq!(
            event,
            InboundEvent::Unknown {
                kind: "tool_start".to_string(),
                data: json!({"tool": "x"}),
                extra: Map::new(),
            }
        );
        assert_eq!(event.kind(), "tool_start");
        assert!(!event.is_tool_event());

        let chunk = InboundEvent::parse(r#"{"type":"text_chunk","data":{}}"#).unwrap();
        assert!(matches!(chunk, InboundEvent::Unknown { .. }));
    }

    #[test]
    fn test_payload_errors_name_the_tag() {
        let err = payload::<ChunkPayload>("text_chunk", &json!({})).err().unwrap();
        assert!(matches!(&err, FrameError::InvalidPayload { kind, .. } if kind == "text_chunk"));
        assert!(err.to_string().contains("text_chunk"));
    }

    #[test]
    fn test_to_frame_matches_wire_shape() {
        let frame = InboundEvent::TextChunk {
            delta: "Hi".to_string(),
        }
        .to_frame();
        let value: Value = serde_json::from_str(&frame).unwrap();
        assert_eq!(value, json!({"type": "text_chunk", "data": {"delta": "Hi"}}));

        let start: Value = serde_json::from_str(&InboundEvent::TextStart.to_frame()).unwrap();
        assert_eq!(start, json!({"type": "text_start", "data": null}));
    }

    #[test]
    fn test_is_tool_event() {
        assert!(InboundEvent::ToolStart {
            name: "x".to_string()
        }
        .is_tool_event());
        assert!(!InboundEvent::TextEnd.is_tool_event());
    }
}
