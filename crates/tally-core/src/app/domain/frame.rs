//! Classification of pushed stream frames.
//!
//! Each frame is compared against the completion sentinel, then parsed as JSON.
//! Anything that is not a JSON object is passed through as raw text so that
//! unstructured frames degrade to plain deltas instead of errors.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::app::domain::types::ConfirmationId;

pub const DEFAULT_COMPLETION_SENTINEL: &str = "[DONE]";

const UNKNOWN_ERROR_MESSAGE: &str = "Unknown error";

#[derive(Debug, Clone, PartialEq)]
pub enum DecodedFrame {
    /// The literal end-of-stream marker.
    Done,
    Structured(StreamFrame),
    /// Not structured data; appended verbatim as a text delta.
    Raw(String),
}

#[derive(Debug, Clone, PartialEq)]
pub enum StreamFrame {
    Text { text: String },
    Error { message: String },
    Pagination(InfoFrame),
    ServiceUnavailable(InfoFrame),
    PendingConfirmation(ConfirmationRequest),
    Truncated(TruncationMetadata),
    /// Well-formed JSON object of a shape this client does not know.
    Unrecognized,
}

/// Payload of the informational frame kinds. The body is kept opaque.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InfoFrame {
    pub message: Option<String>,
    pub payload: Value,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfirmationRequest {
    pub confirmation_id: ConfirmationId,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub action: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TruncationMetadata {
    pub warning: Option<String>,
    pub approximate_total: Option<u64>,
}

impl DecodedFrame {
    pub fn is_done(&self) -> bool {
        matches!(self, DecodedFrame::Done)
    }
}

pub fn decode_frame(data: &str, sentinel: &str) -> DecodedFrame {
    if data.trim() == sentinel {
        return DecodedFrame::Done;
    }

    let value: Value = match serde_json::from_str(data) {
        Ok(value) => value,
        Err(_) => return DecodedFrame::Raw(data.to_string()),
    };

    match value {
        Value::Object(map) => DecodedFrame::Structured(classify(map)),
        _ => DecodedFrame::Raw(data.to_string()),
    }
}

fn classify(map: Map<String, Value>) -> StreamFrame {
    match map.get("type").and_then(Value::as_str) {
        Some("text") => {
            return match map.get("text").and_then(Value::as_str) {
                Some(text) => StreamFrame::Text {
                    text: text.to_string(),
                },
                None => StreamFrame::Unrecognized,
            };
        }
        Some("error") => {
            let message = string_field(&map, "message")
                .or_else(|| string_field(&map, "error"))
                .unwrap_or_else(|| UNKNOWN_ERROR_MESSAGE.to_string());
            return StreamFrame::Error { message };
        }
        Some("pagination") => return StreamFrame::Pagination(info_frame(map)),
        Some("service_unavailable") => return StreamFrame::ServiceUnavailable(info_frame(map)),
        _ => {}
    }

    if map.get("status").and_then(Value::as_str) == Some("pending_confirmation") {
        return match serde_json::from_value::<ConfirmationRequest>(Value::Object(map)) {
            Ok(request) => StreamFrame::PendingConfirmation(request),
            Err(e) => {
                tracing::warn!(error = %e, "Discarding malformed pending_confirmation frame");
                StreamFrame::Unrecognized
            }
        };
    }

    if let Some(Value::Object(metadata)) = map.get("metadata")
        && metadata.get("truncated").and_then(Value::as_bool) == Some(true)
    {
        let approximate_total = ["approximateTotal", "totalCount", "total"]
            .iter()
            .find_map(|key| metadata.get(*key).and_then(Value::as_u64));
        return StreamFrame::Truncated(TruncationMetadata {
            warning: string_field(metadata, "warning"),
            approximate_total,
        });
    }

    StreamFrame::Unrecognized
}

fn info_frame(map: Map<String, Value>) -> InfoFrame {
    let message = string_field(&map, "message").or_else(|| string_field(&map, "hint"));
    InfoFrame {
        message,
        payload: Value::Object(map),
    }
}

fn string_field(map: &Map<String, Value>, key: &str) -> Option<String> {
    map.get(key).and_then(Value::as_str).map(str::to_string)
}
