use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{CitestreamError, Result};

const DATA_LABEL: &str = "data:";
const DONE_SENTINEL: &str = "[DONE]";

/// One item as it comes off the upstream sequence.
#[derive(Debug, Clone, PartialEq)]
pub enum UpstreamItem {
    /// Text event line, usually `data: {...}`.
    Framed(String),
    Structured(Value),
}

impl From<Value> for UpstreamItem {
    fn from(value: Value) -> Self {
        Self::Structured(value)
    }
}

impl From<String> for UpstreamItem {
    fn from(text: String) -> Self {
        Self::Framed(text)
    }
}

impl From<&str> for UpstreamItem {
    fn from(text: &str) -> Self {
        Self::Framed(text.to_string())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum UpstreamEvent {
    MessageStart {
        id: Option<String>,
        model: Option<String>,
        role: Option<String>,
    },
    ContentChunk {
        content: String,
    },
    Citation {
        citation: Value,
    },
    MessageEnd {
        finish_reason: Option<String>,
        usage: Option<Value>,
    },
    /// Any kind this bridge does not know; forwarded verbatim.
    Other(Value),
}

impl UpstreamEvent {
    pub fn from_value(value: Value) -> Self {
        let kind = value.get("type").and_then(Value::as_str).map(str::to_string);
        let string_field = |key: &str| value.get(key).and_then(Value::as_str).map(str::to_string);

        match kind.as_deref() {
            Some("message_start") => Self::MessageStart {
                id: string_field("id"),
                model: string_field("model"),
                role: string_field("role"),
            },
            // Falling back to a top-level `content` is undocumented upstream
            // behavior, kept for older payloads.
            Some("content_chunk") => Self::ContentChunk {
                content: value
                    .pointer("/delta/content")
                    .and_then(Value::as_str)
                    .or_else(|| value.get("content").and_then(Value::as_str))
                    .unwrap_or_default()
                    .to_string(),
            },
            Some("citation") => Self::Citation {
                citation: value.get("citation").cloned().unwrap_or(Value::Null),
            },
            Some("message_end") => Self::MessageEnd {
                finish_reason: string_field("finish_reason"),
                usage: value.get("usage").cloned(),
            },
            _ => Self::Other(value),
        }
    }

    pub fn into_downstream(self) -> DownstreamEvent {
        match self {
            Self::MessageStart { id, model, role } => {
                DownstreamEvent::MessageStart { id, model, role }
            }
            Self::ContentChunk { content } => DownstreamEvent::ContentChunk {
                delta: Delta { content },
            },
            Self::Citation { citation } => DownstreamEvent::Citation { citation },
            Self::MessageEnd {
                finish_reason,
                usage,
            } => DownstreamEvent::MessageEnd {
                finish_reason,
                usage,
            },
            Self::Other(value) => DownstreamEvent::Passthrough(value),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Delta {
    #[serde(default)]
    pub content: String,
}

/// Normalized event written to the outbound stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DownstreamEvent {
    MessageStart {
        #[serde(skip_serializing_if = "Option::is_none")]
        id: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        model: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        role: Option<String>,
    },
    ContentChunk {
        delta: Delta,
    },
    Citation {
        citation: Value,
    },
    MessageEnd {
        #[serde(skip_serializing_if = "Option::is_none")]
        finish_reason: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        usage: Option<Value>,
    },
    Error {
        message: String,
    },
    #[serde(untagged)]
    Passthrough(Value),
}

impl DownstreamEvent {
    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
        }
    }

    /// After a terminal event nothing else is written and the stream closes.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::MessageEnd { .. } | Self::Error { .. })
    }

    pub fn kind(&self) -> &str {
        match self {
            Self::MessageStart { .. } => "message_start",
            Self::ContentChunk { .. } => "content_chunk",
            Self::Citation { .. } => "citation",
            Self::MessageEnd { .. } => "message_end",
            Self::Error { .. } => "error",
            Self::Passthrough(value) => value
                .get("type")
                .and_then(Value::as_str)
                .unwrap_or("unknown"),
        }
    }
}

/// Maps one upstream item to zero or one downstream events.
///
/// Framed items have their `data:` label stripped before parsing; an empty
/// payload or the `[DONE]` sentinel yields nothing.
pub fn transform(item: UpstreamItem) -> Result<Option<DownstreamEvent>> {
    let value = match item {
        UpstreamItem::Structured(value) => value,
        UpstreamItem::Framed(text) => {
            let trimmed = text.trim();
            let payload = trimmed
                .strip_prefix(DATA_LABEL)
                .map_or(trimmed, str::trim_start);
            if payload.is_empty() || payload == DONE_SENTINEL {
                return Ok(None);
            }
            serde_json::from_str::<Value>(payload)
                .map_err(|source| CitestreamError::MalformedItem { source })?
        }
    };

    if !value.is_object() {
        return Err(CitestreamError::NotAnObject(value.to_string()));
    }

    Ok(Some(UpstreamEvent::from_value(value).into_downstream()))
}
