use std::fmt;

use serde::{Deserialize, Deserializer, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    User,
    Assistant,
    Error,
}

impl fmt::Display for MessageRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::User => write!(f, "user"),
            Self::Assistant => write!(f, "assistant"),
            Self::Error => write!(f, "error"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: MessageRole,
    #[serde(default)]
    pub content: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub citations: Vec<Citation>,
}

impl ChatMessage {
    pub fn new(role: MessageRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            citations: Vec::new(),
        }
    }
}

/// A pointer from a character offset in the final content to its sources.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Citation {
    pub position: usize,
    #[serde(default)]
    pub references: Vec<Reference>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reference {
    pub file: FileRef,
    #[serde(default)]
    pub pages: Vec<u32>,
    #[serde(
        default,
        deserialize_with = "deserialize_highlight",
        skip_serializing_if = "Option::is_none"
    )]
    pub highlight: Option<String>,
}

impl Reference {
    /// Page numbers in ascending order without duplicates.
    pub fn sorted_pages(&self) -> Vec<u32> {
        let mut pages = self.pages.clone();
        pages.sort_unstable();
        pages.dedup();
        pages
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRef {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default)]
    pub name: String,
    #[serde(
        default,
        alias = "signedUrl",
        skip_serializing_if = "Option::is_none"
    )]
    pub signed_url: Option<String>,
}

/// One turn of the history forwarded upstream. Only `role` and `content`
/// are accepted by the upstream service.
///
/// Inbound turns deserialize straight into this type; other fields, such as
/// previously attached citations, are skipped without being validated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryMessage {
    pub role: MessageRole,
    #[serde(default)]
    pub content: String,
}

/// Converts conversation turns into upstream history: citations are
/// stripped and error bubbles are dropped.
pub fn upstream_history(messages: &[ChatMessage]) -> Vec<HistoryMessage> {
    messages
        .iter()
        .filter(|message| message.role != MessageRole::Error)
        .map(|message| HistoryMessage {
            role: message.role,
            content: message.content.clone(),
        })
        .collect()
}

/// Drops error bubbles from inbound turns before they are forwarded.
pub fn forwardable_history(turns: Vec<HistoryMessage>) -> Vec<HistoryMessage> {
    turns
        .into_iter()
        .filter(|turn| turn.role != MessageRole::Error)
        .collect()
}

#[derive(Deserialize)]
#[serde(untagged)]
enum HighlightWire {
    Text(String),
    Object {
        #[serde(default)]
        content: Option<String>,
    },
}

fn deserialize_highlight<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let wire = Option::<HighlightWire>::deserialize(deserializer)?;
    Ok(wire
        .and_then(|wire| match wire {
            HighlightWire::Text(text) => Some(text),
            HighlightWire::Object { content } => content,
        })
        .filter(|text| !text.trim().is_empty()))
}
