use std::collections::HashMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use serde_json::Value;
use tracing::debug;

use crate::error::{CitestreamError, Result};
use crate::event::UpstreamItem;
use crate::model::HistoryMessage;
use crate::provider::{Assistant, EventStream};
use crate::transcript::read_transcript;

/// Key of a transcript line that makes the replay fail at that point.
pub const REPLAY_ERROR_KEY: &str = "replay_error";

#[derive(Debug, Clone, PartialEq)]
enum ReplayLine {
    Item(UpstreamItem),
    Fail(String),
}

/// Plays back a recorded upstream response.
///
/// Each non-empty line is one upstream item: `data:` lines stay framed,
/// JSON objects are structured, and anything else is forwarded framed so
/// the bridge rejects it like a malformed upstream item. A line
/// `{"replay_error": "<message>"}` fails the stream there.
#[derive(Debug, Clone)]
pub struct ReplayAssistant {
    source: PathBuf,
    lines: Vec<ReplayLine>,
    files: HashMap<String, String>,
}

impl ReplayAssistant {
    pub fn from_path(path: impl Into<PathBuf>) -> Result<Self> {
        let source = path.into();
        let raw = read_transcript(&source)?;
        Ok(Self::from_jsonl(source, &raw))
    }

    pub fn from_jsonl(source: impl Into<PathBuf>, raw: &str) -> Self {
        let mut lines = Vec::new();
        let mut files = HashMap::new();

        for line in raw.lines() {
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }

            let payload = trimmed
                .strip_prefix("data:")
                .map_or(trimmed, str::trim_start);
            let parsed = serde_json::from_str::<Value>(payload).ok();
            if let Some(value) = &parsed {
                collect_file_links(value, &mut files);
            }

            if trimmed.starts_with("data:") {
                lines.push(ReplayLine::Item(UpstreamItem::Framed(trimmed.to_string())));
                continue;
            }

            match parsed {
                Some(value) => match value.get(REPLAY_ERROR_KEY).and_then(Value::as_str) {
                    Some(message) => lines.push(ReplayLine::Fail(message.to_string())),
                    None => lines.push(ReplayLine::Item(UpstreamItem::Structured(value))),
                },
                None => lines.push(ReplayLine::Item(UpstreamItem::Framed(trimmed.to_string()))),
            }
        }

        Self {
            source: source.into(),
            lines,
            files,
        }
    }

    pub fn source(&self) -> &Path {
        &self.source
    }
}

#[async_trait]
impl Assistant for ReplayAssistant {
    async fn send_query(&self, history: Vec<HistoryMessage>) -> Result<EventStream> {
        debug!(
            source = %self.source.display(),
            turns = history.len(),
            items = self.lines.len(),
            "replaying recorded response"
        );

        let items = self
            .lines
            .iter()
            .cloned()
            .map(|line| match line {
                ReplayLine::Item(item) => Ok(item),
                ReplayLine::Fail(message) => Err(CitestreamError::Stream(message)),
            })
            .collect::<Vec<_>>();
        Ok(stream::iter(items).boxed())
    }

    async fn file_download_url(&self, file_id: &str) -> Result<String> {
        self.files
            .get(file_id)
            .cloned()
            .ok_or_else(|| CitestreamError::FileNotFound(file_id.to_string()))
    }
}

/// Remembers `file.id -> file.signed_url` from recorded citation events.
fn collect_file_links(value: &Value, files: &mut HashMap<String, String>) {
    for reference in value
        .pointer("/citation/references")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
    {
        let Some(file) = reference.get("file") else {
            continue;
        };
        let id = file.get("id").and_then(Value::as_str);
        let url = file
            .get("signed_url")
            .or_else(|| file.get("signedUrl"))
            .and_then(Value::as_str);
        if let (Some(id), Some(url)) = (id, url) {
            files.insert(id.to_string(), url.to_string());
        }
    }
}
