use std::fs;
use std::path::Path;

use crate::assembler::assemble;
use crate::error::{CitestreamError, Result};
use crate::event::DownstreamEvent;
use crate::model::ChatMessage;

pub fn read_transcript(path: &Path) -> Result<String> {
    let bytes = fs::read(path).map_err(|source| CitestreamError::Io {
        path: path.to_path_buf(),
        source,
    })?;

    if bytes.is_empty() {
        return Err(CitestreamError::EmptyTranscript {
            path: path.to_path_buf(),
        });
    }

    String::from_utf8(bytes).map_err(|_| CitestreamError::NonUtf8Transcript {
        path: path.to_path_buf(),
    })
}

/// Loads finished conversation turns from a file.
///
/// Accepted shapes: one message object, an array of messages, or a
/// captured outbound stream (`data: {...}` frames or bare JSON lines) that
/// is folded through the message assembler.
pub fn load_conversation(path: &Path) -> Result<Vec<ChatMessage>> {
    let raw = read_transcript(path)?;
    parse_conversation(path, &raw)
}

pub fn parse_conversation(path: &Path, raw: &str) -> Result<Vec<ChatMessage>> {
    let trimmed = raw.trim_start();

    if trimmed.starts_with('[') {
        return serde_json::from_str::<Vec<ChatMessage>>(trimmed).map_err(|source| {
            CitestreamError::InvalidJsonLine {
                path: path.to_path_buf(),
                line: 1,
                source,
            }
        });
    }
    if let Ok(message) = serde_json::from_str::<ChatMessage>(trimmed) {
        return Ok(vec![message]);
    }

    let events = parse_frames(path, raw)?;
    Ok(assemble(&events))
}

/// Reads downstream events from a captured stream, one per line.
pub fn parse_frames(path: &Path, raw: &str) -> Result<Vec<DownstreamEvent>> {
    let mut events = Vec::new();

    for (line_idx, line) in raw.lines().enumerate() {
        let line_no = line_idx + 1;
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with(':') {
            continue;
        }

        let payload = trimmed
            .strip_prefix("data:")
            .map_or(trimmed, str::trim_start);
        let event = serde_json::from_str::<DownstreamEvent>(payload).map_err(|source| {
            CitestreamError::InvalidJsonLine {
                path: path.to_path_buf(),
                line: line_no,
                source,
            }
        })?;
        events.push(event);
    }

    Ok(events)
}
