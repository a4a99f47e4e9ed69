use tracing::warn;

use crate::event::DownstreamEvent;
use crate::model::{ChatMessage, Citation, MessageRole};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssemblyState {
    Streaming,
    Finished,
    Failed,
}

/// Builds the in-progress assistant message from downstream events.
///
/// Content and citations are appended until `message_end`; after that the
/// message is frozen and further events are ignored.
#[derive(Debug)]
pub struct MessageAssembler {
    message: ChatMessage,
    error: Option<ChatMessage>,
    state: AssemblyState,
}

impl Default for MessageAssembler {
    fn default() -> Self {
        Self::new()
    }
}

impl MessageAssembler {
    pub fn new() -> Self {
        Self {
            message: ChatMessage::new(MessageRole::Assistant, ""),
            error: None,
            state: AssemblyState::Streaming,
        }
    }

    pub fn state(&self) -> AssemblyState {
        self.state
    }

    pub fn message(&self) -> &ChatMessage {
        &self.message
    }

    pub fn apply(&mut self, event: &DownstreamEvent) -> AssemblyState {
        if self.state != AssemblyState::Streaming {
            return self.state;
        }

        match event {
            DownstreamEvent::ContentChunk { delta } => {
                self.message.content.push_str(&delta.content);
            }
            DownstreamEvent::Citation { citation } => {
                match serde_json::from_value::<Citation>(citation.clone()) {
                    Ok(citation) => self.message.citations.push(citation),
                    Err(err) => warn!(error = %err, "ignoring unreadable citation"),
                }
            }
            DownstreamEvent::MessageEnd { .. } => self.state = AssemblyState::Finished,
            DownstreamEvent::Error { message } => {
                self.error = Some(ChatMessage::new(MessageRole::Error, message.clone()));
                self.state = AssemblyState::Failed;
            }
            DownstreamEvent::MessageStart { .. } | DownstreamEvent::Passthrough(_) => {}
        }
        self.state
    }

    /// The conversation turns produced: the assistant message when it has
    /// anything to show, then the error bubble if the stream failed.
    pub fn finish(self) -> Vec<ChatMessage> {
        let mut messages = Vec::new();
        if !self.message.content.is_empty() || !self.message.citations.is_empty() {
            messages.push(self.message);
        }
        messages.extend(self.error);
        messages
    }
}

pub fn assemble<'a>(events: impl IntoIterator<Item = &'a DownstreamEvent>) -> Vec<ChatMessage> {
    let mut assembler = MessageAssembler::new();
    for event in events {
        if assembler.apply(event) != AssemblyState::Streaming {
            break;
        }
    }
    assembler.finish()
}
