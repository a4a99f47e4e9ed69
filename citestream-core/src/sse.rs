use crate::error::{CitestreamError, Result};
use crate::event::DownstreamEvent;

pub const CONTENT_TYPE: &str = "text/event-stream";

/// Encodes one event as a `data: <json>\n\n` frame.
pub fn encode_frame(event: &DownstreamEvent) -> Result<String> {
    let json = serde_json::to_string(event)
        .map_err(|err| CitestreamError::Serialization(err.to_string()))?;
    Ok(format!("data: {json}\n\n"))
}

/// Splits a text event stream into framed items.
///
/// Bytes are buffered until a full line is available, so multi-byte
/// characters split across network chunks survive. Consecutive `data:`
/// lines of one event are joined with `\n`; `event:`, `id:`, `retry:` and
/// comment lines are dropped.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buffer: Vec<u8>,
    data: Vec<String>,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buffer.extend_from_slice(chunk);

        let mut frames = Vec::new();
        while let Some(newline) = self.buffer.iter().position(|byte| *byte == b'\n') {
            let line = self.buffer.drain(..=newline).collect::<Vec<_>>();
            let line = String::from_utf8_lossy(&line);
            let line = line.trim_end_matches(['\n', '\r']);
            if let Some(frame) = self.accept_line(line) {
                frames.push(frame);
            }
        }
        frames
    }

    /// Flushes whatever is left once the byte stream ends.
    pub fn finish(&mut self) -> Option<String> {
        if !self.buffer.is_empty() {
            let rest = std::mem::take(&mut self.buffer);
            let rest = String::from_utf8_lossy(&rest).into_owned();
            if let Some(frame) = self.accept_line(rest.trim_end_matches('\r')) {
                return Some(frame);
            }
        }
        self.take_event()
    }

    fn accept_line(&mut self, line: &str) -> Option<String> {
        if line.is_empty() {
            return self.take_event();
        }
        if line.starts_with(':') {
            return None;
        }

        let (field, value) = line.split_once(':').unwrap_or((line, ""));
        if field == "data" {
            self.data
                .push(value.strip_prefix(' ').unwrap_or(value).to_string());
        }
        None
    }

    fn take_event(&mut self) -> Option<String> {
        if self.data.is_empty() {
            return None;
        }
        let joined = self.data.join("\n");
        self.data.clear();
        Some(format!("data: {joined}"))
    }
}

#[cfg(test)]
mod tests {
    use crate::event::DownstreamEvent;
    use crate::sse::{FrameDecoder, encode_frame};

    #[test]
    fn frames_are_data_lines_with_blank_terminator() {
        let frame = encode_frame(&DownstreamEvent::error("boom")).expect("encode");
        assert_eq!(frame, "data: {\"type\":\"error\",\"message\":\"boom\"}\n\n");
    }

    #[test]
    fn decoder_reassembles_split_chunks() {
        let mut decoder = FrameDecoder::new();
        assert!(decoder.push(b"data: {\"type\":\"content_").is_empty());
        assert!(decoder.push(b"chunk\"}\n").is_empty());
        let frames = decoder.push(b"\ndata: [DONE]\n\n");
        assert_eq!(
            frames,
            vec![
                "data: {\"type\":\"content_chunk\"}".to_string(),
                "data: [DONE]".to_string()
            ]
        );
    }

    #[test]
    fn decoder_keeps_multibyte_text_split_across_chunks() {
        let bytes = "data: {\"c\":\"caf\u{e9}\"}\n\n".as_bytes();
        let split = bytes
            .iter()
            .position(|byte| *byte == 0xc3)
            .expect("multibyte lead")
            + 1;

        let mut decoder = FrameDecoder::new();
        assert!(decoder.push(&bytes[..split]).is_empty());
        let frames = decoder.push(&bytes[split..]);
        assert_eq!(frames, vec!["data: {\"c\":\"caf\u{e9}\"}".to_string()]);
    }

    #[test]
    fn decoder_ignores_comments_and_other_fields() {
        let mut decoder = FrameDecoder::new();
        let frames =
            decoder.push(b": keep-alive\r\nevent: chunk\r\nid: 7\r\ndata: a\r\ndata: b\r\n\r\n");
        assert_eq!(frames, vec!["data: a\nb".to_string()]);
    }

    #[test]
    fn finish_flushes_unterminated_event() {
        let mut decoder = FrameDecoder::new();
        assert!(decoder.push(b"data: {\"type\":\"message_end\"}").is_empty());
        assert_eq!(
            decoder.finish(),
            Some("data: {\"type\":\"message_end\"}".to_string())
        );
        assert_eq!(decoder.finish(), None);
    }
}
