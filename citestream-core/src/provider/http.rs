use std::collections::VecDeque;
use std::fmt::Display;

use async_trait::async_trait;
use futures::stream::{self, Stream, StreamExt};
use reqwest::StatusCode;
use serde::Serialize;
use serde_json::Value;
use tracing::debug;

use crate::config::AssistantConfig;
use crate::error::{CitestreamError, Result};
use crate::event::UpstreamItem;
use crate::model::HistoryMessage;
use crate::provider::{Assistant, EventStream};
use crate::sse::FrameDecoder;

const API_KEY_HEADER: &str = "Api-Key";

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    messages: &'a [HistoryMessage],
    stream: bool,
}

/// Assistant chat API over a streamed text event response.
#[derive(Debug, Clone)]
pub struct HttpAssistant {
    client: reqwest::Client,
    config: AssistantConfig,
}

impl HttpAssistant {
    pub fn new(config: AssistantConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            config,
        }
    }

    pub fn config(&self) -> &AssistantConfig {
        &self.config
    }
}

#[async_trait]
impl Assistant for HttpAssistant {
    async fn send_query(&self, history: Vec<HistoryMessage>) -> Result<EventStream> {
        let url = self.config.chat_url()?;
        debug!(url = %url, turns = history.len(), "sending query upstream");

        let response = self
            .client
            .post(&url)
            .header(API_KEY_HEADER, &self.config.api_key)
            .json(&ChatRequest {
                messages: &history,
                stream: true,
            })
            .send()
            .await
            .map_err(|err| CitestreamError::Transport(err.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(upstream_error(status, response.text().await));
        }

        Ok(frame_stream(response.bytes_stream()))
    }

    async fn file_download_url(&self, file_id: &str) -> Result<String> {
        let url = self.config.file_url(file_id)?;
        let response = self
            .client
            .get(&url)
            .header(API_KEY_HEADER, &self.config.api_key)
            .send()
            .await
            .map_err(|err| CitestreamError::Transport(err.to_string()))?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Err(CitestreamError::FileNotFound(file_id.to_string()));
        }
        if !status.is_success() {
            return Err(upstream_error(status, response.text().await));
        }

        let body = response
            .json::<Value>()
            .await
            .map_err(|err| CitestreamError::Transport(err.to_string()))?;
        signed_url(&body).ok_or_else(|| CitestreamError::FileNotFound(file_id.to_string()))
    }
}

/// A failed response; the body is the message unless it is unreadable or
/// blank, then the status reason stands in.
fn upstream_error(status: StatusCode, body: reqwest::Result<String>) -> CitestreamError {
    let message = match body {
        Ok(text) if !text.trim().is_empty() => text,
        Ok(_) => status_reason(status),
        Err(err) => {
            debug!(status = status.as_u16(), error = %err, "could not read error body");
            status_reason(status)
        }
    };
    CitestreamError::Upstream {
        status: status.as_u16(),
        message,
    }
}

fn status_reason(status: StatusCode) -> String {
    status
        .canonical_reason()
        .map_or_else(|| format!("status {}", status.as_u16()), ToString::to_string)
}

fn signed_url(body: &Value) -> Option<String> {
    body.get("signed_url")
        .or_else(|| body.get("signedUrl"))
        .and_then(Value::as_str)
        .filter(|url| !url.is_empty())
        .map(ToString::to_string)
}

/// Splits a response body into framed items. A transport error ends the
/// stream after being yielded once.
pub fn frame_stream<S, B, E>(bytes: S) -> EventStream
where
    S: Stream<Item = std::result::Result<B, E>> + Send + 'static,
    B: AsRef<[u8]> + Send + 'static,
    E: Display + Send + 'static,
{
    let state = (Box::pin(bytes), FrameDecoder::new(), VecDeque::new(), false);

    stream::unfold(
        state,
        |(mut bytes, mut decoder, mut pending, mut done)| async move {
            loop {
                if let Some(frame) = pending.pop_front() {
                    return Some((
                        Ok(UpstreamItem::Framed(frame)),
                        (bytes, decoder, pending, done),
                    ));
                }
                if done {
                    return None;
                }

                match bytes.next().await {
                    Some(Ok(chunk)) => pending.extend(decoder.push(chunk.as_ref())),
                    Some(Err(err)) => {
                        done = true;
                        return Some((
                            Err(CitestreamError::Stream(err.to_string())),
                            (bytes, decoder, pending, done),
                        ));
                    }
                    None => {
                        done = true;
                        pending.extend(decoder.finish());
                    }
                }
            }
        },
    )
    .boxed()
}
