use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};

use crate::error::{CitestreamError, Result};
use crate::event::UpstreamItem;
use crate::model::HistoryMessage;

pub mod http;
pub mod replay;

/// Upstream items in arrival order. A failure ends the response.
pub type EventStream = BoxStream<'static, Result<UpstreamItem>>;

/// The upstream conversational-assistant service.
#[async_trait]
pub trait Assistant: Send + Sync {
    async fn send_query(&self, history: Vec<HistoryMessage>) -> Result<EventStream>;

    /// A fresh, non-expired download link for `file_id`.
    async fn file_download_url(&self, file_id: &str) -> Result<String>;
}

/// Starts a query and folds a failed start into the stream itself, so the
/// caller reports it the same way as a mid-stream failure.
pub async fn open_stream(assistant: &dyn Assistant, history: Vec<HistoryMessage>) -> EventStream {
    match assistant.send_query(history).await {
        Ok(stream) => stream,
        Err(err) => failed_stream(err),
    }
}

pub fn failed_stream(err: CitestreamError) -> EventStream {
    stream::iter([Err(err)]).boxed()
}
