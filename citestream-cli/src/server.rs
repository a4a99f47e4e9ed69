use std::convert::Infallible;
use std::sync::Arc;

use axum::body::Body;
use axum::{Json, Router};
use axum::extract::{Path, State};
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Redirect, Response};
use axum::routing::{get, post};
use citestream_core::bridge::SinkClosed;
use citestream_core::sse::CONTENT_TYPE;
use citestream_core::{
    Assistant, CitestreamError, EventSink, HistoryMessage, bridge, describe_error,
    forwardable_history, open_stream,
};
use futures::StreamExt;
use serde::Deserialize;
use serde_json::json;
use tokio::net::TcpListener;
use tokio::sync::mpsc::{self, UnboundedSender};
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::{info, warn};

#[derive(Clone)]
pub struct AppState {
    assistant: Arc<dyn Assistant>,
    /// Set when the server cannot reach any assistant; every request then
    /// fails before a stream is opened.
    config_error: Option<String>,
}

impl AppState {
    pub fn new(assistant: Arc<dyn Assistant>, config_error: Option<String>) -> Self {
        Self {
            assistant,
            config_error,
        }
    }
}

/// Inbound turns keep only `role` and `content`; anything else the client
/// sends back (citations included) is dropped unparsed.
#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    #[serde(default)]
    messages: Vec<HistoryMessage>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/chat", post(chat))
        .route("/files/{file_id}/download", get(download_file))
        .with_state(state)
}

pub async fn serve(addr: &str, state: AppState) -> citestream_core::Result<()> {
    let listener = TcpListener::bind(addr)
        .await
        .map_err(|source| CitestreamError::Listen {
            addr: addr.to_string(),
            source,
        })?;
    info!(addr = %addr, "serving chat bridge");

    axum::serve(listener, router(state))
        .await
        .map_err(|source| CitestreamError::Listen {
            addr: addr.to_string(),
            source,
        })
}

/// Outbound half of one response body. Dropping the sender ends the body;
/// a dropped receiver means the client went away.
struct ChannelSink {
    sender: Option<UnboundedSender<String>>,
}

impl EventSink for ChannelSink {
    fn write(&mut self, frame: &str) -> Result<(), SinkClosed> {
        let sender = self.sender.as_ref().ok_or(SinkClosed)?;
        sender.send(frame.to_string()).map_err(|_| SinkClosed)
    }

    fn close(&mut self) -> Result<(), SinkClosed> {
        match self.sender.take() {
            Some(_) => Ok(()),
            None => Err(SinkClosed),
        }
    }
}

async fn chat(State(state): State<AppState>, Json(request): Json<ChatRequest>) -> Response {
    if let Some(message) = &state.config_error {
        return error_response(StatusCode::INTERNAL_SERVER_ERROR, message);
    }

    let history = forwardable_history(request.messages);
    let (sender, receiver) = mpsc::unbounded_channel::<String>();
    let assistant = Arc::clone(&state.assistant);

    tokio::spawn(async move {
        let upstream = open_stream(assistant.as_ref(), history).await;
        bridge(
            upstream,
            ChannelSink {
                sender: Some(sender),
            },
        )
        .await;
    });

    let body = Body::from_stream(UnboundedReceiverStream::new(receiver).map(Ok::<_, Infallible>));
    (
        [
            (header::CONTENT_TYPE, CONTENT_TYPE),
            (header::CACHE_CONTROL, "no-cache"),
            (header::CONNECTION, "keep-alive"),
        ],
        body,
    )
        .into_response()
}

async fn download_file(State(state): State<AppState>, Path(file_id): Path<String>) -> Response {
    if let Some(message) = &state.config_error {
        return error_response(StatusCode::INTERNAL_SERVER_ERROR, message);
    }

    match state.assistant.file_download_url(&file_id).await {
        Ok(url) => Redirect::temporary(&url).into_response(),
        Err(err) => {
            warn!(file_id = %file_id, error = %err, "file link lookup failed");
            error_response(StatusCode::BAD_GATEWAY, &describe_error(&err))
        }
    }
}

fn error_response(status: StatusCode, message: &str) -> Response {
    (status, Json(json!({ "error": message }))).into_response()
}
