use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CitestreamError {
    #[error("missing configuration: {0}")]
    MissingConfig(String),

    #[error("invalid assistant host {host}: {reason}")]
    InvalidHost { host: String, reason: String },

    #[error("upstream returned status {status}: {message}")]
    Upstream { status: u16, message: String },

    #[error("upstream transport error: {0}")]
    Transport(String),

    #[error("upstream stream error: {0}")]
    Stream(String),

    #[error("malformed upstream item: {source}")]
    MalformedItem {
        #[source]
        source: serde_json::Error,
    },

    #[error("upstream item is not a json object: {0}")]
    NotAnObject(String),

    #[error("outbound sink closed before the stream terminated")]
    SinkClosed,

    #[error("file not found: {0}")]
    FileNotFound(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("transcript is empty: {path}")]
    EmptyTranscript { path: PathBuf },

    #[error("transcript is not valid UTF-8: {path}")]
    NonUtf8Transcript { path: PathBuf },

    #[error("cannot serve on {addr}: {source}")]
    Listen {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("i/o error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid json line in {path} at line {line}: {source}")]
    InvalidJsonLine {
        path: PathBuf,
        line: usize,
        #[source]
        source: serde_json::Error,
    },
}

impl CitestreamError {
    /// The message as the upstream produced it, without the variant prefix.
    ///
    /// Upstream envelopes are often JSON text; keeping them bare lets the
    /// diagnostic unwrapper parse them.
    pub fn raw_message(&self) -> String {
        match self {
            Self::Upstream { message, .. }
            | Self::Transport(message)
            | Self::Stream(message)
            | Self::MissingConfig(message) => message.clone(),
            other => other.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, CitestreamError>;
