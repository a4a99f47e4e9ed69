pub mod assembler;
pub mod bridge;
pub mod citation;
pub mod config;
pub mod diagnostic;
pub mod error;
pub mod event;
pub mod markdown;
pub mod model;
pub mod provider;
pub mod render;
pub mod sse;
pub mod transcript;

pub use assembler::{AssemblyState, MessageAssembler, assemble};
pub use bridge::{
    BridgeOutcome, BridgeReport, ChannelState, EventSink, SinkClosed, StreamBridge, WriterSink,
    bridge,
};
pub use citation::{CitationRef, CitationTarget, annotate, index_citations, reference_map};
pub use config::AssistantConfig;
pub use diagnostic::{describe_error, unwrap_error_message};
pub use error::{CitestreamError, Result};
pub use event::{DownstreamEvent, UpstreamEvent, UpstreamItem, transform};
pub use model::{
    ChatMessage, Citation, FileRef, HistoryMessage, MessageRole, Reference, forwardable_history,
    upstream_history,
};
pub use provider::http::HttpAssistant;
pub use provider::replay::ReplayAssistant;
pub use provider::{Assistant, EventStream, open_stream};
pub use render::{render_annotated, render_conversation_html, render_message_html};
pub use transcript::{load_conversation, read_transcript};
