use std::io::Write;
use std::pin::pin;

use futures::{Stream, StreamExt};
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::diagnostic::describe_error;
use crate::error::{CitestreamError, Result};
use crate::event::{DownstreamEvent, UpstreamItem, transform};
use crate::sse::encode_frame;

/// The consumer side hung up, or the sink otherwise refuses frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("sink is closed")]
pub struct SinkClosed;

/// Destination for framed events. A sink may be closed by its consumer at
/// any time; both operations then report `SinkClosed`.
pub trait EventSink {
    fn write(&mut self, frame: &str) -> std::result::Result<(), SinkClosed>;
    fn close(&mut self) -> std::result::Result<(), SinkClosed>;
}

impl<S: EventSink + ?Sized> EventSink for Box<S> {
    fn write(&mut self, frame: &str) -> std::result::Result<(), SinkClosed> {
        (**self).write(frame)
    }

    fn close(&mut self) -> std::result::Result<(), SinkClosed> {
        (**self).close()
    }
}

/// Sink over any byte writer, e.g. stdout. I/O failures close the sink.
#[derive(Debug)]
pub struct WriterSink<W: Write> {
    writer: Option<W>,
}

impl<W: Write> WriterSink<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer: Some(writer),
        }
    }
}

impl<W: Write> EventSink for WriterSink<W> {
    fn write(&mut self, frame: &str) -> std::result::Result<(), SinkClosed> {
        let writer = self.writer.as_mut().ok_or(SinkClosed)?;
        let written = writer
            .write_all(frame.as_bytes())
            .and_then(|()| writer.flush());
        if let Err(err) = written {
            debug!(error = %err, "writer sink failed; treating as closed");
            self.writer = None;
            return Err(SinkClosed);
        }
        Ok(())
    }

    fn close(&mut self) -> std::result::Result<(), SinkClosed> {
        let mut writer = self.writer.take().ok_or(SinkClosed)?;
        writer.flush().map_err(|_| SinkClosed)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    Open,
    /// A terminal frame (`message_end` or `error`) is being delivered.
    Terminal,
    Closed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BridgeOutcome {
    /// `message_end` was forwarded.
    Completed,
    /// Upstream ended without `message_end`.
    Exhausted,
    /// Upstream or sink failed; an `error` frame was attempted.
    Failed { message: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BridgeReport {
    pub outcome: BridgeOutcome,
    pub frames_written: usize,
}

/// Forwards normalized upstream events into one sink and closes it exactly
/// once.
#[derive(Debug)]
pub struct StreamBridge<S> {
    sink: S,
    state: ChannelState,
    frames_written: usize,
}

impl<S: EventSink> StreamBridge<S> {
    pub fn new(sink: S) -> Self {
        Self {
            sink,
            state: ChannelState::Open,
            frames_written: 0,
        }
    }

    pub fn state(&self) -> ChannelState {
        self.state
    }

    pub fn into_sink(self) -> S {
        self.sink
    }

    /// Drains `upstream` until `message_end`, failure or exhaustion.
    ///
    /// Never returns an error: failures are reported to the consumer as an
    /// `error` frame and to the caller through the outcome.
    pub async fn run<St>(&mut self, upstream: St) -> BridgeReport
    where
        St: Stream<Item = Result<UpstreamItem>>,
    {
        let mut upstream = pin!(upstream);

        while let Some(item) = upstream.next().await {
            let item = match item {
                Ok(item) => item,
                Err(err) => return self.fail(&err),
            };

            let event = match transform(item) {
                Ok(Some(event)) => event,
                Ok(None) => continue,
                Err(err) => {
                    warn!(error = %err, "skipping malformed upstream item");
                    continue;
                }
            };

            let terminal = event.is_terminal();
            if terminal {
                self.state = ChannelState::Terminal;
            }
            if let Err(err) = self.emit(&event) {
                return self.fail(&err);
            }
            if terminal {
                self.close();
                return self.report(BridgeOutcome::Completed);
            }
        }

        debug!("upstream exhausted without message_end");
        self.close();
        self.report(BridgeOutcome::Exhausted)
    }

    /// Writes one event as a frame.
    ///
    /// A closed sink is absorbed once the stream is terminal; before that it
    /// surfaces as `SinkClosed`.
    pub fn emit(&mut self, event: &DownstreamEvent) -> Result<()> {
        if self.state == ChannelState::Closed {
            debug!(kind = event.kind(), "dropping frame after close");
            return Ok(());
        }

        let frame = encode_frame(event)?;
        match self.sink.write(&frame) {
            Ok(()) => {
                self.frames_written += 1;
                debug!(kind = event.kind(), "forwarded frame");
                Ok(())
            }
            Err(SinkClosed) if self.state == ChannelState::Terminal => {
                debug!(kind = event.kind(), "consumer already gone; frame dropped");
                Ok(())
            }
            Err(SinkClosed) => Err(CitestreamError::SinkClosed),
        }
    }

    /// Transitions to `Closed`. Only the first call reaches the sink.
    pub fn close(&mut self) {
        if self.state == ChannelState::Closed {
            return;
        }
        self.state = ChannelState::Closed;
        if self.sink.close().is_err() {
            debug!("sink was already closed by the consumer");
        }
    }

    fn fail(&mut self, err: &CitestreamError) -> BridgeReport {
        let message = describe_error(err);
        error!(error = %err, message = %message, "stream failed");

        if self.state != ChannelState::Closed {
            self.state = ChannelState::Terminal;
        }
        if let Err(emit_err) = self.emit(&DownstreamEvent::error(message.clone())) {
            warn!(error = %emit_err, "could not deliver error frame");
        }
        self.close();
        self.report(BridgeOutcome::Failed { message })
    }

    fn report(&self, outcome: BridgeOutcome) -> BridgeReport {
        info!(
            outcome = ?outcome,
            frames = self.frames_written,
            "bridge finished"
        );
        BridgeReport {
            outcome,
            frames_written: self.frames_written,
        }
    }
}

/// Runs a fresh bridge over `upstream` and `sink`.
pub async fn bridge<S, St>(upstream: St, sink: S) -> BridgeReport
where
    S: EventSink,
    St: Stream<Item = Result<UpstreamItem>>,
{
    StreamBridge::new(sink).run(upstream).await
}
