use std::fmt;
use std::time::Duration;

use bytes::Bytes;
use futures_util::{Stream, StreamExt};

use super::lines::LineReassembler;
use super::sink::{FrameWriter, RelaySink};
use super::sse::{decode_data_line, ErrorFrameKind};
use super::RelayEvent;
use crate::error::RelayError;
use crate::protocol::gemini::stream::{extract_stream_events_into, ExtractedEvents};
use crate::protocol::gemini::{GeminiResponse, GeminiUsageMetadata};

const SAFETY_BLOCK_MESSAGE: &str = "The response was blocked by the upstream safety filters";
const STREAM_INTERRUPTED_MESSAGE: &str = "The upstream stream was interrupted";
const STREAM_STALLED_MESSAGE: &str = "The upstream stream stopped sending data";

/// Per-operation relay settings.
#[derive(Debug, Clone, Copy, Default)]
pub struct RelayOptions {
    /// Longest wait for the next upstream chunk before giving up.
    pub idle_timeout: Option<Duration>,
}

/// How a relay operation ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayOutcome {
    /// Upstream sent a normal or length-limited finish.
    Completed,
    /// Upstream body ended without a finish indicator.
    Exhausted,
    /// The upstream call failed before any body was read.
    UpstreamFailed,
    /// The stream carried an embedded error object.
    UpstreamContentError,
    SafetyBlocked,
    /// Reading the upstream body failed or stalled.
    StreamFailed,
    ClientDisconnected,
}

impl RelayOutcome {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            RelayOutcome::Completed => "completed",
            RelayOutcome::Exhausted => "exhausted",
            RelayOutcome::UpstreamFailed => "upstream_failed",
            RelayOutcome::UpstreamContentError => "upstream_content_error",
            RelayOutcome::SafetyBlocked => "safety_blocked",
            RelayOutcome::StreamFailed => "stream_failed",
            RelayOutcome::ClientDisconnected => "client_disconnected",
        }
    }
}

impl fmt::Display for RelayOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What one relay operation did, for logging and tests.
#[derive(Debug, Clone)]
pub struct RelaySummary {
    pub outcome: RelayOutcome,
    /// Whether the upstream body was ever read.
    pub streamed: bool,
    pub tokens: usize,
    pub text_bytes: usize,
    pub upstream_chunks: usize,
    pub usage: Option<GeminiUsageMetadata>,
}

/// Drive one relay operation to completion.
///
/// `upstream` is the result of the already-issued upstream call: either its
/// body as a byte stream or the error that prevented it. Every path ends with
/// exactly one terminal marker attempt and one close of `sink`.
pub async fn relay_stream<B, E, W>(
    upstream: Result<B, RelayError>,
    sink: &mut RelaySink<W>,
    options: RelayOptions,
) -> RelaySummary
where
    B: Stream<Item = Result<Bytes, E>> + Send,
    E: fmt::Display,
    W: FrameWriter,
{
    let body = match upstream {
        Ok(body) => body,
        Err(err) => {
            tracing::warn!(error = %err, "upstream call failed before streaming");
            sink.send_error(&err.client_message(), ErrorFrameKind::Generic)
                .await;
            sink.finish().await;
            return RelaySummary {
                outcome: RelayOutcome::UpstreamFailed,
                streamed: false,
                tokens: 0,
                text_bytes: 0,
                upstream_chunks: 0,
                usage: None,
            };
        }
    };

    let mut pipeline = Pipeline::new();
    let mut upstream_chunks = 0usize;
    let mut body = Box::pin(body);
    let mut failure: Option<RelayError> = None;

    let outcome = loop {
        if sink.client_gone() {
            break RelayOutcome::ClientDisconnected;
        }

        let next = tokio::select! {
            biased;
            () = sink.client_closed() => break RelayOutcome::ClientDisconnected,
            next = next_chunk(&mut body, options.idle_timeout) => next,
        };

        match next {
            Err(limit) => {
                tracing::error!(idle_timeout_ms = limit.as_millis() as u64, "upstream stream stalled");
                failure = Some(RelayError::Stream(STREAM_STALLED_MESSAGE.to_string()));
                break RelayOutcome::StreamFailed;
            }
            Ok(None) => break RelayOutcome::Exhausted,
            Ok(Some(Err(err))) => {
                tracing::error!(error = %err, "failed to read upstream stream");
                failure = Some(RelayError::Stream(STREAM_INTERRUPTED_MESSAGE.to_string()));
                break RelayOutcome::StreamFailed;
            }
            Ok(Some(Ok(chunk))) => {
                upstream_chunks += 1;
                if let Some(outcome) = pipeline.process_chunk(&chunk, sink).await {
                    break outcome;
                }
            }
        }
    };

    // Release the upstream connection before the final writes.
    drop(body);

    // A terminal event already decided the outcome and a gone client takes
    // no writes; otherwise the tail may still hold a complete event.
    let flushed = match outcome {
        RelayOutcome::Exhausted | RelayOutcome::StreamFailed => pipeline.flush(sink).await,
        _ => None,
    };
    let outcome = match (flushed, failure) {
        (Some(flushed), _) => flushed,
        (None, Some(err)) => {
            sink.send_error(&err.client_message(), ErrorFrameKind::Generic)
                .await;
            outcome
        }
        (None, None) => outcome,
    };

    sink.finish().await;

    RelaySummary {
        outcome,
        streamed: true,
        tokens: sink.tokens_written(),
        text_bytes: sink.text_bytes(),
        upstream_chunks,
        usage: pipeline.usage,
    }
}

/// Next upstream item, or `Err(limit)` when the idle limit passed first.
async fn next_chunk<B: Stream>(
    body: &mut std::pin::Pin<Box<B>>,
    idle_timeout: Option<Duration>,
) -> Result<Option<B::Item>, Duration> {
    match idle_timeout {
        Some(limit) => tokio::time::timeout(limit, body.next())
            .await
            .map_err(|_| limit),
        None => Ok(body.next().await),
    }
}

/// Reassembler → decoder → extractor, applied to the sink.
struct Pipeline {
    reassembler: LineReassembler,
    lines: Vec<String>,
    events: ExtractedEvents,
    usage: Option<GeminiUsageMetadata>,
}

impl Pipeline {
    fn new() -> Self {
        Self {
            reassembler: LineReassembler::new(),
            lines: Vec::with_capacity(8),
            events: ExtractedEvents::new(),
            usage: None,
        }
    }

    /// Process every line completed by `chunk`, in order. Returns the
    /// outcome if a line ended the relay.
    async fn process_chunk<W: FrameWriter>(
        &mut self,
        chunk: &[u8],
        sink: &mut RelaySink<W>,
    ) -> Option<RelayOutcome> {
        self.lines.clear();
        self.reassembler.feed_into(chunk, &mut self.lines);
        let lines = std::mem::take(&mut self.lines);
        let mut result = None;
        for line in &lines {
            if let Some(outcome) = self.process_line(line, sink).await {
                result = Some(outcome);
                break;
            }
        }
        self.lines = lines;
        result
    }

    /// Run the unterminated tail through the pipeline once more. Parse
    /// failures are swallowed like any other malformed line.
    async fn flush<W: FrameWriter>(&mut self, sink: &mut RelaySink<W>) -> Option<RelayOutcome> {
        let tail = self.reassembler.finish()?;
        self.process_line(&tail, sink).await
    }

    async fn process_line<W: FrameWriter>(
        &mut self,
        line: &str,
        sink: &mut RelaySink<W>,
    ) -> Option<RelayOutcome> {
        let mut chunk: GeminiResponse = decode_data_line(line)?;
        if let Some(usage) = chunk.usage_metadata.take() {
            self.usage = Some(usage);
        }

        self.events.clear();
        extract_stream_events_into(chunk, &mut self.events);
        let events = std::mem::take(&mut self.events);
        let mut result = None;
        for event in &events {
            if let Some(outcome) = apply_event(event, sink).await {
                result = Some(outcome);
                break;
            }
        }
        self.events = events;
        result
    }
}

async fn apply_event<W: FrameWriter>(
    event: &RelayEvent,
    sink: &mut RelaySink<W>,
) -> Option<RelayOutcome> {
    match event {
        RelayEvent::Token(text) => {
            if sink.send_token(text).await {
                None
            } else {
                Some(RelayOutcome::ClientDisconnected)
            }
        }
        RelayEvent::Done => Some(RelayOutcome::Completed),
        RelayEvent::SafetyBlocked => {
            tracing::warn!("upstream response blocked by safety filters");
            sink.send_error(SAFETY_BLOCK_MESSAGE, ErrorFrameKind::Safety)
                .await;
            Some(RelayOutcome::SafetyBlocked)
        }
        RelayEvent::UpstreamError(message) => {
            tracing::warn!(message = %message, "upstream stream carried an error");
            sink.send_error(message, ErrorFrameKind::Generic).await;
            Some(RelayOutcome::UpstreamContentError)
        }
        RelayEvent::Ignored => None,
    }
}
