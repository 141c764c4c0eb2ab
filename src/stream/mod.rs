//! Streaming relay core.
//!
//! Upstream bytes flow through four stages, each usable on its own:
//! [`lines::LineReassembler`] → [`sse::decode_data_line`] →
//! [`crate::protocol::gemini::stream::extract_stream_events`] →
//! [`sink::RelaySink`], driven by [`relay::relay_stream`].

pub mod lines;
pub mod relay;
pub mod sink;
pub mod sse;

pub use lines::LineReassembler;
pub use relay::{relay_stream, RelayOptions, RelayOutcome, RelaySummary};
pub use sink::{frame_channel, ChannelWriter, FrameWriter, RelaySink};

/// A decoded logical event from the upstream stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayEvent {
    /// Incremental text to forward.
    Token(String),
    /// Normal stop or length limit reached.
    Done,
    /// Generation stopped by the upstream safety filter.
    SafetyBlocked,
    /// An error object embedded in an otherwise successful stream.
    UpstreamError(String),
    /// Nothing to forward (usage-only or partial metadata payload).
    Ignored,
}
