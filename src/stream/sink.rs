use std::convert::Infallible;
use std::future::Future;

use bytes::Bytes;
use futures_util::Stream;
use tokio::sync::mpsc;

use super::sse::{done_frame, error_frame, token_frame, ErrorFrameKind};

/// Downstream write handle for one relay operation.
pub trait FrameWriter: Send {
    /// Write one encoded frame. Resolves to `false` once the receiving side
    /// is gone; the write is then a no-op.
    fn write_frame(&mut self, frame: Bytes) -> impl Future<Output = bool> + Send;

    /// Whether the receiving side has already gone away.
    fn is_disconnected(&self) -> bool {
        false
    }

    /// Resolves once the receiving side goes away. Writers without a
    /// disconnect signal never resolve.
    fn closed(&self) -> impl Future<Output = ()> + Send {
        std::future::pending()
    }

    /// Release the downstream connection.
    fn close(&mut self);
}

/// [`FrameWriter`] backed by a bounded channel feeding the response body.
#[derive(Debug)]
pub struct ChannelWriter {
    tx: Option<mpsc::Sender<Bytes>>,
}

impl FrameWriter for ChannelWriter {
    async fn write_frame(&mut self, frame: Bytes) -> bool {
        match self.tx.as_ref() {
            Some(tx) => tx.send(frame).await.is_ok(),
            None => false,
        }
    }

    fn is_disconnected(&self) -> bool {
        self.tx.as_ref().map_or(true, mpsc::Sender::is_closed)
    }

    async fn closed(&self) {
        if let Some(tx) = self.tx.as_ref() {
            tx.closed().await;
        }
    }

    fn close(&mut self) {
        // Dropping the last sender ends the body stream.
        self.tx.take();
    }
}

/// Create a frame channel: the writer half for the relay task and a body
/// stream for the HTTP response.
pub fn frame_channel(
    capacity: usize,
) -> (
    ChannelWriter,
    impl Stream<Item = Result<Bytes, Infallible>> + Send + 'static,
) {
    let (tx, rx) = mpsc::channel::<Bytes>(capacity.max(1));
    let body = futures_util::stream::unfold(rx, |mut rx| async move {
        rx.recv().await.map(|frame| (Ok(frame), rx))
    });
    (ChannelWriter { tx: Some(tx) }, body)
}

/// Writes relay events downstream and enforces the termination contract.
///
/// - the terminal marker is written at most once;
/// - nothing is written after [`RelaySink::close`];
/// - the writer is closed exactly once, including when the sink is dropped
///   without an explicit close.
pub struct RelaySink<W: FrameWriter> {
    writer: W,
    done_written: bool,
    closed: bool,
    client_gone: bool,
    tokens_written: usize,
    text_bytes: usize,
    errors_written: usize,
}

impl<W: FrameWriter> RelaySink<W> {
    #[must_use]
    pub fn new(writer: W) -> Self {
        Self {
            writer,
            done_written: false,
            closed: false,
            client_gone: false,
            tokens_written: 0,
            text_bytes: 0,
            errors_written: 0,
        }
    }

    /// Write a token frame. Returns `false` if the frame could not be
    /// delivered (sink closed, already terminated, or client gone).
    pub async fn send_token(&mut self, text: &str) -> bool {
        if !self.write(token_frame(text)).await {
            return false;
        }
        self.tokens_written += 1;
        self.text_bytes += text.len();
        true
    }

    /// Write an error frame.
    pub async fn send_error(&mut self, message: &str, kind: ErrorFrameKind) -> bool {
        let delivered = self.write(error_frame(message, kind)).await;
        if delivered {
            self.errors_written += 1;
        }
        delivered
    }

    /// Write the terminal marker if it has not been written yet, then close.
    pub async fn finish(&mut self) {
        if !self.done_written && !self.closed {
            self.done_written = true;
            if !self.writer.write_frame(done_frame()).await {
                self.client_gone = true;
            }
        }
        self.close();
    }

    /// Close the downstream connection. Idempotent.
    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.writer.close();
    }

    async fn write(&mut self, frame: Bytes) -> bool {
        if self.closed || self.done_written || self.client_gone {
            return false;
        }
        if self.writer.write_frame(frame).await {
            true
        } else {
            self.client_gone = true;
            false
        }
    }

    /// Resolves once the downstream client disconnects, so a pending
    /// upstream read can be abandoned.
    pub async fn client_closed(&self) {
        self.writer.closed().await;
    }

    /// Whether the downstream client has disconnected.
    pub fn client_gone(&mut self) -> bool {
        if !self.client_gone && !self.closed && self.writer.is_disconnected() {
            self.client_gone = true;
        }
        self.client_gone
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    #[must_use]
    pub fn done_written(&self) -> bool {
        self.done_written
    }

    #[must_use]
    pub fn tokens_written(&self) -> usize {
        self.tokens_written
    }

    #[must_use]
    pub fn text_bytes(&self) -> usize {
        self.text_bytes
    }

    #[must_use]
    pub fn errors_written(&self) -> usize {
        self.errors_written
    }

    #[must_use]
    pub fn writer(&self) -> &W {
        &self.writer
    }
}

impl<W: FrameWriter> Drop for RelaySink<W> {
    fn drop(&mut self) {
        self.close();
    }
}
