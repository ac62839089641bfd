//! Transport-facing side of a response.

use std::sync::Arc;

use bytes::Bytes;
use inflow_core::{HeaderMap, HttpFrame, StreamPriority};
use tokio::sync::{mpsc, watch};
use tracing::trace;

use crate::error::TransportError;
use crate::stream::Command;

/// Push feed used by the connection layer to drive one response.
///
/// Events are delivered to the response in the order they are pushed.
/// Dropping the feed without calling [`end`](ResponseFeed::end) or
/// [`fail`](ResponseFeed::fail) fails the stream with
/// [`TransportError::ConnectionClosed`].
pub struct ResponseFeed {
    commands: mpsc::UnboundedSender<Command>,
    writable: watch::Receiver<bool>,
}

impl ResponseFeed {
    pub(crate) fn new(commands: mpsc::UnboundedSender<Command>, writable: watch::Receiver<bool>) -> Self {
        Self { commands, writable }
    }

    /// Push a body chunk.
    pub fn chunk(&self, chunk: impl Into<Bytes>) {
        self.send(Command::Chunk(chunk.into()));
    }

    /// Push trailer fields. They become visible on the response when the
    /// stream ends.
    pub fn trailers(&self, trailers: HeaderMap) {
        self.send(Command::Trailers(trailers));
    }

    /// The body is complete.
    pub fn end(&self) {
        self.send(Command::End);
    }

    /// The stream failed. Only the first terminal event counts.
    pub fn fail(&self, cause: TransportError) {
        self.send(Command::Fail(Arc::new(cause)));
    }

    pub fn frame(&self, frame: HttpFrame) {
        self.send(Command::Frame(frame));
    }

    pub fn priority(&self, priority: StreamPriority) {
        self.send(Command::Priority(priority));
    }

    /// Whether the response can take more chunks without exceeding its
    /// buffer bound.
    pub fn is_writable(&self) -> bool {
        *self.writable.borrow()
    }

    /// Wait until the response buffer has room again.
    ///
    /// Returns immediately if the response has gone away.
    pub async fn writable(&self) {
        let mut writable = self.writable.clone();
        let _ = writable.wait_for(|w| *w).await;
    }

    fn send(&self, command: Command) {
        if let Err(err) = self.commands.send(command) {
            trace!(command = ?err.0, "response gone, event dropped");
        }
    }
}

impl Drop for ResponseFeed {
    fn drop(&mut self) {
        let _ = self.commands.send(Command::Disconnected);
    }
}

impl std::fmt::Debug for ResponseFeed {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResponseFeed")
            .field("writable", &self.is_writable())
            .finish()
    }
}
