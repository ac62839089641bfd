//! Whole-body aggregation.
//!
//! The aggregator is a second observer on the chunk fan-out: it sees the same
//! chunks as the public chunk handler and never takes them away from it.

use bytes::{Bytes, BytesMut};
use tracing::trace;

use crate::deferred::{Listener, Promise};
use crate::error::ResponseError;

/// Concatenation buffer.
///
/// A single-chunk body is handed back as-is; the first copy happens only
/// when a second chunk arrives.
#[derive(Debug, Default)]
enum Collected {
    #[default]
    Empty,
    Single(Bytes),
    Many(BytesMut),
}

impl Collected {
    fn push(&mut self, chunk: Bytes) {
        *self = match std::mem::take(self) {
            Collected::Empty => Collected::Single(chunk),
            Collected::Single(first) => {
                let mut buf = BytesMut::with_capacity(first.len() + chunk.len());
                buf.extend_from_slice(&first);
                buf.extend_from_slice(&chunk);
                Collected::Many(buf)
            }
            Collected::Many(mut buf) => {
                buf.extend_from_slice(&chunk);
                Collected::Many(buf)
            }
        };
    }

    fn freeze(self) -> Bytes {
        match self {
            Collected::Empty => Bytes::new(),
            Collected::Single(bytes) => bytes,
            Collected::Many(buf) => buf.freeze(),
        }
    }
}

/// Collects every observed chunk and settles the body promise on the
/// terminal event.
#[derive(Debug)]
pub(crate) struct BodyAggregator {
    promise: Promise<Bytes>,
    collected: Collected,
    chunks: usize,
}

impl BodyAggregator {
    pub(crate) fn new(promise: Promise<Bytes>) -> Self {
        Self {
            promise,
            collected: Collected::Empty,
            chunks: 0,
        }
    }

    /// Start from chunks that were delivered before this aggregator attached.
    pub(crate) fn seeded<'a>(promise: Promise<Bytes>, chunks: impl IntoIterator<Item = &'a Bytes>) -> Self {
        let mut aggregator = Self::new(promise);
        for chunk in chunks {
            aggregator.observe(chunk.clone());
        }
        aggregator
    }

    /// A body promise that can never be fulfilled.
    pub(crate) fn unavailable(mut promise: Promise<Bytes>, reason: &'static str) -> Self {
        trace!(reason, "body unavailable");
        promise.settle(Err(ResponseError::BodyUnavailable(reason)));
        Self::new(promise)
    }

    pub(crate) fn observe(&mut self, chunk: Bytes) {
        if self.promise.is_settled() {
            return;
        }
        self.chunks += 1;
        self.collected.push(chunk);
    }

    pub(crate) fn complete(&mut self) {
        let body = std::mem::take(&mut self.collected).freeze();
        trace!(chunks = self.chunks, bytes = body.len(), "body aggregated");
        self.promise.settle(Ok(body));
    }

    pub(crate) fn fail(&mut self, err: ResponseError) {
        self.collected = Collected::Empty;
        self.promise.settle(Err(err));
    }

    pub(crate) fn on_settled(&mut self, listener: Listener<Bytes>) {
        self.promise.on_settled(listener);
    }
}
