//! The per-response delivery context.
//!
//! One task per response owns the body stream. Transport events and consumer
//! registrations arrive over a single ordered channel and every callback
//! (chunk, end, failure, frame, priority, deferred listeners) runs on this
//! task, one at a time, in arrival order.
//!
//! Demand changes travel over the same channel, so `handler(h)` followed by
//! `pause()` always installs `h` under the demand that was in effect before
//! the pause. A demand change made by a callback running on this task is
//! applied immediately instead: a pause issued by the chunk handler stops
//! the drain loop before the next chunk.

use std::collections::VecDeque;
use std::fmt;
use std::sync::{Arc, OnceLock};

use bytes::Bytes;
use inflow_core::{HeaderMap, HttpFrame, HttpVersion, ResponseConfig, StreamPriority};
use tokio::sync::{mpsc, watch};
use tracing::{debug, trace, warn};

use crate::aggregate::BodyAggregator;
use crate::deferred::{Listener, Promise};
use crate::demand::{FlowControl, StreamState, UNBOUNDED};
use crate::error::{ResponseError, TransportError};
use crate::notify::{FrameHandler, Notifier, PriorityHandler};

pub type ChunkHandler = Box<dyn FnMut(Bytes) + Send>;
pub type ExceptionHandler = Box<dyn FnOnce(ResponseError) + Send>;
pub type EndHandler = Box<dyn FnOnce() + Send>;

/// Everything the delivery context reacts to, in arrival order.
pub(crate) enum Command {
    // Transport side.
    Chunk(Bytes),
    Trailers(HeaderMap),
    End,
    Fail(Arc<TransportError>),
    Frame(HttpFrame),
    Priority(StreamPriority),
    Disconnected,

    // Consumer side.
    Handler(ChunkHandler),
    ExceptionHandler(ExceptionHandler),
    EndHandler(EndHandler),
    FrameHandler(FrameHandler),
    PriorityHandler(PriorityHandler),
    Fetch(u64),
    Pause,
    Body(Promise<Bytes>),
    BodyListener(Listener<Bytes>),
    /// `end()` was called.
    AwaitEnd,
    EndListener(Listener<()>),
    /// A consumer showed interest.
    Wake,
}

impl fmt::Debug for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Command::Chunk(_) => "Chunk",
            Command::Trailers(_) => "Trailers",
            Command::End => "End",
            Command::Fail(_) => "Fail",
            Command::Frame(_) => "Frame",
            Command::Priority(_) => "Priority",
            Command::Disconnected => "Disconnected",
            Command::Handler(_) => "Handler",
            Command::ExceptionHandler(_) => "ExceptionHandler",
            Command::EndHandler(_) => "EndHandler",
            Command::FrameHandler(_) => "FrameHandler",
            Command::PriorityHandler(_) => "PriorityHandler",
            Command::Fetch(_) => "Fetch",
            Command::Pause => "Pause",
            Command::Body(_) => "Body",
            Command::BodyListener(_) => "BodyListener",
            Command::AwaitEnd => "AwaitEnd",
            Command::EndListener(_) => "EndListener",
            Command::Wake => "Wake",
        };
        f.write_str(name)
    }
}

/// State readable from the consumer handle.
#[derive(Debug)]
pub(crate) struct Shared {
    pub(crate) flow: FlowControl,
    /// Set once, when the stream ends successfully.
    pub(crate) trailers: OnceLock<HeaderMap>,
}

impl Shared {
    pub(crate) fn new() -> Self {
        Self {
            flow: FlowControl::new(),
            trailers: OnceLock::new(),
        }
    }
}

pub(crate) struct Delivery {
    shared: Arc<Shared>,
    max_buffered_chunks: usize,
    /// Chunks received but not yet delivered.
    pending: VecDeque<Bytes>,
    /// End received, waiting for `pending` to drain.
    end_pending: bool,
    trailers: HeaderMap,
    delivered: u64,
    /// Delivered chunks, kept only when the config asks for it.
    retained: Option<Vec<Bytes>>,
    failure: Option<ResponseError>,
    disconnected: bool,

    handler: Option<ChunkHandler>,
    exception_handler: Option<ExceptionHandler>,
    end_handler: Option<EndHandler>,
    body: Option<BodyAggregator>,
    completion: Promise<()>,
    notifier: Notifier,

    /// Backpressure towards the transport: `false` while the buffer is full.
    writable: watch::Sender<bool>,
}

impl Delivery {
    pub(crate) fn new(
        shared: Arc<Shared>,
        version: HttpVersion,
        config: &ResponseConfig,
        completion: Promise<()>,
        writable: watch::Sender<bool>,
    ) -> Self {
        Self {
            shared,
            max_buffered_chunks: config.max_buffered_chunks.max(1),
            pending: VecDeque::new(),
            end_pending: false,
            trailers: HeaderMap::new(),
            delivered: 0,
            retained: config.retain_body.then(Vec::new),
            failure: None,
            disconnected: false,
            handler: None,
            exception_handler: None,
            end_handler: None,
            body: None,
            completion,
            notifier: Notifier::new(version),
            writable,
        }
    }

    /// Process commands until every sender (feed and handles) is gone.
    pub(crate) async fn run(mut self, mut commands: mpsc::UnboundedReceiver<Command>) {
        while let Some(command) = commands.recv().await {
            trace!(?command, "delivery command");
            self.shared.flow.enter();
            self.apply(command);
            self.drain();
            self.shared.flow.leave();
        }
        trace!(state = ?self.state(), "delivery context closed");
    }

    fn state(&self) -> StreamState {
        self.shared.flow.state()
    }

    /// The terminal event was received, whether or not it was delivered.
    fn finished(&self) -> bool {
        self.end_pending || self.state().is_terminal()
    }

    fn apply(&mut self, command: Command) {
        match command {
            Command::Chunk(chunk) => self.on_chunk(chunk),
            Command::Trailers(trailers) => self.on_trailers(trailers),
            Command::End => self.on_end(),
            Command::Fail(cause) => self.on_fail(cause),
            Command::Frame(frame) => self.notifier.frame(frame),
            Command::Priority(priority) => self.notifier.priority(priority),
            Command::Disconnected => self.on_disconnect(),

            Command::Handler(handler) => {
                self.activate();
                if !self.state().is_terminal() {
                    self.handler = Some(handler);
                }
            }
            // Failure and end callbacks are not interest in chunks: the
            // stream stays idle until a chunk consumer shows up.
            Command::ExceptionHandler(handler) => {
                if !self.state().is_terminal() {
                    self.exception_handler = Some(handler);
                }
            }
            Command::EndHandler(handler) => {
                if !self.state().is_terminal() {
                    self.end_handler = Some(handler);
                }
            }
            Command::FrameHandler(handler) => {
                if !self.released() {
                    self.notifier.set_frame_handler(handler);
                }
            }
            Command::PriorityHandler(handler) => {
                if !self.released() {
                    self.notifier.set_priority_handler(handler);
                }
            }
            Command::Fetch(amount) => {
                self.activate();
                let demand = self.shared.flow.add(amount);
                trace!(amount, ?demand, "demand added");
            }
            Command::Pause => {
                self.activate();
                self.shared.flow.pause();
            }
            Command::Body(promise) => {
                self.activate();
                self.attach_body(promise);
            }
            Command::BodyListener(listener) => match &mut self.body {
                Some(body) => body.on_settled(listener),
                None => {
                    debug!("body listener registered before body aggregation");
                    let reason = "body aggregation was never started";
                    listener(Err(ResponseError::BodyUnavailable(reason)));
                }
            },
            Command::AwaitEnd => self.await_end(),
            Command::EndListener(listener) => {
                self.await_end();
                self.completion.on_settled(listener);
            }
            Command::Wake => self.activate(),
        }
    }

    fn activate(&mut self) {
        if self.state() == StreamState::Idle {
            self.shared.flow.set_state(StreamState::Streaming);
            debug!(buffered = self.pending.len(), "response stream activated");
        }
    }

    /// Someone waits for the terminal event. Without a chunk handler nobody
    /// else can grant demand, so the remaining chunks are let through.
    fn await_end(&mut self) {
        self.activate();
        if self.handler.is_none() && !self.state().is_terminal() {
            let demand = self.shared.flow.add(UNBOUNDED as u64);
            trace!(?demand, "end awaited without chunk handler, resuming");
        }
    }

    fn on_chunk(&mut self, chunk: Bytes) {
        if self.finished() {
            debug!(len = chunk.len(), "chunk after terminal event ignored");
            return;
        }
        self.pending.push_back(chunk);
    }

    fn on_trailers(&mut self, trailers: HeaderMap) {
        if self.finished() {
            debug!("trailers after terminal event ignored");
            return;
        }
        self.trailers.extend(trailers);
    }

    fn on_end(&mut self) {
        if self.finished() {
            debug!("duplicate terminal event ignored");
            return;
        }
        self.end_pending = true;
    }

    fn on_fail(&mut self, cause: Arc<TransportError>) {
        if self.finished() {
            debug!(%cause, "failure after terminal event ignored");
            return;
        }
        self.fail(cause);
    }

    fn on_disconnect(&mut self) {
        self.disconnected = true;
        if !self.finished() {
            self.fail(Arc::new(TransportError::ConnectionClosed));
        } else if self.state().is_terminal() {
            self.notifier.clear();
        }
    }

    fn attach_body(&mut self, promise: Promise<Bytes>) {
        let ended = self.state() == StreamState::Ended;
        let body = match (&self.failure, &self.retained) {
            (Some(err), _) => {
                let mut body = BodyAggregator::new(promise);
                body.fail(err.clone());
                body
            }
            (None, Some(retained)) => {
                let mut body = BodyAggregator::seeded(promise, retained);
                if ended {
                    body.complete();
                }
                body
            }
            (None, None) if ended => BodyAggregator::unavailable(promise, "stream already ended"),
            (None, None) if self.delivered > 0 => {
                BodyAggregator::unavailable(promise, "chunks were already delivered")
            }
            (None, None) => BodyAggregator::new(promise),
        };
        self.body = Some(body);
    }

    /// Deliver pending chunks while demand allows, then the held end event
    /// once nothing is left in front of it.
    fn drain(&mut self) {
        if self.state() == StreamState::Streaming {
            while !self.pending.is_empty() && self.shared.flow.take() {
                if let Some(chunk) = self.pending.pop_front() {
                    self.deliver(chunk);
                }
            }
            if self.end_pending && self.pending.is_empty() {
                self.end();
            }
        }
        self.update_backpressure();
    }

    /// Fan a chunk out to the retained copy, the aggregator and the public
    /// handler, in that order.
    fn deliver(&mut self, chunk: Bytes) {
        self.delivered += 1;
        if let Some(retained) = &mut self.retained {
            retained.push(chunk.clone());
        }
        if let Some(body) = &mut self.body {
            body.observe(chunk.clone());
        }
        if let Some(handler) = &mut self.handler {
            handler(chunk);
        }
    }

    fn end(&mut self) {
        self.end_pending = false;
        let trailers = std::mem::take(&mut self.trailers);
        if self.shared.trailers.set(trailers).is_err() {
            warn!("trailers already published");
        }
        self.shared.flow.set_state(StreamState::Ended);
        debug!(chunks = self.delivered, "response stream ended");

        if let Some(handler) = self.end_handler.take() {
            handler();
        }
        if let Some(body) = &mut self.body {
            body.complete();
        }
        self.completion.settle(Ok(()));
        self.release();
    }

    /// Pending chunks are discarded; a failure is never held behind them.
    fn fail(&mut self, cause: Arc<TransportError>) {
        let discarded = self.pending.len();
        self.pending.clear();
        self.end_pending = false;
        self.shared.flow.set_state(StreamState::Failed);
        warn!(%cause, delivered = self.delivered, discarded, "response stream failed");

        let err = ResponseError::StreamFailure(cause);
        self.failure = Some(err.clone());
        if let Some(handler) = self.exception_handler.take() {
            handler(err.clone());
        }
        if let Some(body) = &mut self.body {
            body.fail(err.clone());
        }
        self.completion.settle(Err(err));
        self.release();
    }

    /// Drop callbacks that can no longer fire so that anything they
    /// captured, such as a clone of the response handle, is released.
    fn release(&mut self) {
        self.handler = None;
        self.exception_handler = None;
        self.end_handler = None;
        if self.disconnected {
            self.notifier.clear();
        }
    }

    /// No further event of any kind can arrive.
    fn released(&self) -> bool {
        self.disconnected && self.state().is_terminal()
    }

    fn update_backpressure(&mut self) {
        let writable = self.pending.len() < self.max_buffered_chunks;
        let changed = self.writable.send_if_modified(|current| {
            if *current == writable {
                return false;
            }
            *current = writable;
            true
        });
        if changed {
            if writable {
                debug!(buffered = self.pending.len(), "buffer drained, transport may resume");
            } else {
                debug!(buffered = self.pending.len(), "buffer full, signalling backpressure");
            }
        }
    }
}

impl fmt::Debug for Delivery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Delivery")
            .field("state", &self.state())
            .field("pending", &self.pending.len())
            .field("end_pending", &self.end_pending)
            .field("delivered", &self.delivered)
            .field("disconnected", &self.disconnected)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;
    use crate::deferred::{self, Deferred};
    use crate::demand::Demand;

    struct Harness {
        delivery: Delivery,
        end: Deferred<()>,
        writable: watch::Receiver<bool>,
        seen: Arc<Mutex<Vec<Bytes>>>,
    }

    impl Harness {
        fn new(config: ResponseConfig) -> Self {
            let (completion, end) = deferred::pending();
            let (tx, writable) = watch::channel(true);
            let delivery = Delivery::new(Arc::new(Shared::new()), HttpVersion::Http11, &config, completion, tx);
            Self {
                delivery,
                end,
                writable,
                seen: Arc::new(Mutex::new(Vec::new())),
            }
        }

        fn step(&mut self, command: Command) {
            self.delivery.apply(command);
            self.delivery.drain();
        }

        fn collect(&mut self) {
            let seen = self.seen.clone();
            self.step(Command::Handler(Box::new(move |chunk| {
                seen.lock().unwrap().push(chunk);
            })));
        }

        fn seen(&self) -> Vec<Bytes> {
            self.seen.lock().unwrap().clone()
        }

        fn flow(&self) -> &FlowControl {
            &self.delivery.shared.flow
        }
    }

    #[test]
    fn idle_until_first_consumer() {
        let mut h = Harness::new(ResponseConfig::default());
        h.step(Command::Chunk(Bytes::from_static(b"a")));
        h.step(Command::FrameHandler(Box::new(|_| {})));
        assert_eq!(h.delivery.state(), StreamState::Idle);
        assert_eq!(h.delivery.pending.len(), 1);

        h.collect();
        assert_eq!(h.delivery.state(), StreamState::Streaming);
        assert_eq!(h.seen(), vec![Bytes::from_static(b"a")]);
    }

    #[test]
    fn end_waits_for_buffered_chunks() {
        let mut h = Harness::new(ResponseConfig::default());
        h.collect();
        h.flow().pause();
        h.step(Command::Chunk(Bytes::from_static(b"a")));
        h.step(Command::Chunk(Bytes::from_static(b"b")));
        h.step(Command::End);

        assert_eq!(h.delivery.state(), StreamState::Streaming);
        assert!(!h.end.is_settled());

        h.flow().add(1);
        h.step(Command::Wake);
        assert_eq!(h.seen().len(), 1);
        assert!(!h.end.is_settled());

        h.flow().add(1);
        h.step(Command::Wake);
        assert_eq!(h.seen().len(), 2);
        assert_eq!(h.delivery.state(), StreamState::Ended);
        assert!(matches!(h.end.try_get(), Some(Ok(()))));
    }

    #[test]
    fn failure_skips_buffered_chunks() {
        let mut h = Harness::new(ResponseConfig::default());
        h.collect();
        h.flow().pause();
        h.step(Command::Chunk(Bytes::from_static(b"a")));
        h.step(Command::End);
        h.step(Command::Fail(Arc::new(TransportError::ConnectionReset)));

        // end was already received, so the failure is ignored
        assert_eq!(h.delivery.state(), StreamState::Streaming);

        let mut h = Harness::new(ResponseConfig::default());
        h.collect();
        h.flow().pause();
        h.step(Command::Chunk(Bytes::from_static(b"a")));
        h.step(Command::Fail(Arc::new(TransportError::Timeout)));

        assert_eq!(h.delivery.state(), StreamState::Failed);
        assert!(h.delivery.pending.is_empty());
        assert!(h.seen().is_empty());
        assert!(matches!(h.end.try_get(), Some(Err(ResponseError::StreamFailure(_)))));

        h.flow().add(5);
        h.step(Command::Chunk(Bytes::from_static(b"late")));
        assert!(h.seen().is_empty());
    }

    #[test]
    fn disconnect_fails_unfinished_stream() {
        let mut h = Harness::new(ResponseConfig::default());
        h.collect();
        h.step(Command::Disconnected);

        assert_eq!(h.delivery.state(), StreamState::Failed);
        match h.end.try_get() {
            Some(Err(err)) => assert!(matches!(
                err.cause().map(|c| &**c),
                Some(TransportError::ConnectionClosed)
            )),
            other => panic!("unexpected outcome: {other:?}"),
        }
        assert!(h.delivery.released());
    }

    #[test]
    fn handlers_released_at_terminal_event() {
        let mut h = Harness::new(ResponseConfig::default());
        h.collect();
        h.step(Command::EndHandler(Box::new(|| {})));
        h.step(Command::End);

        assert!(h.delivery.handler.is_none());
        assert!(h.delivery.end_handler.is_none());

        h.collect();
        assert!(h.delivery.handler.is_none(), "handler kept after end");
    }

    #[test]
    fn backpressure_follows_buffer_bound() {
        let config = ResponseConfig {
            max_buffered_chunks: 2,
            ..ResponseConfig::default()
        };
        let mut h = Harness::new(config);
        h.flow().pause();
        h.step(Command::Wake);

        h.step(Command::Chunk(Bytes::from_static(b"a")));
        assert!(*h.writable.borrow());
        h.step(Command::Chunk(Bytes::from_static(b"b")));
        assert!(!*h.writable.borrow());

        h.flow().add(1);
        h.step(Command::Wake);
        assert!(*h.writable.borrow());
    }

    #[test]
    fn retained_chunks_seed_late_body() {
        let config = ResponseConfig {
            retain_body: true,
            ..ResponseConfig::default()
        };
        let mut h = Harness::new(config);
        h.collect();
        h.step(Command::Chunk(Bytes::from_static(b"ab")));
        h.step(Command::Chunk(Bytes::from_static(b"cd")));
        h.step(Command::End);

        let (promise, body) = deferred::pending();
        h.step(Command::Body(promise));
        assert_eq!(body.try_get().unwrap().unwrap(), "abcd");
    }

    #[test]
    fn failure_and_end_callbacks_keep_stream_idle() {
        let mut h = Harness::new(ResponseConfig::default());
        h.step(Command::Chunk(Bytes::from_static(b"ab")));
        h.step(Command::Chunk(Bytes::from_static(b"cd")));
        h.step(Command::ExceptionHandler(Box::new(|_| {})));
        h.step(Command::EndHandler(Box::new(|| {})));

        assert_eq!(h.delivery.state(), StreamState::Idle);
        assert_eq!(h.delivery.pending.len(), 2);

        h.collect();
        assert_eq!(h.seen(), vec![Bytes::from_static(b"ab"), Bytes::from_static(b"cd")]);
    }

    #[test]
    fn demand_commands_apply_in_order() {
        let mut h = Harness::new(ResponseConfig::default());
        h.step(Command::Chunk(Bytes::from_static(b"a")));
        h.step(Command::Pause);
        h.collect();
        assert!(h.seen().is_empty());

        h.step(Command::Fetch(1));
        h.step(Command::Chunk(Bytes::from_static(b"b")));
        assert_eq!(h.seen(), vec![Bytes::from_static(b"a")]);
        assert_eq!(h.flow().demand(), Demand::Bounded(0));
    }

    #[test]
    fn awaiting_end_without_handler_lifts_pause() {
        let mut h = Harness::new(ResponseConfig::default());
        h.step(Command::Pause);
        h.step(Command::Chunk(Bytes::from_static(b"a")));
        h.step(Command::End);
        assert_eq!(h.delivery.state(), StreamState::Streaming);

        h.step(Command::AwaitEnd);
        assert_eq!(h.delivery.state(), StreamState::Ended);
        assert!(matches!(h.end.try_get(), Some(Ok(()))));
    }

    #[test]
    fn awaiting_end_with_handler_keeps_pause() {
        let mut h = Harness::new(ResponseConfig::default());
        h.collect();
        h.step(Command::Pause);
        h.step(Command::Chunk(Bytes::from_static(b"a")));
        h.step(Command::End);
        h.step(Command::AwaitEnd);

        assert_eq!(h.delivery.state(), StreamState::Streaming);
        assert!(h.seen().is_empty());
        assert!(!h.end.is_settled());
    }

    #[test]
    fn body_listener_without_aggregation_is_told_so() {
        let mut h = Harness::new(ResponseConfig::default());
        let outcome = Arc::new(Mutex::new(None));
        let slot = outcome.clone();
        h.step(Command::BodyListener(Box::new(move |result| {
            *slot.lock().unwrap() = Some(result);
        })));

        assert!(matches!(
            outcome.lock().unwrap().take(),
            Some(Err(ResponseError::BodyUnavailable(_)))
        ));
    }
}
