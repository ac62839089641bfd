use std::fmt;
use std::sync::{Arc, OnceLock, Weak};

use bytes::Bytes;
use inflow_core::{
    canonical_reason, set_cookies, HeaderMap, HttpFrame, HttpVersion, ResponseConfig,
    StreamPriority,
};
use tokio::sync::{mpsc, watch};
use tracing::{debug, trace};

use crate::deferred::{self, Deferred};
use crate::demand::{Demand, FlowControl, StreamState};
use crate::error::{ResponseError, ResponseResult};
use crate::feed::ResponseFeed;
use crate::read_stream::ReadStream;
use crate::request::ClientRequest;
use crate::stream::{Command, Delivery, Shared};

static NO_TRAILERS: HeaderMap = HeaderMap::new();

/// Status line and headers, as received before any body chunk.
#[derive(Debug, Clone)]
pub struct ResponseHead {
    pub status: u16,
    /// Reason phrase sent by the server; HTTP/2 has none.
    pub message: Option<String>,
    pub version: HttpVersion,
    pub headers: HeaderMap,
    pub request: Weak<ClientRequest>,
}

impl ResponseHead {
    pub fn new(status: u16, version: HttpVersion) -> Self {
        Self {
            status,
            message: None,
            version,
            headers: HeaderMap::new(),
            request: Weak::new(),
        }
    }

    pub fn message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn headers(mut self, headers: HeaderMap) -> Self {
        self.headers = headers;
        self
    }

    pub fn request(mut self, request: &Arc<ClientRequest>) -> Self {
        self.request = Arc::downgrade(request);
        self
    }
}

/// A client-side HTTP response whose body is consumed as a demand-driven
/// stream, as a single aggregated buffer, or both.
///
/// Cloning is cheap; all clones refer to the same response. The response is
/// driven by a delivery task spawned on the current tokio runtime, which
/// runs every registered callback in arrival order.
///
/// Registrations and demand changes made through one handle are applied in
/// call order. `handler(h).pause()` hands `h` the chunks already buffered,
/// because demand was unbounded when `h` was installed; call `pause()`
/// first to install a handler on a paused stream. Demand changes made from
/// inside a callback take effect before the next chunk.
///
/// # Example
///
/// ```rust,ignore
/// let (response, feed) = HttpClientResponse::open(head, &ResponseConfig::default());
///
/// // transport side
/// feed.chunk("ab");
/// feed.chunk("cd");
/// feed.end();
///
/// // consumer side
/// let body = response.body().await?;
/// assert_eq!(body, "abcd");
/// ```
#[derive(Clone)]
pub struct HttpClientResponse {
    inner: Arc<Inner>,
}

struct Inner {
    status: u16,
    message: String,
    version: HttpVersion,
    headers: HeaderMap,
    request: Weak<ClientRequest>,
    shared: Arc<Shared>,
    commands: mpsc::UnboundedSender<Command>,
    body: OnceLock<Deferred<Bytes>>,
    end: Deferred<()>,
    /// Cookies including trailers, computed once the stream has ended.
    cookies: OnceLock<Vec<String>>,
}

impl HttpClientResponse {
    /// Create a response from its head and spawn its delivery task.
    ///
    /// Returns the consumer handle and the feed the transport pushes body
    /// events into.
    ///
    /// # Panics
    ///
    /// Panics when called outside a tokio runtime.
    pub fn open(head: ResponseHead, config: &ResponseConfig) -> (Self, ResponseFeed) {
        let (commands, rx) = mpsc::unbounded_channel();
        let (writable_tx, writable_rx) = watch::channel(true);
        let (completion, end) = deferred::pending();
        let shared = Arc::new(Shared::new());

        let delivery = Delivery::new(shared.clone(), head.version, config, completion, writable_tx);
        tokio::spawn(delivery.run(rx));

        let message = head
            .message
            .or_else(|| canonical_reason(head.status).map(str::to_owned))
            .unwrap_or_default();
        debug!(status = head.status, version = %head.version, "response opened");

        let response = Self {
            inner: Arc::new(Inner {
                status: head.status,
                message,
                version: head.version,
                headers: head.headers,
                request: head.request,
                shared,
                commands: commands.clone(),
                body: OnceLock::new(),
                end,
                cookies: OnceLock::new(),
            }),
        };
        (response, ResponseFeed::new(commands, writable_rx))
    }

    pub fn status_code(&self) -> u16 {
        self.inner.status
    }

    /// Reason phrase, or the canonical one when the server sent none.
    pub fn status_message(&self) -> &str {
        &self.inner.message
    }

    pub fn version(&self) -> HttpVersion {
        self.inner.version
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.inner.headers
    }

    /// First value of header `name` (case-insensitive).
    pub fn header(&self, name: &str) -> Option<&str> {
        self.inner.headers.get(name)
    }

    /// Trailers; empty until the stream has ended.
    pub fn trailers(&self) -> &HeaderMap {
        self.inner.shared.trailers.get().unwrap_or(&NO_TRAILERS)
    }

    /// First value of trailer `name` (case-insensitive).
    pub fn trailer(&self, name: &str) -> Option<&str> {
        self.trailers().get(name)
    }

    /// `Set-Cookie` values from headers and, once the stream has ended,
    /// trailers.
    pub fn cookies(&self) -> Vec<String> {
        match self.inner.shared.trailers.get() {
            Some(trailers) => self
                .inner
                .cookies
                .get_or_init(|| set_cookies(&self.inner.headers, trailers))
                .clone(),
            None => set_cookies(&self.inner.headers, &NO_TRAILERS),
        }
    }

    /// The originating request, if it is still alive.
    pub fn request(&self) -> Option<Arc<ClientRequest>> {
        self.inner.request.upgrade()
    }

    pub fn state(&self) -> StreamState {
        self.inner.shared.flow.state()
    }

    /// Demand as last applied by the delivery context.
    pub fn demand(&self) -> Demand {
        self.inner.shared.flow.demand()
    }

    /// The whole body as one buffer.
    ///
    /// The first call subscribes an aggregator next to any chunk handler and
    /// switches to unbounded demand; later calls return the same result.
    /// Fails with [`ResponseError::BodyUnavailable`] when chunks were handed
    /// out before the first call and the config does not retain them.
    pub fn body(&self) -> Deferred<Bytes> {
        self.inner
            .body
            .get_or_init(|| {
                let (promise, body) = deferred::pending();
                self.send(Command::Body(promise));
                self.resume();
                body
            })
            .clone()
    }

    /// Completes when the stream ends, fails when it fails.
    ///
    /// Works without any chunk handler: chunks are then discarded, and a
    /// paused stream is resumed since nothing else could ever fetch.
    pub fn end(&self) -> Deferred<()> {
        self.send(Command::AwaitEnd);
        self.inner.end.clone()
    }

    /// Call `handler` with the whole body once it has been received.
    /// Failures are not reported to it.
    pub fn body_handler<F>(&self, handler: F) -> &Self
    where
        F: FnOnce(Bytes) + Send + 'static,
    {
        self.on_body(move |result| {
            if let Ok(body) = result {
                handler(body);
            }
        })
    }

    /// Call `listener` with the outcome of [`body`](Self::body).
    pub fn on_body<F>(&self, listener: F) -> &Self
    where
        F: FnOnce(ResponseResult<Bytes>) + Send + 'static,
    {
        let _ = self.body();
        self.send(Command::BodyListener(Box::new(listener)));
        self
    }

    /// Call `listener` with the outcome of [`end`](Self::end).
    pub fn on_end<F>(&self, listener: F) -> &Self
    where
        F: FnOnce(ResponseResult<()>) + Send + 'static,
    {
        self.send(Command::EndListener(Box::new(listener)));
        self
    }

    /// Set the extension frame callback, replacing any previous one.
    pub fn custom_frame_handler<F>(&self, handler: F) -> &Self
    where
        F: FnMut(HttpFrame) + Send + 'static,
    {
        self.send(Command::FrameHandler(Box::new(handler)));
        self
    }

    /// Set the stream priority callback, replacing any previous one. Never
    /// called on HTTP/1.x.
    pub fn stream_priority_handler<F>(&self, handler: F) -> &Self
    where
        F: FnMut(StreamPriority) + Send + 'static,
    {
        self.send(Command::PriorityHandler(Box::new(handler)));
        self
    }

    fn send(&self, command: Command) {
        if let Err(err) = self.inner.commands.send(command) {
            trace!(command = ?err.0, "delivery context gone");
        }
    }
}

impl ReadStream for HttpClientResponse {
    type Item = Bytes;

    fn handler<F>(&self, handler: F) -> &Self
    where
        F: FnMut(Self::Item) + Send + 'static,
    {
        self.send(Command::Handler(Box::new(handler)));
        self
    }

    fn exception_handler<F>(&self, handler: F) -> &Self
    where
        F: FnOnce(ResponseError) + Send + 'static,
    {
        self.send(Command::ExceptionHandler(Box::new(handler)));
        self
    }

    fn end_handler<F>(&self, handler: F) -> &Self
    where
        F: FnOnce() + Send + 'static,
    {
        self.send(Command::EndHandler(Box::new(handler)));
        self
    }

    fn pause(&self) -> &Self {
        let flow = &self.inner.shared.flow;
        if flow.in_delivery() {
            flow.pause();
            self.send(Command::Wake);
        } else {
            self.send(Command::Pause);
        }
        self
    }

    fn fetch(&self, amount: i64) -> ResponseResult<&Self> {
        let amount = FlowControl::validate(amount)?;
        let flow = &self.inner.shared.flow;
        if flow.in_delivery() {
            let demand = flow.add(amount);
            trace!(amount, ?demand, "demand added");
            self.send(Command::Wake);
        } else {
            self.send(Command::Fetch(amount));
        }
        Ok(self)
    }
}

impl fmt::Debug for HttpClientResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpClientResponse")
            .field("status", &self.inner.status)
            .field("version", &self.inner.version)
            .field("state", &self.state())
            .field("demand", &self.demand())
            .finish()
    }
}
