//! Client-side HTTP response body consumption.
//!
//! A response body can be consumed in two ways that coexist on the same
//! response:
//!
//! - **Streaming**: register a chunk handler and control delivery with
//!   `pause` / `fetch` / `resume`. Chunks that arrive without demand are
//!   buffered, never dropped.
//! - **Aggregated**: [`HttpClientResponse::body`] returns a [`Deferred`]
//!   settled with the concatenated body. The aggregator observes the same
//!   chunks as the chunk handler; neither steals from the other.
//!
//! [`HttpClientResponse::end`] settles when the stream terminates, whether
//! or not the body was read.
//!
//! # Architecture
//!
//! The connection layer creates a response with [`HttpClientResponse::open`]
//! once the status line and headers are parsed, and pushes body chunks,
//! trailers, the terminal event, extension frames and priority changes into
//! the returned [`ResponseFeed`]. A delivery task per response applies those
//! events in order and runs all callbacks. Extension frames and priority
//! changes bypass demand entirely.
//!
//! When the buffer of undelivered chunks reaches
//! `ResponseConfig::max_buffered_chunks`, [`ResponseFeed::is_writable`]
//! turns `false` so the transport can stop reading.

mod aggregate;
mod deferred;
mod demand;
mod error;
mod feed;
mod notify;
mod read_stream;
mod request;
mod response;
mod stream;

pub use deferred::{Deferred, Listener};
pub use demand::{Demand, StreamState, UNBOUNDED};
pub use error::{ResponseError, ResponseResult, TransportError};
pub use feed::ResponseFeed;
pub use notify::{FrameHandler, PriorityHandler};
pub use read_stream::ReadStream;
pub use request::ClientRequest;
pub use response::{HttpClientResponse, ResponseHead};
pub use stream::{ChunkHandler, EndHandler, ExceptionHandler};

pub use inflow_core::{
    HeaderMap, HttpFrame, HttpVersion, InflowConfig, ResponseConfig, StreamPriority,
};
