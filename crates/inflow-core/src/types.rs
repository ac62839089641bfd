//! Protocol-level value types shared between the transport and the response.

use std::fmt;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// HTTP protocol version of a response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum HttpVersion {
    #[serde(rename = "HTTP/1.0")]
    Http10,
    #[serde(rename = "HTTP/1.1")]
    Http11,
    #[serde(rename = "HTTP/2")]
    Http2,
}

impl HttpVersion {
    /// Whether streams are multiplexed over one connection (HTTP/2).
    ///
    /// Stream priority only exists on multiplexed transports.
    pub fn is_multiplexed(self) -> bool {
        matches!(self, HttpVersion::Http2)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            HttpVersion::Http10 => "HTTP/1.0",
            HttpVersion::Http11 => "HTTP/1.1",
            HttpVersion::Http2 => "HTTP/2",
        }
    }
}

impl fmt::Display for HttpVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A protocol extension frame received on the response stream.
///
/// Delivered outside the body byte stream and never subject to demand.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpFrame {
    /// Frame type code.
    pub kind: u8,
    /// Frame flags.
    pub flags: u8,
    /// Opaque frame payload.
    pub payload: Bytes,
}

impl HttpFrame {
    pub fn new(kind: u8, flags: u8, payload: impl Into<Bytes>) -> Self {
        Self {
            kind,
            flags,
            payload: payload.into(),
        }
    }
}

/// HTTP/2 stream priority.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamPriority {
    /// Relative weight, 1 to 256.
    pub weight: u16,
    /// Stream id of the parent stream, 0 for the root.
    pub dependency: u32,
    /// Whether this stream is the exclusive child of its parent.
    pub exclusive: bool,
}

impl StreamPriority {
    pub const DEFAULT_WEIGHT: u16 = 16;

    pub fn new(weight: u16, dependency: u32, exclusive: bool) -> Self {
        Self {
            weight,
            dependency,
            exclusive,
        }
    }
}

impl Default for StreamPriority {
    fn default() -> Self {
        Self::new(Self::DEFAULT_WEIGHT, 0, false)
    }
}

/// Canonical reason phrase for a status code, if the code is registered.
pub fn canonical_reason(status: u16) -> Option<&'static str> {
    let reason = match status {
        100 => "Continue",
        101 => "Switching Protocols",
        200 => "OK",
        201 => "Created",
        202 => "Accepted",
        203 => "Non-Authoritative Information",
        204 => "No Content",
        205 => "Reset Content",
        206 => "Partial Content",
        300 => "Multiple Choices",
        301 => "Moved Permanently",
        302 => "Found",
        303 => "See Other",
        304 => "Not Modified",
        307 => "Temporary Redirect",
        308 => "Permanent Redirect",
        400 => "Bad Request",
        401 => "Unauthorized",
        403 => "Forbidden",
        404 => "Not Found",
        405 => "Method Not Allowed",
        406 => "Not Acceptable",
        408 => "Request Timeout",
        409 => "Conflict",
        410 => "Gone",
        411 => "Length Required",
        412 => "Precondition Failed",
        413 => "Content Too Large",
        414 => "URI Too Long",
        415 => "Unsupported Media Type",
        416 => "Range Not Satisfiable",
        417 => "Expectation Failed",
        421 => "Misdirected Request",
        422 => "Unprocessable Content",
        425 => "Too Early",
        426 => "Upgrade Required",
        428 => "Precondition Required",
        429 => "Too Many Requests",
        431 => "Request Header Fields Too Large",
        500 => "Internal Server Error",
        501 => "Not Implemented",
        502 => "Bad Gateway",
        503 => "Service Unavailable",
        504 => "Gateway Timeout",
        505 => "HTTP Version Not Supported",
        _ => return None,
    };
    Some(reason)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_http2_is_multiplexed() {
        assert!(!HttpVersion::Http10.is_multiplexed());
        assert!(!HttpVersion::Http11.is_multiplexed());
        assert!(HttpVersion::Http2.is_multiplexed());
    }

    #[test]
    fn version_display() {
        assert_eq!(HttpVersion::Http11.to_string(), "HTTP/1.1");
        assert_eq!(HttpVersion::Http2.to_string(), "HTTP/2");
    }

    #[test]
    fn default_priority() {
        let priority = StreamPriority::default();
        assert_eq!(priority.weight, 16);
        assert_eq!(priority.dependency, 0);
        assert!(!priority.exclusive);
    }

    #[test]
    fn reason_phrases() {
        assert_eq!(canonical_reason(200), Some("OK"));
        assert_eq!(canonical_reason(404), Some("Not Found"));
        assert_eq!(canonical_reason(599), None);
    }
}
