//! Error types for response consumption.

use std::io;
use std::sync::Arc;

use thiserror::Error;

/// Result type alias for response operations.
pub type ResponseResult<T> = Result<T, ResponseError>;

/// Transport-level causes reported by the connection layer.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("connection reset by peer")]
    ConnectionReset,

    #[error("connection closed before the response completed")]
    ConnectionClosed,

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("timed out")]
    Timeout,

    #[error("io error: {0}")]
    Io(#[from] io::Error),
}

/// Errors surfaced to the consumer of a response.
///
/// Cloning shares the underlying transport cause, so one failure can settle
/// the exception handler, `body()` and `end()` with the same value.
#[derive(Debug, Clone, Error)]
pub enum ResponseError {
    /// `fetch` was called with a non-positive amount.
    #[error("invalid demand {0}: fetch amount must be positive")]
    InvalidDemand(i64),

    /// The body stream failed; terminal.
    #[error("stream failure: {0}")]
    StreamFailure(Arc<TransportError>),

    /// The body was requested after its chunks were handed out without
    /// being retained.
    #[error("response body unavailable: {0}")]
    BodyUnavailable(&'static str),

    /// The delivery context shut down before settling the result.
    #[error("response delivery context closed")]
    Closed,
}

impl ResponseError {
    /// The transport cause of a stream failure.
    pub fn cause(&self) -> Option<&Arc<TransportError>> {
        match self {
            ResponseError::StreamFailure(cause) => Some(cause),
            _ => None,
        }
    }
}

impl From<TransportError> for ResponseError {
    fn from(err: TransportError) -> Self {
        ResponseError::StreamFailure(Arc::new(err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clone_shares_cause() {
        let err = ResponseError::from(TransportError::ConnectionReset);
        let cloned = err.clone();

        let (a, b) = (err.cause().unwrap(), cloned.cause().unwrap());
        assert!(Arc::ptr_eq(a, b));
    }

    #[test]
    fn display() {
        assert_eq!(
            ResponseError::InvalidDemand(-5).to_string(),
            "invalid demand -5: fetch amount must be positive"
        );
        assert_eq!(
            ResponseError::from(TransportError::Protocol("bad frame".into())).to_string(),
            "stream failure: protocol error: bad frame"
        );
    }

    #[test]
    fn non_failures_have_no_cause() {
        assert!(ResponseError::Closed.cause().is_none());
        assert!(ResponseError::BodyUnavailable("gone").cause().is_none());
    }
}
