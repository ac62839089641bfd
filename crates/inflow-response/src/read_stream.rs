use crate::demand::UNBOUNDED;
use crate::error::{ResponseError, ResponseResult};

/// A demand-driven stream of items with callback delivery.
///
/// Registration methods take `&self` and return the same handle so calls
/// can be chained. Items are only delivered while there is demand; the
/// stream starts with unbounded demand.
pub trait ReadStream {
    type Item;

    /// Set the item callback. Replaces any previous callback; the new one
    /// sees only items delivered after it was installed.
    fn handler<F>(&self, handler: F) -> &Self
    where
        F: FnMut(Self::Item) + Send + 'static;

    /// Set the failure callback. Called at most once.
    fn exception_handler<F>(&self, handler: F) -> &Self
    where
        F: FnOnce(ResponseError) + Send + 'static;

    /// Set the callback for successful end of stream. Called at most once,
    /// never after a failure.
    fn end_handler<F>(&self, handler: F) -> &Self
    where
        F: FnOnce() + Send + 'static;

    /// Stop delivery. Items that arrive meanwhile are buffered.
    ///
    /// Applied after every registration made before it on the same handle.
    fn pause(&self) -> &Self;

    /// Allow `amount` more items to be delivered.
    ///
    /// Fails with [`ResponseError::InvalidDemand`] when `amount <= 0`,
    /// leaving the stream untouched.
    fn fetch(&self, amount: i64) -> ResponseResult<&Self>;

    /// Deliver without limit.
    fn resume(&self) -> &Self {
        self.fetch(UNBOUNDED).unwrap_or(self)
    }
}
