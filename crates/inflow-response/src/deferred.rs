//! One-shot results that settle once and can be awaited many times.
//!
//! A [`Promise`] is owned by the delivery context; any number of
//! [`Deferred`] handles observe it. Listeners registered on the promise run
//! on the delivery context when it settles.

use std::fmt;
use std::future::{Future, IntoFuture};
use std::pin::Pin;

use tokio::sync::watch;

use crate::error::{ResponseError, ResponseResult};

type Slot<T> = Option<ResponseResult<T>>;

/// Callback invoked with the settled result of a [`Promise`].
pub type Listener<T> = Box<dyn FnOnce(ResponseResult<T>) + Send>;

/// Create an unsettled promise and a deferred observing it.
pub(crate) fn pending<T>() -> (Promise<T>, Deferred<T>) {
    let (tx, rx) = watch::channel(None);
    (
        Promise {
            tx,
            listeners: Vec::new(),
        },
        Deferred { rx },
    )
}

/// The settling side of a [`Deferred`].
pub(crate) struct Promise<T> {
    tx: watch::Sender<Slot<T>>,
    listeners: Vec<Listener<T>>,
}

impl<T: Clone> Promise<T> {
    /// Settle with `result`. Only the first call has any effect.
    pub(crate) fn settle(&mut self, result: ResponseResult<T>) -> bool {
        let settled = self.tx.send_if_modified(|slot| {
            if slot.is_some() {
                return false;
            }
            *slot = Some(result);
            true
        });
        if let (true, Some(result)) = (settled, self.result()) {
            for listener in self.listeners.drain(..) {
                listener(result.clone());
            }
        }
        settled
    }

    /// Run `listener` once settled, immediately if already settled.
    pub(crate) fn on_settled(&mut self, listener: Listener<T>) {
        match self.result() {
            Some(result) => listener(result),
            None => self.listeners.push(listener),
        }
    }

    pub(crate) fn is_settled(&self) -> bool {
        self.tx.borrow().is_some()
    }

    fn result(&self) -> Slot<T> {
        self.tx.borrow().clone()
    }
}

impl<T> fmt::Debug for Promise<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Promise")
            .field("settled", &self.tx.borrow().is_some())
            .field("listeners", &self.listeners.len())
            .finish()
    }
}

/// A result that settles exactly once.
///
/// Cloning is cheap and every clone observes the same outcome. Awaiting a
/// settled deferred again returns the same value without redoing any work.
/// If the delivery context goes away before settling, the result is
/// [`ResponseError::Closed`].
#[derive(Clone)]
pub struct Deferred<T> {
    rx: watch::Receiver<Slot<T>>,
}

impl<T: Clone> Deferred<T> {
    /// Wait for the outcome.
    pub async fn wait(&self) -> ResponseResult<T> {
        let mut rx = self.rx.clone();
        let slot = rx
            .wait_for(Option::is_some)
            .await
            .map(|slot| Option::clone(&slot));
        match slot {
            Ok(Some(result)) => result,
            _ => Err(ResponseError::Closed),
        }
    }

    /// The outcome, if already settled.
    pub fn try_get(&self) -> Option<ResponseResult<T>> {
        self.rx.borrow().clone()
    }

    pub fn is_settled(&self) -> bool {
        self.rx.borrow().is_some()
    }
}

impl<T> fmt::Debug for Deferred<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Deferred")
            .field("settled", &self.rx.borrow().is_some())
            .finish()
    }
}

impl<T> IntoFuture for Deferred<T>
where
    T: Clone + Send + Sync + 'static,
{
    type Output = ResponseResult<T>;
    type IntoFuture = Pin<Box<dyn Future<Output = ResponseResult<T>> + Send>>;

    fn into_future(self) -> Self::IntoFuture {
        Box::pin(async move { self.wait().await })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use super::*;
    use crate::error::TransportError;

    #[tokio::test]
    async fn settles_once() {
        let (mut promise, deferred) = pending::<u32>();
        assert!(!deferred.is_settled());

        assert!(promise.settle(Ok(1)));
        assert!(!promise.settle(Ok(2)));
        assert!(!promise.settle(Err(ResponseError::Closed)));

        assert_eq!(deferred.wait().await.unwrap(), 1);
        assert_eq!(deferred.clone().await.unwrap(), 1);
        assert_eq!(deferred.try_get().unwrap().unwrap(), 1);
    }

    #[tokio::test]
    async fn waiters_wake_on_settle() {
        let (mut promise, deferred) = pending::<&'static str>();
        let waiter = tokio::spawn(deferred.clone().into_future());

        tokio::task::yield_now().await;
        promise.settle(Ok("done"));

        assert_eq!(waiter.await.unwrap().unwrap(), "done");
    }

    #[tokio::test]
    async fn dropped_promise_yields_closed() {
        let (promise, deferred) = pending::<()>();
        drop(promise);
        assert!(matches!(deferred.wait().await, Err(ResponseError::Closed)));
    }

    #[tokio::test]
    async fn settled_value_survives_promise_drop() {
        let (mut promise, deferred) = pending::<u8>();
        promise.settle(Ok(7));
        drop(promise);
        assert_eq!(deferred.wait().await.unwrap(), 7);
    }

    #[test]
    fn listeners_run_on_settle_and_late() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let (mut promise, _deferred) = pending::<u8>();

        let early = seen.clone();
        promise.on_settled(Box::new(move |r| early.lock().unwrap().push(("early", r.is_ok()))));
        assert!(seen.lock().unwrap().is_empty());

        promise.settle(Err(TransportError::Timeout.into()));
        assert!(promise.is_settled());

        let late = seen.clone();
        promise.on_settled(Box::new(move |r| late.lock().unwrap().push(("late", r.is_ok()))));

        assert_eq!(*seen.lock().unwrap(), vec![("early", false), ("late", false)]);
    }
}
