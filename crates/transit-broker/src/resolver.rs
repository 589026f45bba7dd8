//! Single-use completion sinks.
//!
//! A [`PendingResolver`] holds exactly one callback. `resolve` consumes the
//! resolver, so it cannot be fired twice; dropping an unfired resolver fires
//! it with a `GenericFailure` so a request can never hang.

use std::fmt;

use tokio::sync::oneshot;
use tracing::warn;

use crate::error::{BrokerError, BrokerResult};

type Callback<T> = Box<dyn FnOnce(BrokerResult<T>) + Send>;

/// Receiving half of a channel-backed resolver.
pub type ResolverReceiver<T> = oneshot::Receiver<BrokerResult<T>>;

/// One-shot result sink for a single asynchronous request.
pub struct PendingResolver<T> {
    label: &'static str,
    callback: Option<Callback<T>>,
}

impl<T: Send + 'static> PendingResolver<T> {
    /// Wrap a callback. `label` names the request in logs.
    pub fn new<F>(label: &'static str, callback: F) -> Self
    where
        F: FnOnce(BrokerResult<T>) + Send + 'static,
    {
        Self {
            label,
            callback: Some(Box::new(callback)),
        }
    }

    /// Resolver backed by a oneshot channel.
    pub fn channel(label: &'static str) -> (Self, ResolverReceiver<T>) {
        let (tx, rx) = oneshot::channel();
        let resolver = Self::new(label, move |result| {
            // Receiver gone means the caller stopped waiting.
            let _ = tx.send(result);
        });
        (resolver, rx)
    }
}

impl<T> PendingResolver<T> {
    /// Fire the callback with `result`.
    pub fn resolve(mut self, result: BrokerResult<T>) {
        if let Some(callback) = self.callback.take() {
            callback(result);
        }
    }

    pub fn succeed(self, value: T) {
        self.resolve(Ok(value));
    }

    pub fn fail(self, error: BrokerError) {
        self.resolve(Err(error));
    }
}

impl<T> Drop for PendingResolver<T> {
    fn drop(&mut self) {
        if let Some(callback) = self.callback.take() {
            warn!(request = self.label, "Resolver dropped without a result");
            callback(Err(BrokerError::GenericFailure(format!(
                "{} request abandoned",
                self.label
            ))));
        }
    }
}

impl<T> fmt::Debug for PendingResolver<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingResolver")
            .field("label", &self.label)
            .field("pending", &self.callback.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counting<T: Send + 'static>() -> (PendingResolver<T>, Arc<AtomicUsize>) {
        let fired = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&fired);
        let resolver = PendingResolver::new("test", move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        (resolver, fired)
    }

    #[tokio::test]
    async fn channel_resolver_delivers_value() {
        let (resolver, rx) = PendingResolver::channel("create");
        resolver.succeed(7_u32);
        assert_eq!(rx.await.unwrap(), Ok(7));
    }

    #[test]
    fn resolve_fires_exactly_once() {
        let (resolver, fired) = counting::<()>();
        resolver.fail(BrokerError::InvalidState("closed".into()));
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn dropped_resolver_reports_abandonment() {
        let (resolver, rx) = PendingResolver::<()>::channel("datagram");
        drop(resolver);
        let err = rx.await.unwrap().unwrap_err();
        assert_eq!(
            err,
            BrokerError::GenericFailure("datagram request abandoned".into())
        );
    }

    #[test]
    fn dropped_after_resolve_does_not_fire_again() {
        let (resolver, fired) = counting::<u8>();
        resolver.succeed(1);
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn resolving_with_dropped_receiver_is_harmless() {
        let (resolver, rx) = PendingResolver::<u8>::channel("stream");
        drop(rx);
        resolver.succeed(3);
    }
}
