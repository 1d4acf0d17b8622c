use crate::error::Result;
use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use std::collections::HashMap;
use std::future::Future;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use uuid::Uuid;

/// Token returned by [`Dispatcher::subscribe`], used to unsubscribe
pub type HandlerId = Uuid;

type SyncHandler<T> = Arc<dyn Fn(&T) -> Result<()> + Send + Sync>;
type AsyncHandler<T> = Arc<dyn Fn(T) -> BoxFuture<'static, Result<()>> + Send + Sync>;

enum Handler<T> {
    Sync(SyncHandler<T>),
    Async(AsyncHandler<T>),
}

impl<T> Clone for Handler<T> {
    fn clone(&self) -> Self {
        match self {
            Handler::Sync(f) => Handler::Sync(f.clone()),
            Handler::Async(f) => Handler::Async(f.clone()),
        }
    }
}

struct Registration<T> {
    id: HandlerId,
    handler: Handler<T>,
}

/// Signal-name keyed publish/subscribe registry
///
/// Handlers run in subscription order. Synchronous handlers are called
/// inline by [`Dispatcher::publish`]; asynchronous handlers are spawned on the
/// current tokio runtime before `publish` returns, but not awaited. A failing
/// or panicking handler is logged and never affects the others or the
/// publisher.
///
/// Cloning a `Dispatcher` yields another handle to the same registry.
pub struct Dispatcher<T> {
    signals: Arc<Mutex<HashMap<String, Vec<Registration<T>>>>>,
}

impl<T> Clone for Dispatcher<T> {
    fn clone(&self) -> Self {
        Self {
            signals: self.signals.clone(),
        }
    }
}

impl<T: Clone + Send + Sync + 'static> Default for Dispatcher<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Clone + Send + Sync + 'static> Dispatcher<T> {
    pub fn new() -> Self {
        Self {
            signals: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    fn signals(&self) -> MutexGuard<'_, HashMap<String, Vec<Registration<T>>>> {
        self.signals.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn register(&self, signal: String, handler: Handler<T>) -> HandlerId {
        let id = Uuid::new_v4();
        self.signals()
            .entry(signal)
            .or_default()
            .push(Registration { id, handler });
        id
    }

    /// Subscribe a handler that runs inline during `publish`
    pub fn subscribe<F>(&self, signal: impl Into<String>, handler: F) -> HandlerId
    where
        F: Fn(&T) -> Result<()> + Send + Sync + 'static,
    {
        self.register(signal.into(), Handler::Sync(Arc::new(handler)))
    }

    /// Subscribe a handler whose future is spawned by `publish`
    pub fn subscribe_async<F, Fut>(&self, signal: impl Into<String>, handler: F) -> HandlerId
    where
        F: Fn(T) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        let handler: AsyncHandler<T> = Arc::new(move |args| handler(args).boxed());
        self.register(signal.into(), Handler::Async(handler))
    }

    /// Remove a handler; returns false if it was not subscribed
    pub fn unsubscribe(&self, id: HandlerId) -> bool {
        let mut signals = self.signals();
        let mut removed = false;
        signals.retain(|_, registrations| {
            let before = registrations.len();
            registrations.retain(|r| r.id != id);
            removed |= registrations.len() != before;
            !registrations.is_empty()
        });
        removed
    }

    /// Remove every handler of `signal`
    pub fn unsubscribe_all(&self, signal: &str) {
        self.signals().remove(signal);
    }

    /// Number of handlers currently subscribed to `signal`
    pub fn handler_count(&self, signal: &str) -> usize {
        self.signals().get(signal).map_or(0, Vec::len)
    }

    fn is_subscribed(&self, signal: &str, id: HandlerId) -> bool {
        self.signals()
            .get(signal)
            .is_some_and(|registrations| registrations.iter().any(|r| r.id == id))
    }

    /// Deliver `args` to every handler of `signal`
    ///
    /// Returns how many handlers were invoked or scheduled. Handlers added
    /// during delivery see the next publication; handlers removed during
    /// delivery are skipped if not yet reached.
    pub fn publish(&self, signal: &str, args: T) -> usize {
        let snapshot: Vec<(HandlerId, Handler<T>)> = match self.signals().get(signal) {
            Some(registrations) => registrations
                .iter()
                .map(|r| (r.id, r.handler.clone()))
                .collect(),
            None => return 0,
        };

        let mut delivered = 0;
        for (id, handler) in snapshot {
            if !self.is_subscribed(signal, id) {
                continue;
            }

            match handler {
                Handler::Sync(f) => {
                    match catch_unwind(AssertUnwindSafe(|| f(&args))) {
                        Ok(Ok(())) => {}
                        Ok(Err(e)) => {
                            tracing::error!("Handler for '{}' failed: {}", signal, e);
                        }
                        Err(_) => {
                            tracing::error!("Handler for '{}' panicked", signal);
                        }
                    }
                }
                Handler::Async(f) => {
                    let runtime = match tokio::runtime::Handle::try_current() {
                        Ok(runtime) => runtime,
                        Err(_) => {
                            tracing::error!(
                                "No runtime to schedule async handler for '{}'",
                                signal
                            );
                            continue;
                        }
                    };
                    let future = match catch_unwind(AssertUnwindSafe(|| f(args.clone()))) {
                        Ok(future) => future,
                        Err(_) => {
                            tracing::error!("Handler for '{}' panicked", signal);
                            continue;
                        }
                    };
                    let signal = signal.to_string();
                    runtime.spawn(async move {
                        if let Err(e) = future.await {
                            tracing::error!("Async handler for '{}' failed: {}", signal, e);
                        }
                    });
                }
            }
            delivered += 1;
        }
        delivered
    }
}
