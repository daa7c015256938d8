//! Single-assignment asynchronous result handles.
//!
//! An [`AsyncHandle`] represents a value (or failure) that becomes available
//! later. It transitions exactly once from *pending* to either *success* or
//! *failure*; all later completion attempts are ignored. Continuations
//! registered before completion fire once when it happens, those registered
//! afterwards fire immediately on the registering thread.
//!
//! A handle whose every [`Completer`] is dropped without completing it fails
//! with [`TaskError::Cancelled`], so tasks lost to a runtime shutdown never
//! leave waiters pending.

use std::fmt;
use std::future::{Future, IntoFuture};
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};

use parking_lot::Mutex;
use tokio::sync::oneshot;
use tracing::{debug, trace};

use crate::error::{Cause, TaskError, cause};

type Continuation<T> = Box<dyn FnOnce(&Result<T, Cause>) + Send>;

struct Shared<T> {
    outcome: OnceLock<Result<T, Cause>>,
    continuations: Mutex<Vec<Continuation<T>>>,
    completers: AtomicUsize,
}

impl<T> Shared<T> {
    fn new() -> Self {
        Self {
            outcome: OnceLock::new(),
            continuations: Mutex::new(Vec::new()),
            completers: AtomicUsize::new(1),
        }
    }

    fn complete(&self, outcome: Result<T, Cause>) -> bool {
        if self.outcome.set(outcome).is_err() {
            trace!("Discarding late completion of an already completed handle");
            return false;
        }
        let pending = std::mem::take(&mut *self.continuations.lock());
        if let Some(outcome) = self.outcome.get() {
            for continuation in pending {
                continuation(outcome);
            }
        }
        true
    }
}

/// Read side of a single-assignment result.
pub struct AsyncHandle<T> {
    shared: Arc<Shared<T>>,
}

/// Write side of an [`AsyncHandle`].
///
/// The first call to any completion method wins; later calls return `false`
/// and leave the outcome untouched. Dropping the last completer of a pending
/// handle fails it with [`TaskError::Cancelled`].
pub struct Completer<T> {
    shared: Arc<Shared<T>>,
}

impl<T> Clone for AsyncHandle<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T> Clone for Completer<T> {
    fn clone(&self) -> Self {
        self.shared.completers.fetch_add(1, Ordering::Relaxed);
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T> Drop for Completer<T> {
    fn drop(&mut self) {
        if self.shared.completers.fetch_sub(1, Ordering::AcqRel) != 1 {
            return;
        }
        if self.shared.outcome.get().is_none() && self.shared.complete(Err(cause(TaskError::Cancelled))) {
            debug!("Handle abandoned by its completer, failed as cancelled");
        }
    }
}

impl<T: Send + Sync + 'static> AsyncHandle<T> {
    /// Creates a pending handle together with its completer.
    pub fn pending() -> (Self, Completer<T>) {
        let shared = Arc::new(Shared::new());
        (
            Self {
                shared: Arc::clone(&shared),
            },
            Completer { shared },
        )
    }

    /// Creates a handle that is already successfully completed.
    pub fn completed(value: T) -> Self {
        let (handle, completer) = Self::pending();
        completer.succeed(value);
        handle
    }

    /// Creates a handle that has already failed.
    pub fn failed(cause: Cause) -> Self {
        let (handle, completer) = Self::pending();
        completer.fail(cause);
        handle
    }

    /// Returns `true` once the handle holds a value or a failure.
    pub fn is_done(&self) -> bool {
        self.shared.outcome.get().is_some()
    }

    /// Returns `true` if the handle completed successfully.
    pub fn is_success(&self) -> bool {
        matches!(self.shared.outcome.get(), Some(Ok(_)))
    }

    /// Returns `true` if the handle completed with a failure.
    pub fn is_failed(&self) -> bool {
        matches!(self.shared.outcome.get(), Some(Err(_)))
    }

    /// Returns the value if completed successfully, `None` otherwise.
    ///
    /// `None` is returned both while pending and after a failure; use
    /// [`is_done`](Self::is_done) or [`cause`](Self::cause) to tell them apart.
    pub fn get(&self) -> Option<&T> {
        match self.shared.outcome.get() {
            Some(Ok(value)) => Some(value),
            _ => None,
        }
    }

    /// Returns the failure cause, if any.
    pub fn cause(&self) -> Option<&Cause> {
        match self.shared.outcome.get() {
            Some(Err(cause)) => Some(cause),
            _ => None,
        }
    }

    /// Returns the outcome if completed.
    pub fn result(&self) -> Option<&Result<T, Cause>> {
        self.shared.outcome.get()
    }

    /// Returns the value if completed successfully, otherwise `default`.
    pub fn or_else(&self, default: T) -> T
    where
        T: Clone,
    {
        self.get().cloned().unwrap_or(default)
    }

    /// Invokes `consumer` immediately if the handle is done.
    ///
    /// Exactly one of the two arguments is `Some`. Returns `false` and does
    /// nothing while pending.
    pub fn if_done<F>(&self, consumer: F) -> bool
    where
        F: FnOnce(Option<&T>, Option<&Cause>),
    {
        match self.shared.outcome.get() {
            Some(Ok(value)) => {
                consumer(Some(value), None);
                true
            }
            Some(Err(cause)) => {
                consumer(None, Some(cause));
                true
            }
            None => false,
        }
    }

    /// Registers a continuation invoked exactly once with the outcome.
    pub fn when_complete<F>(&self, continuation: F)
    where
        F: FnOnce(&Result<T, Cause>) + Send + 'static,
    {
        {
            let mut pending = self.shared.continuations.lock();
            if self.shared.outcome.get().is_none() {
                pending.push(Box::new(continuation));
                return;
            }
        }
        if let Some(outcome) = self.shared.outcome.get() {
            continuation(outcome);
        }
    }

    /// Derives a handle whose value is `f` applied to this handle's value.
    ///
    /// Failures propagate unchanged.
    pub fn then_apply<U, F>(&self, f: F) -> AsyncHandle<U>
    where
        U: Send + Sync + 'static,
        F: FnOnce(&T) -> U + Send + 'static,
    {
        let (next, completer) = AsyncHandle::pending();
        self.when_complete(move |outcome| {
            match outcome {
                Ok(value) => completer.succeed(f(value)),
                Err(cause) => completer.fail(Arc::clone(cause)),
            };
        });
        next
    }

    /// Chains another asynchronous step after this handle succeeds.
    pub fn then_compose<U, F>(&self, f: F) -> AsyncHandle<U>
    where
        U: Clone + Send + Sync + 'static,
        F: FnOnce(&T) -> AsyncHandle<U> + Send + 'static,
    {
        let (next, completer) = AsyncHandle::pending();
        self.when_complete(move |outcome| match outcome {
            Ok(value) => f(value).when_complete(move |inner| {
                completer.complete(inner.clone());
            }),
            Err(cause) => {
                completer.fail(Arc::clone(cause));
            }
        });
        next
    }

    /// Waits for the outcome.
    pub async fn wait(&self) -> Result<T, Cause>
    where
        T: Clone,
    {
        if let Some(outcome) = self.shared.outcome.get() {
            return outcome.clone();
        }
        let (tx, rx) = oneshot::channel();
        self.when_complete(move |outcome| {
            let _ = tx.send(outcome.clone());
        });
        rx.await.unwrap_or_else(|_| Err(cause(TaskError::Cancelled)))
    }
}

impl<T: Send + Sync + 'static> Completer<T> {
    /// Completes the handle with `outcome`.
    ///
    /// Returns `false` if the handle was already completed, in which case the
    /// outcome is discarded.
    pub fn complete(&self, outcome: Result<T, Cause>) -> bool {
        self.shared.complete(outcome)
    }

    /// Completes the handle successfully.
    pub fn succeed(&self, value: T) -> bool {
        self.complete(Ok(value))
    }

    /// Completes the handle with a failure.
    pub fn fail(&self, cause: Cause) -> bool {
        self.complete(Err(cause))
    }

    /// Returns `true` if the handle is already completed.
    pub fn is_done(&self) -> bool {
        self.shared.outcome.get().is_some()
    }
}

impl<T> fmt::Debug for AsyncHandle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = match self.shared.outcome.get() {
            None => "pending",
            Some(Ok(_)) => "success",
            Some(Err(_)) => "failed",
        };
        f.debug_struct("AsyncHandle").field("state", &state).finish()
    }
}

impl<T> IntoFuture for AsyncHandle<T>
where
    T: Clone + Send + Sync + 'static,
{
    type Output = Result<T, Cause>;
    type IntoFuture = Pin<Box<dyn Future<Output = Result<T, Cause>> + Send>>;

    fn into_future(self) -> Self::IntoFuture {
        Box::pin(async move { self.wait().await })
    }
}
