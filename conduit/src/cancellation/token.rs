//! Cancellation token for cooperative cancellation.

use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;
use tracing::warn;

/// A callback type for cancellation notifications.
pub type CancelCallback = Box<dyn FnOnce() + Send>;

struct Inner {
    /// Whether cancellation has been requested.
    cancelled: AtomicBool,
    /// Inert tokens ignore `cancel` and never fire.
    inert: bool,
    /// The reason for cancellation (first one wins).
    reason: RwLock<Option<String>>,
    /// Callbacks still waiting for cancellation.
    callbacks: Mutex<Vec<CancelCallback>>,
    /// Wakes every suspended `cancelled()` future.
    notify: Notify,
}

/// A broadcastable, one-shot stop signal.
///
/// Clones share the same underlying state, so a token can be handed to any
/// number of tasks. Cancellation is monotonic and idempotent: only the first
/// `cancel` takes effect, and every listener is notified exactly once.
#[derive(Clone)]
pub struct CancellationToken {
    inner: Arc<Inner>,
}

impl CancellationToken {
    /// Creates a new, active cancellation token.
    #[must_use]
    pub fn new() -> Self {
        Self::with_inert(false)
    }

    /// Creates a token that never fires.
    ///
    /// Calling [`cancel`](Self::cancel) on it has no effect.
    #[must_use]
    pub fn never() -> Self {
        Self::with_inert(true)
    }

    fn with_inert(inert: bool) -> Self {
        Self {
            inner: Arc::new(Inner {
                cancelled: AtomicBool::new(false),
                inert,
                reason: RwLock::new(None),
                callbacks: Mutex::new(Vec::new()),
                notify: Notify::new(),
            }),
        }
    }

    /// Requests cancellation with a reason.
    ///
    /// Returns `true` if this call fired the token, `false` if it was already
    /// cancelled or is inert. Callbacks run on the calling thread; a panicking
    /// callback is logged and suppressed.
    pub fn cancel(&self, reason: impl Into<String>) -> bool {
        if self.inner.inert {
            return false;
        }

        {
            let mut slot = self.inner.reason.write();
            if self.inner.cancelled.load(Ordering::SeqCst) {
                return false;
            }
            *slot = Some(reason.into());
            self.inner.cancelled.store(true, Ordering::SeqCst);
        }

        self.inner.notify.notify_waiters();

        let callbacks = std::mem::take(&mut *self.inner.callbacks.lock());
        for callback in callbacks {
            run_callback(callback);
        }
        true
    }

    /// Registers a callback to be invoked on cancellation.
    ///
    /// If already cancelled, the callback is invoked immediately. Callbacks
    /// registered on an inert token are dropped without running.
    pub fn on_cancel<F>(&self, callback: F)
    where
        F: FnOnce() + Send + 'static,
    {
        if self.inner.inert {
            return;
        }

        let mut callbacks = self.inner.callbacks.lock();
        if self.is_cancelled() {
            drop(callbacks);
            run_callback(Box::new(callback));
        } else {
            callbacks.push(Box::new(callback));
        }
    }

    /// Waits until the token fires.
    ///
    /// Resolves immediately if the token is already cancelled and never
    /// resolves for an inert token.
    pub async fn cancelled(&self) {
        if self.inner.inert {
            return std::future::pending().await;
        }

        let notified = self.inner.notify.notified();
        tokio::pin!(notified);
        // Register before checking the flag so a concurrent `cancel` cannot
        // slip between the check and the wait.
        notified.as_mut().enable();
        if self.is_cancelled() {
            return;
        }
        notified.await;
    }

    /// Returns whether cancellation has been requested.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
    }

    /// Returns whether this token can never fire.
    #[must_use]
    pub fn is_inert(&self) -> bool {
        self.inner.inert
    }

    /// Returns the cancellation reason, if any.
    #[must_use]
    pub fn reason(&self) -> Option<String> {
        self.inner.reason.read().clone()
    }

    /// Returns true if both handles refer to the same token.
    #[must_use]
    pub fn same_as(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Default for CancellationToken {
    fn default() -> Self {
        Self::new()
    }
}

fn run_callback(callback: CancelCallback) {
    if let Err(e) = std::panic::catch_unwind(std::panic::AssertUnwindSafe(callback)) {
        warn!("Cancellation callback panicked: {:?}", e);
    }
}

impl std::fmt::Debug for CancellationToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CancellationToken")
            .field("cancelled", &self.is_cancelled())
            .field("inert", &self.is_inert())
            .field("reason", &self.reason())
            .finish()
    }
}
