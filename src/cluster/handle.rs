use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::OnceLock;
use tokio::sync::Notify;

/// Completion token for asynchronous operations.
///
/// Every `async_*` dispatch attaches itself to a handle before it is sent and
/// signals the handle when the remote handler has finished. [`Handle::wait`]
/// is a join barrier: it returns once every attached operation has completed.
/// Operations attached to the same handle have no ordering among themselves.
///
/// A handle is single-shot: once a wait has started, recording a new
/// attachment is a contract violation (detected in debug builds).
#[derive(Clone)]
pub struct Handle {
    inner: Arc<HandleInner>,
}

struct HandleInner {
    outstanding: AtomicUsize,
    waited: AtomicBool,
    notify: Notify,
}

impl Handle {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(HandleInner {
                outstanding: AtomicUsize::new(0),
                waited: AtomicBool::new(false),
                notify: Notify::new(),
            }),
        }
    }

    /// Number of attached operations that have not completed yet.
    pub fn outstanding(&self) -> usize {
        self.inner.outstanding.load(Ordering::Acquire)
    }

    /// Blocks until every operation attached to this handle has completed.
    pub async fn wait(&self) {
        self.inner.waited.store(true, Ordering::Release);
        loop {
            let notified = self.inner.notify.notified();
            if self.inner.outstanding.load(Ordering::Acquire) == 0 {
                return;
            }
            notified.await;
        }
    }

    pub(crate) fn attach(&self) {
        debug_assert!(
            !self.inner.waited.load(Ordering::Acquire),
            "operation attached to a handle that is already being waited on"
        );
        self.inner.outstanding.fetch_add(1, Ordering::AcqRel);
    }

    pub(crate) fn complete(&self) {
        if self.inner.outstanding.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.inner.notify.notify_waiters();
        }
    }
}

impl Default for Handle {
    fn default() -> Self {
        Self::new()
    }
}

/// Write-once return slot for asynchronous operations with a result.
///
/// The caller keeps one clone and passes another to the dispatch; the target
/// locality deposits the decoded return value before the completion handle is
/// signalled, so the slot is guaranteed to be filled after [`Handle::wait`].
pub struct ReturnSlot<T> {
    cell: Arc<OnceLock<T>>,
}

impl<T> ReturnSlot<T> {
    pub fn new() -> Self {
        Self {
            cell: Arc::new(OnceLock::new()),
        }
    }

    pub fn get(&self) -> Option<&T> {
        self.cell.get()
    }

    pub(crate) fn set(&self, value: T) {
        // Last writer loses; a slot is only ever the target of one dispatch.
        let _ = self.cell.set(value);
    }
}

impl<T> Clone for ReturnSlot<T> {
    fn clone(&self) -> Self {
        Self {
            cell: self.cell.clone(),
        }
    }
}

impl<T> Default for ReturnSlot<T> {
    fn default() -> Self {
        Self::new()
    }
}
