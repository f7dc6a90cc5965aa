//! Single-slot request/response correlation
//!
//! The wire protocol carries no request ids, so at most one request of a
//! given kind may be outstanding. Installing a new request resolves the
//! previous one as failed instead of queueing behind it.

use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio::sync::oneshot;

struct Slot<T> {
    generation: u64,
    tx: oneshot::Sender<Option<T>>,
}

/// Handle for one outstanding request
pub struct PendingTicket<T> {
    generation: u64,
    rx: oneshot::Receiver<Option<T>>,
}

impl<T> PendingTicket<T> {
    /// Wait for the response. `None` means failed, superseded or dropped.
    pub async fn wait(self) -> Option<T> {
        self.rx.await.ok().flatten()
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }
}

/// At-most-one-outstanding request slot
pub struct PendingRequest<T> {
    inner: Mutex<(u64, Option<Slot<T>>)>,
}

impl<T> Default for PendingRequest<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> PendingRequest<T> {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new((0, None)),
        }
    }

    fn lock(&self) -> MutexGuard<'_, (u64, Option<Slot<T>>)> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Install a new request, failing any request still outstanding
    pub fn begin(&self) -> PendingTicket<T> {
        let (tx, rx) = oneshot::channel();
        let mut guard = self.lock();
        let (counter, slot) = &mut *guard;

        if let Some(previous) = slot.take() {
            let _ = previous.tx.send(None);
        }

        *counter += 1;
        *slot = Some(Slot {
            generation: *counter,
            tx,
        });

        PendingTicket {
            generation: *counter,
            rx,
        }
    }

    /// Resolve the outstanding request. Returns false if nothing was waiting.
    pub fn resolve(&self, value: Option<T>) -> bool {
        match self.lock().1.take() {
            Some(slot) => slot.tx.send(value).is_ok(),
            None => false,
        }
    }

    /// Drop the slot if it still belongs to `generation`.
    ///
    /// A late reply after this is silently ignored.
    pub fn abandon(&self, generation: u64) {
        let mut guard = self.lock();
        if guard.1.as_ref().is_some_and(|s| s.generation == generation) {
            guard.1 = None;
        }
    }

    /// Fail whatever is outstanding
    pub fn cancel(&self) {
        self.resolve(None);
    }

    pub fn is_pending(&self) -> bool {
        self.lock().1.is_some()
    }
}
