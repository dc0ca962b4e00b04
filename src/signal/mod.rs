//! Multicast notification channels.
//!
//! A [`Signal`] is a named publish point. Subscribers attach in one of two ways:
//!
//! - **Direct**: [`Signal::connect`] registers a slot that runs synchronously on
//!   whichever thread calls [`Signal::emit`], in connection order.
//! - **Queued**: [`Signal::subscribe`] returns a [`Receiver`] that gets a clone of
//!   every emission, in order. The receiving side decides which thread drains it,
//!   which is how a UI event loop keeps widget updates on its own thread.
//!
//! [`SignalHub`] bundles the four lifecycle signals of a background worker.

mod hub;

pub use hub::{Event, EventQueue, SignalHub};

use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::mpsc;
use tracing::error;

use crate::task::panic_message;

/// Handle returned by [`Signal::connect`], used to disconnect the slot later.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SlotId(u64);

/// Receiving end of a queued subscription.
pub type Receiver<A> = mpsc::UnboundedReceiver<A>;

type Slot<A> = Arc<dyn Fn(&A) + Send + Sync + 'static>;

struct Inner<A> {
    slots: Vec<(SlotId, Slot<A>)>,
    queues: Vec<mpsc::UnboundedSender<A>>,
}

/// A multicast publish point carrying payloads of type `A`.
pub struct Signal<A> {
    name: &'static str,
    next_id: AtomicU64,
    inner: Mutex<Inner<A>>,
}

impl<A> Signal<A>
where
    A: Clone + Send + 'static,
{
    /// Creates a signal with no subscribers.
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            next_id: AtomicU64::new(0),
            inner: Mutex::new(Inner {
                slots: Vec::new(),
                queues: Vec::new(),
            }),
        }
    }

    /// The name given at construction, used in log records.
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Registers a slot invoked on the emitting thread for every emission.
    ///
    /// Slots run in the order they were connected. Several slots may be
    /// connected to the same signal.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use std::sync::Arc;
    /// use std::sync::atomic::{AtomicUsize, Ordering};
    /// use relay::signal::Signal;
    ///
    /// let signal = Signal::<u32>::new("progress");
    /// let seen = Arc::new(AtomicUsize::new(0));
    /// let counter = Arc::clone(&seen);
    /// signal.connect(move |value| {
    ///     counter.fetch_add(*value as usize, Ordering::SeqCst);
    /// });
    /// signal.emit(3);
    /// assert_eq!(seen.load(Ordering::SeqCst), 3);
    /// ```
    pub fn connect<F>(&self, slot: F) -> SlotId
    where
        F: Fn(&A) + Send + Sync + 'static,
    {
        let id = SlotId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.lock().slots.push((id, Arc::new(slot)));
        id
    }

    /// Removes a previously connected slot. Returns `false` if it was already gone.
    pub fn disconnect(&self, id: SlotId) -> bool {
        let mut inner = self.lock();
        let before = inner.slots.len();
        inner.slots.retain(|(slot_id, _)| *slot_id != id);
        inner.slots.len() != before
    }

    /// Opens a queued subscription that receives a clone of every later emission.
    ///
    /// Dropping the returned receiver unsubscribes it; the sender side is pruned
    /// on the next emission.
    pub fn subscribe(&self) -> Receiver<A> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.lock().queues.push(tx);
        rx
    }

    /// Number of direct slots plus live queued subscribers.
    pub fn receiver_count(&self) -> usize {
        let inner = self.lock();
        inner.slots.len() + inner.queues.iter().filter(|tx| !tx.is_closed()).count()
    }

    /// Delivers `value` to every subscriber.
    ///
    /// Queued subscribers are fed first, then direct slots run on the calling
    /// thread. The lock is released before any slot runs, so a slot may connect
    /// or disconnect on this same signal.
    ///
    /// A slot that panics is logged and skipped; the remaining slots still run
    /// and the panic does not reach the caller.
    pub fn emit(&self, value: A) {
        let slots: Vec<Slot<A>> = {
            let mut inner = self.lock();
            inner.queues.retain(|tx| tx.send(value.clone()).is_ok());
            inner.slots.iter().map(|(_, slot)| Arc::clone(slot)).collect()
        };

        tracing::trace!(signal = self.name, slots = slots.len(), "emit");

        for slot in slots {
            if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| slot(&value))) {
                error!(
                    signal = self.name,
                    panic = %panic_message(payload.as_ref()),
                    "slot panicked"
                );
            }
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner<A>> {
        // Slots run outside the lock, so a poisoned guard still holds consistent state.
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl<A> fmt::Debug for Signal<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Signal").field("name", &self.name).finish_non_exhaustive()
    }
}
