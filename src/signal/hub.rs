use std::sync::{Mutex, MutexGuard};

use serde::Serialize;
use tokio::sync::mpsc::{self, error::TryRecvError};

use super::Signal;

/// One lifecycle notification, as seen by a queued subscriber.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", content = "payload", rename_all = "snake_case")]
pub enum Event<T> {
    Started,
    Finished(T),
    Error(String),
    Restore,
}

impl<T> Event<T> {
    /// `true` for [`Event::Restore`], the last event of every run.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Event::Restore)
    }
}

/// The four notification channels of a background worker.
///
/// A hub is shared through an `Arc`: the worker keeps one reference to emit, the
/// submitting component keeps another to observe. The worker is consumed when it
/// runs, so the hub outlives it as long as the subscriber holds on to it.
///
/// Per run the hub emits `started`, then exactly one of `finished` or `error`,
/// then `restore`.
pub struct SignalHub<T> {
    pub started: Signal<()>,
    pub finished: Signal<T>,
    pub error: Signal<String>,
    pub restore: Signal<()>,
    queues: Mutex<Vec<mpsc::UnboundedSender<Event<T>>>>,
}

impl<T> SignalHub<T>
where
    T: Clone + Send + 'static,
{
    pub fn new() -> Self {
        Self {
            started: Signal::new("started"),
            finished: Signal::new("finished"),
            error: Signal::new("error"),
            restore: Signal::new("restore"),
            queues: Mutex::new(Vec::new()),
        }
    }

    /// Opens an ordered queue of every event this hub emits from now on.
    ///
    /// Unlike subscribing to the individual signals, a single queue preserves the
    /// relative order of events across all four channels.
    pub fn subscribe(&self) -> EventQueue<T> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.lock_queues().push(tx);
        EventQueue { rx }
    }

    pub(crate) fn emit_started(&self) {
        self.enqueue(|| Event::Started);
        self.started.emit(());
    }

    pub(crate) fn emit_finished(&self, value: T) {
        self.enqueue(|| Event::Finished(value.clone()));
        self.finished.emit(value);
    }

    pub(crate) fn emit_error(&self, message: String) {
        self.enqueue(|| Event::Error(message.clone()));
        self.error.emit(message);
    }

    pub(crate) fn emit_restore(&self) {
        self.enqueue(|| Event::Restore);
        self.restore.emit(());
    }

    fn enqueue(&self, event: impl Fn() -> Event<T>) {
        self.lock_queues().retain(|tx| tx.send(event()).is_ok());
    }

    fn lock_queues(&self) -> MutexGuard<'_, Vec<mpsc::UnboundedSender<Event<T>>>> {
        self.queues.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl<T> Default for SignalHub<T>
where
    T: Clone + Send + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

/// Ordered stream of [`Event`]s from one [`SignalHub`].
///
/// Drain it on the thread that owns UI state: `recv().await` inside an async
/// event loop, `try_recv()` from a frame/tick callback, or `blocking_recv()` from
/// a plain thread.
#[derive(Debug)]
pub struct EventQueue<T> {
    rx: mpsc::UnboundedReceiver<Event<T>>,
}

impl<T> EventQueue<T> {
    /// Waits for the next event. Returns `None` once the hub is gone and the
    /// queue is empty.
    pub async fn recv(&mut self) -> Option<Event<T>> {
        self.rx.recv().await
    }

    /// Returns the next event if one is already queued.
    pub fn try_recv(&mut self) -> Option<Event<T>> {
        match self.rx.try_recv() {
            Ok(event) => Some(event),
            Err(TryRecvError::Empty | TryRecvError::Disconnected) => None,
        }
    }

    /// Blocking variant of [`recv`](Self::recv). Must not be called from inside
    /// an async runtime.
    pub fn blocking_recv(&mut self) -> Option<Event<T>> {
        self.rx.blocking_recv()
    }

    /// Collects events until a run's [`Event::Restore`] arrives or the hub is dropped.
    pub async fn until_restore(&mut self) -> Vec<Event<T>> {
        let mut events = Vec::new();
        while let Some(event) = self.recv().await {
            let done = event.is_terminal();
            events.push(event);
            if done {
                break;
            }
        }
        events
    }
}
