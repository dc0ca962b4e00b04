//! Worker pool that executes [`Worker`]s on Tokio's blocking thread pool.
//!
//! A pool either owns a dedicated multi-thread runtime built from a
//! [`PoolConfig`], or borrows the handle of a runtime the application already
//! runs. Each submitted worker runs exactly once on some blocking thread; no
//! ordering is guaranteed between submissions.

mod config;

pub use config::{DEFAULT_KEEP_ALIVE_MS, DEFAULT_MAX_BLOCKING_THREADS, PoolConfig};

use std::error::Error as StdError;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, OnceLock};
use std::time::Duration;

use thiserror::Error;
use tokio::runtime::{Builder, Handle, Runtime};
use tokio::sync::Notify;
use tokio::task::{JoinError, JoinHandle};
use tracing::{debug, info};

use crate::signal::SignalHub;
use crate::task::{Worker, WorkerId};

/// Errors produced by the pool.
#[derive(Debug, Error)]
pub enum PoolError {
    #[error("failed to build worker runtime: {0}")]
    Runtime(#[source] std::io::Error),

    #[error("invalid pool configuration: {0}")]
    Config(#[from] serde_json::Error),

    #[error("invalid pool configuration: {0}")]
    Invalid(&'static str),

    #[error("{id} did not complete: {source}")]
    Join {
        id: WorkerId,
        #[source]
        source: JoinError,
    },
}

// Submitted-but-unfinished workers, observable from blocking and async code.
#[derive(Default)]
struct Active {
    count: Mutex<usize>,
    done: Condvar,
    notify: Notify,
}

impl Active {
    fn lock(&self) -> MutexGuard<'_, usize> {
        self.count.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

// Counts a worker from submission until its closure is dropped, whether it
// ran, panicked, or was discarded by a runtime that is shutting down.
struct ActiveGuard(Arc<Active>);

impl ActiveGuard {
    fn enter(active: Arc<Active>) -> Self {
        *active.lock() += 1;
        Self(active)
    }
}

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        let mut count = self.0.lock();
        *count = count.saturating_sub(1);
        if *count == 0 {
            self.0.done.notify_all();
            self.0.notify.notify_waiters();
        }
    }
}

/// Executes workers on a blocking thread pool.
///
/// # Examples
///
/// ```rust
/// use std::time::Duration;
/// use relay::pool::{PoolConfig, WorkerPool};
/// use relay::signal::Event;
/// use relay::task::Worker;
///
/// let pool = WorkerPool::new(PoolConfig::default().max_blocking_threads(2))?;
/// let worker = Worker::infallible(|| 6 * 7);
/// let mut events = worker.signals().subscribe();
/// pool.submit(worker);
///
/// assert!(pool.wait_for_done(Some(Duration::from_secs(5))));
/// assert_eq!(events.blocking_recv(), Some(Event::Started));
/// assert_eq!(events.blocking_recv(), Some(Event::Finished(42)));
/// # Ok::<(), relay::pool::PoolError>(())
/// ```
pub struct WorkerPool {
    handle: Handle,
    // `Some` when this pool built its own runtime.
    runtime: Option<Runtime>,
    active: Arc<Active>,
}

impl WorkerPool {
    /// Builds a pool backed by a dedicated runtime.
    ///
    /// # Errors
    ///
    /// Returns [`PoolError::Invalid`] for a zero thread count and
    /// [`PoolError::Runtime`] if the runtime cannot start its threads.
    pub fn new(config: PoolConfig) -> Result<Self, PoolError> {
        config.validate()?;
        let runtime = Builder::new_multi_thread()
            .worker_threads(config.worker_threads)
            .max_blocking_threads(config.max_blocking_threads)
            .thread_name(config.thread_name.clone())
            .thread_keep_alive(config.keep_alive_duration())
            .build()
            .map_err(PoolError::Runtime)?;

        info!(
            max_blocking_threads = config.max_blocking_threads,
            thread_name = %config.thread_name,
            "worker pool started"
        );

        Ok(Self {
            handle: runtime.handle().clone(),
            runtime: Some(runtime),
            active: Arc::default(),
        })
    }

    /// Builds a pool that submits onto an existing runtime's blocking pool.
    ///
    /// Thread limits are whatever that runtime was configured with.
    pub fn from_handle(handle: Handle) -> Self {
        Self {
            handle,
            runtime: None,
            active: Arc::default(),
        }
    }

    /// Process-wide pool built from [`PoolConfig::default`] on first use.
    ///
    /// # Errors
    ///
    /// Returns [`PoolError::Runtime`] if the first initialization fails; later
    /// calls retry.
    pub fn global() -> Result<&'static WorkerPool, PoolError> {
        static GLOBAL: OnceLock<WorkerPool> = OnceLock::new();

        if let Some(pool) = GLOBAL.get() {
            return Ok(pool);
        }
        let pool = WorkerPool::new(PoolConfig::default())?;
        Ok(GLOBAL.get_or_init(|| pool))
    }

    /// Schedules `worker` to run once on a blocking thread.
    ///
    /// Connect to or subscribe on the worker's hub before calling this; events
    /// emitted before a subscription exists are not replayed.
    pub fn submit<T>(&self, worker: Worker<T>) -> TaskHandle
    where
        T: Clone + Send + 'static,
    {
        let id = worker.id();
        let guard = ActiveGuard::enter(Arc::clone(&self.active));
        debug!(%id, "worker submitted");

        let inner = self.handle.spawn_blocking(move || {
            let _guard = guard;
            worker.run();
        });

        TaskHandle { id, inner }
    }

    /// Wraps `f` in a [`Worker`], submits it and returns the worker's hub.
    ///
    /// Events emitted before the caller subscribes are lost; use
    /// [`submit`](Self::submit) when every event matters.
    pub fn start<T, F, E>(&self, f: F) -> Arc<SignalHub<T>>
    where
        T: Clone + Send + 'static,
        F: FnOnce() -> Result<T, E> + Send + 'static,
        E: Into<Box<dyn StdError + Send + Sync + 'static>>,
    {
        let worker = Worker::new(f);
        let signals = worker.signals();
        self.submit(worker);
        signals
    }

    /// Workers submitted through this pool that have not finished yet.
    pub fn active_count(&self) -> usize {
        *self.active.lock()
    }

    /// Blocks the calling thread until every submitted worker has finished.
    ///
    /// Returns `false` if `timeout` elapsed first. Must not be called from a
    /// thread that drives an async runtime.
    pub fn wait_for_done(&self, timeout: Option<Duration>) -> bool {
        let count = self.active.lock();
        match timeout {
            None => {
                let _count = self
                    .active
                    .done
                    .wait_while(count, |n| *n > 0)
                    .unwrap_or_else(|poisoned| poisoned.into_inner());
                true
            }
            Some(timeout) => {
                let (_count, result) = self
                    .active
                    .done
                    .wait_timeout_while(count, timeout, |n| *n > 0)
                    .unwrap_or_else(|poisoned| poisoned.into_inner());
                !result.timed_out()
            }
        }
    }

    /// Resolves once every submitted worker has finished.
    pub async fn idle(&self) {
        loop {
            let notified = self.active.notify.notified();
            if self.active_count() == 0 {
                return;
            }
            notified.await;
        }
    }

    /// Stops an owned runtime, waiting up to `timeout` for running workers.
    ///
    /// Workers still queued are dropped without running. Does nothing beyond
    /// dropping the pool when it was built with [`from_handle`](Self::from_handle).
    pub fn shutdown(mut self, timeout: Duration) {
        if let Some(runtime) = self.runtime.take() {
            info!(active = self.active_count(), "worker pool shutting down");
            runtime.shutdown_timeout(timeout);
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        // Non-blocking, so a pool may be dropped from inside async code.
        if let Some(runtime) = self.runtime.take() {
            runtime.shutdown_background();
        }
    }
}

/// Handle to one submitted worker.
///
/// Dropping it detaches the worker; it still runs. Results flow through the
/// worker's hub, not through this handle.
#[derive(Debug)]
pub struct TaskHandle {
    id: WorkerId,
    inner: JoinHandle<()>,
}

impl TaskHandle {
    pub fn id(&self) -> WorkerId {
        self.id
    }

    pub fn is_finished(&self) -> bool {
        self.inner.is_finished()
    }

    /// Waits for the worker's thread to finish.
    ///
    /// # Errors
    ///
    /// Returns [`PoolError::Join`] if the pool thread itself failed, which
    /// happens when the runtime shut down before the worker ran. Failures of
    /// the worker's function and panicking slots are not errors here; the
    /// former were reported on the hub and the latter were logged.
    pub async fn join(self) -> Result<(), PoolError> {
        let id = self.id;
        self.inner
            .await
            .map_err(|source| PoolError::Join { id, source })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signal::Event;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::mpsc;

    fn small_pool() -> WorkerPool {
        WorkerPool::new(PoolConfig::default().max_blocking_threads(2)).unwrap()
    }

    #[test]
    fn runs_every_submitted_worker_once() {
        let pool = small_pool();
        let runs = Arc::new(AtomicUsize::new(0));

        for _ in 0..10 {
            let runs = Arc::clone(&runs);
            pool.submit(Worker::infallible(move || {
                runs.fetch_add(1, Ordering::SeqCst);
            }));
        }

        assert!(pool.wait_for_done(Some(Duration::from_secs(10))));
        assert_eq!(runs.load(Ordering::SeqCst), 10);
        assert_eq!(pool.active_count(), 0);
    }

    #[test]
    fn wait_for_done_times_out_while_busy() {
        let pool = small_pool();
        let (release_tx, release_rx) = mpsc::channel::<()>();

        pool.submit(Worker::infallible(move || {
            let _ = release_rx.recv();
        }));

        assert!(!pool.wait_for_done(Some(Duration::from_millis(50))));
        assert_eq!(pool.active_count(), 1);

        release_tx.send(()).unwrap();
        assert!(pool.wait_for_done(None));
    }

    #[test]
    fn worker_runs_off_the_calling_thread() {
        let pool = WorkerPool::new(PoolConfig::default().thread_name("relay-test")).unwrap();
        let worker = Worker::infallible(|| std::thread::current().name().map(str::to_owned));
        let mut events = worker.signals().subscribe();

        pool.submit(worker);
        pool.wait_for_done(None);

        assert_eq!(events.blocking_recv(), Some(Event::Started));
        assert_eq!(
            events.blocking_recv(),
            Some(Event::Finished(Some("relay-test".to_string())))
        );
    }

    #[test]
    fn invalid_config_is_rejected() {
        let result = WorkerPool::new(PoolConfig::default().max_blocking_threads(0));
        assert!(matches!(result, Err(PoolError::Invalid(_))));
    }

    #[test]
    fn global_pool_is_shared() {
        let a = WorkerPool::global().unwrap();
        let b = WorkerPool::global().unwrap();
        assert!(std::ptr::eq(a, b));
    }

    #[tokio::test]
    async fn borrowed_handle_and_async_idle() {
        let pool = WorkerPool::from_handle(Handle::current());
        let worker = Worker::infallible(|| "ok");
        let mut events = worker.signals().subscribe();

        let handle = pool.submit(worker);
        handle.join().await.unwrap();
        pool.idle().await;

        assert_eq!(
            events.until_restore().await,
            vec![Event::Started, Event::Finished("ok"), Event::Restore]
        );
    }

    #[tokio::test]
    async fn slot_panic_stays_off_the_pool_thread() {
        let pool = WorkerPool::from_handle(Handle::current());
        let worker = Worker::infallible(|| 1);
        worker.signals().finished.connect(|_| panic!("slot blew up"));
        let mut events = worker.signals().subscribe();

        pool.submit(worker).join().await.unwrap();

        assert_eq!(
            events.until_restore().await,
            vec![Event::Started, Event::Finished(1), Event::Restore]
        );
        assert_eq!(pool.active_count(), 0);
    }

    #[tokio::test]
    async fn start_accepts_boxed_errors() {
        let pool = WorkerPool::from_handle(Handle::current());
        let (tx, rx) = tokio::sync::oneshot::channel::<()>();

        let hub = pool.start(move || -> Result<u8, Box<dyn StdError + Send + Sync>> {
            let _ = rx.blocking_recv();
            Err("queue closed".into())
        });
        let mut events = hub.subscribe();
        tx.send(()).unwrap();

        let events = events.until_restore().await;
        assert_eq!(
            events[events.len() - 2..],
            [Event::Error("queue closed".to_string()), Event::Restore]
        );
    }

    #[tokio::test]
    async fn start_returns_live_hub() {
        let pool = WorkerPool::from_handle(Handle::current());
        let (tx, rx) = tokio::sync::oneshot::channel::<()>();

        let hub = pool.start(move || {
            let _ = rx.blocking_recv();
            Ok::<_, std::io::Error>(5)
        });
        let mut events = hub.subscribe();
        tx.send(()).unwrap();

        // `started` may fire before the subscription; the rest cannot.
        let events = events.until_restore().await;
        assert_eq!(
            events[events.len() - 2..],
            [Event::Finished(5), Event::Restore]
        );
    }

    #[tokio::test]
    async fn owned_pool_can_drop_inside_async() {
        let pool = small_pool();
        pool.submit(Worker::infallible(|| ()));
        pool.idle().await;
        drop(pool);
    }
}
