//! Background workers: one blocking call wrapped with lifecycle notifications.
//!
//! A [`Worker`] owns a function, an optional [`Logger`] and a shared
//! [`SignalHub`]. Running it emits, in order:
//!
//! 1. `started`
//! 2. `finished(value)` if the function returned `Ok`, or `error(message)` if it
//!    returned `Err` or panicked
//! 3. `restore`, always
//!
//! On failure the full diagnostic trace goes to the logger at critical severity,
//! or to standard output when no logger was given. Only the short message
//! reaches the `error` signal.

mod args;
mod failure;

pub use args::{Args, ArgsError};
pub use failure::{Failure, PANIC_KIND};
pub(crate) use failure::panic_message;

use std::error::Error as StdError;
use std::fmt;
use std::io::{self, Write};
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tracing::{debug, warn};

use crate::logger::Logger;
use crate::signal::SignalHub;

/// The tagged result of one invocation.
#[derive(Debug)]
pub enum Outcome<T> {
    Success(T),
    Failure(Failure),
}

impl<T> Outcome<T> {
    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Success(_))
    }
}

/// Process-unique identifier of a worker, used in log records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WorkerId(u64);

impl fmt::Display for WorkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "worker-{}", self.0)
    }
}

static NEXT_WORKER_ID: AtomicU64 = AtomicU64::new(1);

type Job<T> = Box<dyn FnOnce() -> Result<T, Failure> + Send + 'static>;

/// A unit of blocking work that reports its lifecycle through a [`SignalHub`].
///
/// `run` consumes the worker, so each one executes at most once.
///
/// # Examples
///
/// ```rust
/// use relay::signal::Event;
/// use relay::task::Worker;
///
/// let worker = Worker::new(|| Ok::<_, std::io::Error>(42));
/// let mut events = worker.signals().subscribe();
/// worker.run();
///
/// assert_eq!(events.try_recv(), Some(Event::Started));
/// assert_eq!(events.try_recv(), Some(Event::Finished(42)));
/// assert_eq!(events.try_recv(), Some(Event::Restore));
/// ```
pub struct Worker<T> {
    id: WorkerId,
    job: Job<T>,
    logger: Option<Arc<dyn Logger>>,
    signals: Arc<SignalHub<T>>,
}

impl<T> Worker<T>
where
    T: Clone + Send + 'static,
{
    /// Wraps a function that captures its own arguments.
    ///
    /// Any error returned by `f` becomes a failure; so does a panic. `E` may be
    /// a concrete error type or an already boxed `dyn Error`.
    pub fn new<F, E>(f: F) -> Self
    where
        F: FnOnce() -> Result<T, E> + Send + 'static,
        E: Into<Box<dyn StdError + Send + Sync + 'static>>,
    {
        Self::from_job(Box::new(move || f().map_err(Failure::from_raised)))
    }

    /// Wraps a function that reads opaque positional and keyword arguments.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use relay::signal::Event;
    /// use relay::task::{Args, ArgsError, Worker};
    ///
    /// let args = Args::new().arg(5).kwarg("y", 10);
    /// let worker = Worker::with_args(
    ///     |args: &Args| -> Result<i64, ArgsError> {
    ///         Ok(args.get::<i64>(0)? + args.get_kw::<i64>("y")?)
    ///     },
    ///     args,
    /// );
    /// let mut events = worker.signals().subscribe();
    /// worker.run();
    ///
    /// assert_eq!(events.try_recv(), Some(Event::Started));
    /// assert_eq!(events.try_recv(), Some(Event::Finished(15)));
    /// ```
    pub fn with_args<F, E>(f: F, args: Args) -> Self
    where
        F: FnOnce(&Args) -> Result<T, E> + Send + 'static,
        E: Into<Box<dyn StdError + Send + Sync + 'static>>,
    {
        Self::new(move || f(&args))
    }

    /// Wraps a function that cannot fail except by panicking.
    pub fn infallible<F>(f: F) -> Self
    where
        F: FnOnce() -> T + Send + 'static,
    {
        Self::from_job(Box::new(move || Ok(f())))
    }

    fn from_job(job: Job<T>) -> Self {
        Self {
            id: WorkerId(NEXT_WORKER_ID.fetch_add(1, Ordering::Relaxed)),
            job,
            logger: None,
            signals: Arc::new(SignalHub::new()),
        }
    }

    /// Routes the diagnostic trace of a failure to `logger` instead of stdout.
    pub fn logger(mut self, logger: Arc<dyn Logger>) -> Self {
        self.logger = Some(logger);
        self
    }

    /// Reports through an existing hub, e.g. one a widget already listens on.
    pub fn signals_from(mut self, signals: Arc<SignalHub<T>>) -> Self {
        self.signals = signals;
        self
    }

    pub fn id(&self) -> WorkerId {
        self.id
    }

    /// The hub this worker emits on. Connect or subscribe before submitting.
    pub fn signals(&self) -> Arc<SignalHub<T>> {
        Arc::clone(&self.signals)
    }

    /// Runs the function on the current thread and emits its lifecycle.
    ///
    /// Failures, including panics inside the function, are caught here and
    /// never propagate to the caller. A panicking slot is logged by its signal
    /// and does not stop later emissions, so `restore` always fires.
    pub fn run(self) {
        self.run_with_output(io::stdout);
    }

    // `stdout` is only opened when a failure has no logger to go to.
    pub(crate) fn run_with_output<W, O>(self, stdout: O)
    where
        W: Write,
        O: FnOnce() -> W,
    {
        let Worker {
            id,
            job,
            logger,
            signals,
        } = self;
        let _span = tracing::debug_span!("worker", %id).entered();

        signals.emit_started();
        debug!("started");

        match invoke(job) {
            Outcome::Success(value) => {
                debug!("finished");
                signals.emit_finished(value);
            }
            Outcome::Failure(failure) => {
                warn!(kind = failure.kind(), error = failure.message(), "failed");
                let trace = failure.trace();
                match &logger {
                    Some(logger) => logger.critical(&trace),
                    None => print_trace(&mut stdout(), &trace),
                }
                signals.emit_error(failure.message().to_owned());
            }
        }

        signals.emit_restore();
    }
}

impl<T> fmt::Debug for Worker<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Worker")
            .field("id", &self.id)
            .field("has_logger", &self.logger.is_some())
            .finish_non_exhaustive()
    }
}

fn invoke<T>(job: Job<T>) -> Outcome<T> {
    match panic::catch_unwind(AssertUnwindSafe(job)) {
        Ok(Ok(value)) => Outcome::Success(value),
        Ok(Err(failure)) => Outcome::Failure(failure),
        Err(payload) => Outcome::Failure(Failure::from_panic(payload)),
    }
}

fn print_trace(out: &mut impl Write, trace: &str) {
    // Nothing else to report to if stdout itself is gone.
    let _ = writeln!(out, "{trace}").and_then(|()| out.flush());
}
