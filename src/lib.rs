//! # relay
//!
//! Run blocking functions on a background thread pool and report their
//! lifecycle to the UI thread through signals.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use relay::pool::{PoolConfig, WorkerPool};
//! use relay::signal::Event;
//! use relay::task::Worker;
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let pool = WorkerPool::new(PoolConfig::default())?;
//!
//!     let worker = Worker::new(|| std::fs::read_to_string("Cargo.toml"));
//!     let signals = worker.signals();
//!     signals.restore.connect(|_| println!("re-enable the button"));
//!     let mut events = signals.subscribe();
//!
//!     pool.submit(worker);
//!
//!     // Drain on the UI thread.
//!     while let Some(event) = events.blocking_recv() {
//!         match event {
//!             Event::Finished(text) => println!("{} bytes", text.len()),
//!             Event::Error(message) => eprintln!("failed: {message}"),
//!             Event::Restore => break,
//!             Event::Started => {}
//!         }
//!     }
//!     Ok(())
//! }
//! ```

// ── Core ──────────────────────────────────────────────────────────────────────
pub mod signal;
pub mod task;

// ── Execution and diagnostics ─────────────────────────────────────────────────
pub mod logger;
pub mod pool;

// ── Convenience re-exports ────────────────────────────────────────────────────
pub use logger::{Logger, TracingLogger};
pub use pool::{PoolConfig, PoolError, TaskHandle, WorkerPool};
pub use signal::{Event, EventQueue, Signal, SignalHub};
pub use task::{Args, Failure, Outcome, Worker};
