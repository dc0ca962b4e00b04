//! Simulates a UI button that launches slow jobs without freezing its event loop.
//!
//! Run with: `RUST_LOG=debug cargo run --example button`

use std::sync::Arc;
use std::time::Duration;

use relay::{Event, PoolConfig, TracingLogger, Worker, WorkerPool};
use thiserror::Error;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Error)]
#[error("checksum mismatch for {0}")]
struct ChecksumMismatch(String);

fn verify(name: &str, delay: Duration, ok: bool) -> Result<String, ChecksumMismatch> {
    std::thread::sleep(delay);
    if ok {
        Ok(format!("{name} verified"))
    } else {
        Err(ChecksumMismatch(name.to_owned()))
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let pool = WorkerPool::new(PoolConfig::default().max_blocking_threads(2))?;
    let logger = Arc::new(TracingLogger::new("button_demo"));

    for (name, ok) in [("backup.tar", true), ("photos.zip", false)] {
        let worker = Worker::new(move || verify(name, Duration::from_millis(300), ok))
            .logger(logger.clone());
        let mut events = worker.signals().subscribe();

        info!(job = name, "button disabled");
        pool.submit(worker);

        // The UI loop: this thread stays free while the job runs.
        while let Some(event) = events.recv().await {
            match event {
                Event::Started => info!(job = name, "spinner on"),
                Event::Finished(text) => info!(job = name, %text, "status updated"),
                Event::Error(message) => info!(job = name, %message, "error dialog"),
                Event::Restore => {
                    info!(job = name, "button enabled");
                    break;
                }
            }
        }
    }

    pool.idle().await;
    Ok(())
}
