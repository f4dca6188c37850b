//! Periodic retry of failed emails

use anyhow::{Context, Result};
use log::{debug, info};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::thread::JoinHandle;
use std::time::Duration;

use crate::service::{EmailService, RetryStats};

/// Runs `EmailService::retry_failed` on a fixed interval
pub struct RetryScheduler {
    service: EmailService,
    interval: Duration,
}

impl RetryScheduler {
    pub fn new(service: EmailService, interval: Duration) -> Self {
        Self { service, interval }
    }

    /// Run a single retry pass
    pub fn run_once(&self) -> RetryStats {
        let stats = self.service.retry_failed();

        if stats.sent + stats.failed > 0 {
            info!(
                "Retry pass complete: {} sent, {} still failed",
                stats.sent, stats.failed
            );
        } else {
            debug!("Retry pass found nothing to retry");
        }

        stats
    }

    /// Start retrying on a background thread
    ///
    /// The first pass runs one interval after start. Passes run on a single
    /// thread and never overlap.
    pub fn start(self) -> Result<SchedulerHandle> {
        let (stop_tx, stop_rx) = mpsc::channel::<()>();
        let interval = self.interval;

        let thread = std::thread::Builder::new()
            .name("outbox-retry".to_string())
            .spawn(move || {
                loop {
                    match stop_rx.recv_timeout(interval) {
                        Err(RecvTimeoutError::Timeout) => {
                            self.run_once();
                        }
                        Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                    }
                }
                debug!("Retry scheduler stopped");
            })
            .context("Failed to spawn retry scheduler")?;

        info!("Retry scheduler started (every {}s)", interval.as_secs());

        Ok(SchedulerHandle {
            stop: stop_tx,
            thread,
        })
    }
}

/// Handle to a running scheduler
pub struct SchedulerHandle {
    stop: mpsc::Sender<()>,
    thread: JoinHandle<()>,
}

impl SchedulerHandle {
    /// Stop the scheduler, waiting for an in-progress pass to finish
    pub fn shutdown(self) {
        let _ = self.stop.send(());
        let _ = self.thread.join();
    }

    /// Block until the scheduler thread exits
    pub fn wait(self) {
        let _ = self.thread.join();
    }
}
