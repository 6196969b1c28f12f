//! Fixed-interval driver around [`BatchProcessor::run_cycle`].

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use super::batch::{BatchProcessor, CycleReport};
use super::panic_message;

/// Upper bound on how long a shutdown request waits for the sleep to end.
const SHUTDOWN_POLL: Duration = Duration::from_millis(200);

pub struct PollLoop {
    processor: BatchProcessor,
    interval: Duration,
    shutdown: Arc<AtomicBool>,
}

impl PollLoop {
    pub fn new(processor: BatchProcessor, interval: Duration) -> Self {
        Self {
            processor,
            interval,
            shutdown: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Flag that stops the loop before its next cycle once set.
    pub fn shutdown_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.shutdown)
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::Acquire)
    }

    /// Runs cycles until the shutdown flag is set.
    pub fn run(&self) {
        log::info!("OCR worker polling every {:?}", self.interval);

        while !self.is_shutdown() {
            self.tick();
            log::debug!("Waiting {:?} before next cycle", self.interval);
            self.sleep_interval();
        }

        log::info!("OCR worker stopped");
    }

    /// Runs one cycle, absorbing errors and panics so the loop survives them.
    /// Record-level panics are already contained by the processor; this
    /// catches the rest (selection, claim bookkeeping).
    pub fn tick(&self) -> Option<CycleReport> {
        match panic::catch_unwind(AssertUnwindSafe(|| self.processor.run_cycle())) {
            Ok(Ok(report)) => Some(report),
            Ok(Err(e)) => {
                log::error!("OCR cycle failed: {}", e);
                None
            }
            Err(payload) => {
                log::error!("OCR cycle panicked: {}", panic_message(&*payload));
                None
            }
        }
    }

    fn sleep_interval(&self) {
        let deadline = Instant::now() + self.interval;
        loop {
            if self.is_shutdown() {
                return;
            }
            let now = Instant::now();
            if now >= deadline {
                return;
            }
            std::thread::sleep((deadline - now).min(SHUTDOWN_POLL));
        }
    }
}
