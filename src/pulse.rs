//! Background square-wave generation on a digital output.
//!
//! A [`PulseTrain`] toggles a line high for a given duration, low for
//! another, either forever or for a fixed number of cycles, on its own
//! worker thread (or inline for foreground runs). A counted run can carry a
//! completion action; it fires exactly once, after the final cycle has been
//! counted, so the action always observes the finished count.
//!
//! [`stop`](PulseTrain::stop) is observed at the next cycle boundary; a
//! half-period already in progress completes before the worker exits.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::warn;

use crate::io::DigitalOutput;

/// Action invoked when a counted run finishes on its own.
pub type CompletionAction = Box<dyn FnOnce() + Send + 'static>;

/// Square-wave toggle loop over a single digital output.
pub struct PulseTrain<P: DigitalOutput + Send + 'static> {
    pin: Arc<Mutex<P>>,
    cycles: Arc<AtomicU64>,
    halt: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
}

impl<P: DigitalOutput + Send + 'static> PulseTrain<P> {
    pub fn new(pin: P) -> Self {
        Self {
            pin: Arc::new(Mutex::new(pin)),
            cycles: Arc::new(AtomicU64::new(0)),
            halt: Arc::new(AtomicBool::new(false)),
            worker: None,
        }
    }

    /// Start toggling: active for `high`, inactive for `low`, per cycle.
    ///
    /// `iterations` of `None` runs until [`stop`](Self::stop). With
    /// `background` the loop runs on a worker thread and this returns
    /// immediately; otherwise it runs to completion on the calling thread.
    /// Any loop already running is stopped first, and the cycle counter
    /// restarts at zero.
    ///
    /// `on_complete` runs exactly once when a counted run exhausts its
    /// iterations; it does not run when the loop is stopped early. An
    /// infinite run ignores it.
    pub fn start(
        &mut self,
        high: Duration,
        low: Duration,
        iterations: Option<u64>,
        background: bool,
        on_complete: Option<CompletionAction>,
    ) {
        self.stop();
        self.cycles.store(0, Ordering::Release);

        // Fresh flag per run so a stale stop cannot halt the new loop.
        let halt = Arc::new(AtomicBool::new(false));
        self.halt = Arc::clone(&halt);

        let pin = Arc::clone(&self.pin);
        let cycles = Arc::clone(&self.cycles);

        let run = move || {
            let mut completed: u64 = 0;
            loop {
                if halt.load(Ordering::Acquire) {
                    return;
                }
                if let Some(total) = iterations {
                    if completed >= total {
                        break;
                    }
                }
                if let Err(e) = pin.lock().unwrap().set_active(true) {
                    warn!("pulse output failed, abandoning loop: {e}");
                    return;
                }
                thread::sleep(high);
                if let Err(e) = pin.lock().unwrap().set_active(false) {
                    warn!("pulse output failed, abandoning loop: {e}");
                    return;
                }
                thread::sleep(low);
                completed += 1;
                cycles.fetch_add(1, Ordering::AcqRel);
            }
            if let Some(action) = on_complete {
                action();
            }
        };

        if background {
            self.worker = Some(thread::spawn(run));
        } else {
            run();
        }
    }

    /// Halt the loop and wait for the worker to exit. Idempotent.
    pub fn stop(&mut self) {
        self.halt.store(true, Ordering::Release);
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }

    /// Completed cycles since the current (or most recent) run started.
    pub fn cycle_count(&self) -> u64 {
        self.cycles.load(Ordering::Acquire)
    }
}

impl<P: DigitalOutput + Send + 'static> Drop for PulseTrain<P> {
    fn drop(&mut self) {
        self.stop();
    }
}
