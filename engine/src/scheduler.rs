//! Per-endpoint poll loops.
//!
//! Each scheduled consumer gets its own thread that waits `initial_delay`,
//! then polls either every `delay` after the previous cycle finished (fixed
//! delay) or on a fixed-rate ticker. A cycle never overlaps the previous one
//! of the same endpoint; missed ticks are dropped.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{after, select, tick, Receiver, RecvTimeoutError, Sender};
use tracing::{debug, info, warn};

use crate::error::{EngineError, EngineResult};
use crate::poll::PollLifecycle;

/// When an endpoint is polled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Schedule {
    pub initial_delay: Duration,
    pub delay: Duration,
    /// Poll on a fixed-rate ticker instead of waiting `delay` after each cycle
    pub fixed_rate: bool,
}

impl Default for Schedule {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            delay: Duration::from_millis(500),
            fixed_rate: false,
        }
    }
}

/// Result of [`Scheduler::shutdown`].
#[derive(Debug, Default, Clone)]
pub struct ShutdownReport {
    /// Endpoints whose loop ended within the timeout
    pub finished: Vec<PathBuf>,
    /// Endpoints still running a cycle when the timeout elapsed
    pub unfinished: Vec<PathBuf>,
}

impl ShutdownReport {
    pub fn is_clean(&self) -> bool {
        self.unfinished.is_empty()
    }
}

struct ScheduledEndpoint {
    endpoint: PathBuf,
    stop: Arc<AtomicBool>,
    // Dropping the sender wakes a sleeping loop.
    wake: Option<Sender<()>>,
    done: Receiver<()>,
    handle: Option<JoinHandle<()>>,
}

/// Runs poll loops for any number of endpoints.
#[derive(Default)]
pub struct Scheduler {
    endpoints: Vec<ScheduledEndpoint>,
}

impl Scheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of scheduled endpoints.
    pub fn len(&self) -> usize {
        self.endpoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.endpoints.is_empty()
    }

    /// Start `consumer` and poll it on its own thread.
    ///
    /// # Errors
    ///
    /// Returns the consumer's start error (missing or inaccessible starting
    /// directory) or an I/O error when the thread cannot be spawned.
    pub fn spawn(&mut self, consumer: Arc<dyn PollLifecycle>, schedule: Schedule) -> EngineResult<()> {
        consumer.start()?;

        let endpoint = consumer.endpoint().to_path_buf();
        let stop = consumer.stop_handle();
        let (wake_tx, wake_rx) = crossbeam_channel::bounded::<()>(0);
        let (done_tx, done_rx) = crossbeam_channel::bounded::<()>(1);

        let handle = thread::Builder::new()
            .name(format!("filegate-poll-{}", self.endpoints.len()))
            .spawn(move || {
                run_loop(consumer.as_ref(), &schedule, &wake_rx);
                let _ = done_tx.send(());
            })
            .map_err(|e| EngineError::io("spawn poll thread", &endpoint, e))?;

        info!(endpoint = %endpoint.display(), "scheduled endpoint");
        self.endpoints.push(ScheduledEndpoint {
            endpoint,
            stop,
            wake: Some(wake_tx),
            done: done_rx,
            handle: Some(handle),
        });
        Ok(())
    }

    fn signal_stop(&mut self) {
        for scheduled in &mut self.endpoints {
            scheduled.stop.store(true, Ordering::SeqCst);
            scheduled.wake.take();
        }
    }

    /// Stop every endpoint and wait up to `timeout` for their loops to end.
    ///
    /// In-flight batches finish the file they are on; files not yet started
    /// are released unprocessed. Loops still running at the deadline are
    /// reported and left detached.
    pub fn shutdown(mut self, timeout: Duration) -> ShutdownReport {
        self.signal_stop();
        let deadline = Instant::now() + timeout;
        let mut report = ShutdownReport::default();

        for mut scheduled in std::mem::take(&mut self.endpoints) {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match scheduled.done.recv_timeout(remaining) {
                // A disconnected channel means the loop thread is gone too.
                Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                    if let Some(handle) = scheduled.handle.take() {
                        if handle.join().is_err() {
                            warn!(endpoint = %scheduled.endpoint.display(), "poll thread panicked");
                        }
                    }
                    report.finished.push(scheduled.endpoint);
                }
                Err(RecvTimeoutError::Timeout) => {
                    warn!(
                        endpoint = %scheduled.endpoint.display(),
                        ?timeout,
                        "endpoint did not stop in time"
                    );
                    report.unfinished.push(scheduled.endpoint);
                }
            }
        }
        report
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.signal_stop();
    }
}

/// Sleep for `duration` unless woken. Returns false when the loop must end.
fn sleep(wake: &Receiver<()>, duration: Duration) -> bool {
    select! {
        recv(wake) -> _ => false,
        recv(after(duration)) -> _ => true,
    }
}

fn run_loop(consumer: &dyn PollLifecycle, schedule: &Schedule, wake: &Receiver<()>) {
    let endpoint = consumer.endpoint().display().to_string();
    if !schedule.initial_delay.is_zero() && !sleep(wake, schedule.initial_delay) {
        return;
    }
    let ticker = schedule.fixed_rate.then(|| tick(schedule.delay));

    while !consumer.is_stopped() {
        match consumer.poll() {
            Ok(report) if !report.outcomes.is_empty() => debug!(
                endpoint = %endpoint,
                committed = report.committed(),
                rolled_back = report.rolled_back(),
                skipped = report.skipped(),
                "poll cycle finished"
            ),
            Ok(_) => {}
            Err(err) => warn!(endpoint = %endpoint, error = %err, "poll cycle failed"),
        }
        if consumer.is_stopped() {
            break;
        }

        let keep_going = match &ticker {
            Some(ticker) => select! {
                recv(wake) -> _ => false,
                recv(ticker) -> _ => true,
            },
            None => sleep(wake, schedule.delay),
        };
        if !keep_going {
            break;
        }
    }
    info!(endpoint = %endpoint, "poll loop stopped");
}
