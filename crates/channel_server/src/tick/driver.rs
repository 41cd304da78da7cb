//! Fixed-cadence tick timer.
//!
//! The driver runs on its own thread named `tick`. Every interval it asks
//! the [`TickBacklog`] for room and either enqueues a `Tick` message on the
//! target queue or counts the tick as missed. Missed ticks are never
//! replayed; they are only reported every `report_every` ticks.

use super::backlog::{TickAdmission, TickBacklog};
use crate::error::ServerError;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, info};
use world_core::{Message, QueueClosed, WorkerQueue};

/// What one firing of the driver did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FireOutcome {
    Enqueued { pending: u32 },
    Missed { missed: u64 },
    /// The target queue is closed; the driver should stop
    QueueClosed,
}

/// Handle to the running tick thread.
#[derive(Debug)]
pub struct TickDriver {
    running: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl TickDriver {
    /// One tick attempt: reserve, then enqueue.
    pub fn fire(queue: &WorkerQueue, backlog: &TickBacklog) -> FireOutcome {
        match backlog.try_schedule() {
            TickAdmission::Scheduled { pending } => match queue.enqueue(Message::tick()) {
                Ok(()) => FireOutcome::Enqueued { pending },
                Err(QueueClosed(_)) => {
                    backlog.cancel();
                    FireOutcome::QueueClosed
                }
            },
            TickAdmission::Missed { missed } => FireOutcome::Missed { missed },
        }
    }

    /// Spawns the tick thread.
    pub fn start(
        queue: Arc<WorkerQueue>,
        backlog: Arc<TickBacklog>,
        interval: Duration,
        report_every: u64,
    ) -> Result<Self, ServerError> {
        let running = Arc::new(AtomicBool::new(true));
        let flag = running.clone();

        let handle = thread::Builder::new()
            .name("tick".to_string())
            .spawn(move || run(queue, backlog, interval, report_every, flag))
            .map_err(|e| ServerError::Internal(format!("failed to spawn tick thread: {e}")))?;

        info!("⏰ Tick driver started ({}ms interval)", interval.as_millis());
        Ok(Self {
            running,
            handle: Some(handle),
        })
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Flips the running flag, wakes the thread and joins it.
    pub fn stop(&mut self) {
        self.running.store(false, Ordering::Release);
        if let Some(handle) = self.handle.take() {
            handle.thread().unpark();
            if handle.join().is_err() {
                debug!("Tick thread panicked before it could be joined");
            }
            info!("⏰ Tick driver stopped");
        }
    }
}

impl Drop for TickDriver {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run(
    queue: Arc<WorkerQueue>,
    backlog: Arc<TickBacklog>,
    interval: Duration,
    report_every: u64,
    running: Arc<AtomicBool>,
) {
    let mut since_report = 0u64;
    let mut next = Instant::now() + interval;

    while running.load(Ordering::Acquire) {
        // park_timeout may wake early; only a stop request cuts the wait short.
        loop {
            let now = Instant::now();
            if now >= next || !running.load(Ordering::Acquire) {
                break;
            }
            thread::park_timeout(next - now);
        }
        if !running.load(Ordering::Acquire) {
            break;
        }
        next += interval;
        // After a long stall restart the cadence instead of firing a burst.
        let now = Instant::now();
        if next < now {
            next = now + interval;
        }

        if TickDriver::fire(&queue, &backlog) == FireOutcome::QueueClosed {
            debug!("⏰ Tick queue closed; tick driver exiting");
            running.store(false, Ordering::Release);
            break;
        }

        since_report += 1;
        if report_every > 0 && since_report >= report_every {
            since_report = 0;
            let missed = backlog.take_missed();
            if missed > 0 {
                debug!("⏰ Missed {} tick(s) in the last {} tick intervals", missed, report_every);
            }
        }
    }
}
