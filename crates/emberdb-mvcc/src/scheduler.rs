//! Deferred execution for background cache builds.

use std::collections::VecDeque;
use std::thread;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{debug, error};

/// Work item handed to a scheduler.
pub type ScheduledTask = Box<dyn FnOnce() + Send + 'static>;

/// Scheduler collaborator: run `task` once, no sooner than `delay` from now.
///
/// Fire-and-forget. Each call results in at most one execution of `task`;
/// a task may also be dropped without running.
pub trait BuildScheduler: Send + Sync {
    fn schedule_after(&self, delay: Duration, task: ScheduledTask);
}

/// Runs every task on its own named background thread.
#[derive(Debug, Clone, Copy, Default)]
pub struct ThreadScheduler;

impl BuildScheduler for ThreadScheduler {
    fn schedule_after(&self, delay: Duration, task: ScheduledTask) {
        let spawned = thread::Builder::new()
            .name("emberdb-deferred".to_owned())
            .spawn(move || {
                if !delay.is_zero() {
                    thread::sleep(delay);
                }
                task();
            });
        if let Err(err) = spawned {
            // The task is dropped unrun, which withdraws its build request.
            error!(error = %err, "failed to spawn deferred task thread");
        }
    }
}

/// Queues tasks until [`ManualScheduler::run_pending`] is called.
///
/// Delays are recorded but not waited on, which makes build timing fully
/// deterministic for tests and single-threaded embedders.
#[derive(Default)]
pub struct ManualScheduler {
    queue: Mutex<VecDeque<(Duration, ScheduledTask)>>,
}

impl ManualScheduler {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of tasks waiting to run.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.queue.lock().len()
    }

    /// Delays of the queued tasks, in submission order.
    #[must_use]
    pub fn pending_delays(&self) -> Vec<Duration> {
        self.queue.lock().iter().map(|(d, _)| *d).collect()
    }

    /// Run every queued task in submission order, including tasks queued by
    /// the tasks themselves. Returns how many ran.
    pub fn run_pending(&self) -> usize {
        let mut ran = 0;
        loop {
            // Pop under the lock, run outside it: a task may schedule more.
            let next = self.queue.lock().pop_front();
            let Some((_, task)) = next else {
                break;
            };
            task();
            ran += 1;
        }
        debug!(ran, "manual scheduler drained");
        ran
    }
}

impl BuildScheduler for ManualScheduler {
    fn schedule_after(&self, delay: Duration, task: ScheduledTask) {
        self.queue.lock().push_back((delay, task));
    }
}

impl std::fmt::Debug for ManualScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ManualScheduler")
            .field("pending", &self.pending())
            .finish()
    }
}
