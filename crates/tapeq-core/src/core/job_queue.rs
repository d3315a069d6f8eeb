use std::collections::VecDeque;
use std::sync::{Condvar, Mutex};
use std::time::Duration;

use crate::lock_unpoisoned;
use crate::telemetry::{self, tags};
use crate::types::Result;

/// Thread-safe FIFO of pending jobs shared by the producer and all workers.
///
/// `dequeue` never blocks; idle consumers park in [`wait_for_work`] until a
/// job arrives or they are explicitly woken.
///
/// [`wait_for_work`]: JobQueue::wait_for_work
#[derive(Debug)]
pub struct JobQueue<J> {
    jobs: Mutex<VecDeque<J>>,
    available: Condvar,
}

impl<J> Default for JobQueue<J> {
    fn default() -> Self {
        Self::new()
    }
}

impl<J> JobQueue<J> {
    pub fn new() -> Self {
        Self {
            jobs: Mutex::new(VecDeque::new()),
            available: Condvar::new(),
        }
    }

    /// Appends a job at the tail and wakes one waiting consumer.
    pub fn enqueue(&self, job: J) -> Result<()> {
        let depth = {
            let mut jobs = lock_unpoisoned(&self.jobs);
            jobs.try_reserve(1)?;
            jobs.push_back(job);
            jobs.len()
        };
        self.available.notify_one();
        telemetry::increment_counter(tags::METRIC_QUEUE_ENQUEUE_COUNT, 1);
        tracing::trace!(depth, "job enqueued");
        Ok(())
    }

    /// Removes and returns the head job, or `None` when nothing is pending.
    pub fn dequeue(&self) -> Option<J> {
        let job = lock_unpoisoned(&self.jobs).pop_front();
        if job.is_some() {
            telemetry::increment_counter(tags::METRIC_QUEUE_DEQUEUE_COUNT, 1);
        }
        job
    }

    pub fn len(&self) -> usize {
        lock_unpoisoned(&self.jobs).len()
    }

    pub fn is_empty(&self) -> bool {
        lock_unpoisoned(&self.jobs).is_empty()
    }

    /// Drops every pending job and returns how many were discarded.
    pub fn clear(&self) -> usize {
        let drained: Vec<J> = lock_unpoisoned(&self.jobs).drain(..).collect();
        drained.len()
    }

    /// Blocks until the queue is non-empty, a waiter notification arrives, or
    /// `timeout` elapses. Spurious wake-ups are possible; callers re-check.
    pub fn wait_for_work(&self, timeout: Duration) {
        let jobs = lock_unpoisoned(&self.jobs);
        if !jobs.is_empty() {
            return;
        }

        let _ = match self.available.wait_timeout(jobs, timeout) {
            Ok(result) => result,
            Err(poisoned) => poisoned.into_inner(),
        };
    }

    /// Wakes all consumers parked in [`wait_for_work`](JobQueue::wait_for_work).
    pub fn notify_all_waiters(&self) {
        let _jobs = lock_unpoisoned(&self.jobs);
        self.available.notify_all();
    }
}
