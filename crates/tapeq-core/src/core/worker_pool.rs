use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::core::job_queue::JobQueue;
use crate::core::worker::{Job, SetupFailurePolicy, Worker, WorkerHooks, run_worker};
use crate::error::TapeqError;
use crate::telemetry::tags;
use crate::telemetry::worker::{DefaultWorkerTelemetry, WorkerTelemetry};
use crate::types::{QueryRecord, Result};
use crate::{lock_unpoisoned, panic_message};

/// Runtime knobs for [`WorkerPool`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerPoolOptions {
    /// Longest time an idle worker sleeps before re-checking the queue and
    /// the pool size.
    pub idle_poll_interval: Duration,
    /// Longest time the controller sleeps between reaping finished threads.
    pub controller_tick: Duration,
    /// Behaviour when a worker's setup hook fails.
    pub setup_failure: SetupFailurePolicy,
    /// Prefix of controller and worker thread names.
    pub thread_name_prefix: String,
}

impl Default for WorkerPoolOptions {
    fn default() -> Self {
        Self {
            idle_poll_interval: Duration::from_secs(1),
            controller_tick: Duration::from_millis(100),
            setup_failure: SetupFailurePolicy::Continue,
            thread_name_prefix: "tapeq".to_string(),
        }
    }
}

/// How [`WorkerPool::shutdown`] treats pending jobs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownMode {
    /// Live workers finish every queued job, then exit.
    Drain,
    /// Pending jobs are discarded and workers exit after their current job.
    Abort,
}

/// Point-in-time view of a worker pool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolSnapshot {
    pub current: usize,
    pub desired: usize,
    pub next_id: usize,
    pub pending: usize,
    pub submitted: usize,
    pub completed: usize,
    pub failed: usize,
    pub workers: Vec<usize>,
    pub shutting_down: bool,
}

#[derive(Debug)]
struct PoolCounts {
    current: usize,
    desired: usize,
    next_id: usize,
    stopping: Option<ShutdownMode>,
    abandoned: Option<TapeqError>,
}

pub(crate) struct PoolShared<H: WorkerHooks> {
    pub(crate) hooks: H,
    pub(crate) queue: JobQueue<Job<H::State>>,
    pub(crate) options: WorkerPoolOptions,
    pub(crate) telemetry: Arc<dyn WorkerTelemetry>,
    counts: Mutex<PoolCounts>,
    changed: Condvar,
    registry: Mutex<BTreeMap<usize, Arc<AtomicBool>>>,
    submitted: AtomicUsize,
    completed: AtomicUsize,
    failed: AtomicUsize,
}

impl<H: WorkerHooks> PoolShared<H> {
    fn counts(&self) -> MutexGuard<'_, PoolCounts> {
        lock_unpoisoned(&self.counts)
    }

    pub(crate) fn current_count(&self) -> usize {
        self.counts().current
    }

    pub(crate) fn desired_count(&self) -> usize {
        self.counts().desired
    }

    pub(crate) fn is_stopping(&self) -> bool {
        self.counts().stopping.is_some()
    }

    /// Gives up the caller's slot when the pool is over-provisioned.
    ///
    /// Check and decrement happen under one lock so that a single surplus
    /// slot is claimed by exactly one worker.
    pub(crate) fn retire_if_surplus(&self) -> bool {
        let mut counts = self.counts();
        if counts.stopping.is_some() || counts.current <= counts.desired {
            return false;
        }
        counts.current -= 1;
        drop(counts);
        self.changed.notify_all();
        true
    }

    /// Gives up the caller's slot unconditionally and returns the new count.
    pub(crate) fn release_slot(&self) -> usize {
        let mut counts = self.counts();
        counts.current = counts.current.saturating_sub(1);
        let live = counts.current;
        drop(counts);
        self.changed.notify_all();
        live
    }

    /// Turns a drain into an abort once the last live worker has retired
    /// during setup.
    pub(crate) fn abandon_drain(&self, worker_id: usize, reason: String) {
        let mut counts = self.counts();
        if counts.stopping != Some(ShutdownMode::Drain) || counts.current > 0 {
            return;
        }
        let discarded = self.queue.clear();
        counts.stopping = Some(ShutdownMode::Abort);
        tracing::warn!(
            target: tags::TARGET_CONTROLLER,
            worker_id,
            discarded,
            reason = %reason,
            "drain abandoned after worker setup failure"
        );
        counts.abandoned = Some(TapeqError::DrainAbandoned {
            worker_id,
            discarded,
            reason,
        });
        drop(counts);
        self.changed.notify_all();
        self.queue.notify_all_waiters();
    }

    pub(crate) fn unregister(&self, worker_id: usize) {
        lock_unpoisoned(&self.registry).remove(&worker_id);
    }

    pub(crate) fn record_job(&self, ok: bool) {
        self.completed.fetch_add(1, Ordering::AcqRel);
        if !ok {
            self.failed.fetch_add(1, Ordering::AcqRel);
        }
    }
}

/// Self-scaling pool of worker threads fed from a FIFO job queue.
///
/// A background controller thread spawns workers whenever fewer than the
/// desired number are alive. Shrinking is cooperative: a worker retires on
/// its own after finishing a job or an idle wait while the pool has more
/// workers than desired. Counts therefore converge eventually, not
/// immediately.
///
/// # Example
/// ```
/// use std::sync::Arc;
/// use std::sync::atomic::{AtomicUsize, Ordering};
///
/// use tapeq_core::{Job, NoopHooks, WorkerPool};
///
/// let pool = WorkerPool::new(2, NoopHooks)?;
/// let done = Arc::new(AtomicUsize::new(0));
/// for _ in 0..8 {
///     let done = Arc::clone(&done);
///     pool.add_work(Job::new(move |_worker| {
///         done.fetch_add(1, Ordering::SeqCst);
///         Ok(())
///     }))?;
/// }
/// pool.join()?;
/// assert_eq!(done.load(Ordering::SeqCst), 8);
/// # Ok::<(), tapeq_core::TapeqError>(())
/// ```
pub struct WorkerPool<H: WorkerHooks> {
    shared: Arc<PoolShared<H>>,
    controller: Option<JoinHandle<usize>>,
}

impl<H: WorkerHooks> WorkerPool<H> {
    /// Creates a pool targeting `desired` workers with default options.
    pub fn new(desired: usize, hooks: H) -> Result<Self> {
        Self::with_options(desired, hooks, WorkerPoolOptions::default())
    }

    pub fn with_options(desired: usize, hooks: H, options: WorkerPoolOptions) -> Result<Self> {
        Self::with_telemetry(desired, hooks, options, Arc::new(DefaultWorkerTelemetry))
    }

    /// Creates a pool with a custom telemetry backend.
    ///
    /// Returns as soon as the controller thread is running; workers are
    /// spawned in the background.
    pub fn with_telemetry(
        desired: usize,
        hooks: H,
        options: WorkerPoolOptions,
        telemetry: Arc<dyn WorkerTelemetry>,
    ) -> Result<Self> {
        tracing::info!(target: tags::TARGET_CONTROLLER, desired, "initializing worker pool");
        let controller_name = format!("{}-controller", options.thread_name_prefix);
        let shared = Arc::new(PoolShared {
            hooks,
            queue: JobQueue::new(),
            options,
            telemetry,
            counts: Mutex::new(PoolCounts {
                current: 0,
                desired,
                next_id: 1,
                stopping: None,
                abandoned: None,
            }),
            changed: Condvar::new(),
            registry: Mutex::new(BTreeMap::new()),
            submitted: AtomicUsize::new(0),
            completed: AtomicUsize::new(0),
            failed: AtomicUsize::new(0),
        });

        let controller_shared = Arc::clone(&shared);
        let controller = thread::Builder::new()
            .name(controller_name)
            .spawn(move || run_controller(controller_shared))
            .map_err(|error| TapeqError::from(error).with_context("spawning pool controller"))?;

        Ok(Self {
            shared,
            controller: Some(controller),
        })
    }

    /// Changes the target worker count. Takes effect asynchronously.
    pub fn set_desired_count(&self, desired: usize) {
        let previous = {
            let mut counts = self.shared.counts();
            std::mem::replace(&mut counts.desired, desired)
        };
        tracing::info!(target: tags::TARGET_CONTROLLER, previous, desired, "desired worker count changed");
        self.shared.changed.notify_all();
        self.shared.queue.notify_all_waiters();
    }

    pub fn desired_count(&self) -> usize {
        self.shared.desired_count()
    }

    /// Number of workers currently holding a slot in the pool.
    pub fn current_count(&self) -> usize {
        self.shared.current_count()
    }

    pub fn pending_jobs(&self) -> usize {
        self.shared.queue.len()
    }

    /// Queues a job for the next idle worker.
    pub fn add_work(&self, job: Job<H::State>) -> Result<()> {
        // Holding the counts lock orders submissions against shutdown.
        let counts = self.shared.counts();
        if counts.stopping.is_some() {
            return Err(TapeqError::PoolShutdown);
        }
        self.shared.queue.enqueue(job)?;
        drop(counts);

        self.shared.submitted.fetch_add(1, Ordering::AcqRel);
        Ok(())
    }

    /// Queues one job per record, in iteration order, each calling `work`.
    ///
    /// Returns the number of jobs queued. Stops at the first rejected job.
    pub fn submit_records<P, I, F>(&self, records: I, work: F) -> Result<usize>
    where
        P: Send + 'static,
        I: IntoIterator<Item = QueryRecord<P>>,
        F: Fn(&mut Worker<H::State>, QueryRecord<P>) -> Result<()> + Send + Sync + 'static,
    {
        let work = Arc::new(work);
        let mut submitted = 0;
        for record in records {
            let work = Arc::clone(&work);
            self.add_work(Job::named("query", move |worker| work(worker, record)))?;
            submitted += 1;
        }
        Ok(submitted)
    }

    /// Ids of workers that have been spawned and not yet terminated.
    pub fn worker_ids(&self) -> Vec<usize> {
        lock_unpoisoned(&self.shared.registry)
            .keys()
            .copied()
            .collect()
    }

    /// Asks one worker to exit after its current job.
    ///
    /// The controller replaces it while the desired count is unchanged.
    /// Returns false when no live worker has this id.
    pub fn abort_worker(&self, worker_id: usize) -> bool {
        let flagged = match lock_unpoisoned(&self.shared.registry).get(&worker_id) {
            Some(running) => {
                running.store(false, Ordering::Release);
                true
            }
            None => false,
        };
        if flagged {
            tracing::info!(target: tags::TARGET_CONTROLLER, worker_id, "worker abort requested");
            self.shared.queue.notify_all_waiters();
        }
        flagged
    }

    pub fn snapshot(&self) -> PoolSnapshot {
        let (current, desired, next_id, shutting_down) = {
            let counts = self.shared.counts();
            (
                counts.current,
                counts.desired,
                counts.next_id,
                counts.stopping.is_some(),
            )
        };

        PoolSnapshot {
            current,
            desired,
            next_id,
            pending: self.shared.queue.len(),
            submitted: self.shared.submitted.load(Ordering::Acquire),
            completed: self.shared.completed.load(Ordering::Acquire),
            failed: self.shared.failed.load(Ordering::Acquire),
            workers: self.worker_ids(),
            shutting_down,
        }
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shared.is_stopping()
    }

    /// Stops accepting work and tells every worker to exit.
    ///
    /// Returns the number of pending jobs discarded (always zero for
    /// [`ShutdownMode::Drain`]). Does not wait; see [`join`](Self::join).
    pub fn shutdown(&self, mode: ShutdownMode) -> usize {
        self.shared.counts().stopping = Some(mode);
        self.shared.changed.notify_all();

        let discarded = match mode {
            ShutdownMode::Drain => 0,
            ShutdownMode::Abort => {
                for running in lock_unpoisoned(&self.shared.registry).values() {
                    running.store(false, Ordering::Release);
                }
                self.shared.queue.clear()
            }
        };
        self.shared.queue.notify_all_waiters();

        tracing::info!(target: tags::TARGET_CONTROLLER, ?mode, discarded, "worker pool shutdown requested");
        discarded
    }

    /// Drains the queue, then waits for the controller and every worker.
    ///
    /// Under [`SetupFailurePolicy::Retire`] a drain with no worker able to
    /// finish setup gives up, discards the pending jobs and fails with
    /// [`TapeqError::DrainAbandoned`].
    pub fn join(mut self) -> Result<()> {
        if !self.is_shutting_down() {
            self.shutdown(ShutdownMode::Drain);
        }

        let Some(controller) = self.controller.take() else {
            return Ok(());
        };
        let panicked = controller
            .join()
            .map_err(|payload| TapeqError::WorkerPanic(panic_message(payload.as_ref())))?;
        if panicked > 0 {
            return Err(TapeqError::WorkerPanic(format!(
                "{panicked} worker thread(s) panicked"
            )));
        }
        match self.shared.counts().abandoned.take() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}

impl<H: WorkerHooks> Drop for WorkerPool<H> {
    fn drop(&mut self) {
        if self.controller.is_some() && !self.is_shutting_down() {
            self.shutdown(ShutdownMode::Drain);
        }
    }
}

fn run_controller<H: WorkerHooks>(shared: Arc<PoolShared<H>>) -> usize {
    let mut workers: Vec<(usize, JoinHandle<()>)> = Vec::new();
    let mut panicked = 0;
    let mut last_sample = None;
    let mut last_round = None;
    let tick = shared.options.controller_tick;

    let mut counts = shared.counts();
    loop {
        // A drain keeps at least one worker alive until the queue is empty.
        let target = match counts.stopping {
            None => counts.desired,
            Some(ShutdownMode::Drain) if !shared.queue.is_empty() => counts.desired.max(1),
            Some(_) => break,
        };

        let sample = (counts.current, counts.desired);
        if last_sample != Some(sample) {
            last_sample = Some(sample);
            tracing::debug!(
                target: tags::TARGET_CONTROLLER,
                current = counts.current,
                desired = counts.desired,
                "pool counts changed"
            );
        }

        // At most one spawn round per tick, which bounds respawn churn when
        // workers keep retiring during setup.
        let mut wait_for = tick;
        if target > counts.current {
            match last_round.map(|at: Instant| at.elapsed()) {
                Some(elapsed) if elapsed < tick => wait_for = tick - elapsed,
                _ => {
                    let missing = target - counts.current;
                    tracing::debug!(target: tags::TARGET_CONTROLLER, missing, "spawning workers");
                    for _ in 0..missing {
                        match spawn_worker(&shared, &mut counts) {
                            Ok(spawned) => workers.push(spawned),
                            Err(error) => {
                                tracing::error!(target: tags::TARGET_CONTROLLER, %error, "failed to spawn worker");
                                break;
                            }
                        }
                    }
                    last_round = Some(Instant::now());
                }
            }
        }

        counts = match shared.changed.wait_timeout(counts, wait_for) {
            Ok((guard, _)) => guard,
            Err(poisoned) => poisoned.into_inner().0,
        };
        panicked += reap_finished(&mut workers);
    }
    drop(counts);

    for (worker_id, handle) in workers {
        if !join_worker(worker_id, handle) {
            panicked += 1;
        }
    }
    tracing::debug!(target: tags::TARGET_CONTROLLER, "controller stopped");
    panicked
}

/// Spawns one worker while the caller holds the counts lock.
fn spawn_worker<H: WorkerHooks>(
    shared: &Arc<PoolShared<H>>,
    counts: &mut PoolCounts,
) -> Result<(usize, JoinHandle<()>)> {
    let worker_id = counts.next_id;
    let running = Arc::new(AtomicBool::new(true));
    lock_unpoisoned(&shared.registry).insert(worker_id, Arc::clone(&running));

    let worker = Worker::new(worker_id, running);
    let worker_shared = Arc::clone(shared);
    let spawned = thread::Builder::new()
        .name(format!("{}-worker-{worker_id}", shared.options.thread_name_prefix))
        .spawn(move || run_worker(worker, worker_shared));
    let handle = match spawned {
        Ok(handle) => handle,
        Err(error) => {
            shared.unregister(worker_id);
            return Err(TapeqError::from(error).with_context(format!("spawning worker {worker_id}")));
        }
    };

    counts.next_id += 1;
    counts.current += 1;
    shared.telemetry.on_worker_spawned(worker_id, counts.current);
    tracing::info!(
        target: tags::TARGET_CONTROLLER,
        worker_id,
        current = counts.current,
        desired = counts.desired,
        "created worker"
    );
    Ok((worker_id, handle))
}

fn reap_finished(workers: &mut Vec<(usize, JoinHandle<()>)>) -> usize {
    let mut panicked = 0;
    let mut index = 0;
    while index < workers.len() {
        if workers[index].1.is_finished() {
            let (worker_id, handle) = workers.swap_remove(index);
            if !join_worker(worker_id, handle) {
                panicked += 1;
            }
        } else {
            index += 1;
        }
    }
    panicked
}

fn join_worker(worker_id: usize, handle: JoinHandle<()>) -> bool {
    match handle.join() {
        Ok(()) => true,
        Err(payload) => {
            tracing::error!(
                target: tags::TARGET_CONTROLLER,
                worker_id,
                panic = %panic_message(payload.as_ref()),
                "worker thread panicked"
            );
            false
        }
    }
}
