use std::fmt;
use std::marker::PhantomData;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use serde::{Deserialize, Serialize};

use crate::core::worker_pool::PoolShared;
use crate::error::TapeqError;
use crate::panic_message;
use crate::telemetry::tags;
use crate::types::Result;

/// Lifecycle states of a worker thread.
///
/// `Setup -> Running -> {Shrinking, Aborted} -> Terminated`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WorkerState {
    Setup,
    Running,
    /// Retiring because the pool has more workers than desired.
    Shrinking,
    /// Retiring because the running flag was cleared or the pool is stopping.
    Aborted,
    Terminated,
}

impl WorkerState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Setup => "setup",
            Self::Running => "running",
            Self::Shrinking => "shrinking",
            Self::Aborted => "aborted",
            Self::Terminated => "terminated",
        }
    }
}

impl fmt::Display for WorkerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a worker does when its setup hook fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SetupFailurePolicy {
    /// Log the failure and run jobs without worker-local state.
    #[default]
    Continue,
    /// Log the failure and retire the worker before it takes any job.
    Retire,
}

/// Handle passed to every job a worker runs.
///
/// Owns the worker-local state built by [`WorkerHooks::setup`], typically a
/// storage-manager session.
pub struct Worker<S> {
    id: usize,
    state: Option<S>,
    running: Arc<AtomicBool>,
}

impl<S> Worker<S> {
    pub(crate) fn new(id: usize, running: Arc<AtomicBool>) -> Self {
        Self {
            id,
            state: None,
            running,
        }
    }

    pub fn id(&self) -> usize {
        self.id
    }

    /// Worker-local state, `None` when setup failed.
    pub fn state(&self) -> Option<&S> {
        self.state.as_ref()
    }

    pub fn state_mut(&mut self) -> Option<&mut S> {
        self.state.as_mut()
    }

    /// False once the worker was asked to abort.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }
}

impl<S> fmt::Debug for Worker<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Worker")
            .field("id", &self.id)
            .field("has_state", &self.state.is_some())
            .field("running", &self.is_running())
            .finish()
    }
}

/// Per-worker setup and cleanup callbacks.
pub trait WorkerHooks: Send + Sync + 'static {
    /// Worker-local state, created once per worker.
    type State: Send + 'static;

    fn setup(&self, worker_id: usize) -> Result<Self::State>;

    fn cleanup(&self, worker_id: usize, state: Option<Self::State>) -> Result<()> {
        let _ = (worker_id, state);
        Ok(())
    }
}

/// Hooks for workers that need no local state.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopHooks;

impl WorkerHooks for NoopHooks {
    type State = ();

    fn setup(&self, _worker_id: usize) -> Result<()> {
        Ok(())
    }
}

/// [`WorkerHooks`] built from a pair of closures.
pub struct FnHooks<S, FS, FC> {
    setup: FS,
    cleanup: FC,
    _state: PhantomData<fn() -> S>,
}

impl<S, FS, FC> FnHooks<S, FS, FC>
where
    FS: Fn(usize) -> Result<S>,
    FC: Fn(usize, Option<S>) -> Result<()>,
{
    pub fn new(setup: FS, cleanup: FC) -> Self {
        Self {
            setup,
            cleanup,
            _state: PhantomData,
        }
    }
}

impl<S, FS, FC> WorkerHooks for FnHooks<S, FS, FC>
where
    S: Send + 'static,
    FS: Fn(usize) -> Result<S> + Send + Sync + 'static,
    FC: Fn(usize, Option<S>) -> Result<()> + Send + Sync + 'static,
{
    type State = S;

    fn setup(&self, worker_id: usize) -> Result<S> {
        (self.setup)(worker_id)
    }

    fn cleanup(&self, worker_id: usize, state: Option<S>) -> Result<()> {
        (self.cleanup)(worker_id, state)
    }
}

type WorkFn<S> = Box<dyn FnOnce(&mut Worker<S>) -> Result<()> + Send>;

/// A unit of work queued on a [`WorkerPool`](crate::WorkerPool).
///
/// The returned status is only logged and counted; a failed job is never
/// retried.
pub struct Job<S> {
    kind: &'static str,
    work: WorkFn<S>,
}

impl<S> Job<S> {
    pub fn new<F>(work: F) -> Self
    where
        F: FnOnce(&mut Worker<S>) -> Result<()> + Send + 'static,
    {
        Self::named("job", work)
    }

    /// Creates a job with a label used in logs and telemetry.
    pub fn named<F>(kind: &'static str, work: F) -> Self
    where
        F: FnOnce(&mut Worker<S>) -> Result<()> + Send + 'static,
    {
        Self {
            kind,
            work: Box::new(work),
        }
    }

    /// Creates a job that hands `arg` to `work` when it runs.
    pub fn with_arg<A, F>(arg: A, work: F) -> Self
    where
        A: Send + 'static,
        F: FnOnce(&mut Worker<S>, A) -> Result<()> + Send + 'static,
    {
        Self::new(move |worker| work(worker, arg))
    }

    pub fn kind(&self) -> &'static str {
        self.kind
    }

    fn run(self, worker: &mut Worker<S>) -> Result<()> {
        (self.work)(worker)
    }
}

impl<S> fmt::Debug for Job<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Job").field("kind", &self.kind).finish()
    }
}

fn guarded<T>(op: impl FnOnce() -> Result<T>) -> Result<T> {
    match catch_unwind(AssertUnwindSafe(op)) {
        Ok(result) => result,
        Err(payload) => Err(TapeqError::WorkerPanic(panic_message(payload.as_ref()))),
    }
}

/// Thread body of one worker: setup, job loop, retirement, cleanup.
pub(crate) fn run_worker<H: WorkerHooks>(mut worker: Worker<H::State>, shared: Arc<PoolShared<H>>) {
    let id = worker.id;
    tracing::debug!(target: tags::TARGET_WORKER, worker_id = id, state = %WorkerState::Setup, "worker starting");

    let mut setup_error = None;
    let mut state = match guarded(|| shared.hooks.setup(id)) {
        Ok(local) => {
            worker.state = Some(local);
            WorkerState::Running
        }
        Err(error) => {
            tracing::warn!(
                target: tags::TARGET_WORKER,
                worker_id = id,
                %error,
                policy = ?shared.options.setup_failure,
                "worker setup failed"
            );
            match shared.options.setup_failure {
                SetupFailurePolicy::Continue => WorkerState::Running,
                SetupFailurePolicy::Retire => {
                    setup_error = Some(error.to_string());
                    WorkerState::Aborted
                }
            }
        }
    };

    if state == WorkerState::Running {
        state = run_jobs(&mut worker, &shared);
    }

    // Shrinking already gave up its slot inside the surplus check.
    let live = match state {
        WorkerState::Shrinking => shared.current_count(),
        _ => shared.release_slot(),
    };
    tracing::info!(
        target: tags::TARGET_WORKER,
        worker_id = id,
        reason = %state,
        current = live,
        desired = shared.desired_count(),
        "worker retiring"
    );
    shared.telemetry.on_worker_retired(id, state, live);
    if let Some(reason) = setup_error {
        shared.abandon_drain(id, reason);
    }

    if let Err(error) = guarded(|| shared.hooks.cleanup(id, worker.state.take())) {
        tracing::warn!(target: tags::TARGET_WORKER, worker_id = id, %error, "worker cleanup failed");
    }
    shared.unregister(id);
    tracing::debug!(target: tags::TARGET_WORKER, worker_id = id, state = %WorkerState::Terminated, "worker terminated");
}

fn run_jobs<H: WorkerHooks>(worker: &mut Worker<H::State>, shared: &PoolShared<H>) -> WorkerState {
    loop {
        if !worker.is_running() {
            return WorkerState::Aborted;
        }

        match shared.queue.dequeue() {
            Some(job) => run_job(worker, job, shared),
            None => {
                if shared.is_stopping() {
                    return WorkerState::Aborted;
                }
                shared.telemetry.on_queue_depth(worker.id, 0);
                shared.queue.wait_for_work(shared.options.idle_poll_interval);
            }
        }

        if shared.retire_if_surplus() {
            return WorkerState::Shrinking;
        }
    }
}

fn run_job<H: WorkerHooks>(worker: &mut Worker<H::State>, job: Job<H::State>, shared: &PoolShared<H>) {
    let kind = job.kind();
    shared.telemetry.on_queue_depth(worker.id, shared.queue.len());
    shared.telemetry.on_task_started(worker.id, kind);
    let started_at = Instant::now();

    let result = guarded(|| job.run(worker));

    let elapsed = started_at.elapsed();
    match &result {
        Ok(()) => {
            shared.telemetry.on_task_finished(worker.id, kind, elapsed);
            tracing::debug!(
                target: tags::TARGET_WORKER,
                worker_id = worker.id,
                kind,
                elapsed_us = crate::telemetry::elapsed_us(elapsed),
                "job finished"
            );
        }
        Err(error) => {
            shared.telemetry.on_task_failed(worker.id, kind, elapsed);
            tracing::warn!(
                target: tags::TARGET_WORKER,
                worker_id = worker.id,
                kind,
                %error,
                "job failed"
            );
        }
    }
    shared.record_job(result.is_ok());
}
