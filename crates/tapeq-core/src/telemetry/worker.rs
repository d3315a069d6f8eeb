use std::time::Duration;

use crate::core::WorkerState;
use crate::telemetry::{self, tags};

/// Telemetry contract for worker runtimes.
///
/// The pool calls these hooks from worker and controller threads; backends
/// must be cheap and must not block.
pub trait WorkerTelemetry: Send + Sync {
    fn on_queue_depth(&self, worker_id: usize, depth: usize);
    fn on_task_started(&self, worker_id: usize, task_kind: &str);
    fn on_task_finished(&self, worker_id: usize, task_kind: &str, elapsed: Duration);
    fn on_task_failed(&self, worker_id: usize, task_kind: &str, elapsed: Duration);
    fn on_worker_spawned(&self, worker_id: usize, live: usize);
    fn on_worker_retired(&self, worker_id: usize, reason: WorkerState, live: usize);
}

/// Default telemetry implementation that reports worker metrics.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultWorkerTelemetry;

impl WorkerTelemetry for DefaultWorkerTelemetry {
    fn on_queue_depth(&self, _worker_id: usize, depth: usize) {
        telemetry::set_gauge(tags::METRIC_WORKER_QUEUE_DEPTH, depth as u64);
        telemetry::record_histogram(tags::METRIC_WORKER_QUEUE_DEPTH_HIST, depth as u64);
    }

    fn on_task_started(&self, _worker_id: usize, _task_kind: &str) {
        telemetry::increment_counter(tags::METRIC_WORKER_TASK_START_COUNT, 1);
        telemetry::adjust_gauge(tags::METRIC_WORKER_ACTIVE_COUNT, 1);
    }

    fn on_task_finished(&self, _worker_id: usize, _task_kind: &str, elapsed: Duration) {
        telemetry::increment_counter(tags::METRIC_WORKER_TASK_FINISH_COUNT, 1);
        telemetry::increment_counter(tags::METRIC_WORKER_TASK_COUNT, 1);
        telemetry::record_histogram(
            tags::METRIC_WORKER_TASK_LATENCY_US,
            telemetry::elapsed_us(elapsed),
        );
        telemetry::adjust_gauge(tags::METRIC_WORKER_ACTIVE_COUNT, -1);
    }

    fn on_task_failed(&self, _worker_id: usize, _task_kind: &str, elapsed: Duration) {
        telemetry::increment_counter(tags::METRIC_WORKER_TASK_FAIL_COUNT, 1);
        telemetry::increment_counter(tags::METRIC_WORKER_TASK_COUNT, 1);
        telemetry::record_histogram(
            tags::METRIC_WORKER_TASK_LATENCY_US,
            telemetry::elapsed_us(elapsed),
        );
        telemetry::adjust_gauge(tags::METRIC_WORKER_ACTIVE_COUNT, -1);
    }

    fn on_worker_spawned(&self, _worker_id: usize, live: usize) {
        telemetry::increment_counter(tags::METRIC_WORKER_SPAWN_COUNT, 1);
        telemetry::set_gauge(tags::METRIC_WORKER_LIVE_COUNT, live as u64);
    }

    fn on_worker_retired(&self, _worker_id: usize, _reason: WorkerState, live: usize) {
        telemetry::increment_counter(tags::METRIC_WORKER_RETIRE_COUNT, 1);
        telemetry::set_gauge(tags::METRIC_WORKER_LIVE_COUNT, live as u64);
    }
}
