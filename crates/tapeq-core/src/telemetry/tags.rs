/// Log target for worker lifecycle events.
pub const TARGET_WORKER: &str = "tapeq::worker";
/// Log target for controller decisions.
pub const TARGET_CONTROLLER: &str = "tapeq::controller";
/// Log target for query collection ingestion.
pub const TARGET_QUERY: &str = "tapeq::query";

pub const METRIC_QUERY_ADD_APPENDED_COUNT: &str = "tapeq.query.add.appended.count";
pub const METRIC_QUERY_ADD_REPLACED_COUNT: &str = "tapeq.query.add.replaced.count";
pub const METRIC_QUERY_ADD_REJECTED_COUNT: &str = "tapeq.query.add.rejected.count";
pub const METRIC_QUERY_GROW_COUNT: &str = "tapeq.query.grow.count";

pub const METRIC_QUEUE_ENQUEUE_COUNT: &str = "tapeq.queue.enqueue.count";
pub const METRIC_QUEUE_DEQUEUE_COUNT: &str = "tapeq.queue.dequeue.count";

pub const METRIC_WORKER_TASK_COUNT: &str = "tapeq.worker.task.count";
pub const METRIC_WORKER_TASK_START_COUNT: &str = "tapeq.worker.task.start.count";
pub const METRIC_WORKER_TASK_FINISH_COUNT: &str = "tapeq.worker.task.finish.count";
pub const METRIC_WORKER_TASK_FAIL_COUNT: &str = "tapeq.worker.task.fail.count";
pub const METRIC_WORKER_TASK_LATENCY_US: &str = "tapeq.worker.task.latency_us";
pub const METRIC_WORKER_QUEUE_DEPTH: &str = "tapeq.worker.queue.depth";
pub const METRIC_WORKER_QUEUE_DEPTH_HIST: &str = "tapeq.worker.queue.depth.hist";
pub const METRIC_WORKER_ACTIVE_COUNT: &str = "tapeq.worker.active.count";
pub const METRIC_WORKER_SPAWN_COUNT: &str = "tapeq.worker.spawn.count";
pub const METRIC_WORKER_RETIRE_COUNT: &str = "tapeq.worker.retire.count";
pub const METRIC_WORKER_LIVE_COUNT: &str = "tapeq.worker.live.count";
