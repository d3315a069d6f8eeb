pub mod job_queue;
pub mod worker;
pub mod worker_pool;

pub use job_queue::JobQueue;
pub use worker::{FnHooks, Job, NoopHooks, SetupFailurePolicy, Worker, WorkerHooks, WorkerState};
pub use worker_pool::{PoolSnapshot, ShutdownMode, WorkerPool, WorkerPoolOptions};
