pub mod core;
pub mod error;
pub mod query;
pub mod telemetry;
pub mod types;

use std::any::Any;
use std::sync::{Mutex, MutexGuard};

pub use crate::core::{
    FnHooks, Job, JobQueue, NoopHooks, PoolSnapshot, SetupFailurePolicy, ShutdownMode, Worker,
    WorkerHooks, WorkerPool, WorkerPoolOptions, WorkerState,
};
pub use error::TapeqError;
pub use query::{AddOutcome, CollectionOptions, QueryCollection};
pub use telemetry::worker::{DefaultWorkerTelemetry, WorkerTelemetry};
pub use types::{InsertDate, ObjectName, OrderKey, QueryRecord, Result};

/// Locks `mutex`, recovering the guard if a previous holder panicked.
pub(crate) fn lock_unpoisoned<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
