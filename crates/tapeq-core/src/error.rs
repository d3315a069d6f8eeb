use std::collections::TryReserveError;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum TapeqError {
    #[error("allocation failed: {0}")]
    Allocation(#[from] TryReserveError),
    #[error("object key {key:?} sorts before last added key {last:?}")]
    OrderViolation { last: String, key: String },
    #[error("stale version of {key:?} (stored {stored}s, presented {presented}s)")]
    StaleVersion {
        key: String,
        stored: i64,
        presented: i64,
    },
    #[error("index {index} out of range (len {len})")]
    IndexOutOfRange { index: usize, len: usize },
    #[error("worker pool is shutting down; no new work accepted")]
    PoolShutdown,
    #[error(
        "drain abandoned after worker {worker_id} failed setup ({discarded} pending jobs discarded): {reason}"
    )]
    DrainAbandoned {
        worker_id: usize,
        discarded: usize,
        reason: String,
    },
    #[error("worker panicked: {0}")]
    WorkerPanic(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("{context}: {source}")]
    Context {
        context: String,
        #[source]
        source: Box<TapeqError>,
    },
    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

impl TapeqError {
    pub fn with_context(self, context: impl Into<String>) -> Self {
        Self::Context {
            context: context.into(),
            source: Box::new(self),
        }
    }
}
