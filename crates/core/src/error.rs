//! Error types of the pool and the catalog.

use thiserror::Error;

/// Errors from [`crate::pool::TaskPool`].
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PoolError {
    /// A pool must be able to run at least one task.
    #[error("task pool capacity must be at least 1")]
    ZeroCapacity,
    /// `run_all` was called while another `run_all` was still draining.
    #[error("task pool is already running")]
    AlreadyRunning,
    /// Every other task ran to completion; `count` of them panicked.
    #[error("{count} task(s) panicked")]
    TaskPanicked {
        /// Number of panicked tasks.
        count: usize,
    },
}

/// Errors from [`crate::catalog::RemoteCatalog`].
#[derive(Debug, Error)]
pub enum CatalogError {
    /// Paging past the end of the stream. Expected; callers disable "load more".
    #[error("no more records to load")]
    NoMorePages,
    /// No record is loaded at `index`.
    #[error("record index {index} out of range (loaded: {len})")]
    IndexOutOfRange {
        /// Requested index.
        index: usize,
        /// Records loaded at the time of the call.
        len: usize,
    },
    /// The collaborator call failed. Not retried here.
    #[error("remote call failed: {0:#}")]
    TransientRemote(anyhow::Error),
    /// Bulk resolution could not run.
    #[error(transparent)]
    Pool(#[from] PoolError),
}

impl CatalogError {
    /// Wrap a collaborator failure.
    pub fn remote(err: anyhow::Error) -> Self {
        Self::TransientRemote(err)
    }

    /// True for conditions a later call can succeed on without caller changes.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::TransientRemote(_))
    }
}
