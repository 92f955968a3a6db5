//! The bounded-concurrency executor contract the pool dispatches through.

use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::oneshot;

use crate::error::PoolError;

/// Immutable occupancy snapshot at the moment of the call — not a live view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PoolStats {
    pub total_workers: usize,
    pub busy_workers: usize,
    pub idle_workers: usize,
    pub pending_tasks: usize,
}

/// A bounded set of workers accepting named tasks with argument lists.
///
/// Implementations queue when all workers are busy and dispatch in submission
/// order (FIFO, no priority). The pool treats this as an opaque black box;
/// test doubles substitute it without spawning processes.
#[async_trait]
pub trait WorkerExecutor: Send + Sync {
    /// Submit one task and wait for its raw serialized result.
    async fn exec(&self, task: &str, args: Vec<String>) -> Result<String, PoolError>;

    /// Current occupancy snapshot.
    fn stats(&self) -> PoolStats;

    /// Stop all workers. `force = false` lets already-dispatched tasks
    /// complete first; `force = true` tears workers down immediately and
    /// in-flight tasks fail. Returns once every worker has exited.
    async fn terminate(&self, force: bool) -> Result<(), PoolError>;
}

/// One queued unit of work inside an executor.
pub(crate) struct Job {
    pub task: String,
    pub args: Vec<String>,
    pub reply: oneshot::Sender<Result<String, PoolError>>,
}
