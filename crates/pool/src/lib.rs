//! drover-pool — a worker-pool orchestrator for test-file execution.
//!
//! Callers hand the pool independent work units (a file path plus an opaque
//! options payload); the pool dispatches each to one of a bounded set of
//! workers and returns the deserialized result. Workers are either child
//! processes speaking a JSON-lines protocol (the `drover-worker` binary) or
//! in-process tasks driving a [`TaskHandler`].
//!
//! ```ignore
//! let pool = WorkerPool::builder().max_workers(4).build();
//! let options = RunOptions::new().with("bail", true);
//! let result = pool.run("tests/math.test.js", Some(&options)).await?;
//! println!("{} failures", result.failures);
//! pool.terminate(false).await?;
//! ```

pub mod codec;
pub mod config;
pub mod error;
pub mod executor;
pub mod options;
pub mod pool;
pub mod process;
pub mod thread;

pub use codec::{
    FailureDetail, RunResult, TaskRequest, TaskResponse, TestEvent, TestStatus, TASK_RUN,
};
pub use config::{detected_cpus, PoolConfig, WorkerEntry, WorkerKind};
pub use error::PoolError;
pub use executor::{PoolStats, WorkerExecutor};
pub use options::{CacheStats, OptionsCache, RunOptions};
pub use pool::{WorkerPool, WorkerPoolBuilder};
pub use process::ProcessPoolExecutor;
pub use thread::{TaskHandler, ThreadPoolExecutor};
