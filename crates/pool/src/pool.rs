//! The worker pool orchestrator.
//!
//! Composes the options cache, the executor, and the result codec: `run`
//! validates its input, serializes options through the cache, submits exactly
//! one `"run"` task, and deserializes the raw result exactly once. The pool
//! itself never blocks the calling thread — true parallelism lives entirely
//! inside the executor.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::codec::{self, RunResult, TASK_RUN};
use crate::config::{detected_cpus, PoolConfig, WorkerKind};
use crate::error::PoolError;
use crate::executor::{PoolStats, WorkerExecutor};
use crate::options::{CacheStats, OptionsCache, RunOptions};
use crate::process::ProcessPoolExecutor;
use crate::thread::{TaskHandler, ThreadPoolExecutor, UnconfiguredHandler};

const STATE_RUNNING: u8 = 0;
const STATE_TERMINATING: u8 = 1;
const STATE_TERMINATED: u8 = 2;

/// Fluent builder for a [`WorkerPool`]. `build` never fails.
pub struct WorkerPoolBuilder {
    config: PoolConfig,
    handler: Option<Arc<dyn TaskHandler>>,
    executor: Option<Arc<dyn WorkerExecutor>>,
}

impl WorkerPoolBuilder {
    pub fn new() -> Self {
        Self {
            config: PoolConfig::default(),
            handler: None,
            executor: None,
        }
    }

    /// Replace the whole configuration.
    pub fn config(mut self, config: PoolConfig) -> Self {
        self.config = config;
        self
    }

    pub fn worker_kind(mut self, kind: WorkerKind) -> Self {
        self.config.worker_kind = kind;
        self
    }

    /// Maximum concurrent workers (0 = auto, always resolved to ≥ 1).
    pub fn max_workers(mut self, max_workers: usize) -> Self {
        self.config.max_workers = max_workers;
        self
    }

    /// In-process task handler for thread-kind pools.
    pub fn handler(mut self, handler: Arc<dyn TaskHandler>) -> Self {
        self.handler = Some(handler);
        self
    }

    /// Substitute the executor entirely (test seam).
    pub fn executor(mut self, executor: Arc<dyn WorkerExecutor>) -> Self {
        self.executor = Some(executor);
        self
    }

    pub fn build(self) -> WorkerPool {
        let max_workers = self.config.resolved_max_workers();
        let cpus = detected_cpus();
        if max_workers < 2 {
            info!(max_workers, "pool will run without parallelism");
        }
        if max_workers >= cpus {
            info!(
                max_workers,
                cpus, "worker count meets or exceeds available cores"
            );
        }

        let executor: Arc<dyn WorkerExecutor> = match self.executor {
            Some(executor) => executor,
            None => match self.config.worker_kind {
                WorkerKind::Process => Arc::new(ProcessPoolExecutor::new(
                    self.config.worker_entry(),
                    max_workers,
                )),
                WorkerKind::Thread => {
                    let handler = self.handler.unwrap_or_else(|| {
                        warn!("thread-kind pool built without a task handler");
                        Arc::new(UnconfiguredHandler)
                    });
                    Arc::new(ThreadPoolExecutor::new(handler, max_workers))
                }
            },
        };

        debug!(max_workers, kind = ?self.config.worker_kind, "worker pool created");
        WorkerPool {
            executor,
            cache: Mutex::new(OptionsCache::new()),
            default_options: RunOptions::new(),
            state: AtomicU8::new(STATE_RUNNING),
        }
    }
}

impl Default for WorkerPoolBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Dispatches test-file executions across a bounded set of workers.
///
/// The pool owns its options cache and executor handle from construction to
/// termination. Options values are owned by the caller — the cache keeps only
/// an `(identity, string)` pairing.
pub struct WorkerPool {
    executor: Arc<dyn WorkerExecutor>,
    cache: Mutex<OptionsCache>,
    /// Serialized once, shared by every `run(file, None)` call.
    default_options: RunOptions,
    state: AtomicU8,
}

impl WorkerPool {
    /// Pool with the given configuration and all remaining defaults.
    pub fn new(config: PoolConfig) -> Self {
        Self::builder().config(config).build()
    }

    pub fn builder() -> WorkerPoolBuilder {
        WorkerPoolBuilder::new()
    }

    /// Execute one test file on an idle worker.
    ///
    /// Serializes `options` through the cache (at most one serializer
    /// invocation per options identity), submits exactly one task, and
    /// deserializes the raw result exactly once. `None` uses the pool's
    /// default empty options. An empty or blank `filepath` is rejected
    /// before any executor contact. Rejection is total — no partial
    /// results, no retries.
    pub async fn run(
        &self,
        filepath: &str,
        options: Option<&RunOptions>,
    ) -> Result<RunResult, PoolError> {
        if self.state.load(Ordering::SeqCst) != STATE_RUNNING {
            return Err(PoolError::Terminated);
        }
        if filepath.trim().is_empty() {
            return Err(PoolError::InvalidArgument {
                param: "filepath",
                expected: "a non-empty string",
            });
        }

        let options = options.unwrap_or(&self.default_options);
        let serialized = self.cache.lock().await.serialize(options)?;

        let raw = self
            .executor
            .exec(TASK_RUN, vec![filepath.to_string(), serialized])
            .await?;
        let result = codec::deserialize_result(&raw)?;
        debug!(
            filepath,
            failures = result.failures,
            events = result.events.len(),
            "run complete"
        );
        Ok(result)
    }

    /// Executor occupancy snapshot, passed through verbatim. Diagnostics
    /// only — the pool never schedules off it.
    pub fn stats(&self) -> PoolStats {
        self.executor.stats()
    }

    /// Stop the pool. `force = false` lets in-flight runs finish; `force =
    /// true` tears workers down immediately and in-flight runs fail. Once
    /// termination has begun, further `run` calls are rejected with
    /// [`PoolError::Terminated`].
    pub async fn terminate(&self, force: bool) -> Result<(), PoolError> {
        let previous = self.state.swap(STATE_TERMINATING, Ordering::SeqCst);
        if previous == STATE_TERMINATED {
            self.state.store(STATE_TERMINATED, Ordering::SeqCst);
            return Ok(());
        }
        info!(force, "terminating worker pool");
        self.executor.terminate(force).await?;
        self.state.store(STATE_TERMINATED, Ordering::SeqCst);
        info!("worker pool terminated");
        Ok(())
    }

    /// Cache-backed options serialization, exposed for pre-warming and
    /// testing. `None` serializes the pool's default empty options.
    pub async fn serialize_options(
        &self,
        options: Option<&RunOptions>,
    ) -> Result<String, PoolError> {
        let options = options.unwrap_or(&self.default_options);
        self.cache.lock().await.serialize(options)
    }

    /// Discard every cache entry; the next serialization of any options
    /// value invokes the serializer again.
    pub async fn reset_options_cache(&self) {
        self.cache.lock().await.reset();
    }

    /// Options cache occupancy and traffic counters.
    pub async fn options_cache_stats(&self) -> CacheStats {
        self.cache.lock().await.stats()
    }
}
