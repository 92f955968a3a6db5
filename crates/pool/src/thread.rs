//! In-process executor: bounded workers driving a [`TaskHandler`].
//!
//! Same lifecycle as the process executor — a shared FIFO queue, long-lived
//! worker tasks, graceful/forced shutdown — but each job runs in-process
//! through a handler trait object instead of a child process. This backs
//! worker-kind `thread` and is the natural executor for tests.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot, Mutex, Notify};
use tokio::task::JoinHandle;
use tracing::debug;

use crate::error::PoolError;
use crate::executor::{Job, PoolStats, WorkerExecutor};

/// In-process implementation of a task. Receives the same `(task, args)`
/// pairs an out-of-process worker would and returns the raw serialized
/// result string.
#[async_trait]
pub trait TaskHandler: Send + Sync {
    async fn handle(&self, task: &str, args: &[String]) -> Result<String, PoolError>;
}

/// Placeholder handler for thread-kind pools built without one registered.
/// Construction never fails; every task does.
pub(crate) struct UnconfiguredHandler;

#[async_trait]
impl TaskHandler for UnconfiguredHandler {
    async fn handle(&self, _task: &str, _args: &[String]) -> Result<String, PoolError> {
        Err(PoolError::Executor(
            "no in-process task handler registered".to_string(),
        ))
    }
}

/// Bounded pool of in-process workers.
pub struct ThreadPoolExecutor {
    handler: Arc<dyn TaskHandler>,
    total: usize,
    queue_tx: Mutex<Option<mpsc::UnboundedSender<Job>>>,
    queue_rx: Arc<Mutex<mpsc::UnboundedReceiver<Job>>>,
    busy: Arc<AtomicUsize>,
    pending: Arc<AtomicUsize>,
    forced: Arc<AtomicBool>,
    force_notify: Arc<Notify>,
    started: AtomicBool,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl ThreadPoolExecutor {
    /// Prepare a pool of up to `max_workers` workers. Worker tasks start on
    /// first use so construction works outside a runtime and never fails.
    pub fn new(handler: Arc<dyn TaskHandler>, max_workers: usize) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            handler,
            total: max_workers.max(1),
            queue_tx: Mutex::new(Some(tx)),
            queue_rx: Arc::new(Mutex::new(rx)),
            busy: Arc::new(AtomicUsize::new(0)),
            pending: Arc::new(AtomicUsize::new(0)),
            forced: Arc::new(AtomicBool::new(false)),
            force_notify: Arc::new(Notify::new()),
            started: AtomicBool::new(false),
            workers: Mutex::new(Vec::new()),
        }
    }

    async fn ensure_started(&self) {
        if self.started.swap(true, Ordering::SeqCst) {
            return;
        }
        let mut workers = self.workers.lock().await;
        for id in 0..self.total {
            let handler = Arc::clone(&self.handler);
            let queue = Arc::clone(&self.queue_rx);
            let busy = Arc::clone(&self.busy);
            let pending = Arc::clone(&self.pending);
            let forced = Arc::clone(&self.forced);
            let notify = Arc::clone(&self.force_notify);
            workers.push(tokio::spawn(async move {
                worker_loop(id, handler, queue, busy, pending, forced, notify).await;
            }));
        }
        debug!(workers = self.total, "thread pool workers started");
    }
}

#[async_trait]
impl WorkerExecutor for ThreadPoolExecutor {
    async fn exec(&self, task: &str, args: Vec<String>) -> Result<String, PoolError> {
        self.ensure_started().await;
        let tx = self
            .queue_tx
            .lock()
            .await
            .clone()
            .ok_or(PoolError::Terminated)?;

        let (reply_tx, reply_rx) = oneshot::channel();
        self.pending.fetch_add(1, Ordering::SeqCst);
        if tx
            .send(Job {
                task: task.to_string(),
                args,
                reply: reply_tx,
            })
            .is_err()
        {
            self.pending.fetch_sub(1, Ordering::SeqCst);
            return Err(PoolError::Terminated);
        }

        match reply_rx.await {
            Ok(result) => result,
            Err(_) => Err(PoolError::Executor(
                "worker pool shut down before the task completed".to_string(),
            )),
        }
    }

    fn stats(&self) -> PoolStats {
        let busy = self.busy.load(Ordering::SeqCst).min(self.total);
        PoolStats {
            total_workers: self.total,
            busy_workers: busy,
            idle_workers: self.total - busy,
            pending_tasks: self.pending.load(Ordering::SeqCst),
        }
    }

    async fn terminate(&self, force: bool) -> Result<(), PoolError> {
        self.queue_tx.lock().await.take();
        if force {
            self.forced.store(true, Ordering::SeqCst);
            self.force_notify.notify_waiters();
        }
        let handles = std::mem::take(&mut *self.workers.lock().await);
        for handle in handles {
            handle
                .await
                .map_err(|e| PoolError::Termination(format!("worker task failed: {e}")))?;
        }
        // Fail any job still buffered in the queue so its caller is not left
        // waiting on a reply that will never come.
        let mut rx = self.queue_rx.lock().await;
        while let Ok(job) = rx.try_recv() {
            let _ = job.reply.send(Err(PoolError::Executor(
                "worker pool was terminated before the task was dispatched".to_string(),
            )));
        }
        self.busy.store(0, Ordering::SeqCst);
        self.pending.store(0, Ordering::SeqCst);
        Ok(())
    }
}

async fn worker_loop(
    id: usize,
    handler: Arc<dyn TaskHandler>,
    queue: Arc<Mutex<mpsc::UnboundedReceiver<Job>>>,
    busy: Arc<AtomicUsize>,
    pending: Arc<AtomicUsize>,
    forced: Arc<AtomicBool>,
    notify: Arc<Notify>,
) {
    loop {
        if forced.load(Ordering::SeqCst) {
            break;
        }
        let job = tokio::select! {
            _ = notify.notified() => break,
            received = async { queue.lock().await.recv().await } => match received {
                Some(job) => job,
                None => break, // queue closed and drained
            },
        };

        pending.fetch_sub(1, Ordering::SeqCst);
        busy.fetch_add(1, Ordering::SeqCst);
        // Arm the shutdown waiter before the job starts so a force signal
        // landing between recv and this select is not missed.
        let shutdown = notify.notified();
        tokio::pin!(shutdown);
        shutdown.as_mut().enable();
        let result = if forced.load(Ordering::SeqCst) {
            Err(PoolError::Executor(
                "worker pool was force-terminated".to_string(),
            ))
        } else {
            tokio::select! {
                _ = &mut shutdown => Err(PoolError::Executor(
                    "worker pool was force-terminated".to_string(),
                )),
                result = handler.handle(&job.task, &job.args) => result,
            }
        };
        busy.fetch_sub(1, Ordering::SeqCst);
        let _ = job.reply.send(result);
    }
    debug!(worker = id, "thread worker exited");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::sync::Mutex as AsyncMutex;

    /// Handler that records calls and tracks concurrent occupancy.
    struct RecordingHandler {
        calls: AsyncMutex<Vec<String>>,
        current: AtomicUsize,
        high_water: AtomicUsize,
        delay: Duration,
    }

    impl RecordingHandler {
        fn new(delay: Duration) -> Self {
            Self {
                calls: AsyncMutex::new(Vec::new()),
                current: AtomicUsize::new(0),
                high_water: AtomicUsize::new(0),
                delay,
            }
        }
    }

    #[async_trait]
    impl TaskHandler for RecordingHandler {
        async fn handle(&self, _task: &str, args: &[String]) -> Result<String, PoolError> {
            let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
            self.high_water.fetch_max(now, Ordering::SeqCst);
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            self.calls.lock().await.push(args[0].clone());
            self.current.fetch_sub(1, Ordering::SeqCst);
            Ok(format!("done:{}", args[0]))
        }
    }

    #[tokio::test]
    async fn executes_a_task_and_returns_its_result() {
        let handler = Arc::new(RecordingHandler::new(Duration::ZERO));
        let executor = ThreadPoolExecutor::new(handler.clone(), 2);

        let raw = executor.exec("run", vec!["a.js".into()]).await.unwrap();
        assert_eq!(raw, "done:a.js");
        assert_eq!(handler.calls.lock().await.as_slice(), ["a.js"]);

        executor.terminate(false).await.unwrap();
    }

    #[tokio::test]
    async fn single_worker_dispatches_in_submission_order() {
        let handler = Arc::new(RecordingHandler::new(Duration::from_millis(5)));
        let executor = ThreadPoolExecutor::new(handler.clone(), 1);

        let (a, b, c) = tokio::join!(
            executor.exec("run", vec!["first".into()]),
            executor.exec("run", vec!["second".into()]),
            executor.exec("run", vec!["third".into()]),
        );
        a.unwrap();
        b.unwrap();
        c.unwrap();

        assert_eq!(
            handler.calls.lock().await.as_slice(),
            ["first", "second", "third"]
        );
        executor.terminate(false).await.unwrap();
    }

    #[tokio::test]
    async fn concurrency_never_exceeds_max_workers() {
        let handler = Arc::new(RecordingHandler::new(Duration::from_millis(30)));
        let executor = Arc::new(ThreadPoolExecutor::new(handler.clone(), 2));

        let mut handles = Vec::new();
        for i in 0..4 {
            let executor = Arc::clone(&executor);
            handles.push(tokio::spawn(async move {
                executor.exec("run", vec![format!("t{i}")]).await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        assert_eq!(handler.high_water.load(Ordering::SeqCst), 2);
        executor.terminate(false).await.unwrap();
    }

    #[tokio::test]
    async fn stats_reflect_busy_and_pending() {
        let handler = Arc::new(RecordingHandler::new(Duration::from_millis(100)));
        let executor = Arc::new(ThreadPoolExecutor::new(handler, 1));

        let mut handles = Vec::new();
        for i in 0..3 {
            let executor = Arc::clone(&executor);
            handles.push(tokio::spawn(async move {
                executor.exec("run", vec![format!("t{i}")]).await
            }));
        }
        tokio::time::sleep(Duration::from_millis(30)).await;

        let stats = executor.stats();
        assert_eq!(stats.total_workers, 1);
        assert_eq!(stats.busy_workers, 1);
        assert_eq!(stats.idle_workers, 0);
        assert_eq!(stats.pending_tasks, 2);

        for handle in handles {
            handle.await.unwrap().unwrap();
        }
        let stats = executor.stats();
        assert_eq!(stats.busy_workers, 0);
        assert_eq!(stats.pending_tasks, 0);
        executor.terminate(false).await.unwrap();
    }

    #[tokio::test]
    async fn graceful_terminate_lets_in_flight_work_finish() {
        let handler = Arc::new(RecordingHandler::new(Duration::from_millis(80)));
        let executor = Arc::new(ThreadPoolExecutor::new(handler.clone(), 1));

        let runner = {
            let executor = Arc::clone(&executor);
            tokio::spawn(async move { executor.exec("run", vec!["slow".into()]).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;

        executor.terminate(false).await.unwrap();
        let result = runner.await.unwrap();
        assert_eq!(result.unwrap(), "done:slow");
    }

    #[tokio::test]
    async fn force_terminate_fails_in_flight_work() {
        let handler = Arc::new(RecordingHandler::new(Duration::from_secs(10)));
        let executor = Arc::new(ThreadPoolExecutor::new(handler, 1));

        let runner = {
            let executor = Arc::clone(&executor);
            tokio::spawn(async move { executor.exec("run", vec!["stuck".into()]).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;

        executor.terminate(true).await.unwrap();
        let result = runner.await.unwrap();
        assert!(result.is_err(), "in-flight task should fail on force");
    }

    #[tokio::test]
    async fn force_terminate_fails_queued_jobs_too() {
        let handler = Arc::new(RecordingHandler::new(Duration::from_secs(10)));
        let executor = Arc::new(ThreadPoolExecutor::new(handler, 1));

        let mut handles = Vec::new();
        for i in 0..3 {
            let executor = Arc::clone(&executor);
            handles.push(tokio::spawn(async move {
                executor.exec("run", vec![format!("t{i}")]).await
            }));
        }
        tokio::time::sleep(Duration::from_millis(20)).await;

        tokio::time::timeout(Duration::from_secs(5), executor.terminate(true))
            .await
            .expect("force terminate should not wait")
            .unwrap();
        for handle in handles {
            let result = handle.await.unwrap();
            assert!(result.is_err(), "queued and in-flight jobs should fail");
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn force_terminate_right_after_submit_resolves_promptly() {
        // No settling sleep: the force signal may land in the window
        // between a worker receiving the job and starting it.
        let handler = Arc::new(RecordingHandler::new(Duration::from_secs(30)));
        let executor = Arc::new(ThreadPoolExecutor::new(handler, 1));

        let runner = {
            let executor = Arc::clone(&executor);
            tokio::spawn(async move { executor.exec("run", vec!["racy".into()]).await })
        };

        tokio::time::timeout(Duration::from_secs(5), executor.terminate(true))
            .await
            .expect("force terminate should not wait for the job")
            .unwrap();
        let result = tokio::time::timeout(Duration::from_secs(5), runner)
            .await
            .expect("submitted run should resolve promptly")
            .unwrap();
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn exec_after_terminate_is_rejected() {
        let handler = Arc::new(RecordingHandler::new(Duration::ZERO));
        let executor = ThreadPoolExecutor::new(handler, 1);

        executor.terminate(false).await.unwrap();
        let result = executor.exec("run", vec!["late.js".into()]).await;
        assert!(matches!(result, Err(PoolError::Terminated)));
    }

    #[tokio::test]
    async fn unconfigured_handler_fails_each_task() {
        let executor = ThreadPoolExecutor::new(Arc::new(UnconfiguredHandler), 1);
        let result = executor.exec("run", vec!["a.js".into()]).await;
        assert!(matches!(result, Err(PoolError::Executor(_))));
        executor.terminate(false).await.unwrap();
    }
}
