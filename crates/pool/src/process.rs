//! Out-of-process executor: bounded child-process workers.
//!
//! Each worker task owns at most one child process, spawned lazily on first
//! use from the configured [`WorkerEntry`]. The protocol is newline-delimited
//! JSON: one [`TaskRequest`] line on the child's stdin, one [`TaskResponse`]
//! line back on its stdout. Children inherit the parent's environment and
//! stderr, so worker logs interleave with the parent's.
//!
//! A worker whose child fails mid-task (spawn error, I/O error, crash) kills
//! the child, surfaces the error to that task's caller, and respawns on the
//! next job. The failed task is never retried.
//!
//! [`TaskRequest`]: crate::codec::TaskRequest
//! [`TaskResponse`]: crate::codec::TaskResponse

use std::process::Stdio;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::{mpsc, oneshot, Mutex, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::codec;
use crate::config::WorkerEntry;
use crate::error::PoolError;
use crate::executor::{Job, PoolStats, WorkerExecutor};

/// A spawned child with its protocol pipes.
struct WorkerChild {
    child: Child,
    stdin: ChildStdin,
    stdout: Lines<BufReader<ChildStdout>>,
}

/// Bounded pool of out-of-process workers.
pub struct ProcessPoolExecutor {
    entry: WorkerEntry,
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

impl ProcessPoolExecutor {
    /// Prepare a pool of up to `max_workers` workers bound to `entry`.
    /// Worker tasks start on first use and spawn their child lazily, so
    /// construction never fails.
    pub fn new(entry: WorkerEntry, max_workers: usize) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            entry,
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
            let entry = self.entry.clone();
            let queue = Arc::clone(&self.queue_rx);
            let busy = Arc::clone(&self.busy);
            let pending = Arc::clone(&self.pending);
            let forced = Arc::clone(&self.forced);
            let notify = Arc::clone(&self.force_notify);
            workers.push(tokio::spawn(async move {
                worker_loop(id, entry, queue, busy, pending, forced, notify).await;
            }));
        }
        debug!(
            workers = self.total,
            program = %self.entry.program.display(),
            "process pool workers started"
        );
    }
}

#[async_trait]
impl WorkerExecutor for ProcessPoolExecutor {
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
    entry: WorkerEntry,
    queue: Arc<Mutex<mpsc::UnboundedReceiver<Job>>>,
    busy: Arc<AtomicUsize>,
    pending: Arc<AtomicUsize>,
    forced: Arc<AtomicBool>,
    notify: Arc<Notify>,
) {
    let mut child: Option<WorkerChild> = None;
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
                result = run_on_child(id, &entry, &mut child, &job.task, &job.args) => result,
            }
        };
        busy.fetch_sub(1, Ordering::SeqCst);

        // A `Worker` error is a well-formed reply — the child's protocol
        // state is intact. Any other failure leaves the pipe in an unknown
        // state: discard the child and respawn on the next job.
        if matches!(result, Err(ref e) if !matches!(e, PoolError::Worker(_))) {
            if let Some(mut failed) = child.take() {
                let _ = failed.child.start_kill();
            }
        }
        let _ = job.reply.send(result);
    }

    if let Some(mut remaining) = child.take() {
        let _ = remaining.child.start_kill();
        let _ = remaining.child.wait().await;
    }
    debug!(worker = id, "process worker exited");
}

/// Run one task on the worker's child process, spawning it first if needed.
async fn run_on_child(
    id: usize,
    entry: &WorkerEntry,
    slot: &mut Option<WorkerChild>,
    task: &str,
    args: &[String],
) -> Result<String, PoolError> {
    if slot.is_none() {
        *slot = Some(spawn_child(id, entry).await?);
    }
    let Some(worker) = slot.as_mut() else {
        return Err(PoolError::Executor(format!("worker {id} has no child process")));
    };

    let line = codec::encode_request(task, args)?;
    worker.stdin.write_all(line.as_bytes()).await?;
    worker.stdin.write_all(b"\n").await?;
    worker.stdin.flush().await?;

    match worker.stdout.next_line().await {
        Ok(Some(response)) => codec::decode_response(&response),
        Ok(None) => Err(PoolError::Executor(format!(
            "worker {id} exited before replying"
        ))),
        Err(e) => Err(PoolError::Io(e)),
    }
}

async fn spawn_child(id: usize, entry: &WorkerEntry) -> Result<WorkerChild, PoolError> {
    let mut child = Command::new(&entry.program)
        .args(&entry.flags)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::inherit())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| {
            warn!(worker = id, program = %entry.program.display(), error = %e, "failed to spawn worker");
            PoolError::Executor(format!(
                "failed to spawn worker `{}`: {e}",
                entry.program.display()
            ))
        })?;

    let stdin = child.stdin.take().ok_or_else(|| {
        PoolError::Executor(format!("worker {id} spawned without a stdin pipe"))
    })?;
    let stdout = child.stdout.take().ok_or_else(|| {
        PoolError::Executor(format!("worker {id} spawned without a stdout pipe"))
    })?;

    debug!(worker = id, pid = child.id(), "worker process spawned");
    Ok(WorkerChild {
        child,
        stdin,
        stdout: BufReader::new(stdout).lines(),
    })
}
