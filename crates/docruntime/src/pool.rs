use doccore::{ExecError, ExecutorResult};
use futures::future::BoxFuture;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc as std_mpsc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio_util::sync::CancellationToken;

/// A unit of work for a pool worker: builds the executor future on the
/// worker's own runtime.
pub type PoolJob =
    Box<dyn FnOnce() -> BoxFuture<'static, Result<ExecutorResult, ExecError>> + Send>;

struct WorkerJob {
    job: PoolJob,
    cancel: CancellationToken,
    reply: oneshot::Sender<Result<ExecutorResult, ExecError>>,
}

/// Handle to one worker thread. Holding it means the worker is claimed;
/// dropping it closes the job channel and the thread exits.
struct Worker {
    id: usize,
    jobs: std_mpsc::Sender<WorkerJob>,
}

/// Fixed-size pool of OS worker threads for parallelizable node
/// operations.
///
/// Idle workers queue up and are claimed in FIFO order, so dispatch is
/// fair rather than biased toward one worker. Each worker owns a
/// current-thread tokio runtime and drains one job at a time.
pub struct WorkerPool {
    size: usize,
    idle_tx: mpsc::Sender<Worker>,
    idle_rx: Mutex<mpsc::Receiver<Worker>>,
    next_id: AtomicUsize,
}

impl WorkerPool {
    pub fn new(size: usize) -> Self {
        let size = size.max(1);
        let (idle_tx, idle_rx) = mpsc::channel(size);
        let pool = Self {
            size,
            idle_tx,
            idle_rx: Mutex::new(idle_rx),
            next_id: AtomicUsize::new(0),
        };
        for _ in 0..size {
            let worker = pool.spawn_worker();
            // Capacity equals the worker count, so this cannot be full.
            let _ = pool.idle_tx.try_send(worker);
        }
        pool
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Run a job on the next idle worker, enforcing `timeout`.
    ///
    /// On timeout the job is cancelled, the worker discarded and
    /// replaced, and `ExecError::Timeout` surfaces to the caller.
    pub async fn submit(&self, job: PoolJob, timeout: Duration) -> Result<ExecutorResult, ExecError> {
        let worker = {
            let mut idle = self.idle_rx.lock().await;
            idle.recv()
                .await
                .ok_or_else(|| ExecError::Worker("worker pool is shut down".to_string()))?
        };

        let cancel = CancellationToken::new();
        let (reply_tx, reply_rx) = oneshot::channel();
        let sent = worker.jobs.send(WorkerJob {
            job,
            cancel: cancel.clone(),
            reply: reply_tx,
        });
        if sent.is_err() {
            self.replace(worker);
            return Err(ExecError::Worker("worker thread is gone".to_string()));
        }

        match tokio::time::timeout(timeout, reply_rx).await {
            Ok(Ok(result)) => {
                self.release(worker);
                result
            }
            Ok(Err(_)) => {
                self.replace(worker);
                Err(ExecError::Worker("worker thread exited mid-job".to_string()))
            }
            Err(_) => {
                cancel.cancel();
                self.replace(worker);
                Err(ExecError::Timeout {
                    seconds: timeout.as_secs(),
                })
            }
        }
    }

    fn spawn_worker(&self) -> Worker {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (job_tx, job_rx) = std_mpsc::channel::<WorkerJob>();
        std::thread::spawn(move || worker_loop(id, job_rx));
        Worker { id, jobs: job_tx }
    }

    fn release(&self, worker: Worker) {
        let _ = self.idle_tx.try_send(worker);
    }

    /// Discard a worker and restore pool capacity with a fresh thread.
    fn replace(&self, worker: Worker) {
        tracing::warn!("Discarding worker {}", worker.id);
        drop(worker);
        let _ = self.idle_tx.try_send(self.spawn_worker());
    }
}

fn worker_loop(id: usize, jobs: std_mpsc::Receiver<WorkerJob>) {
    let rt = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(rt) => rt,
        Err(err) => {
            tracing::error!("Worker {} failed to build runtime: {}", id, err);
            return;
        }
    };

    while let Ok(WorkerJob { job, cancel, reply }) = jobs.recv() {
        let result = rt.block_on(async {
            let fut = job();
            tokio::select! {
                result = fut => result,
                _ = cancel.cancelled() => {
                    Err(ExecError::Worker("job cancelled".to_string()))
                }
            }
        });
        // The receiver may be gone if the submitter timed out.
        let _ = reply.send(result);
    }
}
