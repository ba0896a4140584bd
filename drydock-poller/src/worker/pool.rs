//! Bounded polling worker pool
//!
//! Tasks go through a bounded mpsc queue. `submit` waits for room, which
//! is how a tick that finds more due work than the pool can absorb gets
//! slowed down instead of piling up tasks in memory.
//!
//! Every task's completion callback runs exactly once: with the executor's
//! result, with a failure if the executor panicked or timed out, or with a
//! cancellation if the pool shut down before the task finished.

use async_trait::async_trait;
use drydock_core::domain::image::{ImageReference, ImageReferenceError};
use drydock_core::domain::schedule::{PollOutcome, PollTarget, SweepSummary};
use drydock_core::domain::workload::WorkloadId;
use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Callback reporting how a task ended
pub type Completion = Box<dyn FnOnce(PollOutcome) + Send + Sync>;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PoolError {
    #[error("Worker pool already started")]
    AlreadyStarted,

    #[error("Worker pool is shut down")]
    Closed,
}

/// Executor error that still carries the counts of the failed sweep
#[derive(Debug, Error)]
#[error("{message}")]
pub struct SweepFailed {
    pub message: String,
    pub summary: SweepSummary,
}

/// One image to verify as part of a task
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageCheck {
    pub workload: WorkloadId,
    pub reference: String,
    pub current_digest: Option<String>,
}

impl ImageCheck {
    pub fn parsed(&self) -> Result<ImageReference, ImageReferenceError> {
        ImageReference::parse(&self.reference)
    }
}

/// Work unit handed to the pool
pub struct PollTask {
    pub id: Uuid,
    pub target: PollTarget,
    pub images: Vec<ImageCheck>,
    completion: Option<Completion>,
}

impl PollTask {
    pub fn new(target: PollTarget, images: Vec<ImageCheck>) -> Self {
        Self {
            id: Uuid::new_v4(),
            target,
            images,
            completion: None,
        }
    }

    /// Sets the callback that receives the task's outcome
    pub fn on_complete(
        mut self,
        completion: impl FnOnce(PollOutcome) + Send + Sync + 'static,
    ) -> Self {
        self.completion = Some(Box::new(completion));
        self
    }

    fn take_completion(&mut self) -> Option<Completion> {
        self.completion.take()
    }
}

impl fmt::Debug for PollTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PollTask")
            .field("id", &self.id)
            .field("target", &self.target)
            .field("images", &self.images.len())
            .finish()
    }
}

impl Drop for PollTask {
    // A task dropped before a worker finished it (queue closed, submit
    // abandoned) still reports back
    fn drop(&mut self) {
        if let Some(completion) = self.completion.take() {
            let outcome = PollOutcome::cancelled("task cancelled before completion");
            complete(completion, outcome, &self.target);
        }
    }
}

/// Does the actual work of a poll task
#[async_trait]
pub trait TaskExecutor: Send + Sync {
    async fn execute(&self, task: &PollTask) -> anyhow::Result<SweepSummary>;
}

/// Fixed-size pool of workers sharing one bounded queue
pub struct PollingWorkerPool {
    sender: mpsc::Sender<PollTask>,
    receiver: Arc<tokio::sync::Mutex<mpsc::Receiver<PollTask>>>,
    executor: Arc<dyn TaskExecutor>,
    workers: usize,
    task_timeout: Duration,
    cancel: CancellationToken,
    started: AtomicBool,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl PollingWorkerPool {
    /// Creates a pool; no worker runs until `start`
    pub fn new(
        executor: Arc<dyn TaskExecutor>,
        workers: usize,
        queue_capacity: usize,
        task_timeout: Duration,
    ) -> Self {
        let (sender, receiver) = mpsc::channel(queue_capacity.max(1));
        Self {
            sender,
            receiver: Arc::new(tokio::sync::Mutex::new(receiver)),
            executor,
            workers: workers.max(1),
            task_timeout,
            cancel: CancellationToken::new(),
            started: AtomicBool::new(false),
            handles: Mutex::new(Vec::new()),
        }
    }

    /// Launches the workers
    ///
    /// Cancelling `parent` shuts the pool down just like `shutdown` does,
    /// minus the join.
    pub fn start(&self, parent: &CancellationToken) -> Result<(), PoolError> {
        if self.cancel.is_cancelled() {
            return Err(PoolError::Closed);
        }
        if self
            .started
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(PoolError::AlreadyStarted);
        }

        let mut handles = self.handles.lock().unwrap_or_else(PoisonError::into_inner);

        let own = self.cancel.clone();
        let parent = parent.clone();
        handles.push(tokio::spawn(async move {
            tokio::select! {
                _ = parent.cancelled() => own.cancel(),
                _ = own.cancelled() => {}
            }
        }));

        for worker_id in 0..self.workers {
            let worker = Worker {
                id: worker_id,
                receiver: Arc::clone(&self.receiver),
                executor: Arc::clone(&self.executor),
                task_timeout: self.task_timeout,
                cancel: self.cancel.clone(),
            };
            handles.push(tokio::spawn(worker.run()));
        }

        info!(
            workers = self.workers,
            capacity = self.capacity(),
            "Polling worker pool started"
        );
        Ok(())
    }

    /// Enqueues a task, waiting while the queue is full
    ///
    /// If the pool shuts down while waiting, the task is dropped and its
    /// completion reports a cancellation.
    pub async fn submit(&self, task: PollTask) -> Result<(), PoolError> {
        if self.cancel.is_cancelled() {
            return Err(PoolError::Closed);
        }

        debug!(task_id = %task.id, target = %task.target, "Submitting poll task");
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(PoolError::Closed),
            sent = self.sender.send(task) => sent.map_err(|_| PoolError::Closed),
        }
    }

    /// Number of tasks waiting in the queue
    pub fn queue_size(&self) -> usize {
        self.sender.max_capacity() - self.sender.capacity()
    }

    pub fn capacity(&self) -> usize {
        self.sender.max_capacity()
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    pub fn is_closed(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Stops the workers and waits for them to exit
    ///
    /// Queued and running tasks complete with a cancellation.
    pub async fn shutdown(&self) {
        self.cancel.cancel();

        let handles: Vec<_> = std::mem::take(
            &mut *self.handles.lock().unwrap_or_else(PoisonError::into_inner),
        );
        for handle in handles {
            if let Err(e) = handle.await {
                warn!("Worker task ended abnormally: {}", e);
            }
        }

        // Nothing may be left queued if the pool never started
        let mut receiver = self.receiver.lock().await;
        receiver.close();
        while receiver.try_recv().is_ok() {}

        info!("Polling worker pool stopped");
    }
}

struct Worker {
    id: usize,
    receiver: Arc<tokio::sync::Mutex<mpsc::Receiver<PollTask>>>,
    executor: Arc<dyn TaskExecutor>,
    task_timeout: Duration,
    cancel: CancellationToken,
}

impl Worker {
    async fn run(self) {
        debug!(worker = self.id, "Worker started");

        loop {
            let next = {
                let mut receiver = self.receiver.lock().await;
                tokio::select! {
                    biased;
                    _ = self.cancel.cancelled() => None,
                    task = receiver.recv() => task,
                }
            };

            match next {
                Some(task) => self.process(task).await,
                None => break,
            }
        }

        // Report whatever is still queued as cancelled
        let mut receiver = self.receiver.lock().await;
        receiver.close();
        while receiver.try_recv().is_ok() {}

        debug!(worker = self.id, "Worker stopped");
    }

    async fn process(&self, mut task: PollTask) {
        let completion = task.take_completion();
        let target = task.target.clone();
        let task_id = task.id;
        let executor = Arc::clone(&self.executor);
        let started = Instant::now();

        let mut handle = tokio::spawn(async move { executor.execute(&task).await });

        let outcome = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => {
                handle.abort();
                PollOutcome::cancelled("worker pool shut down")
            }
            joined = tokio::time::timeout(self.task_timeout, &mut handle) => match joined {
                Ok(Ok(Ok(summary))) => PollOutcome::success(started.elapsed(), summary),
                Ok(Ok(Err(e))) => {
                    let outcome = PollOutcome::failure(started.elapsed(), format!("{:#}", e));
                    match e.downcast_ref::<SweepFailed>() {
                        Some(failed) => outcome.with_summary(failed.summary),
                        None => outcome,
                    }
                }
                Ok(Err(join_error)) => {
                    error!(task_id = %task_id, target = %target, "Poll task panicked: {}", join_error);
                    PollOutcome::failure(started.elapsed(), format!("task panicked: {}", join_error))
                }
                Err(_) => {
                    handle.abort();
                    PollOutcome::failure(
                        started.elapsed(),
                        format!("task timed out after {:?}", self.task_timeout),
                    )
                }
            },
        };

        if let Some(completion) = completion {
            complete(completion, outcome, &target);
        }
    }
}

fn complete(completion: Completion, outcome: PollOutcome, target: &PollTarget) {
    if catch_unwind(AssertUnwindSafe(|| completion(outcome))).is_err() {
        error!(target = %target, "Poll task completion callback panicked");
    }
}
