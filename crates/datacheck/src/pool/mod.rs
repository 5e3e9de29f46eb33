//! Fixed-size worker pool over a bounded task queue.
//!
//! Lifecycle: [`WorkerPool::start`] spawns the workers, tasks are queued with
//! [`WorkerPool::submit`], [`WorkerPool::close`] seals the queue and
//! [`WorkerPool::join`] waits until every worker has drained it and exited.
//!
//! The shutdown token is owned by the caller. When it fires, workers finish
//! the task they are running and exit without starting queued ones.

use futures::future::BoxFuture;
use futures::FutureExt;
use std::future::Future;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::error::{CheckError, Result};

type Task = BoxFuture<'static, ()>;

/// Runs submitted futures on a fixed number of workers.
pub struct WorkerPool {
    size: usize,
    tx: Option<async_channel::Sender<Task>>,
    rx: async_channel::Receiver<Task>,
    shutdown: CancellationToken,
    workers: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Create a pool of `size` workers with room for `queue_size` pending tasks.
    pub fn new(size: usize, queue_size: usize, shutdown: CancellationToken) -> Self {
        let (tx, rx) = async_channel::bounded(queue_size.max(1));
        Self {
            size: size.max(1),
            tx: Some(tx),
            rx,
            shutdown,
            workers: Vec::new(),
        }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Spawn the workers. Calling it twice is a no-op.
    pub fn start(&mut self) {
        if !self.workers.is_empty() {
            return;
        }
        for worker_id in 0..self.size {
            let rx = self.rx.clone();
            let shutdown = self.shutdown.clone();
            self.workers
                .push(tokio::spawn(worker_loop(worker_id, rx, shutdown)));
        }
        debug!("Worker pool started with {} workers", self.size);
    }

    /// Queue a task, waiting while the queue is full.
    ///
    /// Fails if the pool was not started, is closed, or shutdown fired.
    pub async fn submit<F>(&self, task: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        if self.workers.is_empty() {
            return Err(CheckError::pool("worker pool not started", "submitting task"));
        }
        let tx = self
            .tx
            .as_ref()
            .ok_or_else(|| CheckError::pool("worker pool is closed", "submitting task"))?;

        tokio::select! {
            biased;
            _ = self.shutdown.cancelled() => Err(CheckError::Cancelled),
            sent = tx.send(task.boxed()) => sent
                .map_err(|_| CheckError::pool("task queue closed", "submitting task")),
        }
    }

    /// Seal the queue. Workers exit once it is drained.
    pub fn close(&mut self) {
        self.tx.take();
    }

    /// Wait for every worker to exit. Closes the queue first if still open.
    pub async fn join(&mut self) {
        self.close();
        for handle in self.workers.drain(..) {
            if let Err(e) = handle.await {
                error!("Worker exited abnormally: {}", e);
            }
        }
        if self.shutdown.is_cancelled() && !self.rx.is_empty() {
            info!(
                "Shutdown requested, {} queued tasks were not started",
                self.rx.len()
            );
        }
    }
}

async fn worker_loop(
    worker_id: usize,
    rx: async_channel::Receiver<Task>,
    shutdown: CancellationToken,
) {
    loop {
        let task = tokio::select! {
            biased;
            _ = shutdown.cancelled() => {
                debug!("Worker {}: shutdown requested", worker_id);
                break;
            }
            next = rx.recv() => match next {
                Ok(task) => task,
                Err(_) => break,
            },
        };

        // A panicking task must not take the worker down with it
        if let Err(e) = tokio::spawn(task).await {
            error!("Worker {}: task panicked - {}", worker_id, e);
        }
    }
    debug!("Worker {}: exiting", worker_id);
}
