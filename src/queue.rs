//! Run queue.
//!
//! Long runs are handed to a single background worker so the caller is
//! never blocked while a job executes. Jobs run one at a time in
//! submission order on tokio's blocking pool.

use crate::error::{BatchError, Result};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error};

type Job<T> = Box<dyn FnOnce() -> T + Send + 'static>;

/// Outcome of one queued job.
#[derive(Debug)]
pub struct JobResult<T> {
    pub id: u64,
    /// `Err` carries the panic message when the job panicked.
    pub result: std::result::Result<T, String>,
}

/// Single-consumer queue of blocking jobs.
pub struct RunQueue<T> {
    sender: mpsc::UnboundedSender<(u64, Job<T>)>,
    worker: JoinHandle<Vec<JobResult<T>>>,
    next_id: u64,
}

impl<T: Send + 'static> RunQueue<T> {
    /// Spawn the worker. Must be called from within a tokio runtime.
    pub fn start() -> Self {
        let (sender, mut receiver) = mpsc::unbounded_channel::<(u64, Job<T>)>();

        let worker = tokio::spawn(async move {
            let mut results = Vec::new();
            while let Some((id, job)) = receiver.recv().await {
                debug!("Run queue: starting job {}", id);
                let result = tokio::task::spawn_blocking(job)
                    .await
                    .map_err(|e| {
                        error!("Run queue: job {} did not complete: {}", id, e);
                        e.to_string()
                    });
                results.push(JobResult { id, result });
            }
            results
        });

        Self {
            sender,
            worker,
            next_id: 1,
        }
    }

    /// Queue a job and return its id without waiting for it.
    pub fn enqueue<F>(&mut self, job: F) -> Result<u64>
    where
        F: FnOnce() -> T + Send + 'static,
    {
        let id = self.next_id;
        self.sender
            .send((id, Box::new(job)))
            .map_err(|_| BatchError::Queue("worker has stopped".to_string()))?;
        self.next_id += 1;
        Ok(id)
    }

    /// Stop accepting jobs and wait for every queued job to finish.
    pub async fn shutdown(self) -> Result<Vec<JobResult<T>>> {
        drop(self.sender);
        self.worker
            .await
            .map_err(|e| BatchError::Queue(e.to_string()))
    }
}
