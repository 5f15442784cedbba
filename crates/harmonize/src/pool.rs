//! Worker Pool: runs Transcode/Copy actions with bounded concurrency.
//!
//! One feeder task fills a bounded job queue; `N` worker tasks take turns
//! pulling from it and run each job on the blocking thread pool. Results
//! stream back over a channel as jobs complete. The result channel closes once
//! every job has been reported.

use crate::cancel::CancellationToken;
use crate::jobs::cancelled_result;
use crate::types::{Action, JobResult};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, error};

/// Bounded set of concurrent job runners.
#[derive(Debug, Clone, Copy)]
pub struct WorkerPool {
    workers: usize,
}

impl WorkerPool {
    /// `workers` is clamped to at least 1.
    pub fn new(workers: usize) -> Self {
        Self {
            workers: workers.max(1),
        }
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Start executing `jobs` and return the stream of their results.
    ///
    /// Every job yields exactly one result. A job that panics is reported as
    /// failed without affecting the others. Once `cancel` fires, jobs not yet
    /// started are reported as cancelled instead of being run.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn dispatch<F>(
        &self,
        jobs: Vec<Action>,
        cancel: CancellationToken,
        run: F,
    ) -> mpsc::Receiver<JobResult>
    where
        F: Fn(&Action) -> JobResult + Send + Sync + 'static,
    {
        let (job_tx, job_rx) = mpsc::channel::<Action>(self.workers * 2);
        let (result_tx, result_rx) = mpsc::channel::<JobResult>(self.workers * 4);
        let queue = Arc::new(Mutex::new(job_rx));
        let run = Arc::new(run);

        debug!(jobs = jobs.len(), workers = self.workers, "Dispatching");

        tokio::spawn(async move {
            for job in jobs {
                if job_tx.send(job).await.is_err() {
                    break;
                }
            }
        });

        for worker_id in 0..self.workers {
            let queue = queue.clone();
            let results = result_tx.clone();
            let cancel = cancel.clone();
            let run = run.clone();

            tokio::spawn(async move {
                loop {
                    // Lock is held only while waiting for the next job
                    let next = queue.lock().await.recv().await;
                    let Some(action) = next else {
                        break;
                    };

                    let result = if cancel.is_cancelled() {
                        cancelled_result(&action)
                    } else {
                        run_blocking(run.clone(), action).await
                    };

                    if results.send(result).await.is_err() {
                        break;
                    }
                }
                debug!(worker_id, "Worker finished");
            });
        }

        result_rx
    }

    /// Run `jobs` to completion and collect every result.
    pub async fn run_all<F>(
        &self,
        jobs: Vec<Action>,
        cancel: CancellationToken,
        run: F,
    ) -> Vec<JobResult>
    where
        F: Fn(&Action) -> JobResult + Send + Sync + 'static,
    {
        let mut rx = self.dispatch(jobs, cancel, run);
        let mut results = Vec::new();
        while let Some(result) = rx.recv().await {
            results.push(result);
        }
        results
    }
}

async fn run_blocking<F>(run: Arc<F>, action: Action) -> JobResult
where
    F: Fn(&Action) -> JobResult + Send + Sync + 'static,
{
    let relative_path = action.relative_path().to_path_buf();
    let kind = action.kind();
    match tokio::task::spawn_blocking(move || run(&action)).await {
        Ok(result) => result,
        Err(join_err) => {
            error!("Job for {} died: {}", relative_path.display(), join_err);
            JobResult::failed(relative_path, kind, format!("job panicked: {}", join_err))
        }
    }
}
