//! Fixed-size pool of worker threads.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::thread::{self, JoinHandle};

use tracing::{debug, error, info, warn};

use super::queue::TaskQueue;
use super::ExecutorError;

/// Default number of worker threads.
pub const DEFAULT_WORKER_THREADS: usize = 3;

/// OS threads draining a [`TaskQueue`].
///
/// A panicking task is logged and does not take its worker down. Dropping
/// the pool closes the queue and joins every worker.
pub struct WorkerPool {
    queue: TaskQueue,
    workers: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Start `threads` workers (at least one) on `queue`.
    pub fn start(queue: TaskQueue, threads: usize) -> Result<Self, ExecutorError> {
        let threads = threads.max(1);
        let mut workers = Vec::with_capacity(threads);

        for index in 0..threads {
            let worker_queue = queue.clone();
            let handle = thread::Builder::new()
                .name(format!("cubeview-worker-{}", index))
                .spawn(move || Self::run_loop(index, worker_queue))
                .map_err(ExecutorError::Spawn)?;
            workers.push(handle);
        }

        info!(threads, "Worker pool started");
        Ok(Self { queue, workers })
    }

    fn run_loop(index: usize, queue: TaskQueue) {
        debug!(worker = index, "Worker started");

        while let Some(task) = queue.pop() {
            let name = task.name();
            let result = catch_unwind(AssertUnwindSafe(|| task.execute(&queue)));
            if result.is_err() {
                error!(worker = index, task = name, "Task panicked");
            }
        }

        debug!(worker = index, "Worker stopped");
    }

    /// The queue workers take tasks from.
    pub fn queue(&self) -> &TaskQueue {
        &self.queue
    }

    /// Number of worker threads still attached.
    pub fn threads(&self) -> usize {
        self.workers.len()
    }

    /// Close the queue and wait for running tasks to finish.
    pub fn shutdown(&mut self) {
        if self.workers.is_empty() {
            return;
        }
        self.queue.close();
        for handle in self.workers.drain(..) {
            if let Err(e) = handle.join() {
                warn!("Worker thread panicked: {:?}", e);
            }
        }
        info!("Worker pool stopped");
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}
