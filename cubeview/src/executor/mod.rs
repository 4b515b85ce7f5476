//! Worker thread pool for session tasks.
//!
//! Expensive or potentially blocking requests (tile streaming, cursor
//! lookups, animation frames, calculations) are wrapped in a [`Task`] and
//! pushed onto a shared [`TaskQueue`]. A fixed [`WorkerPool`] of OS threads
//! drains the queue so the connection I/O never blocks on image reads.
//!
//! ```text
//! connection I/O ──push──▶ TaskQueue ──pop──▶ worker 0..N ──▶ Task::execute
//!                               ▲                                  │
//!                               └──────────── requeue ─────────────┘
//! ```

mod pool;
mod queue;
mod task;

pub use pool::{WorkerPool, DEFAULT_WORKER_THREADS};
pub use queue::TaskQueue;
pub use task::{FnTask, Task};

use thiserror::Error;

/// Errors from the worker pool.
#[derive(Debug, Error)]
pub enum ExecutorError {
    #[error("Failed to spawn worker thread: {0}")]
    Spawn(#[source] std::io::Error),
}
