//! Task trait for work run on the worker pool.

use super::queue::TaskQueue;

/// A unit of work executed once by a worker thread.
///
/// Tasks receive the queue they were taken from so that they can schedule
/// follow-up work, including another instance of themselves.
///
/// # Example
///
/// ```ignore
/// struct Ping;
///
/// impl Task for Ping {
///     fn name(&self) -> &'static str { "Ping" }
///
///     fn execute(self: Box<Self>, _queue: &TaskQueue) {
///         tracing::info!("pong");
///     }
/// }
/// ```
pub trait Task: Send + 'static {
    /// Short name used in logs.
    fn name(&self) -> &'static str;

    /// Run the task, consuming it.
    fn execute(self: Box<Self>, queue: &TaskQueue);
}

/// Adapter running a closure as a task.
pub struct FnTask<F> {
    name: &'static str,
    f: F,
}

impl<F> FnTask<F>
where
    F: FnOnce(&TaskQueue) + Send + 'static,
{
    /// Wrap `f` under `name`.
    pub fn new(name: &'static str, f: F) -> Self {
        Self { name, f }
    }
}

impl<F> Task for FnTask<F>
where
    F: FnOnce(&TaskQueue) + Send + 'static,
{
    fn name(&self) -> &'static str {
        self.name
    }

    fn execute(self: Box<Self>, queue: &TaskQueue) {
        (self.f)(queue)
    }
}
