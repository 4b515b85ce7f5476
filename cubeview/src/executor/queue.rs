//! Shared FIFO of pending tasks.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::{Condvar, Mutex};
use tracing::debug;

use super::task::Task;

struct Inner {
    tasks: Mutex<VecDeque<Box<dyn Task>>>,
    available: Condvar,
    closed: AtomicBool,
}

/// Cloneable handle to the task queue shared by all sessions and workers.
#[derive(Clone)]
pub struct TaskQueue {
    inner: Arc<Inner>,
}

impl TaskQueue {
    /// Create an open, empty queue.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                tasks: Mutex::new(VecDeque::new()),
                available: Condvar::new(),
                closed: AtomicBool::new(false),
            }),
        }
    }

    /// Queue a task behind everything already pending.
    ///
    /// Returns `false` if the queue has been closed; the task is dropped.
    pub fn push<T: Task>(&self, task: T) -> bool {
        self.push_boxed(Box::new(task))
    }

    /// Queue an already boxed task.
    pub fn push_boxed(&self, task: Box<dyn Task>) -> bool {
        if self.is_closed() {
            debug!(task = task.name(), "Task queue closed, dropping task");
            return false;
        }
        self.inner.tasks.lock().push_back(task);
        self.inner.available.notify_one();
        true
    }

    /// Block until a task is available or the queue is closed.
    ///
    /// Tasks still pending when the queue closes are not handed out.
    pub fn pop(&self) -> Option<Box<dyn Task>> {
        let mut tasks = self.inner.tasks.lock();
        loop {
            if self.is_closed() {
                return None;
            }
            if let Some(task) = tasks.pop_front() {
                return Some(task);
            }
            self.inner.available.wait(&mut tasks);
        }
    }

    /// Take a task without waiting.
    pub fn try_pop(&self) -> Option<Box<dyn Task>> {
        if self.is_closed() {
            return None;
        }
        self.inner.tasks.lock().pop_front()
    }

    /// Stop accepting tasks and wake every waiting worker.
    pub fn close(&self) {
        // Flip the flag under the lock so no worker misses the wake-up.
        let mut tasks = self.inner.tasks.lock();
        self.inner.closed.store(true, Ordering::SeqCst);
        let dropped = tasks.len();
        tasks.clear();
        drop(tasks);
        self.inner.available.notify_all();
        if dropped > 0 {
            debug!(dropped, "Task queue closed with pending tasks");
        }
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    /// Number of pending tasks.
    pub fn len(&self) -> usize {
        self.inner.tasks.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for TaskQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for TaskQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskQueue")
            .field("pending", &self.len())
            .field("closed", &self.is_closed())
            .finish()
    }
}
