//! Data-carrying wrapper over [`QueuingRwMutex`].

use std::ops::{Deref, DerefMut};

use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use super::rw_mutex::{QueuingRwMutex, ScopedAccess};

/// A value guarded by a FIFO-fair reader/writer mutex.
///
/// The queueing mutex decides who enters and in which order. The inner
/// `RwLock` only hands out the reference and is never contended.
#[derive(Debug, Default)]
pub struct QueuingRwLock<T> {
    queue: QueuingRwMutex,
    value: RwLock<T>,
}

impl<T> QueuingRwLock<T> {
    /// Wrap `value`.
    pub fn new(value: T) -> Self {
        Self {
            queue: QueuingRwMutex::new(),
            value: RwLock::new(value),
        }
    }

    /// Shared access, waiting behind queued writers.
    pub fn read(&self) -> QueuingReadGuard<'_, T> {
        let access = self.queue.read();
        QueuingReadGuard {
            value: self.value.read(),
            _access: access,
        }
    }

    /// Exclusive access, in arrival order.
    pub fn write(&self) -> QueuingWriteGuard<'_, T> {
        let access = self.queue.write();
        QueuingWriteGuard {
            value: self.value.write(),
            _access: access,
        }
    }

    /// The underlying queueing mutex.
    pub fn mutex(&self) -> &QueuingRwMutex {
        &self.queue
    }

    /// Consume the lock and return the value.
    pub fn into_inner(self) -> T {
        self.value.into_inner()
    }
}

/// Shared access to a [`QueuingRwLock`].
// Field order matters: the value guard drops before the queue role.
pub struct QueuingReadGuard<'a, T> {
    value: RwLockReadGuard<'a, T>,
    _access: ScopedAccess<'a>,
}

impl<T> Deref for QueuingReadGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.value
    }
}

/// Exclusive access to a [`QueuingRwLock`].
pub struct QueuingWriteGuard<'a, T> {
    value: RwLockWriteGuard<'a, T>,
    _access: ScopedAccess<'a>,
}

impl<T> Deref for QueuingWriteGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.value
    }
}

impl<T> DerefMut for QueuingWriteGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.value
    }
}
