//! Reader/writer mutex with FIFO fairness.
//!
//! Readers share access and writers are exclusive, like any RW lock, but
//! entry is granted in arrival order: a reader that arrives after a writer
//! queued waits for that writer. A steady stream of readers therefore
//! cannot starve writers.
//!
//! Every caller takes a ticket on arrival. Each waiting writer sleeps on its
//! own condition variable so that wake-ups go to the next writer in line;
//! waiting readers share one.

use std::collections::{BTreeSet, VecDeque};
use std::sync::Arc;

use parking_lot::{Condvar, Mutex};

#[derive(Debug, Default)]
struct State {
    readers: usize,
    writer_active: bool,
    next_ticket: u64,
    waiting_writers: VecDeque<(u64, Arc<Condvar>)>,
    waiting_readers: BTreeSet<u64>,
}

impl State {
    fn take_ticket(&mut self) -> u64 {
        let ticket = self.next_ticket;
        self.next_ticket += 1;
        ticket
    }

    fn reader_may_enter(&self, ticket: u64) -> bool {
        !self.writer_active
            && self
                .waiting_writers
                .front()
                .map_or(true, |(writer, _)| *writer > ticket)
    }

    fn writer_may_enter(&self, ticket: u64) -> bool {
        self.readers == 0
            && !self.writer_active
            && self
                .waiting_writers
                .front()
                .map_or(false, |(writer, _)| *writer == ticket)
            && self
                .waiting_readers
                .first()
                .map_or(true, |reader| *reader > ticket)
    }

    fn wake_next_writer(&self) {
        if let Some((_, cv)) = self.waiting_writers.front() {
            cv.notify_one();
        }
    }
}

/// FIFO-fair reader/writer mutex protecting no data of its own.
///
/// Use [`ScopedAccess`] (or [`QueuingRwLock`](super::QueuingRwLock)) rather
/// than pairing enter/leave calls by hand.
#[derive(Debug, Default)]
pub struct QueuingRwMutex {
    state: Mutex<State>,
    readers_cv: Condvar,
}

impl QueuingRwMutex {
    /// Create an unlocked mutex.
    pub fn new() -> Self {
        Self::default()
    }

    /// Enter as a reader, waiting for any writer that is active or queued
    /// ahead.
    pub fn reader_enter(&self) {
        let mut state = self.state.lock();
        let ticket = state.take_ticket();

        if !state.reader_may_enter(ticket) {
            state.waiting_readers.insert(ticket);
            while !state.reader_may_enter(ticket) {
                self.readers_cv.wait(&mut state);
            }
            state.waiting_readers.remove(&ticket);
        }

        state.readers += 1;
    }

    /// Enter as the only writer, queueing behind everyone who arrived first.
    pub fn writer_enter(&self) {
        let mut state = self.state.lock();
        let ticket = state.take_ticket();
        let cv = Arc::new(Condvar::new());
        state.waiting_writers.push_back((ticket, Arc::clone(&cv)));

        while !state.writer_may_enter(ticket) {
            cv.wait(&mut state);
        }

        state.waiting_writers.pop_front();
        state.writer_active = true;
    }

    /// Leave a read section; the last reader out wakes the next writer.
    pub fn reader_leave(&self) {
        let mut state = self.state.lock();
        state.readers = state.readers.saturating_sub(1);
        if state.readers == 0 {
            state.wake_next_writer();
        }
    }

    /// Leave a write section, waking the next writer and any waiting
    /// readers. Readers that arrived before the next writer go first.
    pub fn writer_leave(&self) {
        let mut state = self.state.lock();
        state.writer_active = false;
        state.wake_next_writer();
        if !state.waiting_readers.is_empty() {
            self.readers_cv.notify_all();
        }
    }

    /// Number of readers currently inside.
    pub fn active_readers(&self) -> usize {
        self.state.lock().readers
    }

    /// Whether a writer is currently inside.
    pub fn writer_active(&self) -> bool {
        self.state.lock().writer_active
    }

    /// Number of writers waiting to enter.
    pub fn waiting_writers(&self) -> usize {
        self.state.lock().waiting_writers.len()
    }

    /// Number of readers waiting to enter.
    pub fn waiting_readers(&self) -> usize {
        self.state.lock().waiting_readers.len()
    }

    /// Enter as a reader for the lifetime of the returned guard.
    pub fn read(&self) -> ScopedAccess<'_> {
        ScopedAccess::new(self, AccessMode::Read)
    }

    /// Enter as a writer for the lifetime of the returned guard.
    pub fn write(&self) -> ScopedAccess<'_> {
        ScopedAccess::new(self, AccessMode::Write)
    }
}

/// Role taken by a [`ScopedAccess`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessMode {
    Read,
    Write,
}

/// Holds a [`QueuingRwMutex`] role until released or dropped.
///
/// Release happens exactly once, whichever comes first.
#[derive(Debug)]
pub struct ScopedAccess<'a> {
    mutex: &'a QueuingRwMutex,
    mode: AccessMode,
    active: bool,
}

impl<'a> ScopedAccess<'a> {
    /// Enter `mutex` in the given mode, blocking until granted.
    pub fn new(mutex: &'a QueuingRwMutex, mode: AccessMode) -> Self {
        match mode {
            AccessMode::Read => mutex.reader_enter(),
            AccessMode::Write => mutex.writer_enter(),
        }
        Self {
            mutex,
            mode,
            active: true,
        }
    }

    /// Leave the mutex early.
    pub fn release(&mut self) {
        if !self.active {
            return;
        }
        self.active = false;
        match self.mode {
            AccessMode::Read => self.mutex.reader_leave(),
            AccessMode::Write => self.mutex.writer_leave(),
        }
    }

    /// Role held by this guard.
    pub fn mode(&self) -> AccessMode {
        self.mode
    }

    /// Whether the role is still held.
    pub fn is_active(&self) -> bool {
        self.active
    }
}

impl Drop for ScopedAccess<'_> {
    fn drop(&mut self) {
        self.release();
    }
}
