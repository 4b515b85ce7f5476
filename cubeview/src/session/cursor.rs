//! Latest cursor position per file.
//!
//! Cursor moves arrive far faster than values can be computed. Only the
//! newest position per file is kept; a worker task takes it and computes
//! the value after releasing the lock.

use std::collections::HashMap;

use parking_lot::Mutex;

use crate::protocol::SetCursor;
use crate::sync::QueuingRwMutex;

#[derive(Debug, Default)]
pub struct CursorSettings {
    mutex: QueuingRwMutex,
    latest: Mutex<HashMap<i32, (u32, SetCursor)>>,
}

impl CursorSettings {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a cursor move, replacing any pending one for the same file.
    pub fn add(&self, request_id: u32, message: SetCursor) {
        let _access = self.mutex.write();
        self.latest
            .lock()
            .insert(message.file_id, (request_id, message));
    }

    /// Remove and return the pending cursor move for `file_id`.
    pub fn take(&self, file_id: i32) -> Option<(u32, SetCursor)> {
        let mut access = self.mutex.write();
        let entry = self.latest.lock().remove(&file_id);
        access.release();
        entry
    }

    /// Pending cursor move for `file_id`, left in place.
    pub fn pending(&self, file_id: i32) -> Option<SetCursor> {
        let _access = self.mutex.read();
        self.latest.lock().get(&file_id).map(|(_, message)| *message)
    }

    /// Drop the pending cursor move for `file_id`.
    pub fn clear(&self, file_id: i32) {
        let _access = self.mutex.write();
        self.latest.lock().remove(&file_id);
    }

    /// Drop every pending cursor move.
    pub fn clear_all(&self) {
        let _access = self.mutex.write();
        self.latest.lock().clear();
    }
}
