//! Per-file coalescing of channel changes.
//!
//! While a channel change for a file is queued, newer requests replace it
//! instead of queueing another task. Changes for the same file run one at
//! a time; different files proceed in parallel.

use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::{Mutex, MutexGuard};

use crate::protocol::SetImageChannels;
use crate::sync::ConcurrentQueue;

#[derive(Debug, Default)]
pub struct ChannelSlot {
    /// Whether a task for this file is queued but has not taken its request
    task_active: Mutex<bool>,
    pending: ConcurrentQueue<(u32, SetImageChannels)>,
    exec: Mutex<()>,
}

impl ChannelSlot {
    /// Store `request` as the latest change.
    ///
    /// Returns `true` if the caller must queue a task to apply it.
    pub fn offer(&self, request_id: u32, request: SetImageChannels) -> bool {
        let mut active = self.task_active.lock();
        self.pending.replace((request_id, request));
        let spawn = !*active;
        *active = true;
        spawn
    }

    /// Take the latest change and mark the slot idle.
    pub fn take(&self) -> Option<(u32, SetImageChannels)> {
        let mut active = self.task_active.lock();
        let request = self.pending.try_pop();
        *active = false;
        request
    }

    /// Serialize execution of changes for this file.
    pub fn exec_lock(&self) -> MutexGuard<'_, ()> {
        self.exec.lock()
    }

    pub fn is_task_active(&self) -> bool {
        *self.task_active.lock()
    }
}

/// Channel slots of a session, keyed by file id.
#[derive(Debug, Default)]
pub struct ChannelSlots {
    slots: DashMap<i32, Arc<ChannelSlot>>,
}

impl ChannelSlots {
    pub fn get_or_create(&self, file_id: i32) -> Arc<ChannelSlot> {
        Arc::clone(self.slots.entry(file_id).or_default().value())
    }

    pub fn get(&self, file_id: i32) -> Option<Arc<ChannelSlot>> {
        self.slots.get(&file_id).map(|slot| Arc::clone(slot.value()))
    }

    pub fn remove(&self, file_id: i32) {
        self.slots.remove(&file_id);
    }

    pub fn clear(&self) {
        self.slots.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::Plane;

    fn request(z: i32) -> SetImageChannels {
        SetImageChannels {
            file_id: 0,
            plane: Plane::new(z, 0),
            required_tiles: Vec::new(),
        }
    }

    #[test]
    fn test_only_first_offer_spawns() {
        let slot = ChannelSlot::default();
        assert!(slot.offer(1, request(1)));
        assert!(!slot.offer(2, request(2)));
        assert!(!slot.offer(3, request(3)));

        let (request_id, latest) = slot.take().unwrap();
        assert_eq!(request_id, 3);
        assert_eq!(latest.plane.z, 3);
        assert!(!slot.is_task_active());
        assert!(slot.take().is_none());
    }

    #[test]
    fn test_offer_after_take_spawns_again() {
        let slot = ChannelSlot::default();
        assert!(slot.offer(1, request(1)));
        slot.take();
        assert!(slot.offer(2, request(2)));
    }

    #[test]
    fn test_slots_shared_per_file() {
        let slots = ChannelSlots::default();
        let a = slots.get_or_create(0);
        let b = slots.get_or_create(0);
        assert!(Arc::ptr_eq(&a, &b));

        slots.remove(0);
        assert!(slots.get(0).is_none());
    }
}
