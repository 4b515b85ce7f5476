//! Registry of live sessions.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use tracing::info;

use crate::executor::TaskQueue;
use crate::loader::ImageRegistry;

use super::{OutboundSender, Session, SessionSettings};

/// Creates sessions for new connections and tears them down on disconnect.
pub struct SessionManager {
    registry: Arc<ImageRegistry>,
    settings: SessionSettings,
    queue: TaskQueue,
    sessions: DashMap<u32, Arc<Session>>,
    next_id: AtomicU32,
}

impl SessionManager {
    pub fn new(registry: Arc<ImageRegistry>, settings: SessionSettings, queue: TaskQueue) -> Self {
        Self {
            registry,
            settings,
            queue,
            sessions: DashMap::new(),
            next_id: AtomicU32::new(1),
        }
    }

    pub fn registry(&self) -> &Arc<ImageRegistry> {
        &self.registry
    }

    pub fn settings(&self) -> &SessionSettings {
        &self.settings
    }

    pub fn create_session(&self, outbound: OutboundSender) -> Arc<Session> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let session = Session::new(
            id,
            Arc::clone(&self.registry),
            self.settings,
            self.queue.clone(),
            outbound,
        );
        self.sessions.insert(id, Arc::clone(&session));
        info!(session_id = id, active = self.sessions.len(), "Session created");
        session
    }

    pub fn get(&self, id: u32) -> Option<Arc<Session>> {
        self.sessions.get(&id).map(|s| Arc::clone(s.value()))
    }

    /// Close and forget a session. Returns `false` for unknown ids.
    pub fn delete_session(&self, id: u32) -> bool {
        match self.sessions.remove(&id) {
            Some((_, session)) => {
                session.close();
                info!(session_id = id, active = self.sessions.len(), "Session deleted");
                true
            }
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    pub fn close_all(&self) {
        let ids: Vec<u32> = self.sessions.iter().map(|entry| *entry.key()).collect();
        for id in ids {
            self.delete_session(id);
        }
    }
}
