//! Session registry
//!
//! Index of live session ids to their runs. The map lock is held only for
//! index maintenance and never across an await; business ordering per id is
//! the guardian's job.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::session::Session;

/// All runs of one session id plus the stop signal they share
#[derive(Clone)]
pub struct SessionGroup {
    pub sessions: Vec<Arc<Session>>,
    pub stop: CancellationToken,
}

#[derive(Default)]
pub struct SessionRegistry {
    groups: RwLock<HashMap<String, SessionGroup>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn index(&self, session_id: &str, group: SessionGroup) {
        self.groups.write().insert(session_id.to_string(), group);
    }

    /// Remove and return the group, `None` when already gone
    pub fn unindex(&self, session_id: &str) -> Option<SessionGroup> {
        self.groups.write().remove(session_id)
    }

    pub fn get(&self, session_id: &str) -> Option<Vec<Arc<Session>>> {
        self.groups
            .read()
            .get(session_id)
            .map(|group| group.sessions.clone())
    }

    pub fn contains(&self, session_id: &str) -> bool {
        self.groups.read().contains_key(session_id)
    }

    pub fn ids(&self) -> Vec<String> {
        self.groups.read().keys().cloned().collect()
    }

    /// Every registered run, for the read model
    pub fn snapshot(&self) -> Vec<Arc<Session>> {
        self.groups
            .read()
            .values()
            .flat_map(|group| group.sessions.iter().cloned())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.groups.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.read().is_empty()
    }
}
