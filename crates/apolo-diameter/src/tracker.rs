//! Per-session request number tracking
//!
//! Request numbers never decrease for a live session. A number may repeat
//! only when the request type moves forward: UPDATE #0 follows INITIAL #0
//! while the first interval is still running, and a TERMINATE on an exact
//! interval boundary carries the number of the last UPDATE. Anything else
//! is reported as `OutOfOrderRequest` so the caller can log and ignore the
//! message without touching session state.

use apolo_core::{AppError, AppResult};
use parking_lot::Mutex;
use std::collections::HashMap;
use tracing::{debug, warn};

use crate::usage::RequestType;

/// Last request accepted for a session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SeenRequest {
    pub request_type: RequestType,
    pub request_number: u32,
}

impl SeenRequest {
    fn position(&self) -> (u32, u8) {
        let stage = match self.request_type {
            RequestType::Initial => 0,
            RequestType::Update => 1,
            RequestType::Terminate => 2,
        };
        (self.request_number, stage)
    }

    /// Whether `next` moves the sequence forward
    fn is_followed_by(&self, next: &SeenRequest) -> bool {
        next.position() > self.position()
    }
}

#[derive(Debug, Default)]
pub struct RequestTracker {
    last_seen: Mutex<HashMap<String, SeenRequest>>,
}

impl RequestTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a request, rejecting it when it does not advance the sequence
    ///
    /// Returns what was recorded before, for [`RequestTracker::restore`]. An
    /// accepted TERMINATE ends tracking for the session.
    pub fn observe(
        &self,
        session_id: &str,
        request_type: RequestType,
        request_number: u32,
    ) -> AppResult<Option<SeenRequest>> {
        let next = SeenRequest {
            request_type,
            request_number,
        };
        let mut last_seen = self.last_seen.lock();

        let previous = last_seen.get(session_id).copied();
        if let Some(last) = previous {
            if !last.is_followed_by(&next) {
                warn!(
                    session_id = %session_id,
                    last = last.request_number,
                    last_type = %last.request_type,
                    received = request_number,
                    request_type = %request_type,
                    "Out of order credit control request"
                );
                return Err(AppError::OutOfOrderRequest {
                    session_id: session_id.to_string(),
                    last: last.request_number,
                    received: request_number,
                });
            }
        }

        match request_type {
            RequestType::Terminate => {
                last_seen.remove(session_id);
            }
            RequestType::Initial | RequestType::Update => {
                last_seen.insert(session_id.to_string(), next);
            }
        }
        debug!(
            session_id = %session_id,
            request_type = %request_type,
            request_number = request_number,
            "Request accepted"
        );
        Ok(previous)
    }

    /// Undo an `observe` whose request was never carried out
    pub fn restore(&self, session_id: &str, previous: Option<SeenRequest>) {
        let mut last_seen = self.last_seen.lock();
        match previous {
            Some(seen) => {
                last_seen.insert(session_id.to_string(), seen);
            }
            None => {
                last_seen.remove(session_id);
            }
        }
    }

    /// Drop a session that ended without a TERMINATE
    pub fn forget(&self, session_id: &str) {
        self.last_seen.lock().remove(session_id);
    }

    pub fn last_request_number(&self, session_id: &str) -> Option<u32> {
        self.last_seen
            .lock()
            .get(session_id)
            .map(|seen| seen.request_number)
    }

    pub fn len(&self) -> usize {
        self.last_seen.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.last_seen.lock().is_empty()
    }
}
