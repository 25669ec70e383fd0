//! External connections
//!
//! Network connections that own sessions (a Diameter peer, an HTTP client
//! session) register here to receive disconnect requests when the engine
//! fails a session closed.

use apolo_core::{AppError, AppResult};
use parking_lot::RwLock;
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Why the engine asks a connection to drop a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DisconnectReason {
    InsufficientCredit,
    RatingUnavailable,
}

impl DisconnectReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            DisconnectReason::InsufficientCredit => "INSUFFICIENT_CREDIT",
            DisconnectReason::RatingUnavailable => "RATING_UNAVAILABLE",
        }
    }

    /// Reason matching a failed debit
    pub fn for_error(err: &AppError) -> Self {
        match err {
            AppError::InsufficientCredit(_) => DisconnectReason::InsufficientCredit,
            _ => DisconnectReason::RatingUnavailable,
        }
    }
}

impl fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DisconnectRequest {
    pub session_id: String,
    pub reason: DisconnectReason,
}

#[derive(Debug, Default)]
pub struct ExternalConnections {
    connections: RwLock<HashMap<String, mpsc::UnboundedSender<DisconnectRequest>>>,
}

impl ExternalConnections {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a connection, replacing any previous one with the same id
    pub fn register(&self, conn_id: &str) -> mpsc::UnboundedReceiver<DisconnectRequest> {
        let (tx, rx) = mpsc::unbounded_channel();
        if self
            .connections
            .write()
            .insert(conn_id.to_string(), tx)
            .is_some()
        {
            warn!(conn_id = %conn_id, "Connection re-registered, previous receiver dropped");
        } else {
            info!(conn_id = %conn_id, "Connection registered");
        }
        rx
    }

    pub fn unregister(&self, conn_id: &str) {
        if self.connections.write().remove(conn_id).is_some() {
            info!(conn_id = %conn_id, "Connection unregistered");
        }
    }

    /// Ask `conn_id` to tear down `session_id`
    ///
    /// Fails with `NotManaged` when the connection is unknown or its
    /// receiver is gone.
    pub fn disconnect(
        &self,
        conn_id: &str,
        session_id: &str,
        reason: DisconnectReason,
    ) -> AppResult<()> {
        let connections = self.connections.read();
        let tx = connections.get(conn_id).ok_or_else(|| {
            AppError::NotManaged(format!("connection {} is not registered", conn_id))
        })?;

        tx.send(DisconnectRequest {
            session_id: session_id.to_string(),
            reason,
        })
        .map_err(|_| AppError::NotManaged(format!("connection {} is closed", conn_id)))?;

        debug!(conn_id = %conn_id, session_id = %session_id, reason = %reason, "Disconnect requested");
        Ok(())
    }

    pub fn is_registered(&self, conn_id: &str) -> bool {
        self.connections.read().contains_key(conn_id)
    }

    pub fn len(&self) -> usize {
        self.connections.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_disconnect_delivered() {
        let connections = ExternalConnections::new();
        let mut rx = connections.register("peer-1");

        connections
            .disconnect("peer-1", "call-1", DisconnectReason::InsufficientCredit)
            .unwrap();

        let request = rx.try_recv().unwrap();
        assert_eq!(request.session_id, "call-1");
        assert_eq!(request.reason.as_str(), "INSUFFICIENT_CREDIT");
    }

    #[test]
    fn test_unknown_or_closed_connection() {
        let connections = ExternalConnections::new();
        let err = connections
            .disconnect("nobody", "call-1", DisconnectReason::RatingUnavailable)
            .unwrap_err();
        assert_eq!(err.error_code(), "not_managed");

        let rx = connections.register("peer-1");
        drop(rx);
        assert!(connections
            .disconnect("peer-1", "call-1", DisconnectReason::RatingUnavailable)
            .is_err());

        connections.unregister("peer-1");
        assert!(connections.is_empty());
    }

    #[test]
    fn test_reason_for_error() {
        assert_eq!(
            DisconnectReason::for_error(&AppError::InsufficientCredit("1001".to_string())),
            DisconnectReason::InsufficientCredit
        );
        assert_eq!(
            DisconnectReason::for_error(&AppError::RatingUnavailable("down".to_string())),
            DisconnectReason::RatingUnavailable
        );
    }
}
