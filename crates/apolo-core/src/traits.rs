//! Collaborator traits
//!
//! The engine consumes the rating engine and the CDR service through these
//! narrow contracts. Both are remote services: every call may block on the
//! network and must be safe to issue concurrently for different sessions.

use crate::models::{CallCost, CallDescriptor, ChargedCdr, LcrSupplier, SessionEvent, SessionRun};
use crate::AppResult;
use async_trait::async_trait;
use std::time::Duration;

/// Rating engine contract
#[async_trait]
pub trait RatingConnector: Send + Sync {
    /// Expand an event into its derived-charging runs. An empty list means
    /// the event is not billed by this engine.
    async fn get_session_runs(&self, event: &SessionEvent) -> AppResult<Vec<SessionRun>>;

    /// Reserve `duration` for the window described by `run`
    ///
    /// The granted duration may be lower than requested when the balance
    /// runs short; a refusal is reported as `InsufficientCredit`.
    async fn debit_usage(&self, run: &SessionRun, duration: Duration) -> AppResult<CallCost>;

    /// Give back the last `duration` of what was debited for `run`
    async fn refund_usage(&self, run: &SessionRun, duration: Duration) -> AppResult<()>;

    /// Longest usage the event may consume across all of its runs
    async fn get_derived_max_session_time(&self, event: &SessionEvent) -> AppResult<Duration>;

    /// Least cost routing for a call
    async fn get_lcr(&self, cd: &CallDescriptor) -> AppResult<Vec<LcrSupplier>>;
}

/// CDR service contract
#[async_trait]
pub trait CdrConnector: Send + Sync {
    async fn process_cdr(&self, cdr: &ChargedCdr) -> AppResult<()>;
}
