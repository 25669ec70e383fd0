//! Session run
//!
//! One derived-charging run of a call. A session moves through
//! `Created -> Active -> Closed`: the first successful debit activates it,
//! and either an external close or a failed debit closes it for good.

use apolo_core::models::{checked_offset, CallCost, ChargedCdr, SessionEvent, SessionRun};
use apolo_core::traits::{CdrConnector, RatingConnector};
use apolo_core::{AppError, AppResult};
use apolo_diameter::{plan_request, resolve_usage};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rust_decimal::Decimal;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::connections::{DisconnectReason, ExternalConnections};
use crate::guardian::GuardianLock;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    Created,
    Active,
    Closed,
}

/// Collaborators shared by every session of an engine
pub struct SessionContext {
    pub rater: Arc<dyn RatingConnector>,
    pub cdrs: Arc<dyn CdrConnector>,
    pub connections: Arc<ExternalConnections>,
    pub debit_interval: Duration,
}

/// Reported by a debit loop that failed its session closed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DebitFailure {
    pub session_id: String,
    pub end_time: DateTime<Utc>,
}

#[derive(Debug)]
struct Ledger {
    state: SessionState,
    /// Total reserved so far
    granted: Duration,
    cost: Decimal,
    /// Settled usage, known once closed
    final_usage: Option<Duration>,
}

pub struct Session {
    event: SessionEvent,
    conn_id: String,
    run: SessionRun,
    ctx: Arc<SessionContext>,
    stop: CancellationToken,
    ledger: Mutex<Ledger>,
    debit_task: Mutex<Option<JoinHandle<()>>>,
}

impl Session {
    /// `stop` is the session's own token, normally a child of the token
    /// shared by all runs of the same session id
    pub fn new(
        event: SessionEvent,
        conn_id: impl Into<String>,
        run: SessionRun,
        ctx: Arc<SessionContext>,
        stop: CancellationToken,
    ) -> Self {
        Self {
            event,
            conn_id: conn_id.into(),
            run,
            ctx,
            stop,
            ledger: Mutex::new(Ledger {
                state: SessionState::Created,
                granted: Duration::ZERO,
                cost: Decimal::ZERO,
                final_usage: None,
            }),
            debit_task: Mutex::new(None),
        }
    }

    pub fn session_id(&self) -> &str {
        self.event.origin_id()
    }

    pub fn run_id(&self) -> &str {
        &self.run.run_id
    }

    pub fn conn_id(&self) -> &str {
        &self.conn_id
    }

    pub fn event(&self) -> &SessionEvent {
        &self.event
    }

    pub fn start_time(&self) -> DateTime<Utc> {
        self.run.call_descriptor.time_start
    }

    pub fn state(&self) -> SessionState {
        self.ledger.lock().state
    }

    pub fn granted(&self) -> Duration {
        self.ledger.lock().granted
    }

    pub fn cost(&self) -> Decimal {
        self.ledger.lock().cost
    }

    pub fn final_usage(&self) -> Option<Duration> {
        self.ledger.lock().final_usage
    }

    /// Reserve the next `duration` of the call, returning what was granted
    pub async fn debit(&self, duration: Duration) -> AppResult<Duration> {
        let offset = {
            let ledger = self.ledger.lock();
            if ledger.state == SessionState::Closed {
                return Err(AppError::SessionClosed(self.session_id().to_string()));
            }
            ledger.granted
        };

        let charged = self.debit_window(offset, duration).await?;

        let mut ledger = self.ledger.lock();
        ledger.granted += charged.granted;
        ledger.cost += charged.cost;
        if ledger.state == SessionState::Created {
            ledger.state = SessionState::Active;
        }
        debug!(
            session_id = %self.session_id(),
            run_id = %self.run.run_id,
            requested_secs = duration.as_secs(),
            granted_secs = charged.granted.as_secs(),
            "Debited"
        );
        Ok(charged.granted)
    }

    /// The run restricted to `[start + offset, start + offset + duration)`
    fn window(&self, offset: Duration, duration: Duration) -> AppResult<SessionRun> {
        let window_start = checked_offset(self.start_time(), offset).ok_or_else(|| {
            AppError::InvalidInput(format!("offset {:?} overflows the call start", offset))
        })?;
        Ok(SessionRun {
            run_id: self.run.run_id.clone(),
            call_descriptor: self.run.call_descriptor.with_window(window_start, duration)?,
        })
    }

    async fn debit_window(&self, offset: Duration, duration: Duration) -> AppResult<CallCost> {
        self.ctx
            .rater
            .debit_usage(&self.window(offset, duration)?, duration)
            .await
    }

    /// Spawn the periodic debit task; no-op without a debit interval
    pub fn start_debit_loop(
        self: &Arc<Self>,
        guardian: Arc<GuardianLock>,
        lock_timeout: Duration,
        reaper: mpsc::UnboundedSender<DebitFailure>,
    ) {
        if self.ctx.debit_interval.is_zero() {
            return;
        }
        let session = Arc::clone(self);
        let handle = tokio::spawn(async move {
            session.debit_loop(guardian, lock_timeout, reaper).await;
        });
        *self.debit_task.lock() = Some(handle);
    }

    async fn debit_loop(
        self: Arc<Self>,
        guardian: Arc<GuardianLock>,
        lock_timeout: Duration,
        reaper: mpsc::UnboundedSender<DebitFailure>,
    ) {
        let interval = self.ctx.debit_interval;
        let session_id = self.session_id().to_string();
        let this = &self;

        loop {
            tokio::select! {
                biased;
                _ = self.stop.cancelled() => break,
                _ = tokio::time::sleep(interval) => {}
            }

            // stop wins over a pending tick and over a pending lock attempt
            let outcome = tokio::select! {
                biased;
                _ = self.stop.cancelled() => break,
                res = guardian.guard(&session_id, lock_timeout, move || async move {
                    if this.stop.is_cancelled() {
                        return Ok(None);
                    }
                    this.debit(interval).await.map(Some)
                }) => res,
            };

            match outcome {
                Ok(None) => break,
                Ok(Some(granted)) if granted >= interval => continue,
                Ok(Some(granted)) => {
                    info!(
                        session_id = %session_id,
                        run_id = %self.run.run_id,
                        granted_secs = granted.as_secs(),
                        "Balance exhausted, session ends when the last grant runs out"
                    );
                    tokio::select! {
                        biased;
                        _ = self.stop.cancelled() => break,
                        _ = tokio::time::sleep(granted) => {}
                    }
                    self.fail_closed(
                        &reaper,
                        AppError::InsufficientCredit(format!(
                            "balance exhausted for {}",
                            self.event.account()
                        )),
                    );
                    break;
                }
                Err(err) if err.is_retryable() => {
                    warn!(session_id = %session_id, error = %err, "Debit skipped, session busy");
                }
                Err(AppError::SessionClosed(_)) => break,
                Err(err) => {
                    self.fail_closed(&reaper, err);
                    break;
                }
            }
        }
        debug!(session_id = %session_id, run_id = %self.run.run_id, "Debit loop stopped");
    }

    /// Stop charging after a failed debit: ask the owning connection to drop
    /// the call and let the engine close the session at the granted time
    fn fail_closed(&self, reaper: &mpsc::UnboundedSender<DebitFailure>, err: AppError) {
        let reason = DisconnectReason::for_error(&err);
        error!(
            session_id = %self.session_id(),
            run_id = %self.run.run_id,
            error = %err,
            reason = %reason,
            "Debit failed, disconnecting session"
        );

        if let Err(e) = self
            .ctx
            .connections
            .disconnect(&self.conn_id, self.session_id(), reason)
        {
            warn!(session_id = %self.session_id(), error = %e, "Disconnect not delivered");
        }

        let end_time = checked_offset(self.start_time(), self.granted())
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        if reaper
            .send(DebitFailure {
                session_id: self.session_id().to_string(),
                end_time,
            })
            .is_err()
        {
            warn!(session_id = %self.session_id(), "Engine gone, failed session left to shutdown");
        }
    }

    /// Close the run at `end_time` and settle with the rating engine
    ///
    /// Extra usage beyond the reservations is debited, over-reservation is
    /// refunded.
    #[instrument(skip(self), fields(session_id = %self.session_id(), run_id = %self.run.run_id))]
    pub async fn close(&self, end_time: DateTime<Utc>) -> AppResult<()> {
        let granted = {
            let mut ledger = self.ledger.lock();
            if ledger.state == SessionState::Closed {
                return Err(AppError::SessionClosed(self.session_id().to_string()));
            }
            ledger.state = SessionState::Closed;
            ledger.granted
        };

        self.stop.cancel();
        let task = self.debit_task.lock().take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                warn!(error = %e, "Debit task ended abnormally");
            }
        }

        let last_used = (end_time - self.start_time())
            .to_std()
            .unwrap_or(Duration::ZERO);
        let interval = self.ctx.debit_interval;
        let final_usage = if !interval.is_zero() && !last_used.is_zero() {
            let plan = plan_request(last_used, interval, true)?;
            debug!(
                request_number = plan.request_number,
                units_secs = plan.units.as_secs(),
                "Terminate request"
            );
            resolve_usage(plan.request_type, plan.request_number, plan.units, interval)?
        } else {
            last_used
        };
        self.ledger.lock().final_usage = Some(final_usage);

        if final_usage > granted {
            let extra = final_usage - granted;
            let charged = self.debit_window(granted, extra).await?;
            let mut ledger = self.ledger.lock();
            ledger.granted += charged.granted;
            ledger.cost += charged.cost;
            debug!(extra_secs = extra.as_secs(), "Settled extra usage");
        } else if final_usage < granted {
            let unused = granted - final_usage;
            self.ctx
                .rater
                .refund_usage(&self.window(final_usage, unused)?, unused)
                .await?;
            debug!(refund_secs = unused.as_secs(), "Refunded unused reservation");
        }

        info!(
            usage_secs = final_usage.as_secs(),
            cost = %self.cost(),
            "Session closed"
        );
        Ok(())
    }

    /// Hand the finished record to the CDR service
    pub async fn save_operations(&self) -> AppResult<()> {
        let (usage, cost) = {
            let ledger = self.ledger.lock();
            (ledger.final_usage.unwrap_or(ledger.granted), ledger.cost)
        };
        let cdr = ChargedCdr::from_event(&self.event, &self.run.run_id, usage, cost);
        self.ctx.cdrs.process_cdr(&cdr).await
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("session_id", &self.session_id())
            .field("run_id", &self.run.run_id)
            .field("conn_id", &self.conn_id)
            .field("ledger", &*self.ledger.lock())
            .finish()
    }
}
