//! Session engine
//!
//! Owns every live session, keyed by session id. Start, update and end for
//! one id run under the guardian lock of that id, so they are totally ordered
//! while unrelated calls proceed in parallel.
//!
//! A session id maps to one `Session` per derived-charging run. All runs of
//! an id share one stop token: ending the id halts every debit loop at once.

use apolo_core::config::SessionsConfig;
use apolo_core::models::{ChargedCdr, SessionEvent, RAW_RUN_ID};
use apolo_core::traits::{CdrConnector, RatingConnector};
use apolo_core::{AppError, AppResult};
use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use parking_lot::RwLock;
use rust_decimal::Decimal;
use serde::Serialize;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::connections::ExternalConnections;
use crate::guardian::GuardianLock;
use crate::registry::{SessionGroup, SessionRegistry};
use crate::session::{DebitFailure, Session, SessionContext, SessionState};

/// Event name the rating engine expects for authorization queries
pub const AUTHORIZATION_EVENT: &str = "CGR_AUTHORIZATION";

/// Monitoring view of one run
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ActiveSession {
    pub session_id: String,
    pub run_id: String,
    pub conn_id: String,
    pub state: SessionState,
    #[serde(rename = "usage_secs", with = "apolo_core::models::serde_duration")]
    pub usage: Duration,
    pub cost: Decimal,
    pub start_time: DateTime<Utc>,
}

impl From<&Session> for ActiveSession {
    fn from(session: &Session) -> Self {
        Self {
            session_id: session.session_id().to_string(),
            run_id: session.run_id().to_string(),
            conn_id: session.conn_id().to_string(),
            state: session.state(),
            usage: session.final_usage().unwrap_or_else(|| session.granted()),
            cost: session.cost(),
            start_time: session.start_time(),
        }
    }
}

type EndedHook = Box<dyn Fn(&str) + Send + Sync>;

struct EngineInner {
    config: SessionsConfig,
    timezone: Tz,
    ctx: Arc<SessionContext>,
    guardian: Arc<GuardianLock>,
    registry: SessionRegistry,
    reaper_tx: mpsc::UnboundedSender<DebitFailure>,
    ended_hooks: RwLock<Vec<EndedHook>>,
}

/// Real-time charging engine
///
/// Cheap to clone; clones share the same sessions.
#[derive(Clone)]
pub struct SessionEngine {
    inner: Arc<EngineInner>,
}

impl SessionEngine {
    /// Create the engine and its reaper task
    ///
    /// Must be called from within a tokio runtime.
    pub fn new(
        config: SessionsConfig,
        rater: Arc<dyn RatingConnector>,
        cdrs: Arc<dyn CdrConnector>,
    ) -> AppResult<Self> {
        let timezone = config.tz()?;
        let (reaper_tx, reaper_rx) = mpsc::unbounded_channel();
        let ctx = Arc::new(SessionContext {
            rater,
            cdrs,
            connections: Arc::new(ExternalConnections::new()),
            debit_interval: config.debit_interval(),
        });

        let inner = Arc::new(EngineInner {
            config,
            timezone,
            ctx,
            guardian: Arc::new(GuardianLock::new()),
            registry: SessionRegistry::new(),
            reaper_tx,
            ended_hooks: RwLock::new(Vec::new()),
        });
        Self::spawn_reaper(Arc::downgrade(&inner), reaper_rx);

        info!(
            debit_interval_secs = inner.config.debit_interval_secs,
            timezone = %timezone,
            "Session engine initialized"
        );
        Ok(Self { inner })
    }

    /// Ends sessions whose debit loop failed them closed
    fn spawn_reaper(inner: Weak<EngineInner>, mut rx: mpsc::UnboundedReceiver<DebitFailure>) {
        tokio::spawn(async move {
            while let Some(failure) = rx.recv().await {
                let Some(inner) = inner.upgrade() else {
                    break;
                };
                let engine = SessionEngine { inner };
                if let Err(e) = engine
                    .end_session(&failure.session_id, failure.end_time)
                    .await
                {
                    warn!(session_id = %failure.session_id, error = %e, "Failed reaping session");
                }
            }
            debug!("Session reaper stopped");
        });
    }

    pub fn connections(&self) -> Arc<ExternalConnections> {
        Arc::clone(&self.inner.ctx.connections)
    }

    pub fn timezone(&self) -> Tz {
        self.inner.timezone
    }

    pub fn config(&self) -> &SessionsConfig {
        &self.inner.config
    }

    /// Call `hook` with the id of every session that stops being managed
    ///
    /// Runs for every ending path, reaped sessions and shutdown included.
    /// Hooks run under the session's lock and must not call back into the
    /// engine.
    pub fn on_session_ended<F>(&self, hook: F)
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        self.inner.ended_hooks.write().push(Box::new(hook));
    }

    /// Start charging a call
    ///
    /// Returns the usage the call may consume, zero when the rating engine
    /// has no runs for it.
    #[instrument(skip(self, event), fields(session_id = %event.origin_id()))]
    pub async fn session_start(&self, event: &SessionEvent, conn_id: &str) -> AppResult<Duration> {
        let inner = &self.inner;
        let session_id = event.origin_id();
        let lock_timeout = inner.config.start_lock_timeout();

        let managed = inner
            .guardian
            .guard(session_id, lock_timeout, move || async move {
                if inner.registry.contains(session_id) {
                    debug!("Session already started");
                    return Ok(true);
                }

                let runs = inner.ctx.rater.get_session_runs(event).await?;
                if runs.is_empty() {
                    debug!("No session runs, not charged here");
                    return Ok(false);
                }

                let stop = CancellationToken::new();
                let sessions: Vec<Arc<Session>> = runs
                    .into_iter()
                    .map(|run| {
                        Arc::new(Session::new(
                            event.clone(),
                            conn_id,
                            run,
                            Arc::clone(&inner.ctx),
                            stop.child_token(),
                        ))
                    })
                    .collect();
                for session in &sessions {
                    session.start_debit_loop(
                        Arc::clone(&inner.guardian),
                        lock_timeout,
                        inner.reaper_tx.clone(),
                    );
                }

                info!(runs = sessions.len(), conn_id = %conn_id, "Session started");
                inner.registry.index(session_id, SessionGroup { sessions, stop });
                Ok(true)
            })
            .await?;

        if !managed {
            return Ok(Duration::ZERO);
        }
        self.session_update(event).await
    }

    /// Debit the usage the event asks for on every run
    ///
    /// Returns the smallest grant across runs. An id with no runs here is
    /// not an error: the requested bound is returned unchanged.
    #[instrument(skip(self, event), fields(session_id = %event.origin_id()))]
    pub async fn session_update(&self, event: &SessionEvent) -> AppResult<Duration> {
        let inner = &self.inner;
        let session_id = event.origin_id();
        let requested = event.max_usage(inner.config.max_call_duration());

        inner
            .guardian
            .guard(session_id, inner.config.start_lock_timeout(), move || async move {
                let Some(sessions) = inner.registry.get(session_id) else {
                    debug!("Session not managed, update ignored");
                    return Ok(requested);
                };

                let mut max_usage = requested;
                for session in &sessions {
                    let granted = session.debit(requested).await?;
                    max_usage = max_usage.min(granted);
                }
                Ok(max_usage)
            })
            .await
    }

    /// End the call described by `event`
    pub async fn session_end(&self, event: &SessionEvent) -> AppResult<()> {
        let end_time = event.end_time()?;
        self.end_session(event.origin_id(), end_time).await
    }

    /// Close and persist every run of `session_id`
    ///
    /// Unknown ids are a no-op. Failures of one run are logged and do not
    /// stop its siblings.
    #[instrument(skip(self))]
    pub async fn end_session(&self, session_id: &str, end_time: DateTime<Utc>) -> AppResult<()> {
        let inner = &self.inner;

        inner
            .guardian
            .guard(session_id, inner.config.end_lock_timeout(), move || async move {
                let Some(group) = inner.registry.unindex(session_id) else {
                    debug!("Session not managed, end ignored");
                    return Ok(());
                };
                group.stop.cancel();
                for hook in inner.ended_hooks.read().iter() {
                    hook(session_id);
                }

                for session in &group.sessions {
                    if let Err(e) = session.close(end_time).await {
                        error!(run_id = %session.run_id(), error = %e, "Failed closing session run");
                    }
                    if let Err(e) = session.save_operations().await {
                        error!(run_id = %session.run_id(), error = %e, "Failed saving session run");
                    }
                }
                info!(runs = group.sessions.len(), "Session ended");
                Ok(())
            })
            .await
    }

    /// End every live session now
    ///
    /// Never fails: sessions that cannot be ended are reported in the log.
    pub async fn shutdown(&self) {
        let ids = self.inner.registry.ids();
        info!(sessions = ids.len(), "Draining sessions");

        let now = Utc::now();
        let mut failed = Vec::new();
        for id in ids {
            if let Err(e) = self.end_session(&id, now).await {
                warn!(session_id = %id, error = %e, "Failed ending session on shutdown");
                failed.push(id);
            }
        }

        if failed.is_empty() {
            info!("All sessions drained");
        } else {
            error!(failed = ?failed, "Sessions left undrained");
        }
    }

    /// Longest usage the rating engine authorizes for the event
    #[instrument(skip(self, event), fields(session_id = %event.origin_id()))]
    pub async fn get_max_usage(&self, event: &SessionEvent) -> AppResult<Duration> {
        let event = event.clone().with_event_name(AUTHORIZATION_EVENT);
        self.inner.ctx.rater.get_derived_max_session_time(&event).await
    }

    /// Supplier ids ordered by least cost routing
    #[instrument(skip(self, event), fields(session_id = %event.origin_id()))]
    pub async fn get_lcr_suppliers(&self, event: &SessionEvent) -> AppResult<Vec<String>> {
        let cd = event.call_descriptor(self.inner.config.max_call_duration())?;
        let suppliers = self.inner.ctx.rater.get_lcr(&cd).await?;

        let mut failed = false;
        for supplier in &suppliers {
            if let Some(err) = &supplier.error {
                warn!(supplier = %supplier.supplier, error = %err, "LCR supplier error");
                failed = true;
            }
        }
        if failed {
            return Err(AppError::LcrCompute(format!(
                "supplier errors for destination {}",
                event.destination()
            )));
        }

        Ok(suppliers.into_iter().map(|s| s.supplier).collect())
    }

    /// Record a CDR for an event charged elsewhere
    #[instrument(skip(self, event), fields(session_id = %event.origin_id()))]
    pub async fn process_cdr(&self, event: &SessionEvent) -> AppResult<()> {
        let usage = event.usage().unwrap_or(Duration::ZERO);
        let cdr = ChargedCdr::from_event(event, RAW_RUN_ID, usage, Decimal::ZERO);
        self.inner.ctx.cdrs.process_cdr(&cdr).await
    }

    pub fn active_sessions(&self) -> Vec<ActiveSession> {
        self.inner
            .registry
            .snapshot()
            .iter()
            .map(|s| ActiveSession::from(s.as_ref()))
            .collect()
    }

    pub fn get_session(&self, session_id: &str) -> AppResult<Vec<ActiveSession>> {
        self.inner
            .registry
            .get(session_id)
            .map(|sessions| {
                sessions
                    .iter()
                    .map(|s| ActiveSession::from(s.as_ref()))
                    .collect()
            })
            .ok_or_else(|| AppError::NotManaged(session_id.to_string()))
    }

    pub fn is_managed(&self, session_id: &str) -> bool {
        self.inner.registry.contains(session_id)
    }

    pub fn session_count(&self) -> usize {
        self.inner.registry.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use apolo_core::models::{CallCost, CallDescriptor, LcrSupplier, SessionRun};
    use async_trait::async_trait;
    use chrono::TimeZone;
    use mockall::mock;
    use mockall::predicate::eq;
    use rust_decimal_macros::dec;

    mock! {
        pub Rater {}

        #[async_trait]
        impl RatingConnector for Rater {
            async fn get_session_runs(&self, event: &SessionEvent) -> AppResult<Vec<SessionRun>>;
            async fn debit_usage(&self, run: &SessionRun, duration: Duration) -> AppResult<CallCost>;
            async fn refund_usage(&self, run: &SessionRun, duration: Duration) -> AppResult<()>;
            async fn get_derived_max_session_time(&self, event: &SessionEvent) -> AppResult<Duration>;
            async fn get_lcr(&self, cd: &CallDescriptor) -> AppResult<Vec<LcrSupplier>>;
        }
    }

    mock! {
        pub Cdrs {}

        #[async_trait]
        impl CdrConnector for Cdrs {
            async fn process_cdr(&self, cdr: &ChargedCdr) -> AppResult<()>;
        }
    }

    fn answer_time() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2016, 1, 5, 18, 31, 5).unwrap()
    }

    fn event() -> SessionEvent {
        SessionEvent::new("call-1")
            .with_tenant("cgrates.org")
            .with_account("1001")
            .with_destination("1002")
            .with_answer_time(answer_time())
            .with_usage(Duration::from_secs(120))
    }

    fn run(run_id: &str) -> SessionRun {
        SessionRun::new(
            run_id,
            event().call_descriptor(Duration::from_secs(10800)).unwrap(),
        )
    }

    fn engine(rater: MockRater, cdrs: MockCdrs) -> SessionEngine {
        SessionEngine::new(SessionsConfig::default(), Arc::new(rater), Arc::new(cdrs)).unwrap()
    }

    #[tokio::test]
    async fn test_start_without_runs_is_not_charged() {
        let mut rater = MockRater::new();
        rater
            .expect_get_session_runs()
            .times(1)
            .returning(|_| Ok(Vec::new()));

        let engine = engine(rater, MockCdrs::new());
        let max_usage = engine.session_start(&event(), "peer-1").await.unwrap();

        assert_eq!(max_usage, Duration::ZERO);
        assert!(!engine.is_managed("call-1"));
    }

    #[tokio::test]
    async fn test_start_returns_smallest_grant_and_end_settles_each_run() {
        let mut rater = MockRater::new();
        rater
            .expect_get_session_runs()
            .times(1)
            .returning(|_| Ok(vec![run("*default"), run("reseller")]));
        rater
            .expect_debit_usage()
            .times(2)
            .returning(|run, duration| {
                let granted = if run.run_id == "reseller" {
                    Duration::from_secs(60)
                } else {
                    duration
                };
                Ok(CallCost::new(granted, dec!(1.20)))
            });
        // the default run reserved 120s but only used 60s
        rater
            .expect_refund_usage()
            .withf(|run, duration| run.run_id == "*default" && *duration == Duration::from_secs(60))
            .times(1)
            .returning(|_, _| Ok(()));

        let mut cdrs = MockCdrs::new();
        cdrs.expect_process_cdr()
            .withf(|cdr| cdr.usage == Duration::from_secs(60))
            .times(2)
            .returning(|_| Ok(()));

        let engine = engine(rater, cdrs);
        let max_usage = engine.session_start(&event(), "peer-1").await.unwrap();
        assert_eq!(max_usage, Duration::from_secs(60));
        assert_eq!(engine.get_session("call-1").unwrap().len(), 2);
        assert!(engine
            .active_sessions()
            .iter()
            .all(|s| s.state == SessionState::Active));

        engine
            .end_session("call-1", answer_time() + chrono::Duration::seconds(60))
            .await
            .unwrap();
        assert!(!engine.is_managed("call-1"));
        assert!(engine.active_sessions().is_empty());
    }

    #[tokio::test]
    async fn test_ended_hook_sees_each_managed_session_once() {
        let mut rater = MockRater::new();
        rater
            .expect_get_session_runs()
            .returning(|_| Ok(vec![run("*default")]));
        rater
            .expect_debit_usage()
            .returning(|_, duration| Ok(CallCost::new(duration, dec!(0.50))));
        rater.expect_refund_usage().returning(|_, _| Ok(()));
        let mut cdrs = MockCdrs::new();
        cdrs.expect_process_cdr().times(1).returning(|_| Ok(()));

        let engine = engine(rater, cdrs);
        let ended = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let seen = Arc::clone(&ended);
        engine.on_session_ended(move |id| seen.lock().push(id.to_string()));

        engine.session_start(&event(), "peer-1").await.unwrap();
        assert!(ended.lock().is_empty());

        let end_time = answer_time() + chrono::Duration::seconds(60);
        engine.end_session("call-1", end_time).await.unwrap();
        engine.end_session("call-1", end_time).await.unwrap();
        engine.end_session("call-2", end_time).await.unwrap();
        assert_eq!(*ended.lock(), vec!["call-1".to_string()]);
    }

    #[tokio::test]
    async fn test_update_unknown_session_returns_requested() {
        let engine = engine(MockRater::new(), MockCdrs::new());
        let max_usage = engine.session_update(&event()).await.unwrap();
        assert_eq!(max_usage, Duration::from_secs(120));
    }

    #[tokio::test]
    async fn test_end_unknown_session_is_noop() {
        let engine = engine(MockRater::new(), MockCdrs::new());
        engine.session_end(&event()).await.unwrap();
        assert_eq!(
            engine.get_session("call-1").unwrap_err().error_code(),
            "not_managed"
        );
    }

    #[tokio::test]
    async fn test_rating_failure_on_start_is_returned() {
        let mut rater = MockRater::new();
        rater
            .expect_get_session_runs()
            .returning(|_| Err(AppError::RatingUnavailable("connection refused".to_string())));

        let engine = engine(rater, MockCdrs::new());
        let err = engine.session_start(&event(), "peer-1").await.unwrap_err();
        assert!(err.is_rating_failure());
        assert_eq!(engine.session_count(), 0);
    }

    #[tokio::test]
    async fn test_max_usage_asks_for_authorization() {
        let mut rater = MockRater::new();
        rater
            .expect_get_derived_max_session_time()
            .withf(|event| event.event_name() == AUTHORIZATION_EVENT)
            .times(1)
            .returning(|_| Ok(Duration::from_secs(3600)));

        let engine = engine(rater, MockCdrs::new());
        assert_eq!(
            engine.get_max_usage(&event()).await.unwrap(),
            Duration::from_secs(3600)
        );
    }

    #[tokio::test]
    async fn test_lcr_suppliers() {
        let mut rater = MockRater::new();
        rater.expect_get_lcr().times(1).returning(|_| {
            Ok(vec![
                LcrSupplier {
                    supplier: "supplier1".to_string(),
                    cost: dec!(0.01),
                    error: None,
                },
                LcrSupplier {
                    supplier: "supplier2".to_string(),
                    cost: dec!(0.02),
                    error: None,
                },
            ])
        });

        let engine = engine(rater, MockCdrs::new());
        assert_eq!(
            engine.get_lcr_suppliers(&event()).await.unwrap(),
            vec!["supplier1".to_string(), "supplier2".to_string()]
        );
    }

    #[tokio::test]
    async fn test_lcr_supplier_error_fails() {
        let mut rater = MockRater::new();
        rater.expect_get_lcr().returning(|_| {
            Ok(vec![LcrSupplier {
                supplier: "supplier1".to_string(),
                cost: Decimal::ZERO,
                error: Some("no rating plan".to_string()),
            }])
        });

        let engine = engine(rater, MockCdrs::new());
        let err = engine.get_lcr_suppliers(&event()).await.unwrap_err();
        assert_eq!(err.error_code(), "lcr_compute_error");
    }

    #[tokio::test]
    async fn test_process_cdr_records_raw_run() {
        let mut cdrs = MockCdrs::new();
        cdrs.expect_process_cdr()
            .withf(|cdr| {
                cdr.run_id == RAW_RUN_ID
                    && cdr.usage == Duration::from_secs(120)
                    && cdr.cost == Decimal::ZERO
            })
            .times(1)
            .returning(|_| Ok(()));

        let engine = engine(MockRater::new(), cdrs);
        engine.process_cdr(&event()).await.unwrap();
    }

    #[tokio::test]
    async fn test_second_start_only_debits() {
        let mut rater = MockRater::new();
        rater
            .expect_get_session_runs()
            .times(1)
            .returning(|_| Ok(vec![run("*default")]));
        rater
            .expect_debit_usage()
            .with(mockall::predicate::always(), eq(Duration::from_secs(120)))
            .times(2)
            .returning(|_, d| Ok(CallCost::new(d, dec!(0.5))));

        let engine = engine(rater, MockCdrs::new());
        engine.session_start(&event(), "peer-1").await.unwrap();
        engine.session_start(&event(), "peer-1").await.unwrap();
        assert_eq!(engine.get_session("call-1").unwrap()[0].usage, Duration::from_secs(240));
    }
}
