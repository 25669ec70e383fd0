//! Session engine lifecycle with the debit loop running on a paused clock

use apolo_core::config::SessionsConfig;
use apolo_core::models::{
    CallCost, CallDescriptor, ChargedCdr, LcrSupplier, SessionEvent, SessionRun,
};
use apolo_core::traits::{CdrConnector, RatingConnector};
use apolo_core::{AppError, AppResult};
use apolo_sessions::{DisconnectReason, SessionEngine, SessionState};
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use parking_lot::Mutex;
use rust_decimal::Decimal;
use std::sync::Arc;
use std::time::Duration;

const INTERVAL: Duration = Duration::from_secs(10);

/// Grants from a prepaid balance; fails every debit after `fail_after`
struct PrepaidRater {
    runs: Vec<&'static str>,
    balance: Mutex<Duration>,
    debits: Mutex<Vec<Duration>>,
    refunds: Mutex<Vec<Duration>>,
    fail_after: Option<usize>,
}

impl PrepaidRater {
    fn new(balance_secs: u64) -> Self {
        Self {
            runs: vec!["*default"],
            balance: Mutex::new(Duration::from_secs(balance_secs)),
            debits: Mutex::new(Vec::new()),
            refunds: Mutex::new(Vec::new()),
            fail_after: None,
        }
    }

    fn with_runs(runs: Vec<&'static str>) -> Self {
        Self {
            runs,
            ..Self::new(3600)
        }
    }

    fn failing_after(debits: usize) -> Self {
        Self {
            fail_after: Some(debits),
            ..Self::new(3600)
        }
    }
}

#[async_trait]
impl RatingConnector for PrepaidRater {
    async fn get_session_runs(&self, event: &SessionEvent) -> AppResult<Vec<SessionRun>> {
        let cd = event.call_descriptor(Duration::from_secs(10800))?;
        Ok(self
            .runs
            .iter()
            .map(|run_id| SessionRun::new(*run_id, cd.clone()))
            .collect())
    }

    async fn debit_usage(&self, _run: &SessionRun, duration: Duration) -> AppResult<CallCost> {
        let mut debits = self.debits.lock();
        if self.fail_after.is_some_and(|n| debits.len() >= n) {
            return Err(AppError::RatingUnavailable("rater went away".to_string()));
        }
        let mut balance = self.balance.lock();
        let granted = duration.min(*balance);
        *balance -= granted;
        debits.push(granted);
        Ok(CallCost::new(granted, Decimal::from(granted.as_secs())))
    }

    async fn refund_usage(&self, _run: &SessionRun, duration: Duration) -> AppResult<()> {
        *self.balance.lock() += duration;
        self.refunds.lock().push(duration);
        Ok(())
    }

    async fn get_derived_max_session_time(&self, _event: &SessionEvent) -> AppResult<Duration> {
        Ok(*self.balance.lock())
    }

    async fn get_lcr(&self, _cd: &CallDescriptor) -> AppResult<Vec<LcrSupplier>> {
        Ok(Vec::new())
    }
}

#[derive(Default)]
struct CdrStore {
    cdrs: Mutex<Vec<ChargedCdr>>,
}

#[async_trait]
impl CdrConnector for CdrStore {
    async fn process_cdr(&self, cdr: &ChargedCdr) -> AppResult<()> {
        self.cdrs.lock().push(cdr.clone());
        Ok(())
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
        .with_usage(INTERVAL)
}

fn engine(rater: Arc<PrepaidRater>, cdrs: Arc<CdrStore>) -> SessionEngine {
    let config = SessionsConfig {
        debit_interval_secs: INTERVAL.as_secs(),
        ..SessionsConfig::default()
    };
    SessionEngine::new(config, rater, cdrs).unwrap()
}

#[tokio::test(start_paused = true)]
async fn test_debit_loop_reserves_each_interval_and_close_refunds() {
    let rater = Arc::new(PrepaidRater::new(3600));
    let cdrs = Arc::new(CdrStore::default());
    let engine = engine(Arc::clone(&rater), Arc::clone(&cdrs));

    let granted = engine.session_start(&event(), "peer-1").await.unwrap();
    assert_eq!(granted, INTERVAL);

    // ticks at 10s, 20s and 30s
    tokio::time::sleep(Duration::from_secs(35)).await;
    assert_eq!(rater.debits.lock().len(), 4);
    let active = engine.get_session("call-1").unwrap();
    assert_eq!(active[0].state, SessionState::Active);
    assert_eq!(active[0].usage, Duration::from_secs(40));

    engine
        .end_session("call-1", answer_time() + chrono::Duration::seconds(35))
        .await
        .unwrap();

    assert_eq!(rater.refunds.lock().clone(), vec![Duration::from_secs(5)]);
    let recorded = cdrs.cdrs.lock().clone();
    assert_eq!(recorded.len(), 1);
    assert_eq!(recorded[0].usage, Duration::from_secs(35));

    // no debit after the end
    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(rater.debits.lock().len(), 4);
}

#[tokio::test(start_paused = true)]
async fn test_end_stops_debit_loop_of_every_run() {
    let rater = Arc::new(PrepaidRater::with_runs(vec!["*default", "retail"]));
    let cdrs = Arc::new(CdrStore::default());
    let engine = engine(Arc::clone(&rater), Arc::clone(&cdrs));

    engine.session_start(&event(), "peer-1").await.unwrap();

    // start plus ticks at 10s and 20s, on both runs
    tokio::time::sleep(Duration::from_secs(25)).await;
    let debits = rater.debits.lock().len();
    assert_eq!(debits, 6);

    engine
        .end_session("call-1", answer_time() + chrono::Duration::seconds(25))
        .await
        .unwrap();
    assert!(!engine.is_managed("call-1"));

    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(rater.debits.lock().len(), debits);

    let recorded = cdrs.cdrs.lock().clone();
    assert_eq!(recorded.len(), 2);
    let mut run_ids: Vec<&str> = recorded.iter().map(|cdr| cdr.run_id.as_str()).collect();
    run_ids.sort_unstable();
    assert_eq!(run_ids, vec!["*default", "retail"]);
    assert!(recorded
        .iter()
        .all(|cdr| cdr.usage == Duration::from_secs(25)));
    assert_eq!(
        rater.refunds.lock().clone(),
        vec![Duration::from_secs(5), Duration::from_secs(5)]
    );
}

#[tokio::test(start_paused = true)]
async fn test_rating_failure_disconnects_and_reaps_session() {
    let rater = Arc::new(PrepaidRater::failing_after(1));
    let cdrs = Arc::new(CdrStore::default());
    let engine = engine(Arc::clone(&rater), Arc::clone(&cdrs));
    let mut disconnects = engine.connections().register("peer-1");

    engine.session_start(&event(), "peer-1").await.unwrap();
    tokio::time::sleep(Duration::from_secs(15)).await;

    let request = disconnects.try_recv().unwrap();
    assert_eq!(request.session_id, "call-1");
    assert_eq!(request.reason, DisconnectReason::RatingUnavailable);

    assert!(!engine.is_managed("call-1"));
    let recorded = cdrs.cdrs.lock().clone();
    assert_eq!(recorded.len(), 1);
    assert_eq!(recorded[0].usage, INTERVAL);

    // a late end from the network is harmless
    engine.session_end(&event()).await.unwrap();
    assert_eq!(cdrs.cdrs.lock().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_exhausted_balance_ends_call_when_grant_runs_out() {
    let rater = Arc::new(PrepaidRater::new(15));
    let cdrs = Arc::new(CdrStore::default());
    let engine = engine(Arc::clone(&rater), Arc::clone(&cdrs));
    let mut disconnects = engine.connections().register("peer-1");

    engine.session_start(&event(), "peer-1").await.unwrap();

    // the 10s tick only gets 5s, the call is cut when those run out
    tokio::time::sleep(Duration::from_secs(12)).await;
    assert!(engine.is_managed("call-1"));
    assert!(disconnects.try_recv().is_err());

    tokio::time::sleep(Duration::from_secs(8)).await;
    assert_eq!(
        disconnects.try_recv().unwrap().reason,
        DisconnectReason::InsufficientCredit
    );
    assert!(!engine.is_managed("call-1"));

    let recorded = cdrs.cdrs.lock().clone();
    assert_eq!(recorded[0].usage, Duration::from_secs(15));
    assert_eq!(*rater.balance.lock(), Duration::ZERO);
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_ends_close_once() {
    let rater = Arc::new(PrepaidRater::new(3600));
    let cdrs = Arc::new(CdrStore::default());
    let engine = engine(Arc::clone(&rater), Arc::clone(&cdrs));

    engine.session_start(&event(), "peer-1").await.unwrap();

    let end_time = answer_time() + chrono::Duration::seconds(8);
    let (a, b) = tokio::join!(
        engine.end_session("call-1", end_time),
        engine.end_session("call-1", end_time)
    );
    a.unwrap();
    b.unwrap();

    assert_eq!(cdrs.cdrs.lock().len(), 1);
    assert_eq!(rater.refunds.lock().clone(), vec![Duration::from_secs(2)]);
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_drains_every_session() {
    let rater = Arc::new(PrepaidRater::new(3600));
    let cdrs = Arc::new(CdrStore::default());
    let engine = engine(Arc::clone(&rater), Arc::clone(&cdrs));

    for id in ["call-1", "call-2", "call-3"] {
        let event = SessionEvent::new(id)
            .with_tenant("cgrates.org")
            .with_account("1001")
            .with_destination("1002")
            .with_answer_time(Utc::now())
            .with_usage(INTERVAL);
        engine.session_start(&event, "peer-1").await.unwrap();
    }
    assert_eq!(engine.session_count(), 3);

    engine.shutdown().await;
    assert_eq!(engine.session_count(), 0);
    assert_eq!(cdrs.cdrs.lock().len(), 3);
}

#[tokio::test]
async fn test_unknown_session_end_is_noop() {
    let rater = Arc::new(PrepaidRater::new(3600));
    let cdrs = Arc::new(CdrStore::default());
    let engine = engine(Arc::clone(&rater), Arc::clone(&cdrs));

    engine
        .end_session("never-started", answer_time())
        .await
        .unwrap();
    assert!(cdrs.cdrs.lock().is_empty());
    assert!(rater.debits.lock().is_empty());
}
