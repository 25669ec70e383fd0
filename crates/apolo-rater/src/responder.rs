//! Responder API: derived charging, debits and routing
//!
//! Implements the engine's `RatingConnector` contract on top of the
//! JSON-RPC client.

use apolo_core::models::{CallCost, CallDescriptor, LcrSupplier, SessionEvent, SessionRun};
use apolo_core::traits::RatingConnector;
use apolo_core::AppResult;
use async_trait::async_trait;
use std::time::Duration;
use tracing::{debug, info, instrument};

use crate::client::RaterClient;
use crate::types::*;

impl RaterClient {
    /// Event fields as sent to the rating engine, tenant filled in
    fn event_args(&self, event: &SessionEvent) -> std::collections::BTreeMap<String, String> {
        let mut fields = event.to_fields();
        fields
            .entry("Tenant".to_string())
            .or_insert_with(|| self.tenant.clone());
        fields
            .entry("OriginHost".to_string())
            .or_insert_with(|| self.origin_host.clone());
        fields
    }
}

#[async_trait]
impl RatingConnector for RaterClient {
    #[instrument(skip(self, event), fields(origin_id = %event.origin_id()))]
    async fn get_session_runs(&self, event: &SessionEvent) -> AppResult<Vec<SessionRun>> {
        let runs: Vec<WireSessionRun> = self
            .call(methods::GET_SESSION_RUNS, self.event_args(event))
            .await?;
        debug!(runs = runs.len(), "Session runs");
        Ok(runs.into_iter().map(SessionRun::from).collect())
    }

    #[instrument(skip(self, run), fields(run_id = %run.run_id, account = %run.call_descriptor.account))]
    async fn debit_usage(&self, run: &SessionRun, duration: Duration) -> AppResult<CallCost> {
        // the run already describes the window being charged
        let cd = WireCallDescriptor::new(run.call_descriptor.clone());
        let reply: WireCallCost = self.call(methods::MAX_DEBIT, cd).await?;
        let cost = CallCost::from(reply);
        debug!(
            requested_secs = duration.as_secs(),
            granted_secs = cost.granted.as_secs(),
            cost = %cost.cost,
            "Max debit"
        );
        Ok(cost)
    }

    #[instrument(skip(self, run), fields(run_id = %run.run_id, account = %run.call_descriptor.account))]
    async fn refund_usage(&self, run: &SessionRun, duration: Duration) -> AppResult<()> {
        let cd = WireCallDescriptor::new(run.call_descriptor.clone());
        let _: serde_json::Value = self.call(methods::REFUND_INCREMENTS, cd).await?;
        info!(refund_secs = duration.as_secs(), "Refunded increments");
        Ok(())
    }

    #[instrument(skip(self, event), fields(origin_id = %event.origin_id()))]
    async fn get_derived_max_session_time(&self, event: &SessionEvent) -> AppResult<Duration> {
        let nanos: f64 = self
            .call(methods::GET_DERIVED_MAX_SESSION_TIME, self.event_args(event))
            .await?;
        Ok(from_nanos(nanos as i64))
    }

    #[instrument(skip(self, cd), fields(destination = %cd.destination))]
    async fn get_lcr(&self, cd: &CallDescriptor) -> AppResult<Vec<LcrSupplier>> {
        let args = WireLcrArgs {
            call_descriptor: WireCallDescriptor::new(cd.clone()),
        };
        let reply: WireLcrCost = self.call(methods::GET_LCR, args).await?;
        Ok(reply.supplier_costs.into_iter().map(LcrSupplier::from).collect())
    }
}
