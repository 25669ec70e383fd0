//! Charged CDR model
//!
//! The finished record of one session run, handed to the CDR service once
//! the run is closed.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

use super::SessionEvent;

/// Finished record for one (session id, run id) pair
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ChargedCdr {
    #[serde(rename = "OriginID")]
    pub origin_id: String,
    #[serde(rename = "RunID")]
    pub run_id: String,
    pub origin_host: String,
    pub tenant: String,
    pub category: String,
    pub account: String,
    pub subject: String,
    pub destination: String,
    #[serde(rename = "ToR")]
    pub tor: String,
    pub request_type: String,
    pub direction: String,
    pub setup_time: Option<DateTime<Utc>>,
    pub answer_time: Option<DateTime<Utc>>,
    #[serde(with = "super::serde_duration")]
    pub usage: Duration,
    pub cost: Decimal,
    #[serde(default)]
    pub supplier: String,
    #[serde(default)]
    pub extra_fields: BTreeMap<String, String>,
}

impl ChargedCdr {
    /// Record for `run_id` of `event` with the settled usage and cost
    pub fn from_event(event: &SessionEvent, run_id: &str, usage: Duration, cost: Decimal) -> Self {
        Self {
            origin_id: event.origin_id().to_string(),
            run_id: run_id.to_string(),
            origin_host: event.origin_host().to_string(),
            tenant: event.tenant().to_string(),
            category: event.category().to_string(),
            account: event.account().to_string(),
            subject: event.subject().to_string(),
            destination: event.destination().to_string(),
            tor: event.tor().to_string(),
            request_type: event.request_type().to_string(),
            direction: event.direction().to_string(),
            setup_time: event.setup_time(),
            answer_time: event.answer_time(),
            usage,
            cost,
            supplier: event.supplier().to_string(),
            extra_fields: event.extra_fields().clone(),
        }
    }

    /// Whether the call was answered and consumed anything
    #[inline]
    pub fn was_answered(&self) -> bool {
        self.answer_time.is_some() && !self.usage.is_zero()
    }
}
