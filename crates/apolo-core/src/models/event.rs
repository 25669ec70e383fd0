//! Session event model
//!
//! A [`SessionEvent`] is one normalized billing event as it arrives from a
//! transport (HTTP, Diameter). Transports speak an ordered map of string
//! keys to string values; the engine works on the typed view built here.

use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

use super::{checked_offset, CallDescriptor, OUT, VOICE};
use crate::{AppError, AppResult};

/// Field names of the string-map representation
pub mod keys {
    pub const EVENT_NAME: &str = "EventName";
    pub const ORIGIN_ID: &str = "OriginID";
    pub const ORIGIN_HOST: &str = "OriginHost";
    pub const TOR: &str = "ToR";
    pub const REQUEST_TYPE: &str = "RequestType";
    pub const DIRECTION: &str = "Direction";
    pub const TENANT: &str = "Tenant";
    pub const CATEGORY: &str = "Category";
    pub const ACCOUNT: &str = "Account";
    pub const SUBJECT: &str = "Subject";
    pub const DESTINATION: &str = "Destination";
    pub const SUBSCRIBER_ID: &str = "SubscriberId";
    pub const SUPPLIER: &str = "Supplier";
    pub const SETUP_TIME: &str = "SetupTime";
    pub const ANSWER_TIME: &str = "AnswerTime";
    pub const END_TIME: &str = "EndTime";
    pub const USAGE: &str = "Usage";
}

/// One normalized billing event
///
/// Immutable once built: the `with_*` methods consume the event and return
/// a new one. Derived views (call descriptor, requested usage, end time) are
/// computed on demand and never stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(
    try_from = "BTreeMap<String, String>",
    into = "BTreeMap<String, String>"
)]
pub struct SessionEvent {
    event_name: String,
    origin_id: String,
    origin_host: String,
    tor: String,
    request_type: String,
    direction: String,
    tenant: String,
    category: String,
    account: String,
    subject: String,
    destination: String,
    subscriber_id: String,
    supplier: String,
    setup_time: Option<DateTime<Utc>>,
    answer_time: Option<DateTime<Utc>>,
    end_time: Option<DateTime<Utc>>,
    usage: Option<Duration>,
    extra_fields: BTreeMap<String, String>,
}

impl SessionEvent {
    /// Start an event for the given external session id
    pub fn new(origin_id: impl Into<String>) -> Self {
        Self {
            event_name: String::new(),
            origin_id: origin_id.into(),
            origin_host: String::new(),
            tor: VOICE.to_string(),
            request_type: String::new(),
            direction: OUT.to_string(),
            tenant: String::new(),
            category: String::new(),
            account: String::new(),
            subject: String::new(),
            destination: String::new(),
            subscriber_id: String::new(),
            supplier: String::new(),
            setup_time: None,
            answer_time: None,
            end_time: None,
            usage: None,
            extra_fields: BTreeMap::new(),
        }
    }

    // ==================== Builders ====================

    pub fn with_event_name(mut self, value: impl Into<String>) -> Self {
        self.event_name = value.into();
        self
    }

    pub fn with_origin_host(mut self, value: impl Into<String>) -> Self {
        self.origin_host = value.into();
        self
    }

    pub fn with_tor(mut self, value: impl Into<String>) -> Self {
        self.tor = value.into();
        self
    }

    pub fn with_request_type(mut self, value: impl Into<String>) -> Self {
        self.request_type = value.into();
        self
    }

    pub fn with_direction(mut self, value: impl Into<String>) -> Self {
        self.direction = value.into();
        self
    }

    pub fn with_tenant(mut self, value: impl Into<String>) -> Self {
        self.tenant = value.into();
        self
    }

    pub fn with_category(mut self, value: impl Into<String>) -> Self {
        self.category = value.into();
        self
    }

    pub fn with_account(mut self, value: impl Into<String>) -> Self {
        self.account = value.into();
        self
    }

    pub fn with_subject(mut self, value: impl Into<String>) -> Self {
        self.subject = value.into();
        self
    }

    pub fn with_destination(mut self, value: impl Into<String>) -> Self {
        self.destination = value.into();
        self
    }

    pub fn with_subscriber_id(mut self, value: impl Into<String>) -> Self {
        self.subscriber_id = value.into();
        self
    }

    pub fn with_supplier(mut self, value: impl Into<String>) -> Self {
        self.supplier = value.into();
        self
    }

    pub fn with_setup_time(mut self, value: DateTime<Utc>) -> Self {
        self.setup_time = Some(value);
        self
    }

    pub fn with_answer_time(mut self, value: DateTime<Utc>) -> Self {
        self.answer_time = Some(value);
        self
    }

    pub fn with_end_time(mut self, value: DateTime<Utc>) -> Self {
        self.end_time = Some(value);
        self
    }

    pub fn with_usage(mut self, value: Duration) -> Self {
        self.usage = Some(value);
        self
    }

    pub fn with_extra_field(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.extra_fields.insert(key.into(), value.into());
        self
    }

    // ==================== Accessors ====================

    pub fn event_name(&self) -> &str {
        &self.event_name
    }

    /// External session id correlating every message of one call
    pub fn origin_id(&self) -> &str {
        &self.origin_id
    }

    pub fn origin_host(&self) -> &str {
        &self.origin_host
    }

    pub fn tor(&self) -> &str {
        &self.tor
    }

    pub fn request_type(&self) -> &str {
        &self.request_type
    }

    pub fn direction(&self) -> &str {
        &self.direction
    }

    pub fn tenant(&self) -> &str {
        &self.tenant
    }

    pub fn category(&self) -> &str {
        &self.category
    }

    pub fn account(&self) -> &str {
        &self.account
    }

    /// Rating subject, falls back to the account
    pub fn subject(&self) -> &str {
        if self.subject.is_empty() {
            &self.account
        } else {
            &self.subject
        }
    }

    pub fn destination(&self) -> &str {
        &self.destination
    }

    pub fn subscriber_id(&self) -> &str {
        &self.subscriber_id
    }

    pub fn supplier(&self) -> &str {
        &self.supplier
    }

    pub fn setup_time(&self) -> Option<DateTime<Utc>> {
        self.setup_time
    }

    pub fn answer_time(&self) -> Option<DateTime<Utc>> {
        self.answer_time
    }

    pub fn usage(&self) -> Option<Duration> {
        self.usage
    }

    pub fn extra_fields(&self) -> &BTreeMap<String, String> {
        &self.extra_fields
    }

    // ==================== Derived views ====================

    /// When billing starts: answer time, else setup time
    pub fn start_time(&self) -> Option<DateTime<Utc>> {
        self.answer_time.or(self.setup_time)
    }

    /// Requested usage bound, the configured maximum when the event has none
    pub fn max_usage(&self, max_call_duration: Duration) -> Duration {
        self.usage.unwrap_or(max_call_duration)
    }

    /// Explicit end time, else start time plus usage
    pub fn end_time(&self) -> AppResult<DateTime<Utc>> {
        if let Some(end) = self.end_time {
            return Ok(end);
        }
        let start = self.start_time().ok_or_else(|| {
            AppError::InvalidInput(format!(
                "event {} carries neither end, answer nor setup time",
                self.origin_id
            ))
        })?;
        let usage = self.usage.unwrap_or(Duration::ZERO);
        checked_offset(start, usage).ok_or_else(|| {
            AppError::InvalidInput(format!(
                "event {} usage {:?} runs past the end of time",
                self.origin_id, usage
            ))
        })
    }

    /// Build the call descriptor the rating engine prices
    pub fn call_descriptor(&self, max_call_duration: Duration) -> AppResult<CallDescriptor> {
        for (name, value) in [
            (keys::TENANT, &self.tenant),
            (keys::ACCOUNT, &self.account),
            (keys::DESTINATION, &self.destination),
        ] {
            if value.is_empty() {
                return Err(AppError::InvalidInput(format!(
                    "event {} is missing {}",
                    self.origin_id, name
                )));
            }
        }

        let time_start = self.start_time().unwrap_or_else(Utc::now);
        let max_usage = self.max_usage(max_call_duration);
        let time_end = checked_offset(time_start, max_usage).ok_or_else(|| {
            AppError::InvalidInput(format!(
                "event {} usage {:?} runs past the end of time",
                self.origin_id, max_usage
            ))
        })?;
        Ok(CallDescriptor {
            direction: self.direction.clone(),
            tenant: self.tenant.clone(),
            category: self.category.clone(),
            account: self.account.clone(),
            subject: self.subject().to_string(),
            destination: self.destination.clone(),
            tor: self.tor.clone(),
            time_start,
            time_end,
        })
    }

    // ==================== String map conversion ====================

    /// Parse the ordered string map transports use
    ///
    /// Timestamps without an offset are interpreted in `tz`. Unknown keys are
    /// kept as extra fields.
    pub fn from_fields(fields: &BTreeMap<String, String>, tz: Tz) -> AppResult<Self> {
        let origin_id = fields
            .get(keys::ORIGIN_ID)
            .filter(|v| !v.is_empty())
            .ok_or_else(|| AppError::InvalidInput(format!("missing {}", keys::ORIGIN_ID)))?;

        let mut event = SessionEvent::new(origin_id.clone());
        for (key, value) in fields {
            match key.as_str() {
                keys::ORIGIN_ID => {}
                keys::EVENT_NAME => event.event_name = value.clone(),
                keys::ORIGIN_HOST => event.origin_host = value.clone(),
                keys::TOR if !value.is_empty() => event.tor = value.clone(),
                keys::TOR => {}
                keys::REQUEST_TYPE => event.request_type = value.clone(),
                keys::DIRECTION if !value.is_empty() => event.direction = value.clone(),
                keys::DIRECTION => {}
                keys::TENANT => event.tenant = value.clone(),
                keys::CATEGORY => event.category = value.clone(),
                keys::ACCOUNT => event.account = value.clone(),
                keys::SUBJECT => event.subject = value.clone(),
                keys::DESTINATION => event.destination = value.clone(),
                keys::SUBSCRIBER_ID => event.subscriber_id = value.clone(),
                keys::SUPPLIER => event.supplier = value.clone(),
                keys::SETUP_TIME => event.setup_time = parse_time(key, value, tz)?,
                keys::ANSWER_TIME => event.answer_time = parse_time(key, value, tz)?,
                keys::END_TIME => event.end_time = parse_time(key, value, tz)?,
                keys::USAGE => event.usage = parse_usage(value)?,
                _ => {
                    event.extra_fields.insert(key.clone(), value.clone());
                }
            }
        }
        Ok(event)
    }

    /// Ordered string map, timestamps as RFC 3339 and usage in whole seconds
    pub fn to_fields(&self) -> BTreeMap<String, String> {
        let mut fields = self.extra_fields.clone();
        let mut put = |key: &str, value: &str| {
            if !value.is_empty() {
                fields.insert(key.to_string(), value.to_string());
            }
        };
        put(keys::EVENT_NAME, &self.event_name);
        put(keys::ORIGIN_ID, &self.origin_id);
        put(keys::ORIGIN_HOST, &self.origin_host);
        put(keys::TOR, &self.tor);
        put(keys::REQUEST_TYPE, &self.request_type);
        put(keys::DIRECTION, &self.direction);
        put(keys::TENANT, &self.tenant);
        put(keys::CATEGORY, &self.category);
        put(keys::ACCOUNT, &self.account);
        put(keys::SUBJECT, &self.subject);
        put(keys::DESTINATION, &self.destination);
        put(keys::SUBSCRIBER_ID, &self.subscriber_id);
        put(keys::SUPPLIER, &self.supplier);

        for (key, value) in [
            (keys::SETUP_TIME, self.setup_time),
            (keys::ANSWER_TIME, self.answer_time),
            (keys::END_TIME, self.end_time),
        ] {
            if let Some(t) = value {
                fields.insert(key.to_string(), t.to_rfc3339());
            }
        }
        if let Some(usage) = self.usage {
            fields.insert(keys::USAGE.to_string(), usage.as_secs().to_string());
        }
        fields
    }
}

impl TryFrom<BTreeMap<String, String>> for SessionEvent {
    type Error = AppError;

    fn try_from(fields: BTreeMap<String, String>) -> Result<Self, Self::Error> {
        SessionEvent::from_fields(&fields, chrono_tz::UTC)
    }
}

impl From<SessionEvent> for BTreeMap<String, String> {
    fn from(event: SessionEvent) -> Self {
        event.to_fields()
    }
}

/// Accepts RFC 3339, unix seconds or `YYYY-MM-DD HH:MM:SS` local to `tz`
fn parse_time(key: &str, value: &str, tz: Tz) -> AppResult<Option<DateTime<Utc>>> {
    let value = value.trim();
    if value.is_empty() || value == "0" {
        return Ok(None);
    }
    if let Ok(t) = DateTime::parse_from_rfc3339(value) {
        return Ok(Some(t.with_timezone(&Utc)));
    }
    if let Ok(secs) = value.parse::<i64>() {
        return Utc
            .timestamp_opt(secs, 0)
            .single()
            .map(Some)
            .ok_or_else(|| AppError::InvalidInput(format!("{} out of range: {}", key, value)));
    }
    let naive = NaiveDateTime::parse_from_str(value, "%Y-%m-%d %H:%M:%S")
        .map_err(|e| AppError::InvalidInput(format!("invalid {} {}: {}", key, value, e)))?;
    tz.from_local_datetime(&naive)
        .earliest()
        .map(|t| Some(t.with_timezone(&Utc)))
        .ok_or_else(|| AppError::InvalidInput(format!("{} does not exist in {}", value, tz)))
}

/// Plain numbers are seconds; `ms`, `s`, `m` and `h` suffixes are honoured
fn parse_usage(value: &str) -> AppResult<Option<Duration>> {
    let value = value.trim();
    if value.is_empty() {
        return Ok(None);
    }
    let invalid = || AppError::InvalidInput(format!("invalid {}: {}", keys::USAGE, value));

    let (number, scale_ms) = if let Some(n) = value.strip_suffix("ms") {
        (n, 1u64)
    } else if let Some(n) = value.strip_suffix('s') {
        (n, 1_000)
    } else if let Some(n) = value.strip_suffix('m') {
        (n, 60_000)
    } else if let Some(n) = value.strip_suffix('h') {
        (n, 3_600_000)
    } else {
        (value, 1_000)
    };

    let amount: f64 = number.parse().map_err(|_| invalid())?;
    if !amount.is_finite() || amount < 0.0 {
        return Err(invalid());
    }
    Duration::try_from_secs_f64(amount * scale_ms as f64 / 1000.0)
        .map(Some)
        .map_err(|_| invalid())
}
