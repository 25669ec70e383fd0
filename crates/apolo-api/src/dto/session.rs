//! Session charging DTOs

use apolo_core::models::event::keys;
use apolo_core::models::SessionEvent;
use apolo_core::AppResult;
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use validator::Validate;

fn default_connection_id() -> String {
    "http".to_string()
}

/// Session event as posted by HTTP clients
///
/// Timestamps accept RFC 3339, unix seconds or `YYYY-MM-DD HH:MM:SS` in the
/// engine timezone. Usage is plain seconds or a number suffixed with `ms`,
/// `s`, `m` or `h`.
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct SessionEventRequest {
    /// Unique session identifier
    #[validate(length(min = 1, max = 256))]
    pub origin_id: String,

    /// Host that originated the session
    #[serde(default)]
    pub origin_host: Option<String>,

    /// Event name, informational
    #[serde(default)]
    pub event_name: Option<String>,

    /// Tenant owning the account
    #[serde(default)]
    pub tenant: Option<String>,

    /// Rating category
    #[serde(default)]
    pub category: Option<String>,

    /// Charged account
    #[validate(length(min = 1, max = 128))]
    pub account: String,

    /// Rating subject, defaults to the account
    #[serde(default)]
    pub subject: Option<String>,

    /// Dialed destination
    #[validate(length(min = 1, max = 64))]
    pub destination: String,

    /// Type of record (e.g. "*voice")
    #[serde(default)]
    pub tor: Option<String>,

    /// Charging mode (e.g. "*prepaid")
    #[serde(default)]
    pub request_type: Option<String>,

    /// Traffic direction
    #[serde(default)]
    pub direction: Option<String>,

    /// Selected supplier
    #[serde(default)]
    pub supplier: Option<String>,

    /// Call setup time
    #[serde(default)]
    pub setup_time: Option<String>,

    /// Call answer time
    #[serde(default)]
    pub answer_time: Option<String>,

    /// Call end time
    #[serde(default)]
    pub end_time: Option<String>,

    /// Requested or consumed usage
    #[serde(default)]
    pub usage: Option<String>,

    /// Fields passed through to the rating engine untouched
    #[serde(default)]
    pub extra_fields: BTreeMap<String, String>,

    /// Connection that receives disconnect requests for this session
    #[serde(default = "default_connection_id")]
    pub connection_id: String,
}

impl SessionEventRequest {
    /// Build the engine event, interpreting naive timestamps in `tz`
    pub fn to_event(&self, tz: Tz) -> AppResult<SessionEvent> {
        let mut fields = self.extra_fields.clone();
        fields.insert(keys::ORIGIN_ID.to_string(), self.origin_id.clone());
        fields.insert(keys::ACCOUNT.to_string(), self.account.clone());
        fields.insert(keys::DESTINATION.to_string(), self.destination.clone());

        for (key, value) in [
            (keys::ORIGIN_HOST, &self.origin_host),
            (keys::EVENT_NAME, &self.event_name),
            (keys::TENANT, &self.tenant),
            (keys::CATEGORY, &self.category),
            (keys::SUBJECT, &self.subject),
            (keys::TOR, &self.tor),
            (keys::REQUEST_TYPE, &self.request_type),
            (keys::DIRECTION, &self.direction),
            (keys::SUPPLIER, &self.supplier),
            (keys::SETUP_TIME, &self.setup_time),
            (keys::ANSWER_TIME, &self.answer_time),
            (keys::END_TIME, &self.end_time),
            (keys::USAGE, &self.usage),
        ] {
            if let Some(value) = value {
                fields.insert(key.to_string(), value.clone());
            }
        }

        SessionEvent::from_fields(&fields, tz)
    }
}

/// Maximum usage granted for a session
#[derive(Debug, Clone, Serialize)]
pub struct MaxUsageResponse {
    /// Session identifier
    pub session_id: String,
    /// Granted usage in seconds; absent when the engine does not limit it
    pub max_usage_secs: Option<u64>,
}

impl MaxUsageResponse {
    /// Build from an engine grant, `Duration::MAX` meaning unlimited
    pub fn new(session_id: impl Into<String>, granted: std::time::Duration) -> Self {
        Self {
            session_id: session_id.into(),
            max_usage_secs: (granted != std::time::Duration::MAX).then(|| granted.as_secs()),
        }
    }
}

/// Suppliers ordered by cost
#[derive(Debug, Clone, Serialize)]
pub struct LcrResponse {
    /// Session identifier
    pub session_id: String,
    /// Supplier names, cheapest first
    pub suppliers: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use std::time::Duration;

    fn request(json: serde_json::Value) -> SessionEventRequest {
        serde_json::from_value(json).unwrap()
    }

    #[test]
    fn test_to_event() {
        let req = request(serde_json::json!({
            "origin_id": "call-1",
            "account": "1001",
            "destination": "1002",
            "tenant": "cgrates.org",
            "answer_time": "2016-01-05 18:31:05",
            "usage": "300",
            "extra_fields": { "Vendor": "acme" }
        }));
        assert!(req.validate().is_ok());
        assert_eq!(req.connection_id, "http");

        let event = req.to_event(chrono_tz::UTC).unwrap();
        assert_eq!(event.origin_id(), "call-1");
        assert_eq!(event.subject(), "1001");
        assert_eq!(
            event.answer_time(),
            Some(Utc.with_ymd_and_hms(2016, 1, 5, 18, 31, 5).unwrap())
        );
        assert_eq!(event.usage(), Some(Duration::from_secs(300)));
        assert_eq!(event.extra_fields().get("Vendor").map(String::as_str), Some("acme"));
    }

    #[test]
    fn test_validation_rejects_empty_ids() {
        let req = request(serde_json::json!({
            "origin_id": "",
            "account": "1001",
            "destination": "1002"
        }));
        assert!(req.validate().is_err());
    }

    #[test]
    fn test_bad_timestamp_is_invalid_input() {
        let req = request(serde_json::json!({
            "origin_id": "call-1",
            "account": "1001",
            "destination": "1002",
            "answer_time": "yesterday"
        }));
        let err = req.to_event(chrono_tz::UTC).unwrap_err();
        assert_eq!(err.error_code(), "invalid_input");
    }

    #[test]
    fn test_unlimited_max_usage() {
        assert_eq!(MaxUsageResponse::new("x", Duration::MAX).max_usage_secs, None);
        assert_eq!(
            MaxUsageResponse::new("x", Duration::from_secs(90)).max_usage_secs,
            Some(90)
        );
    }
}
