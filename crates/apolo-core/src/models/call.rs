//! Rating vocabulary: call descriptors, session runs and their costs

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::DEFAULT_RUN_ID;
use crate::{AppError, AppResult};

/// `start + offset`, `None` when it leaves the representable range
pub fn checked_offset(start: DateTime<Utc>, offset: Duration) -> Option<DateTime<Utc>> {
    chrono::Duration::from_std(offset)
        .ok()
        .and_then(|span| start.checked_add_signed(span))
}

/// Everything the rating engine needs to price a slice of a call
///
/// Value object: the engine never mutates a descriptor it handed out, it
/// derives a new one with [`CallDescriptor::with_window`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct CallDescriptor {
    pub direction: String,
    pub tenant: String,
    pub category: String,
    pub account: String,
    pub subject: String,
    pub destination: String,
    #[serde(rename = "TOR")]
    pub tor: String,
    pub time_start: DateTime<Utc>,
    pub time_end: DateTime<Utc>,
}

impl CallDescriptor {
    /// Length of the priced window
    pub fn duration(&self) -> Duration {
        (self.time_end - self.time_start)
            .to_std()
            .unwrap_or(Duration::ZERO)
    }

    /// Same call, different window `[start, start + duration)`
    pub fn with_window(&self, start: DateTime<Utc>, duration: Duration) -> AppResult<Self> {
        let time_end = checked_offset(start, duration).ok_or_else(|| {
            AppError::InvalidInput(format!("window of {:?} from {} overflows", duration, start))
        })?;
        Ok(Self {
            time_start: start,
            time_end,
            ..self.clone()
        })
    }
}

/// One derived-charging instance of a session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct SessionRun {
    #[serde(rename = "RunID")]
    pub run_id: String,
    pub call_descriptor: CallDescriptor,
}

impl SessionRun {
    pub fn new(run_id: impl Into<String>, call_descriptor: CallDescriptor) -> Self {
        let run_id = run_id.into();
        Self {
            run_id: if run_id.is_empty() {
                DEFAULT_RUN_ID.to_string()
            } else {
                run_id
            },
            call_descriptor,
        }
    }
}

/// Outcome of a debit: how much was granted and what it cost
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct CallCost {
    #[serde(with = "super::serde_duration")]
    pub granted: Duration,
    pub cost: Decimal,
}

impl CallCost {
    pub fn new(granted: Duration, cost: Decimal) -> Self {
        Self { granted, cost }
    }

    pub fn zero() -> Self {
        Self {
            granted: Duration::ZERO,
            cost: Decimal::ZERO,
        }
    }
}

/// A supplier candidate returned by least cost routing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct LcrSupplier {
    pub supplier: String,
    pub cost: Decimal,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn descriptor() -> CallDescriptor {
        let start = Utc.with_ymd_and_hms(2016, 1, 5, 18, 30, 49).unwrap();
        CallDescriptor {
            direction: "*out".to_string(),
            tenant: "cgrates.org".to_string(),
            category: "call".to_string(),
            account: "1001".to_string(),
            subject: "1001".to_string(),
            destination: "1002".to_string(),
            tor: "*voice".to_string(),
            time_start: start,
            time_end: start + chrono::Duration::seconds(300),
        }
    }

    #[test]
    fn test_descriptor_window() {
        let cd = descriptor();
        assert_eq!(cd.duration(), Duration::from_secs(300));

        let next = cd.with_window(cd.time_end, Duration::from_secs(60)).unwrap();
        assert_eq!(next.time_start, cd.time_end);
        assert_eq!(next.duration(), Duration::from_secs(60));
        assert_eq!(next.account, cd.account);
    }

    #[test]
    fn test_window_overflow_is_invalid_input() {
        let cd = descriptor();
        let err = cd
            .with_window(cd.time_start, Duration::from_secs(u64::MAX / 4))
            .unwrap_err();
        assert_eq!(err.error_code(), "invalid_input");
        assert_eq!(checked_offset(cd.time_start, Duration::MAX), None);
    }

    #[test]
    fn test_run_defaults_id() {
        let run = SessionRun::new("", descriptor());
        assert_eq!(run.run_id, DEFAULT_RUN_ID);
    }

    #[test]
    fn test_descriptor_wire_names() {
        let json = serde_json::to_value(descriptor()).unwrap();
        assert_eq!(json["TOR"], "*voice");
        assert_eq!(json["Account"], "1001");
        assert!(json.get("TimeStart").is_some());
    }
}
