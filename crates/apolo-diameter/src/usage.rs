//! Request-state machine
//!
//! Pure functions deciding which credit control request a session emits for
//! a given elapsed usage, and the inverse: how much usage a received request
//! reports.
//!
//! INITIAL and UPDATE always ask for one full debit interval. TERMINATE
//! reports the final tally as `request_number - 1` whole intervals plus the
//! units carried in the request. The decode direction is deliberately
//! asymmetric: INITIAL/UPDATE decode to the units of *this* request only,
//! TERMINATE decodes to the cumulative total.

use apolo_core::{AppError, AppResult};
use std::fmt;
use std::time::Duration;

/// CC-Request-Type values handled by the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum RequestType {
    Initial = 1,
    Update = 2,
    Terminate = 3,
}

impl RequestType {
    pub fn as_u32(self) -> u32 {
        self as u32
    }
}

impl TryFrom<u32> for RequestType {
    type Error = AppError;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(RequestType::Initial),
            2 => Ok(RequestType::Update),
            3 => Ok(RequestType::Terminate),
            4 => Err(AppError::MalformedMessage(
                "EVENT_REQUEST credit control is not supported".to_string(),
            )),
            other => Err(AppError::MalformedMessage(format!(
                "unknown CC-Request-Type {}",
                other
            ))),
        }
    }
}

impl fmt::Display for RequestType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RequestType::Initial => write!(f, "INITIAL"),
            RequestType::Update => write!(f, "UPDATE"),
            RequestType::Terminate => write!(f, "TERMINATE"),
        }
    }
}

/// What to put in the next request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestPlan {
    pub request_type: RequestType,
    pub request_number: u32,
    pub units: Duration,
}

const NANOS_PER_SEC: u128 = 1_000_000_000;

fn from_nanos(nanos: u128) -> Duration {
    Duration::new((nanos / NANOS_PER_SEC) as u64, (nanos % NANOS_PER_SEC) as u32)
}

fn whole_intervals(last_used: Duration, debit_interval: Duration) -> AppResult<(u32, Duration)> {
    if debit_interval.is_zero() {
        return Err(AppError::InvalidInput(
            "debit interval must be greater than zero".to_string(),
        ));
    }
    let used = last_used.as_nanos();
    let interval = debit_interval.as_nanos();
    let count = u32::try_from(used / interval).map_err(|_| {
        AppError::InvalidInput(format!(
            "usage {:?} spans too many intervals of {:?}",
            last_used, debit_interval
        ))
    })?;
    Ok((count, from_nanos(used % interval)))
}

/// Shape of the request to emit after `last_used` elapsed
///
/// A terminate request for a session that never used anything has no
/// interval to close and is rejected with `InvalidRequestSequence`.
pub fn plan_request(
    last_used: Duration,
    debit_interval: Duration,
    is_terminate: bool,
) -> AppResult<RequestPlan> {
    let (count, remainder) = whole_intervals(last_used, debit_interval)?;

    if !is_terminate {
        let request_type = if last_used.is_zero() {
            RequestType::Initial
        } else {
            RequestType::Update
        };
        return Ok(RequestPlan {
            request_type,
            request_number: count,
            units: debit_interval,
        });
    }

    if last_used.is_zero() {
        return Err(AppError::InvalidRequestSequence(
            "terminate without any granted interval".to_string(),
        ));
    }

    // An exact multiple reports its last interval in full
    let (request_number, units) = if remainder.is_zero() {
        (count, debit_interval)
    } else {
        let next = count.checked_add(1).ok_or_else(|| {
            AppError::InvalidInput(format!("request number overflow at {:?}", last_used))
        })?;
        (next, remainder)
    };

    Ok(RequestPlan {
        request_type: RequestType::Terminate,
        request_number,
        units,
    })
}

/// Usage reported by a received request
pub fn resolve_usage(
    request_type: RequestType,
    request_number: u32,
    units: Duration,
    debit_interval: Duration,
) -> AppResult<Duration> {
    match request_type {
        RequestType::Initial | RequestType::Update => Ok(units),
        RequestType::Terminate => {
            if request_number == 0 {
                return Err(AppError::InvalidRequestSequence(
                    "TERMINATE with request number 0 has no granted interval".to_string(),
                ));
            }
            debit_interval
                .checked_mul(request_number - 1)
                .and_then(|granted| granted.checked_add(units))
                .ok_or_else(|| {
                    AppError::InvalidInput(format!(
                        "usage overflow for request number {}",
                        request_number
                    ))
                })
        }
    }
}

impl RequestPlan {
    /// Decode this plan back into usage
    pub fn resolve(&self, debit_interval: Duration) -> AppResult<Duration> {
        resolve_usage(
            self.request_type,
            self.request_number,
            self.units,
            debit_interval,
        )
    }
}
