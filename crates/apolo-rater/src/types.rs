//! Wire types for the rating engine JSON-RPC API
//!
//! Field names are PascalCase and durations travel as integer nanoseconds.

use apolo_core::models::{CallCost, CallDescriptor, LcrSupplier, SessionRun};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::time::Duration;

// ============================================================================
// JSON-RPC 2.0 Types
// ============================================================================

#[derive(Debug, Serialize)]
pub struct JsonRpcRequest<T> {
    pub jsonrpc: String,
    pub method: String,
    pub params: Vec<T>,
    pub id: u64,
}

#[derive(Debug, Deserialize)]
pub struct JsonRpcResponse<T> {
    #[serde(default)]
    pub jsonrpc: Option<String>,
    pub result: Option<T>,
    pub error: Option<JsonRpcError>,
    #[serde(default)]
    pub id: Option<u64>,
}

/// Error member: a bare string from JSON-RPC 1.0 style servers, an object
/// from JSON-RPC 2.0 ones
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum JsonRpcError {
    Text(String),
    Object { code: i32, message: String },
}

impl JsonRpcError {
    pub fn code(&self) -> i32 {
        match self {
            JsonRpcError::Text(_) => 0,
            JsonRpcError::Object { code, .. } => *code,
        }
    }

    pub fn message(&self) -> String {
        match self {
            JsonRpcError::Text(message) => message.clone(),
            JsonRpcError::Object { message, .. } => message.clone(),
        }
    }
}

// ============================================================================
// Duration helpers
// ============================================================================

pub fn to_nanos(duration: Duration) -> i64 {
    i64::try_from(duration.as_nanos()).unwrap_or(i64::MAX)
}

/// Negative values mean "unlimited" on the wire
pub fn from_nanos(nanos: i64) -> Duration {
    if nanos < 0 {
        Duration::MAX
    } else {
        Duration::from_nanos(nanos as u64)
    }
}

// ============================================================================
// Responder Types
// ============================================================================

/// Call descriptor plus the duration already charged before its window
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WireCallDescriptor {
    #[serde(flatten)]
    pub descriptor: CallDescriptor,

    #[serde(rename = "DurationIndex", default)]
    pub duration_index: i64,
}

impl WireCallDescriptor {
    pub fn new(descriptor: CallDescriptor) -> Self {
        let duration_index = to_nanos(descriptor.duration());
        Self {
            descriptor,
            duration_index,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct WireDerivedCharger {
    #[serde(rename = "RunID")]
    pub run_id: String,
}

/// Element of Responder.GetSessionRuns
#[derive(Debug, Clone, Deserialize)]
pub struct WireSessionRun {
    #[serde(rename = "DerivedCharger")]
    pub derived_charger: WireDerivedCharger,

    #[serde(rename = "CallDescriptor")]
    pub call_descriptor: WireCallDescriptor,
}

impl From<WireSessionRun> for SessionRun {
    fn from(run: WireSessionRun) -> Self {
        SessionRun::new(run.derived_charger.run_id, run.call_descriptor.descriptor)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct WireTimeSpan {
    #[serde(rename = "TimeStart")]
    pub time_start: DateTime<Utc>,

    #[serde(rename = "TimeEnd")]
    pub time_end: DateTime<Utc>,
}

/// Reply of Responder.MaxDebit
#[derive(Debug, Clone, Deserialize)]
pub struct WireCallCost {
    #[serde(rename = "Cost")]
    pub cost: Decimal,

    #[serde(rename = "Timespans", default)]
    pub timespans: Vec<WireTimeSpan>,
}

impl WireCallCost {
    /// Span covered by the timespans
    pub fn granted(&self) -> Duration {
        match (self.timespans.first(), self.timespans.last()) {
            (Some(first), Some(last)) => (last.time_end - first.time_start)
                .to_std()
                .unwrap_or(Duration::ZERO),
            _ => Duration::ZERO,
        }
    }
}

impl From<WireCallCost> for CallCost {
    fn from(cc: WireCallCost) -> Self {
        CallCost::new(cc.granted(), cc.cost)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct WireLcrArgs {
    #[serde(rename = "CallDescriptor")]
    pub call_descriptor: WireCallDescriptor,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WireSupplierCost {
    #[serde(rename = "Supplier")]
    pub supplier: String,

    #[serde(rename = "Cost", default)]
    pub cost: Decimal,

    #[serde(rename = "Error", default)]
    pub error: String,
}

impl From<WireSupplierCost> for LcrSupplier {
    fn from(s: WireSupplierCost) -> Self {
        LcrSupplier {
            supplier: s.supplier,
            cost: s.cost,
            error: (!s.error.is_empty()).then_some(s.error),
        }
    }
}

/// Reply of Responder.GetLCR
#[derive(Debug, Clone, Deserialize)]
pub struct WireLcrCost {
    #[serde(rename = "SupplierCosts", default)]
    pub supplier_costs: Vec<WireSupplierCost>,
}

/// Reply of CdrsV1.ProcessCdr
pub const CDR_OK: &str = "OK";

/// Rating engine method names
pub mod methods {
    pub const GET_SESSION_RUNS: &str = "Responder.GetSessionRuns";
    pub const MAX_DEBIT: &str = "Responder.MaxDebit";
    pub const REFUND_INCREMENTS: &str = "Responder.RefundIncrements";
    pub const GET_DERIVED_MAX_SESSION_TIME: &str = "Responder.GetDerivedMaxSessionTime";
    pub const GET_LCR: &str = "Responder.GetLCR";
    pub const PROCESS_CDR: &str = "CdrsV1.ProcessCdr";
}
