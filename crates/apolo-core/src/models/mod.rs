//! Domain models for the charging engine
//!
//! This module contains the core domain models shared by the engine, the
//! Diameter agent and the rating client.

pub mod call;
pub mod cdr;
pub mod event;
pub mod serde_duration;

pub use call::{checked_offset, CallCost, CallDescriptor, LcrSupplier, SessionRun};
pub use cdr::ChargedCdr;
pub use event::SessionEvent;

/// Run identifier used when the rating engine does not name the run
pub const DEFAULT_RUN_ID: &str = "*default";

/// Type of record for voice calls
pub const VOICE: &str = "*voice";

/// Outbound direction
pub const OUT: &str = "*out";

/// Run identifier for CDRs recorded without rating
pub const RAW_RUN_ID: &str = "*raw";
