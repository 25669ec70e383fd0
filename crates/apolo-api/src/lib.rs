//! API layer for the ApoloBilling charging engine
//!
//! HTTP handlers for session charging, routing queries, CDRs and raw
//! Diameter credit control.

#![forbid(unsafe_code)]
#![warn(clippy::all, missing_docs)]

pub mod dto;
pub mod handlers;

// Re-export DTOs (common types)
pub use dto::{ApiResponse, SessionEventRequest};

// Re-export handler configuration functions
pub use handlers::{configure_cdrs, configure_diameter, configure_sessions, health_check};
