//! Data Transfer Objects for API requests and responses

pub mod common;
pub mod session;

pub use common::ApiResponse;
pub use session::{LcrResponse, MaxUsageResponse, SessionEventRequest};
