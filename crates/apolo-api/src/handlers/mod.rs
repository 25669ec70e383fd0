//! HTTP request handlers

pub mod cdr;
pub mod diameter;
pub mod health;
pub mod session;

pub use cdr::configure as configure_cdrs;
pub use diameter::configure as configure_diameter;
pub use health::health_check;
pub use session::configure as configure_sessions;
