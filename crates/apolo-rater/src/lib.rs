//! Rating engine integration
//!
//! JSON-RPC 2.0 client for the rating engine and the CDR service:
//! - Responder: session runs, debits, refunds, max usage and LCR
//! - CdrsV1: persistence of charged CDRs
//!
//! # Usage
//!
//! ```rust,ignore
//! use apolo_rater::RaterClient;
//!
//! let client = RaterClient::new(
//!     "http://127.0.0.1:2012/jsonrpc",
//!     "cgrates.org",
//!     2000, // timeout_ms
//! )?;
//!
//! let runs = client.get_session_runs(&event).await?;
//! ```

mod cdrs;
mod client;
mod responder;
pub mod types;

pub use client::{RaterClient, RaterError};
