//! ApoloBilling Diameter Credit-Control
//!
//! Message shape and sequencing for RFC 4006 style credit control:
//!
//! - AVP and message codec (RFC 6733 header, grouped AVPs, passthrough of
//!   unknown attributes)
//! - `tokio_util` framing codec
//! - Credit-Control-Request/Answer mapping to and from session events
//! - The request-state machine deciding request type, number and units
//! - Per-session request number tracking
//!
//! Sockets, capability exchange and peer management live elsewhere.

pub mod avp;
pub mod cca;
pub mod ccr;
pub mod codec;
pub mod dictionary;
pub mod message;
pub mod tracker;
pub mod usage;

pub use avp::{find_avp, Avp, AvpData};
pub use cca::CreditControlAnswer;
pub use ccr::{CreditControlRequest, SubscriptionId};
pub use codec::DiameterCodec;
pub use message::{DiameterHeader, DiameterMessage};
pub use tracker::{RequestTracker, SeenRequest};
pub use usage::{plan_request, resolve_usage, RequestPlan, RequestType};
