//! Real-time charging engine for ApoloBilling
//!
//! This crate owns the lifecycle of charged calls: it reserves credit
//! with the rating engine while a call is up, settles on hang-up and hands the
//! finished records to the CDR service.
//!
//! # Architecture
//!
//! - Every operation on a session id runs under that id's guardian lock, so
//!   operations on one call are totally ordered and calls never block each
//!   other
//! - Sessions are shared across tasks as `Arc<Session>`; each one may own a
//!   background debit task bounded by its lifetime
//! - All operations are instrumented with tracing
//!
//! # Components
//!
//! - `GuardianLock` - Named-key mutual exclusion with timeout
//! - `Session` - One derived-charging run of a call
//! - `SessionEngine` - Start, update and end of calls across their runs
//! - `ExternalConnections` - Disconnect signalling toward network peers
//! - `DiameterAgent` - Credit-Control requests in, answers out

pub mod agent;
pub mod connections;
pub mod engine;
pub mod guardian;
pub mod registry;
pub mod session;

pub use agent::DiameterAgent;
pub use connections::{DisconnectReason, DisconnectRequest, ExternalConnections};
pub use engine::{ActiveSession, SessionEngine, AUTHORIZATION_EVENT};
pub use guardian::GuardianLock;
pub use registry::{SessionGroup, SessionRegistry};
pub use session::{DebitFailure, Session, SessionContext, SessionState};
