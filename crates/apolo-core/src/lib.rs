//! ApoloBilling Charging Core Library
//!
//! This crate provides the foundational types, traits, and error handling
//! shared by the real-time charging engine. It includes:
//!
//! - Domain models (SessionEvent, CallDescriptor, SessionRun, CDRs)
//! - Collaborator traits for the rating engine and the CDR service
//! - Unified error handling with HTTP response mapping
//! - Application configuration

pub mod config;
pub mod error;
pub mod models;
pub mod traits;

pub use config::AppConfig;
pub use error::AppError;

/// Result type alias using AppError
pub type AppResult<T> = Result<T, AppError>;
