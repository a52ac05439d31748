//! Core types and configuration for kbassist
//!
//! Shared data model for the ingestion, retrieval, and agent crates:
//! document and chunk identifiers, typed document metadata, vector and
//! search records, agent traces, audit events, and the layered
//! application configuration.

pub mod config;
pub mod error;
pub mod timeout;
pub mod types;

pub use config::*;
pub use error::*;
pub use timeout::{TimeoutError, TimeoutPolicy};
pub use types::*;
