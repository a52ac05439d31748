//! CLI command implementations

pub mod ask;
pub mod ingest;
pub mod purge;
pub mod split;
pub mod summarize;
