//! Shared types for Vidfetch: job records, format metadata, runner events,
//! error types and the in-memory job store.
pub mod errors;
pub mod events;
pub mod job_store;
pub mod models;
