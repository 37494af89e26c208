//! Reefwatch API server library.
//!
//! Exposes config, state, error handling, jobs and routes so integration
//! tests and the binary entrypoint can both build the same application.

pub mod config;
pub mod error;
pub mod handlers;
pub mod jobs;
pub mod response;
pub mod router;
pub mod routes;
pub mod state;
