//! HTTP surface: database health, worker status and live import job
//! progress.
//!
//! Exposes config, state, errors and routes so integration tests and the
//! binary build the same router.

pub mod config;
pub mod error;
pub mod response;
pub mod router;
pub mod routes;
pub mod state;
