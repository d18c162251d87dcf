//! Pure domain types and rules for the ingest queue.
//!
//! Nothing in this crate performs I/O: states, commands, mapping of staged
//! rows, batch planning, backoff and idle detection are all plain functions
//! so they can be shared by the database layer, the engine and the worker.

pub mod backoff;
pub mod change_events;
pub mod error;
pub mod import_job;
pub mod mapping;
pub mod polling;
pub mod state;
pub mod task;
pub mod types;
