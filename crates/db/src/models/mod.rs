//! Row models and DTOs.
//!
//! Each submodule contains a `FromRow` + `Serialize` struct matching the
//! table row and, where rows are created from outside input, a create DTO.
//! State columns are `TEXT` and decode through the `ingestq_core::state` enums.

pub mod import_definition;
pub mod import_job;
pub mod staging_row;
pub mod statistics;
pub mod task;
pub mod unit;
