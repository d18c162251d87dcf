//! Claim-and-execute engine, command handlers and the import job controller.

pub mod controller;
pub mod engine;
pub mod error;
pub mod handlers;

pub use controller::ImportJobController;
pub use engine::{Engine, EngineConfig, Outcome};
pub use error::{HandlerError, PipelineError};
