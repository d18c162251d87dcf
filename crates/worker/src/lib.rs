pub mod config;
pub mod error;
pub mod reaper;
pub mod runtime;
pub mod shutdown;

pub use config::WorkerConfig;
pub use error::WorkerError;
pub use reaper::{Reaper, ReaperConfig};
pub use runtime::{RunSummary, RuntimeConfig, WorkerRuntime};
