//! Change notifications for live progress reporting.
//!
//! Row changes on `tasks` and `import_jobs` are announced by database
//! triggers with `pg_notify`. [`ChangeListener`] receives them and hands them
//! to the [`ChangePublisher`], which fans them out to per-client
//! [`Subscription`]s with bounded buffers and idle heartbeats.

pub mod change;
pub mod listener;
pub mod publisher;

pub use change::{ChangeEvent, ChangeVerb, EntityType, StreamMessage};
pub use listener::ChangeListener;
pub use publisher::{ChangePublisher, JobFilter, PublisherConfig, Subscription};
