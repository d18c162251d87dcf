//! Repository layer.
//!
//! Each repository is a zero-sized struct. Single-statement operations take
//! any executor so they can run on the pool or inside a transaction
//! (`&mut *tx`); multi-statement operations that must be atomic take
//! `&mut PgConnection`.

pub mod import_definition_repo;
pub mod import_job_repo;
pub mod staging_row_repo;
pub mod statistics_repo;
pub mod task_repo;
pub mod unit_repo;

pub use import_definition_repo::ImportDefinitionRepo;
pub use import_job_repo::ImportJobRepo;
pub use staging_row_repo::StagingRowRepo;
pub use statistics_repo::StatisticsRepo;
pub use task_repo::TaskRepo;
pub use unit_repo::UnitRepo;
