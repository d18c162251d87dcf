//! Repository for the `import_definitions` table.

use ingestq_core::import_job::DEFAULT_BATCH_SIZE;
use ingestq_core::types::DbId;
use sqlx::PgExecutor;

use crate::models::import_definition::{CreateImportDefinition, ImportDefinition};

const COLUMNS: &str = "id, slug, name, mapping, batch_size, created_at";

pub struct ImportDefinitionRepo;

impl ImportDefinitionRepo {
    pub async fn create<'e>(
        executor: impl PgExecutor<'e>,
        input: &CreateImportDefinition,
    ) -> Result<ImportDefinition, sqlx::Error> {
        let query = format!(
            "INSERT INTO import_definitions (slug, name, mapping, batch_size) \
             VALUES ($1, $2, $3, $4) \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, ImportDefinition>(&query)
            .bind(&input.slug)
            .bind(&input.name)
            .bind(&input.mapping)
            .bind(input.batch_size.unwrap_or(DEFAULT_BATCH_SIZE))
            .fetch_one(executor)
            .await
    }

    pub async fn find_by_id<'e>(
        executor: impl PgExecutor<'e>,
        id: DbId,
    ) -> Result<Option<ImportDefinition>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM import_definitions WHERE id = $1");
        sqlx::query_as::<_, ImportDefinition>(&query)
            .bind(id)
            .fetch_optional(executor)
            .await
    }
}
