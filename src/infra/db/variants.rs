use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::{
    application::repos::{NewVariant, RepoError, UpsertOutcome, VariantsRepo},
    domain::entities::Variant,
};

use super::{PostgresRepositories, map_sqlx_error};

#[derive(sqlx::FromRow)]
struct VariantRow {
    content_id: String,
    variant: String,
    format: String,
    storage_key: String,
    public_url: Option<String>,
    size_bytes: i64,
    created_at: DateTime<Utc>,
}

impl From<VariantRow> for Variant {
    fn from(row: VariantRow) -> Self {
        Self {
            content_id: row.content_id,
            variant: row.variant,
            format: row.format,
            storage_key: row.storage_key,
            public_url: row.public_url,
            size_bytes: row.size_bytes,
            created_at: row.created_at,
        }
    }
}

#[async_trait]
impl VariantsRepo for PostgresRepositories {
    async fn upsert(&self, variant: NewVariant) -> Result<UpsertOutcome, RepoError> {
        // Variant rows are immutable; a conflict means an earlier writer
        // already recorded this rendition.
        let result = sqlx::query(
            "INSERT INTO variants \
                 (content_id, variant, format, storage_key, public_url, size_bytes) \
             VALUES ($1, $2, $3, $4, $5, $6) \
             ON CONFLICT (content_id, variant, format) DO NOTHING",
        )
        .bind(&variant.content_id)
        .bind(&variant.variant)
        .bind(&variant.format)
        .bind(&variant.storage_key)
        .bind(&variant.public_url)
        .bind(variant.size_bytes)
        .execute(self.pool())
        .await
        .map_err(map_sqlx_error)?;

        Ok(if result.rows_affected() > 0 {
            UpsertOutcome::Inserted
        } else {
            UpsertOutcome::Existing
        })
    }

    async fn list_for_content(&self, content_id: &str) -> Result<Vec<Variant>, RepoError> {
        let rows = sqlx::query_as::<_, VariantRow>(
            "SELECT content_id, variant, format, storage_key, public_url, size_bytes, created_at \
             FROM variants WHERE content_id = $1 ORDER BY size_bytes ASC",
        )
        .bind(content_id)
        .fetch_all(self.pool())
        .await
        .map_err(map_sqlx_error)?;

        Ok(rows.into_iter().map(Variant::from).collect())
    }

    async fn delete_for_content(&self, content_id: &str) -> Result<u64, RepoError> {
        let result = sqlx::query("DELETE FROM variants WHERE content_id = $1")
            .bind(content_id)
            .execute(self.pool())
            .await
            .map_err(map_sqlx_error)?;
        Ok(result.rows_affected())
    }
}
