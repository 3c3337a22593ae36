use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use sqlx::{Postgres, QueryBuilder};

use crate::{
    application::repos::{
        AcquisitionsRepo, ImageListFilter, NewAcquisition, RepoError, UpsertOutcome,
    },
    domain::{entities::Acquisition, region::Region},
};

use super::{PostgresRepositories, map_sqlx_error};

const COLUMNS: &str = "date, region, content_id, title, copyright, copyright_link, quiz, \
                       start_date, full_start_date, url_base, content_hash, created_at, updated_at";

#[derive(sqlx::FromRow)]
struct AcquisitionRow {
    date: NaiveDate,
    region: String,
    content_id: String,
    title: String,
    copyright: String,
    copyright_link: String,
    quiz: String,
    start_date: String,
    full_start_date: String,
    url_base: String,
    content_hash: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<AcquisitionRow> for Acquisition {
    type Error = RepoError;

    fn try_from(row: AcquisitionRow) -> Result<Self, Self::Error> {
        // Regions are validated before insert; a parse failure here means a
        // corrupted row.
        let region = Region::parse(&row.region)
            .map_err(|err| RepoError::Persistence(format!("stored region invalid: {err}")))?;
        Ok(Self {
            date: row.date,
            region,
            content_id: row.content_id,
            title: row.title,
            copyright: row.copyright,
            copyright_link: row.copyright_link,
            quiz: row.quiz,
            start_date: row.start_date,
            full_start_date: row.full_start_date,
            url_base: row.url_base,
            content_hash: row.content_hash,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

fn rows_to_acquisitions(rows: Vec<AcquisitionRow>) -> Result<Vec<Acquisition>, RepoError> {
    rows.into_iter().map(Acquisition::try_from).collect()
}

#[async_trait]
impl AcquisitionsRepo for PostgresRepositories {
    async fn find(
        &self,
        date: NaiveDate,
        region: &Region,
    ) -> Result<Option<Acquisition>, RepoError> {
        let row = sqlx::query_as::<_, AcquisitionRow>(&format!(
            "SELECT {COLUMNS} FROM acquisitions WHERE date = $1 AND region = $2"
        ))
        .bind(date)
        .bind(region.as_str())
        .fetch_optional(self.pool())
        .await
        .map_err(map_sqlx_error)?;

        row.map(Acquisition::try_from).transpose()
    }

    async fn latest_for_region(&self, region: &Region) -> Result<Option<Acquisition>, RepoError> {
        let row = sqlx::query_as::<_, AcquisitionRow>(&format!(
            "SELECT {COLUMNS} FROM acquisitions WHERE region = $1 ORDER BY date DESC LIMIT 1"
        ))
        .bind(region.as_str())
        .fetch_optional(self.pool())
        .await
        .map_err(map_sqlx_error)?;

        row.map(Acquisition::try_from).transpose()
    }

    async fn count_for_region(&self, region: &Region) -> Result<u64, RepoError> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM acquisitions WHERE region = $1")
                .bind(region.as_str())
                .fetch_one(self.pool())
                .await
                .map_err(map_sqlx_error)?;
        Ok(count.max(0) as u64)
    }

    async fn nth_for_region(
        &self,
        region: &Region,
        offset: u64,
    ) -> Result<Option<Acquisition>, RepoError> {
        let row = sqlx::query_as::<_, AcquisitionRow>(&format!(
            "SELECT {COLUMNS} FROM acquisitions WHERE region = $1 \
             ORDER BY date DESC OFFSET $2 LIMIT 1"
        ))
        .bind(region.as_str())
        .bind(offset as i64)
        .fetch_optional(self.pool())
        .await
        .map_err(map_sqlx_error)?;

        row.map(Acquisition::try_from).transpose()
    }

    async fn list(
        &self,
        filter: &ImageListFilter,
        limit: u32,
        offset: u32,
    ) -> Result<Vec<Acquisition>, RepoError> {
        let mut qb: QueryBuilder<Postgres> =
            QueryBuilder::new(format!("SELECT {COLUMNS} FROM acquisitions WHERE region = "));
        qb.push_bind(filter.region.as_str());
        if let Some(month) = filter.month.as_deref() {
            qb.push(" AND to_char(date, 'YYYY-MM') = ");
            qb.push_bind(month);
        }
        qb.push(" ORDER BY date DESC LIMIT ");
        qb.push_bind(i64::from(limit));
        qb.push(" OFFSET ");
        qb.push_bind(i64::from(offset));

        let rows = qb
            .build_query_as::<AcquisitionRow>()
            .fetch_all(self.pool())
            .await
            .map_err(map_sqlx_error)?;

        rows_to_acquisitions(rows)
    }

    async fn for_date_in_regions(
        &self,
        date: NaiveDate,
        regions: &[Region],
    ) -> Result<Vec<Acquisition>, RepoError> {
        let codes: Vec<String> = regions
            .iter()
            .map(|region| region.as_str().to_string())
            .collect();

        let rows = sqlx::query_as::<_, AcquisitionRow>(&format!(
            "SELECT {COLUMNS} FROM acquisitions WHERE date = $1 AND region = ANY($2)"
        ))
        .bind(date)
        .bind(&codes)
        .fetch_all(self.pool())
        .await
        .map_err(map_sqlx_error)?;

        rows_to_acquisitions(rows)
    }

    async fn upsert(&self, record: NewAcquisition) -> Result<UpsertOutcome, RepoError> {
        // Conflicts refresh the descriptive fields only; the content identity
        // of an already-acquired day never changes. `xmax = 0` distinguishes
        // a fresh insert from an update of an existing row.
        let inserted: bool = sqlx::query_scalar(
            "INSERT INTO acquisitions (date, region, content_id, title, copyright, \
                 copyright_link, quiz, start_date, full_start_date, url_base, content_hash) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11) \
             ON CONFLICT (date, region) DO UPDATE SET \
                 title = EXCLUDED.title, \
                 copyright = EXCLUDED.copyright, \
                 copyright_link = EXCLUDED.copyright_link, \
                 quiz = EXCLUDED.quiz, \
                 updated_at = now() \
             RETURNING (xmax = 0) AS inserted",
        )
        .bind(record.date)
        .bind(record.region.as_str())
        .bind(&record.content_id)
        .bind(&record.title)
        .bind(&record.copyright)
        .bind(&record.copyright_link)
        .bind(&record.quiz)
        .bind(&record.start_date)
        .bind(&record.full_start_date)
        .bind(&record.url_base)
        .bind(&record.content_hash)
        .fetch_one(self.pool())
        .await
        .map_err(map_sqlx_error)?;

        Ok(if inserted {
            UpsertOutcome::Inserted
        } else {
            UpsertOutcome::Existing
        })
    }

    async fn older_than(&self, threshold: NaiveDate) -> Result<Vec<Acquisition>, RepoError> {
        let rows = sqlx::query_as::<_, AcquisitionRow>(&format!(
            "SELECT {COLUMNS} FROM acquisitions WHERE date < $1 ORDER BY date ASC"
        ))
        .bind(threshold)
        .fetch_all(self.pool())
        .await
        .map_err(map_sqlx_error)?;

        rows_to_acquisitions(rows)
    }

    async fn count_other_references(
        &self,
        content_id: &str,
        date: NaiveDate,
        region: &Region,
    ) -> Result<u64, RepoError> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM acquisitions \
             WHERE content_id = $1 AND NOT (date = $2 AND region = $3)",
        )
        .bind(content_id)
        .bind(date)
        .bind(region.as_str())
        .fetch_one(self.pool())
        .await
        .map_err(map_sqlx_error)?;
        Ok(count.max(0) as u64)
    }

    async fn delete(&self, date: NaiveDate, region: &Region) -> Result<(), RepoError> {
        sqlx::query("DELETE FROM acquisitions WHERE date = $1 AND region = $2")
            .bind(date)
            .bind(region.as_str())
            .execute(self.pool())
            .await
            .map_err(map_sqlx_error)?;
        Ok(())
    }
}
