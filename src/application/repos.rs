//! Repository traits describing the metadata persistence adapters.

use async_trait::async_trait;
use chrono::NaiveDate;
use thiserror::Error;

use crate::domain::{
    entities::{Acquisition, Variant},
    region::Region,
};

#[derive(Debug, Error)]
pub enum RepoError {
    #[error("persistence error: {0}")]
    Persistence(String),
    #[error("duplicate record violates unique constraint `{constraint}`")]
    Duplicate { constraint: String },
    #[error("resource not found")]
    NotFound,
}

impl RepoError {
    pub fn from_persistence(err: impl std::fmt::Display) -> Self {
        Self::Persistence(err.to_string())
    }
}

/// Result of an upsert against a natural unique key. A conflict is not an
/// error: it means the record was already present and the write collapsed
/// into it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Inserted,
    Existing,
}

/// Insertable acquisition payload; timestamps are owned by the store.
#[derive(Debug, Clone)]
pub struct NewAcquisition {
    pub date: NaiveDate,
    pub region: Region,
    pub content_id: String,
    pub title: String,
    pub copyright: String,
    pub copyright_link: String,
    pub quiz: String,
    pub start_date: String,
    pub full_start_date: String,
    pub url_base: String,
    pub content_hash: String,
}

/// Insertable variant payload.
#[derive(Debug, Clone)]
pub struct NewVariant {
    pub content_id: String,
    pub variant: String,
    pub format: String,
    pub storage_key: String,
    pub public_url: Option<String>,
    pub size_bytes: i64,
}

/// Filter for paginated listings.
#[derive(Debug, Clone)]
pub struct ImageListFilter {
    pub region: Region,
    /// Optional `YYYY-MM` date prefix.
    pub month: Option<String>,
}

#[async_trait]
pub trait AcquisitionsRepo: Send + Sync {
    async fn find(&self, date: NaiveDate, region: &Region)
    -> Result<Option<Acquisition>, RepoError>;

    /// Most recent acquisition for a region, any date.
    async fn latest_for_region(&self, region: &Region) -> Result<Option<Acquisition>, RepoError>;

    async fn count_for_region(&self, region: &Region) -> Result<u64, RepoError>;

    /// The record at `offset` in newest-first order; used for bounded-memory
    /// random selection.
    async fn nth_for_region(
        &self,
        region: &Region,
        offset: u64,
    ) -> Result<Option<Acquisition>, RepoError>;

    /// Newest-first page of acquisitions for a region.
    async fn list(
        &self,
        filter: &ImageListFilter,
        limit: u32,
        offset: u32,
    ) -> Result<Vec<Acquisition>, RepoError>;

    /// All acquisitions for `date` across the given regions, unordered.
    async fn for_date_in_regions(
        &self,
        date: NaiveDate,
        regions: &[Region],
    ) -> Result<Vec<Acquisition>, RepoError>;

    /// Insert-or-refresh keyed by `(date, region)`. A conflict refreshes the
    /// descriptive fields but never the content identity and never creates a
    /// duplicate.
    async fn upsert(&self, record: NewAcquisition) -> Result<UpsertOutcome, RepoError>;

    /// Acquisitions strictly older than the threshold date.
    async fn older_than(&self, threshold: NaiveDate) -> Result<Vec<Acquisition>, RepoError>;

    /// Count acquisitions sharing `content_id` other than the identified row.
    async fn count_other_references(
        &self,
        content_id: &str,
        date: NaiveDate,
        region: &Region,
    ) -> Result<u64, RepoError>;

    async fn delete(&self, date: NaiveDate, region: &Region) -> Result<(), RepoError>;
}

#[async_trait]
pub trait VariantsRepo: Send + Sync {
    /// Insert keyed by `(content_id, variant, format)`; conflicts collapse.
    async fn upsert(&self, variant: NewVariant) -> Result<UpsertOutcome, RepoError>;

    /// Variants for one content identity, smallest byte size first.
    async fn list_for_content(&self, content_id: &str) -> Result<Vec<Variant>, RepoError>;

    async fn delete_for_content(&self, content_id: &str) -> Result<u64, RepoError>;
}
