//! Core records shared across the application and persistence layers.

use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;

use super::region::Region;

/// One acquired daily image for a `(date, region)` pair.
///
/// `content_id` joins the record to its variants by value: several
/// acquisitions (different dates or regions) may share the same physical
/// image and therefore the same variant set.
#[derive(Debug, Clone, Serialize)]
pub struct Acquisition {
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
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// One stored rendition of a physical image at a named resolution.
///
/// Immutable once written; removed only when the last acquisition
/// referencing its `content_id` expires.
#[derive(Debug, Clone, Serialize)]
pub struct Variant {
    pub content_id: String,
    pub variant: String,
    pub format: String,
    pub storage_key: String,
    pub public_url: Option<String>,
    pub size_bytes: i64,
    pub created_at: DateTime<Utc>,
}

/// An acquisition joined with its variants, ordered smallest size first so
/// thumbnail consumers can take the head and label-based consumers can scan.
#[derive(Debug, Clone, Serialize)]
pub struct ResolvedImage {
    #[serde(flatten)]
    pub acquisition: Acquisition,
    pub variants: Vec<Variant>,
}
