//! In-memory fakes shared by the application-layer tests.

use std::collections::HashSet;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{NaiveDate, Utc};
use image::{DynamicImage, ImageBuffer, Rgb};

use crate::application::repos::{
    AcquisitionsRepo, ImageListFilter, NewAcquisition, NewVariant, RepoError, UpsertOutcome,
    VariantsRepo,
};
use crate::domain::entities::{Acquisition, Variant};
use crate::domain::region::Region;
use crate::infra::archive::{ArchiveClient, ArchiveImage, UpstreamError};

pub fn memory_repos() -> std::sync::Arc<MemoryRepos> {
    std::sync::Arc::new(MemoryRepos::default())
}

/// Build a listing descriptor with the given `YYYYMMDD` start date.
pub fn descriptor(start_date: &str, url_base: &str) -> ArchiveImage {
    ArchiveImage {
        start_date: start_date.to_string(),
        full_start_date: format!("{start_date}0700"),
        end_date: start_date.to_string(),
        url_base: url_base.to_string(),
        title: "A test image".to_string(),
        copyright: "Somewhere (© nobody)".to_string(),
        copyright_link: "https://example.net".to_string(),
        quiz: String::new(),
        content_hash: "deadbeef".to_string(),
    }
}

/// Both repository traits over plain vectors behind mutexes.
#[derive(Default)]
pub struct MemoryRepos {
    acquisitions: Mutex<Vec<Acquisition>>,
    variants: Mutex<Vec<Variant>>,
    finds: AtomicU64,
}

impl MemoryRepos {
    pub fn find_count(&self) -> u64 {
        self.finds.load(Ordering::Relaxed)
    }

    pub fn acquisition_count(&self) -> usize {
        self.acquisitions.lock().unwrap().len()
    }

    pub fn variant_count(&self, content_id: &str) -> usize {
        self.variants
            .lock()
            .unwrap()
            .iter()
            .filter(|variant| variant.content_id == content_id)
            .count()
    }

    pub fn seed_acquisition(&self, start_date: &str, region_code: &str, content_id: &str) {
        let date = NaiveDate::parse_from_str(start_date, "%Y%m%d").expect("seed date");
        let now = Utc::now();
        self.acquisitions.lock().unwrap().push(Acquisition {
            date,
            region: Region::parse(region_code).expect("seed region"),
            content_id: content_id.to_string(),
            title: format!("{content_id} title"),
            copyright: String::new(),
            copyright_link: String::new(),
            quiz: String::new(),
            start_date: start_date.to_string(),
            full_start_date: format!("{start_date}0700"),
            url_base: format!("/th?id=OHR.{content_id}_ROW1"),
            content_hash: "deadbeef".to_string(),
            created_at: now,
            updated_at: now,
        });
    }

    pub fn seed_variant(&self, content_id: &str, label: &str, storage_key: &str) {
        self.variants.lock().unwrap().push(Variant {
            content_id: content_id.to_string(),
            variant: label.to_string(),
            format: "jpg".to_string(),
            storage_key: storage_key.to_string(),
            public_url: None,
            size_bytes: 4,
            created_at: Utc::now(),
        });
    }

    fn newest_first(&self, region: &Region) -> Vec<Acquisition> {
        let mut rows: Vec<_> = self
            .acquisitions
            .lock()
            .unwrap()
            .iter()
            .filter(|row| row.region == *region)
            .cloned()
            .collect();
        rows.sort_by(|a, b| b.date.cmp(&a.date));
        rows
    }
}

#[async_trait]
impl AcquisitionsRepo for MemoryRepos {
    async fn find(
        &self,
        date: NaiveDate,
        region: &Region,
    ) -> Result<Option<Acquisition>, RepoError> {
        self.finds.fetch_add(1, Ordering::Relaxed);
        Ok(self
            .acquisitions
            .lock()
            .unwrap()
            .iter()
            .find(|row| row.date == date && row.region == *region)
            .cloned())
    }

    async fn latest_for_region(&self, region: &Region) -> Result<Option<Acquisition>, RepoError> {
        Ok(self.newest_first(region).into_iter().next())
    }

    async fn count_for_region(&self, region: &Region) -> Result<u64, RepoError> {
        Ok(self.newest_first(region).len() as u64)
    }

    async fn nth_for_region(
        &self,
        region: &Region,
        offset: u64,
    ) -> Result<Option<Acquisition>, RepoError> {
        Ok(self.newest_first(region).into_iter().nth(offset as usize))
    }

    async fn list(
        &self,
        filter: &ImageListFilter,
        limit: u32,
        offset: u32,
    ) -> Result<Vec<Acquisition>, RepoError> {
        Ok(self
            .newest_first(&filter.region)
            .into_iter()
            .filter(|row| {
                filter
                    .month
                    .as_deref()
                    .is_none_or(|month| row.date.format("%Y-%m").to_string() == month)
            })
            .skip(offset as usize)
            .take(limit as usize)
            .collect())
    }

    async fn for_date_in_regions(
        &self,
        date: NaiveDate,
        regions: &[Region],
    ) -> Result<Vec<Acquisition>, RepoError> {
        Ok(self
            .acquisitions
            .lock()
            .unwrap()
            .iter()
            .filter(|row| row.date == date && regions.contains(&row.region))
            .cloned()
            .collect())
    }

    async fn upsert(&self, record: NewAcquisition) -> Result<UpsertOutcome, RepoError> {
        let mut rows = self.acquisitions.lock().unwrap();
        if let Some(existing) = rows
            .iter_mut()
            .find(|row| row.date == record.date && row.region == record.region)
        {
            existing.title = record.title;
            existing.copyright = record.copyright;
            existing.copyright_link = record.copyright_link;
            existing.quiz = record.quiz;
            existing.updated_at = Utc::now();
            return Ok(UpsertOutcome::Existing);
        }

        let now = Utc::now();
        rows.push(Acquisition {
            date: record.date,
            region: record.region,
            content_id: record.content_id,
            title: record.title,
            copyright: record.copyright,
            copyright_link: record.copyright_link,
            quiz: record.quiz,
            start_date: record.start_date,
            full_start_date: record.full_start_date,
            url_base: record.url_base,
            content_hash: record.content_hash,
            created_at: now,
            updated_at: now,
        });
        Ok(UpsertOutcome::Inserted)
    }

    async fn older_than(&self, threshold: NaiveDate) -> Result<Vec<Acquisition>, RepoError> {
        Ok(self
            .acquisitions
            .lock()
            .unwrap()
            .iter()
            .filter(|row| row.date < threshold)
            .cloned()
            .collect())
    }

    async fn count_other_references(
        &self,
        content_id: &str,
        date: NaiveDate,
        region: &Region,
    ) -> Result<u64, RepoError> {
        Ok(self
            .acquisitions
            .lock()
            .unwrap()
            .iter()
            .filter(|row| {
                row.content_id == content_id && !(row.date == date && row.region == *region)
            })
            .count() as u64)
    }

    async fn delete(&self, date: NaiveDate, region: &Region) -> Result<(), RepoError> {
        self.acquisitions
            .lock()
            .unwrap()
            .retain(|row| !(row.date == date && row.region == *region));
        Ok(())
    }
}

#[async_trait]
impl VariantsRepo for MemoryRepos {
    async fn upsert(&self, variant: NewVariant) -> Result<UpsertOutcome, RepoError> {
        let mut rows = self.variants.lock().unwrap();
        if rows.iter().any(|row| {
            row.content_id == variant.content_id
                && row.variant == variant.variant
                && row.format == variant.format
        }) {
            return Ok(UpsertOutcome::Existing);
        }

        rows.push(Variant {
            content_id: variant.content_id,
            variant: variant.variant,
            format: variant.format,
            storage_key: variant.storage_key,
            public_url: variant.public_url,
            size_bytes: variant.size_bytes,
            created_at: Utc::now(),
        });
        Ok(UpsertOutcome::Inserted)
    }

    async fn list_for_content(&self, content_id: &str) -> Result<Vec<Variant>, RepoError> {
        let mut rows: Vec<_> = self
            .variants
            .lock()
            .unwrap()
            .iter()
            .filter(|row| row.content_id == content_id)
            .cloned()
            .collect();
        rows.sort_by_key(|row| row.size_bytes);
        Ok(rows)
    }

    async fn delete_for_content(&self, content_id: &str) -> Result<u64, RepoError> {
        let mut rows = self.variants.lock().unwrap();
        let before = rows.len();
        rows.retain(|row| row.content_id != content_id);
        Ok((before - rows.len()) as u64)
    }
}

/// Scripted upstream: serves a fixed descriptor list and hands out a real,
/// decodable JPEG for every download.
#[derive(Default)]
pub struct ScriptedArchive {
    images: Vec<ArchiveImage>,
    failing_windows: Mutex<HashSet<u8>>,
    query_delay: Mutex<Option<Duration>>,
    queries: AtomicU64,
    downloads: AtomicU64,
}

impl ScriptedArchive {
    pub fn with_images(images: Vec<ArchiveImage>) -> Self {
        Self {
            images,
            ..Self::default()
        }
    }

    /// Make listing queries at the given window index fail.
    pub fn fail_window(&self, idx: u8) {
        self.failing_windows.lock().unwrap().insert(idx);
    }

    pub fn set_query_delay(&self, delay: Duration) {
        *self.query_delay.lock().unwrap() = Some(delay);
    }

    pub fn query_count(&self) -> u64 {
        self.queries.load(Ordering::Relaxed)
    }

    pub fn download_count(&self) -> u64 {
        self.downloads.load(Ordering::Relaxed)
    }

    fn sample_jpeg() -> Bytes {
        let source = DynamicImage::ImageRgb8(ImageBuffer::from_fn(96, 54, |x, y| {
            Rgb([(x % 256) as u8, (y % 256) as u8, 64])
        }));
        crate::application::planner::encode_jpeg_max_quality(&source).expect("sample jpeg")
    }
}

#[async_trait]
impl ArchiveClient for ScriptedArchive {
    async fn query(
        &self,
        _region: &Region,
        idx: u8,
        _count: u8,
    ) -> Result<Vec<ArchiveImage>, UpstreamError> {
        self.queries.fetch_add(1, Ordering::Relaxed);

        let delay = *self.query_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        if self.failing_windows.lock().unwrap().contains(&idx) {
            return Err(UpstreamError::Payload(format!(
                "scripted failure for window {idx}"
            )));
        }

        Ok(self.images.clone())
    }

    async fn probe_native(
        &self,
        url_base: &str,
    ) -> Result<(String, crate::domain::variants::VariantLabel), UpstreamError> {
        Ok((
            format!("https://upstream.test{url_base}_UHD.jpg"),
            crate::domain::variants::VariantLabel::Uhd,
        ))
    }

    async fn download(&self, _url: &str) -> Result<Bytes, UpstreamError> {
        self.downloads.fetch_add(1, Ordering::Relaxed);
        Ok(Self::sample_jpeg())
    }
}
