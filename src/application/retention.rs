//! Retention collector: expire old acquisitions and reclaim unreferenced
//! blobs.

use std::sync::Arc;

use chrono::{Days, NaiveDate};
use tracing::{debug, info, warn};

use crate::application::repos::{AcquisitionsRepo, RepoError, VariantsRepo};
use crate::domain::entities::Acquisition;
use crate::infra::store::ObjectStore;

pub struct RetentionCollector {
    acquisitions: Arc<dyn AcquisitionsRepo>,
    variants: Arc<dyn VariantsRepo>,
    store: Arc<dyn ObjectStore>,
}

impl RetentionCollector {
    pub fn new(
        acquisitions: Arc<dyn AcquisitionsRepo>,
        variants: Arc<dyn VariantsRepo>,
        store: Arc<dyn ObjectStore>,
    ) -> Self {
        Self {
            acquisitions,
            variants,
            store,
        }
    }

    /// Expire every acquisition older than `retention_days` before `now`.
    ///
    /// Blobs and variant rows go only when the expiring record is the last
    /// reference to its content identity. Each record is collected on its
    /// own; one failure never blocks the rest of the sweep.
    pub async fn collect(&self, now: NaiveDate, retention_days: u32) -> Result<u64, RepoError> {
        if retention_days == 0 {
            debug!("retention disabled, skipping sweep");
            return Ok(0);
        }

        let threshold = now
            .checked_sub_days(Days::new(u64::from(retention_days)))
            .unwrap_or(NaiveDate::MIN);
        let expired = self.acquisitions.older_than(threshold).await?;
        if expired.is_empty() {
            return Ok(0);
        }

        let mut removed = 0;
        for record in expired {
            match self.collect_one(&record).await {
                Ok(()) => removed += 1,
                Err(err) => {
                    warn!(
                        date = %record.date,
                        region = %record.region,
                        error = %err,
                        "retention skipped a record"
                    );
                }
            }
        }

        metrics::counter!("paperwall_retention_removed_total").increment(removed);
        info!(removed, %threshold, "retention sweep complete");
        Ok(removed)
    }

    async fn collect_one(&self, record: &Acquisition) -> Result<(), RepoError> {
        let others = self
            .acquisitions
            .count_other_references(&record.content_id, record.date, &record.region)
            .await?;

        if others == 0 {
            // Last reference: reclaim the blobs first, then the metadata.
            // A blob delete failure is logged and the rows still go; the
            // store tolerates re-deletes if a later sweep retries.
            for variant in self.variants.list_for_content(&record.content_id).await? {
                match self.store.delete(&variant.storage_key).await {
                    Ok(()) => {
                        metrics::counter!("paperwall_store_deletes_total").increment(1);
                    }
                    Err(err) => {
                        warn!(key = %variant.storage_key, error = %err, "blob delete failed");
                    }
                }
            }
            self.variants
                .delete_for_content(&record.content_id)
                .await?;
        } else {
            debug!(
                content_id = %record.content_id,
                others,
                "content still referenced, keeping blobs"
            );
        }

        self.acquisitions.delete(record.date, &record.region).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::testing::memory_repos;
    use crate::domain::region::Region;
    use crate::infra::store::{MemoryObjectStore, StoreError};
    use async_trait::async_trait;
    use bytes::Bytes;

    fn date(value: &str) -> NaiveDate {
        NaiveDate::parse_from_str(value, "%Y%m%d").expect("date")
    }

    fn collector(
        repos: &Arc<crate::application::testing::MemoryRepos>,
        store: Arc<dyn ObjectStore>,
    ) -> RetentionCollector {
        RetentionCollector::new(Arc::clone(repos) as _, Arc::clone(repos) as _, store)
    }

    #[tokio::test]
    async fn zero_retention_days_is_a_no_op() {
        let repos = memory_repos();
        repos.seed_acquisition("19990101", "en-US", "Ancient");
        let store = Arc::new(MemoryObjectStore::new());

        let removed = collector(&repos, store)
            .collect(date("20260825"), 0)
            .await
            .expect("sweep");
        assert_eq!(removed, 0);
        assert_eq!(repos.acquisition_count(), 1);
    }

    #[tokio::test]
    async fn last_reference_reclaims_blobs_and_rows() {
        let repos = memory_repos();
        repos.seed_acquisition("20260101", "en-US", "Expiring");
        repos.seed_variant("Expiring", "UHD", "Expiring/Expiring_UHD.jpg");
        let store = Arc::new(MemoryObjectStore::new());
        store
            .put(
                "Expiring/Expiring_UHD.jpg",
                Bytes::from_static(b"blob"),
                "image/jpeg",
            )
            .await
            .expect("seed blob");

        let removed = collector(&repos, Arc::clone(&store) as _)
            .collect(date("20260825"), 30)
            .await
            .expect("sweep");

        assert_eq!(removed, 1);
        assert_eq!(repos.acquisition_count(), 0);
        assert_eq!(repos.variant_count("Expiring"), 0);
        assert_eq!(store.object_count(), 0);
    }

    #[tokio::test]
    async fn shared_content_keeps_blobs_until_last_reference_expires() {
        let repos = memory_repos();
        repos.seed_acquisition("20260101", "en-US", "Shared");
        repos.seed_acquisition("20260824", "ja-JP", "Shared");
        repos.seed_variant("Shared", "UHD", "Shared/Shared_UHD.jpg");
        let store = Arc::new(MemoryObjectStore::new());
        store
            .put(
                "Shared/Shared_UHD.jpg",
                Bytes::from_static(b"blob"),
                "image/jpeg",
            )
            .await
            .expect("seed blob");

        let removed = collector(&repos, Arc::clone(&store) as _)
            .collect(date("20260825"), 30)
            .await
            .expect("sweep");

        assert_eq!(removed, 1, "only the old record expires");
        assert_eq!(repos.acquisition_count(), 1);
        assert_eq!(repos.variant_count("Shared"), 1, "rows survive");
        assert_eq!(store.object_count(), 1, "blob survives");
    }

    #[tokio::test]
    async fn recent_records_are_untouched() {
        let repos = memory_repos();
        repos.seed_acquisition("20260824", "en-US", "Fresh");
        let store = Arc::new(MemoryObjectStore::new());

        let removed = collector(&repos, store)
            .collect(date("20260825"), 30)
            .await
            .expect("sweep");
        assert_eq!(removed, 0);
        assert_eq!(repos.acquisition_count(), 1);
    }

    struct FailingDeleteStore(MemoryObjectStore);

    #[async_trait]
    impl ObjectStore for FailingDeleteStore {
        async fn put(
            &self,
            key: &str,
            data: Bytes,
            content_type: &str,
        ) -> Result<crate::infra::store::StoredObject, StoreError> {
            self.0.put(key, data, content_type).await
        }

        async fn get(&self, key: &str) -> Result<Bytes, StoreError> {
            self.0.get(key).await
        }

        async fn exists(&self, key: &str) -> Result<bool, StoreError> {
            self.0.exists(key).await
        }

        async fn stat(&self, key: &str) -> Result<Option<u64>, StoreError> {
            self.0.stat(key).await
        }

        async fn delete(&self, _key: &str) -> Result<(), StoreError> {
            Err(StoreError::Backend("delete refused".to_string()))
        }

        fn public_url(&self, key: &str) -> Option<String> {
            self.0.public_url(key)
        }
    }

    #[tokio::test]
    async fn blob_delete_failure_still_expires_metadata() {
        let repos = memory_repos();
        repos.seed_acquisition("20260101", "en-US", "Stuck");
        repos.seed_variant("Stuck", "UHD", "Stuck/Stuck_UHD.jpg");
        let store = Arc::new(FailingDeleteStore(MemoryObjectStore::new()));

        let removed = collector(&repos, store)
            .collect(date("20260825"), 30)
            .await
            .expect("sweep");

        assert_eq!(removed, 1);
        assert_eq!(repos.acquisition_count(), 0);
        assert_eq!(repos.variant_count("Stuck"), 0);
    }
}
