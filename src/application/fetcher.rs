//! Acquisition pipeline: pull archive windows, store blobs once per content
//! identity, record metadata.

use std::path::PathBuf;
use std::sync::Arc;

use bytes::Bytes;
use chrono::Utc;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::application::planner::{self, PlanError};
use crate::application::repos::{
    AcquisitionsRepo, NewAcquisition, NewVariant, RepoError, VariantsRepo,
};
use crate::domain::content_id::derive_content_id;
use crate::domain::region::Region;
use crate::domain::variants::{RESIZE_TARGETS, VARIANT_FORMAT, VariantLabel, storage_key};
use crate::infra::archive::{ArchiveClient, ArchiveImage, UpstreamError};
use crate::infra::store::{ObjectStore, StoreError};

/// Listing windows fetched per region. Together they cover the provider's
/// full sixteen-day history; only the first window failing aborts the pass,
/// since the older window routinely thins out.
const WINDOWS: &[(u8, u8)] = &[(0, 8), (7, 8)];

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("invalid region code `{0}`")]
    InvalidRegion(String),
    #[error(transparent)]
    Upstream(#[from] UpstreamError),
    #[error(transparent)]
    Repo(#[from] RepoError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Plan(#[from] PlanError),
    #[error("malformed descriptor: {0}")]
    Descriptor(String),
}

/// Behavioural knobs for an acquisition pass.
#[derive(Debug, Clone)]
pub struct FetchOptions {
    /// Regions covered by scheduled passes, in configured order.
    pub regions: Vec<Region>,
    pub default_region: Region,
    /// Mirror today's image to fixed preview paths after storing it.
    pub write_daily_files: bool,
    pub preview_dir: PathBuf,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DescriptorOutcome {
    Stored,
    Linked,
    Skipped,
}

impl DescriptorOutcome {
    fn as_str(self) -> &'static str {
        match self {
            Self::Stored => "stored",
            Self::Linked => "linked",
            Self::Skipped => "skipped",
        }
    }
}

/// Drives acquisition passes against the upstream archive.
pub struct Fetcher {
    archive: Arc<dyn ArchiveClient>,
    acquisitions: Arc<dyn AcquisitionsRepo>,
    variants: Arc<dyn VariantsRepo>,
    store: Arc<dyn ObjectStore>,
}

impl Fetcher {
    pub fn new(
        archive: Arc<dyn ArchiveClient>,
        acquisitions: Arc<dyn AcquisitionsRepo>,
        variants: Arc<dyn VariantsRepo>,
        store: Arc<dyn ObjectStore>,
    ) -> Self {
        Self {
            archive,
            acquisitions,
            variants,
            store,
        }
    }

    /// Run one acquisition pass for every configured region, sequentially.
    /// A failing region is logged and does not stop the remaining regions.
    pub async fn fetch_all(&self, options: &FetchOptions) {
        for region in &options.regions {
            if let Err(err) = self.fetch_region(region.as_str(), options).await {
                metrics::counter!("paperwall_fetch_regions_total", "outcome" => "error")
                    .increment(1);
                warn!(%region, error = %err, "acquisition pass failed");
            } else {
                metrics::counter!("paperwall_fetch_regions_total", "outcome" => "ok").increment(1);
            }
        }
    }

    /// Run one acquisition pass for a single region.
    ///
    /// The region code is validated before any upstream or repository work.
    /// The recent window must succeed; the older window is best effort.
    pub async fn fetch_region(&self, code: &str, options: &FetchOptions) -> Result<(), FetchError> {
        let region =
            Region::parse(code).map_err(|_| FetchError::InvalidRegion(code.to_string()))?;

        let mut first = true;
        for &(idx, count) in WINDOWS {
            match self.fetch_window(&region, idx, count, options).await {
                Ok(()) => {}
                Err(err) if first => return Err(err),
                Err(err) => {
                    warn!(%region, idx, error = %err, "older listing window failed");
                }
            }
            first = false;
        }

        info!(%region, "acquisition pass complete");
        Ok(())
    }

    async fn fetch_window(
        &self,
        region: &Region,
        idx: u8,
        count: u8,
        options: &FetchOptions,
    ) -> Result<(), FetchError> {
        let descriptors = self.archive.query(region, idx, count).await?;
        debug!(%region, idx, descriptors = descriptors.len(), "listing window fetched");

        for descriptor in descriptors {
            match self.process_descriptor(region, &descriptor, options).await {
                Ok(outcome) => {
                    metrics::counter!(
                        "paperwall_fetch_descriptors_total",
                        "outcome" => outcome.as_str()
                    )
                    .increment(1);
                }
                Err(err) => {
                    metrics::counter!("paperwall_fetch_descriptors_total", "outcome" => "error")
                        .increment(1);
                    warn!(
                        %region,
                        url_base = %descriptor.url_base,
                        error = %err,
                        "descriptor processing failed"
                    );
                }
            }
        }

        Ok(())
    }

    async fn process_descriptor(
        &self,
        region: &Region,
        descriptor: &ArchiveImage,
        options: &FetchOptions,
    ) -> Result<DescriptorOutcome, FetchError> {
        let date = descriptor.date()?;
        let content_id = derive_content_id(&descriptor.url_base, &descriptor.content_hash);
        if content_id.is_empty() {
            return Err(FetchError::Descriptor(format!(
                "no usable content identity in `{}`",
                descriptor.url_base
            )));
        }

        // The acquisition row is always written after its variants, so an
        // existing row means the earlier pass completed; nothing to redo.
        if self.acquisitions.find(date, region).await?.is_some() {
            debug!(%region, %date, %content_id, "descriptor already acquired");
            return Ok(DescriptorOutcome::Skipped);
        }

        let (native_url, native_label) = self.archive.probe_native(&descriptor.url_base).await?;

        let outcome = if self.variants_complete(&content_id, native_label).await? {
            // Another date or region already stored this physical image;
            // only the metadata link is new.
            self.record_existing_variants(&content_id, native_label)
                .await?;
            DescriptorOutcome::Linked
        } else {
            let native_bytes = self.archive.download(&native_url).await?;
            self.store_all_variants(&content_id, native_label, native_bytes.clone())
                .await?;

            if options.write_daily_files && date == Utc::now().date_naive() {
                self.write_daily_files(region, options, &native_bytes).await;
            }

            DescriptorOutcome::Stored
        };

        // The acquisition row lands last so a crash mid-pass leaves stored
        // variants without a dangling metadata record, never the reverse.
        self.acquisitions
            .upsert(NewAcquisition {
                date,
                region: region.clone(),
                content_id,
                title: descriptor.title.clone(),
                copyright: descriptor.copyright.clone(),
                copyright_link: descriptor.copyright_link.clone(),
                quiz: descriptor.quiz.clone(),
                start_date: descriptor.start_date.clone(),
                full_start_date: descriptor.full_start_date.clone(),
                url_base: descriptor.url_base.clone(),
                content_hash: descriptor.content_hash.clone(),
            })
            .await?;

        Ok(outcome)
    }

    /// Whether every catalog variant for this content identity, including
    /// the probed native rendition, is present in the blob store. A content
    /// first acquired without a UHD asset is completed later once the probe
    /// starts succeeding.
    async fn variants_complete(
        &self,
        content_id: &str,
        native_label: VariantLabel,
    ) -> Result<bool, FetchError> {
        for label in catalog_with_native(native_label) {
            let key = storage_key(content_id, label, VARIANT_FORMAT);
            if !self.store.exists(&key).await? {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Record metadata rows for blobs that already exist, reading real sizes
    /// from the store instead of guessing.
    async fn record_existing_variants(
        &self,
        content_id: &str,
        native_label: VariantLabel,
    ) -> Result<(), FetchError> {
        for label in catalog_with_native(native_label) {
            let key = storage_key(content_id, label, VARIANT_FORMAT);
            let Some(size) = self.store.stat(&key).await? else {
                continue;
            };
            self.variants
                .upsert(NewVariant {
                    content_id: content_id.to_string(),
                    variant: label.as_str().to_string(),
                    format: VARIANT_FORMAT.to_string(),
                    storage_key: key.clone(),
                    public_url: self.store.public_url(&key),
                    size_bytes: size as i64,
                })
                .await?;
        }
        Ok(())
    }

    /// Store the native asset as-is plus every planned rendition, recording a
    /// metadata row per stored blob.
    async fn store_all_variants(
        &self,
        content_id: &str,
        native_label: VariantLabel,
        native_bytes: Bytes,
    ) -> Result<(), FetchError> {
        self.persist_variant(content_id, native_label, native_bytes.clone())
            .await?;

        let source = planner::decode_source(&native_bytes)?;
        for planned in planner::plan_variants(&source, native_label) {
            self.persist_variant(content_id, planned.label, planned.data)
                .await?;
        }

        Ok(())
    }

    async fn persist_variant(
        &self,
        content_id: &str,
        label: VariantLabel,
        data: Bytes,
    ) -> Result<(), FetchError> {
        let key = storage_key(content_id, label, VARIANT_FORMAT);
        let stored = self.store.put(&key, data, "image/jpeg").await?;
        metrics::counter!("paperwall_store_puts_total").increment(1);
        self.variants
            .upsert(NewVariant {
                content_id: content_id.to_string(),
                variant: label.as_str().to_string(),
                format: VARIANT_FORMAT.to_string(),
                storage_key: stored.key,
                public_url: stored.public_url,
                size_bytes: stored.size_bytes,
            })
            .await?;
        Ok(())
    }

    /// Mirror today's image to fixed preview paths: a full-resolution
    /// maximum-quality re-encode and the untouched native bytes, per region,
    /// plus a root copy for the default region. Failures are logged;
    /// previews never fail a pass.
    async fn write_daily_files(&self, region: &Region, options: &FetchOptions, native: &Bytes) {
        let source = match planner::decode_source(native) {
            Ok(source) => source,
            Err(err) => {
                warn!(%region, error = %err, "daily preview decode failed");
                return;
            }
        };
        let rendered = match planner::encode_jpeg_max_quality(&source) {
            Ok(bytes) => bytes,
            Err(err) => {
                warn!(%region, error = %err, "daily preview encode failed");
                return;
            }
        };

        let mut targets = vec![options.preview_dir.join(region.as_str())];
        if *region == options.default_region {
            targets.push(options.preview_dir.clone());
        }

        for dir in targets {
            if let Err(err) = tokio::fs::create_dir_all(&dir).await {
                warn!(path = %dir.display(), error = %err, "preview directory unavailable");
                continue;
            }
            for (name, data) in [("daily.jpeg", &rendered), ("original.jpeg", native)] {
                if let Err(err) = tokio::fs::write(dir.join(name), data).await {
                    warn!(path = %dir.join(name).display(), error = %err, "preview write failed");
                }
            }
        }
    }
}

/// The full catalog for a given native label, native first, no duplicates.
fn catalog_with_native(native: VariantLabel) -> impl Iterator<Item = VariantLabel> {
    std::iter::once(native).chain(
        RESIZE_TARGETS
            .iter()
            .copied()
            .filter(move |&label| label != native),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::testing::{ScriptedArchive, descriptor, memory_repos};
    use crate::infra::store::MemoryObjectStore;

    fn options(regions: &[&str]) -> FetchOptions {
        FetchOptions {
            regions: regions
                .iter()
                .map(|code| Region::parse(code).expect("region"))
                .collect(),
            default_region: Region::parse("en-US").expect("region"),
            write_daily_files: false,
            preview_dir: PathBuf::from("/nonexistent"),
        }
    }

    fn fetcher(
        archive: Arc<ScriptedArchive>,
        store: Arc<MemoryObjectStore>,
    ) -> (Fetcher, Arc<crate::application::testing::MemoryRepos>) {
        let repos = memory_repos();
        let fetcher = Fetcher::new(
            archive,
            Arc::clone(&repos) as Arc<dyn AcquisitionsRepo>,
            Arc::clone(&repos) as Arc<dyn VariantsRepo>,
            store,
        );
        (fetcher, repos)
    }

    #[tokio::test]
    async fn invalid_region_fails_before_any_upstream_call() {
        let archive = Arc::new(ScriptedArchive::default());
        let store = Arc::new(MemoryObjectStore::new());
        let (fetcher, _repos) = fetcher(Arc::clone(&archive), store);

        let err = fetcher
            .fetch_region("not-a-locale", &options(&["en-US"]))
            .await
            .expect_err("must reject");
        assert!(matches!(err, FetchError::InvalidRegion(_)));
        assert_eq!(archive.query_count(), 0);
    }

    #[tokio::test]
    async fn stores_full_catalog_once_per_content_identity() {
        let archive = Arc::new(ScriptedArchive::with_images(vec![descriptor(
            "20260824",
            "/th?id=OHR.MilwaukeeHall_ROW0871854348",
        )]));
        let store = Arc::new(MemoryObjectStore::new());
        let (fetcher, repos) = fetcher(Arc::clone(&archive), Arc::clone(&store));

        fetcher
            .fetch_region("en-US", &options(&["en-US"]))
            .await
            .expect("pass succeeds");

        // Native (UHD) plus every resize target.
        assert_eq!(store.object_count(), RESIZE_TARGETS.len() + 1);
        assert_eq!(archive.download_count(), 1);
        assert_eq!(repos.acquisition_count(), 1);
        assert_eq!(repos.variant_count("MilwaukeeHall"), RESIZE_TARGETS.len() + 1);
    }

    #[tokio::test]
    async fn second_pass_is_a_no_op() {
        let archive = Arc::new(ScriptedArchive::with_images(vec![descriptor(
            "20260824",
            "/th?id=OHR.MilwaukeeHall_ROW0871854348",
        )]));
        let store = Arc::new(MemoryObjectStore::new());
        let (fetcher, _repos) = fetcher(Arc::clone(&archive), Arc::clone(&store));

        let opts = options(&["en-US"]);
        fetcher.fetch_region("en-US", &opts).await.expect("first");
        let puts_after_first = store.put_count();
        let downloads_after_first = archive.download_count();

        fetcher.fetch_region("en-US", &opts).await.expect("second");
        assert_eq!(store.put_count(), puts_after_first);
        assert_eq!(archive.download_count(), downloads_after_first);
    }

    #[tokio::test]
    async fn shared_content_across_regions_links_without_download() {
        let archive = Arc::new(ScriptedArchive::with_images(vec![descriptor(
            "20260824",
            "/th?id=OHR.MilwaukeeHall_ROW0871854348",
        )]));
        let store = Arc::new(MemoryObjectStore::new());
        let (fetcher, repos) = fetcher(Arc::clone(&archive), Arc::clone(&store));

        let opts = options(&["en-US", "en-GB"]);
        fetcher.fetch_region("en-US", &opts).await.expect("en-US");
        let puts_after_first = store.put_count();

        fetcher.fetch_region("en-GB", &opts).await.expect("en-GB");
        assert_eq!(store.put_count(), puts_after_first, "no duplicate blobs");
        assert_eq!(archive.download_count(), 1, "no duplicate download");
        assert_eq!(repos.acquisition_count(), 2, "both regions recorded");
    }

    #[tokio::test]
    async fn failing_older_window_does_not_fail_the_pass() {
        let archive = Arc::new(ScriptedArchive::with_images(vec![descriptor(
            "20260824",
            "/th?id=OHR.MilwaukeeHall_ROW0871854348",
        )]));
        archive.fail_window(7);
        let store = Arc::new(MemoryObjectStore::new());
        let (fetcher, repos) = fetcher(Arc::clone(&archive), store);

        fetcher
            .fetch_region("en-US", &options(&["en-US"]))
            .await
            .expect("recent window alone is enough");
        assert_eq!(repos.acquisition_count(), 1);
    }

    #[tokio::test]
    async fn link_only_path_requires_the_native_variant() {
        let archive = Arc::new(ScriptedArchive::with_images(vec![descriptor(
            "20260824",
            "/th?id=OHR.MilwaukeeHall_ROW0871854348",
        )]));
        let store = Arc::new(MemoryObjectStore::new());
        // Every resized rendition is present but the native UHD asset is
        // not. Linking would leave the catalog incomplete for good; the
        // pass must download and fill the gap.
        for &label in RESIZE_TARGETS {
            store
                .put(
                    &storage_key("MilwaukeeHall", label, VARIANT_FORMAT),
                    Bytes::from_static(b"blob"),
                    "image/jpeg",
                )
                .await
                .expect("seed blob");
        }
        let (fetcher, _repos) = fetcher(Arc::clone(&archive), Arc::clone(&store));

        fetcher
            .fetch_region("en-US", &options(&["en-US"]))
            .await
            .expect("pass succeeds");

        assert_eq!(archive.download_count(), 1, "must not take the link path");
        let uhd_key = storage_key("MilwaukeeHall", VariantLabel::Uhd, VARIANT_FORMAT);
        assert!(store.exists(&uhd_key).await.expect("exists"));
    }

    #[tokio::test]
    async fn daily_preview_keeps_the_native_resolution() {
        let today = Utc::now().date_naive().format("%Y%m%d").to_string();
        let archive = Arc::new(ScriptedArchive::with_images(vec![descriptor(
            &today,
            "/th?id=OHR.MilwaukeeHall_ROW0871854348",
        )]));
        let store = Arc::new(MemoryObjectStore::new());
        let (fetcher, _repos) = fetcher(Arc::clone(&archive), store);

        let preview = tempfile::tempdir().expect("tempdir");
        let mut opts = options(&["en-US"]);
        opts.write_daily_files = true;
        opts.preview_dir = preview.path().to_path_buf();

        fetcher
            .fetch_region("en-US", &opts)
            .await
            .expect("pass succeeds");

        // en-US is the default region, so the previews land both under the
        // region directory and at the preview root.
        for dir in [preview.path().join("en-US"), preview.path().to_path_buf()] {
            let daily = tokio::fs::read(dir.join("daily.jpeg"))
                .await
                .expect("daily.jpeg");
            let decoded = planner::decode_source(&Bytes::from(daily)).expect("decode");
            // The scripted download serves a 96x54 source; the daily file
            // is a re-encode, never a rescale.
            assert_eq!((decoded.width(), decoded.height()), (96, 54));
            assert!(dir.join("original.jpeg").exists());
        }
    }

    #[test]
    fn pass_counts_one_store_put_per_blob() {
        let recorder = metrics_util::debugging::DebuggingRecorder::new();
        let snapshotter = recorder.snapshotter();

        metrics::with_local_recorder(&recorder, || {
            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .expect("runtime");
            runtime.block_on(async {
                let archive = Arc::new(ScriptedArchive::with_images(vec![descriptor(
                    "20260824",
                    "/th?id=OHR.MilwaukeeHall_ROW0871854348",
                )]));
                let store = Arc::new(MemoryObjectStore::new());
                let (fetcher, _repos) = fetcher(archive, store);
                fetcher
                    .fetch_region("en-US", &options(&["en-US"]))
                    .await
                    .expect("pass succeeds");
            });
        });

        let puts = snapshotter
            .snapshot()
            .into_vec()
            .into_iter()
            .find_map(|(key, _, _, value)| {
                (key.key().name() == "paperwall_store_puts_total").then_some(value)
            })
            .expect("store put counter recorded");
        assert_eq!(
            puts,
            metrics_util::debugging::DebugValue::Counter(RESIZE_TARGETS.len() as u64 + 1)
        );
    }

    #[tokio::test]
    async fn failing_recent_window_fails_the_pass() {
        let archive = Arc::new(ScriptedArchive::default());
        archive.fail_window(0);
        let store = Arc::new(MemoryObjectStore::new());
        let (fetcher, _repos) = fetcher(Arc::clone(&archive), store);

        let err = fetcher
            .fetch_region("en-US", &options(&["en-US"]))
            .await
            .expect_err("must fail");
        assert!(matches!(err, FetchError::Upstream(_)));
    }
}
