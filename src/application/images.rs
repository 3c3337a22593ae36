//! Image lookups with tiered fallback and on-demand acquisition.

use std::sync::Arc;

use chrono::{NaiveDate, Utc};
use rand::Rng;
use tracing::{info, warn};

use crate::application::fetcher::{FetchOptions, Fetcher};
use crate::application::inflight::InFlightFetches;
use crate::application::repos::{AcquisitionsRepo, ImageListFilter, RepoError, VariantsRepo};
use crate::domain::entities::{Acquisition, ResolvedImage};
use crate::domain::region::Region;

/// Resolution policy knobs.
#[derive(Debug, Clone)]
pub struct ResolveOptions {
    pub default_region: Region,
    /// Kick off a background acquisition when today's image is missing.
    pub on_demand_fetch: bool,
    /// Retry misses once against the default region.
    pub region_fallback: bool,
}

/// Outcome of a lookup. Misses are answers, not errors; only repository
/// failures surface as `Err`.
#[derive(Debug)]
pub enum Lookup {
    Found(ResolvedImage),
    /// Nothing stored yet, but an acquisition pass for the region is now
    /// running (or already was). Ask again shortly.
    FetchStarted,
    NotFound,
    InvalidRegion,
}

pub struct ImageService {
    acquisitions: Arc<dyn AcquisitionsRepo>,
    variants: Arc<dyn VariantsRepo>,
    fetcher: Arc<Fetcher>,
    inflight: Arc<InFlightFetches>,
    options: ResolveOptions,
    fetch_options: Arc<FetchOptions>,
}

impl ImageService {
    pub fn new(
        acquisitions: Arc<dyn AcquisitionsRepo>,
        variants: Arc<dyn VariantsRepo>,
        fetcher: Arc<Fetcher>,
        options: ResolveOptions,
        fetch_options: Arc<FetchOptions>,
    ) -> Self {
        Self {
            acquisitions,
            variants,
            fetcher,
            inflight: Arc::new(InFlightFetches::new()),
            options,
            fetch_options,
        }
    }

    /// Today's image for a region.
    ///
    /// Tiers: exact date, then (when enabled) a background fetch, then the
    /// region's latest image of any date, then the same two read tiers once
    /// against the default region.
    pub async fn get_today(&self, region_code: &str) -> Result<Lookup, RepoError> {
        let Ok(region) = Region::parse(region_code) else {
            return Ok(Lookup::InvalidRegion);
        };
        let today = Utc::now().date_naive();

        if let Some(acquisition) = self.acquisitions.find(today, &region).await? {
            return self.resolve(acquisition).await;
        }

        if self.options.on_demand_fetch {
            self.trigger_fetch(&region);
            return Ok(Lookup::FetchStarted);
        }

        if let Some(acquisition) = self.acquisitions.latest_for_region(&region).await? {
            return self.resolve(acquisition).await;
        }

        if let Some(fallback) = self.fallback_region(&region) {
            if let Some(acquisition) = self.acquisitions.find(today, &fallback).await? {
                return self.resolve(acquisition).await;
            }
            if let Some(acquisition) = self.acquisitions.latest_for_region(&fallback).await? {
                return self.resolve(acquisition).await;
            }
        }

        Ok(Lookup::NotFound)
    }

    /// The image stored for an exact date. No latest-of-any-date relaxation;
    /// the miss path is the same on-demand-or-default-region policy as
    /// [`Self::get_today`].
    pub async fn get_by_date(
        &self,
        date: NaiveDate,
        region_code: &str,
    ) -> Result<Lookup, RepoError> {
        let Ok(region) = Region::parse(region_code) else {
            return Ok(Lookup::InvalidRegion);
        };

        if let Some(acquisition) = self.acquisitions.find(date, &region).await? {
            return self.resolve(acquisition).await;
        }

        if self.options.on_demand_fetch {
            self.trigger_fetch(&region);
            return Ok(Lookup::FetchStarted);
        }

        if let Some(fallback) = self.fallback_region(&region) {
            if let Some(acquisition) = self.acquisitions.find(date, &fallback).await? {
                return self.resolve(acquisition).await;
            }
        }

        Ok(Lookup::NotFound)
    }

    /// A uniformly random stored image for a region, selected by row offset
    /// so memory use stays flat however large the history grows.
    pub async fn get_random(&self, region_code: &str) -> Result<Lookup, RepoError> {
        let Ok(region) = Region::parse(region_code) else {
            return Ok(Lookup::InvalidRegion);
        };

        if let Some(acquisition) = self.random_in(&region).await? {
            return self.resolve(acquisition).await;
        }

        if self.options.on_demand_fetch {
            self.trigger_fetch(&region);
            return Ok(Lookup::FetchStarted);
        }

        if let Some(fallback) = self.fallback_region(&region) {
            if let Some(acquisition) = self.random_in(&fallback).await? {
                return self.resolve(acquisition).await;
            }
        }

        Ok(Lookup::NotFound)
    }

    /// Newest-first page of a region's history, optionally narrowed to one
    /// `YYYY-MM` month.
    pub async fn list_images(
        &self,
        region_code: &str,
        month: Option<String>,
        limit: u32,
        offset: u32,
    ) -> Result<Option<Vec<ResolvedImage>>, RepoError> {
        let Ok(region) = Region::parse(region_code) else {
            return Ok(None);
        };

        let filter = ImageListFilter { region, month };
        let acquisitions = self.acquisitions.list(&filter, limit, offset).await?;

        let mut resolved = Vec::with_capacity(acquisitions.len());
        for acquisition in acquisitions {
            resolved.push(self.join_variants(acquisition).await?);
        }
        Ok(Some(resolved))
    }

    /// Today's image for every configured region, in configured order. No
    /// fallback and no on-demand trigger; absent regions are absent.
    pub async fn today_across_regions(&self) -> Result<Vec<ResolvedImage>, RepoError> {
        let today = Utc::now().date_naive();
        let found = self
            .acquisitions
            .for_date_in_regions(today, &self.fetch_options.regions)
            .await?;

        let mut resolved = Vec::with_capacity(found.len());
        for region in &self.fetch_options.regions {
            if let Some(acquisition) = found
                .iter()
                .find(|acquisition| acquisition.region == *region)
            {
                resolved.push(self.join_variants(acquisition.clone()).await?);
            }
        }
        Ok(resolved)
    }

    /// Start a background acquisition pass for a region unless one is
    /// already running.
    fn trigger_fetch(&self, region: &Region) {
        let Some(guard) = self.inflight.try_begin(region) else {
            return;
        };
        metrics::counter!("paperwall_on_demand_fetch_total").increment(1);

        let fetcher = Arc::clone(&self.fetcher);
        let options = Arc::clone(&self.fetch_options);
        let code = region.as_str().to_string();
        tokio::spawn(async move {
            let _guard = guard;
            info!(region = %code, "starting on-demand acquisition");
            if let Err(err) = fetcher.fetch_region(&code, &options).await {
                warn!(region = %code, error = %err, "on-demand acquisition failed");
            }
        });
    }

    fn fallback_region(&self, region: &Region) -> Option<Region> {
        (self.options.region_fallback && *region != self.options.default_region)
            .then(|| self.options.default_region.clone())
    }

    async fn random_in(&self, region: &Region) -> Result<Option<Acquisition>, RepoError> {
        let count = self.acquisitions.count_for_region(region).await?;
        if count == 0 {
            return Ok(None);
        }
        let offset = rand::rng().random_range(0..count);
        self.acquisitions.nth_for_region(region, offset).await
    }

    async fn resolve(&self, acquisition: Acquisition) -> Result<Lookup, RepoError> {
        Ok(Lookup::Found(self.join_variants(acquisition).await?))
    }

    async fn join_variants(&self, acquisition: Acquisition) -> Result<ResolvedImage, RepoError> {
        let variants = self
            .variants
            .list_for_content(&acquisition.content_id)
            .await?;
        Ok(ResolvedImage {
            acquisition,
            variants,
        })
    }
}
