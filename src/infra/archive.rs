//! Upstream image archive client.
//!
//! The provider exposes a windowed JSON listing of recent daily images per
//! market plus direct asset downloads addressed by a relative URL base. The
//! native resolution of an asset is discovered by probing, not advertised.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::NaiveDate;
use serde::Deserialize;
use thiserror::Error;
use tracing::debug;

use crate::domain::{region::Region, variants::VariantLabel};

pub const DEFAULT_API_BASE: &str = "https://www.bing.com/HPImageArchive.aspx";
pub const DEFAULT_ASSET_BASE: &str = "https://www.bing.com";
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Error)]
pub enum UpstreamError {
    #[error("archive request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("archive returned malformed payload: {0}")]
    Payload(String),
}

/// One image descriptor as returned by the archive listing.
#[derive(Debug, Clone, Deserialize)]
pub struct ArchiveImage {
    #[serde(rename = "startdate")]
    pub start_date: String,
    #[serde(rename = "fullstartdate")]
    pub full_start_date: String,
    #[serde(rename = "enddate")]
    pub end_date: String,
    #[serde(rename = "urlbase")]
    pub url_base: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub copyright: String,
    #[serde(rename = "copyrightlink", default)]
    pub copyright_link: String,
    #[serde(default)]
    pub quiz: String,
    #[serde(rename = "hsh", default)]
    pub content_hash: String,
}

impl ArchiveImage {
    /// Calendar date the record is filed under, from the `YYYYMMDD` end
    /// date.
    pub fn date(&self) -> Result<NaiveDate, UpstreamError> {
        NaiveDate::parse_from_str(&self.end_date, "%Y%m%d").map_err(|err| {
            UpstreamError::Payload(format!("unparseable end date `{}`: {err}", self.end_date))
        })
    }
}

#[derive(Debug, Deserialize)]
pub struct ArchiveResponse {
    pub images: Vec<ArchiveImage>,
}

/// Access to the upstream archive listing and asset downloads.
#[async_trait]
pub trait ArchiveClient: Send + Sync {
    /// Fetch a listing window: `idx` days back from today, `count` entries.
    async fn query(
        &self,
        region: &Region,
        idx: u8,
        count: u8,
    ) -> Result<Vec<ArchiveImage>, UpstreamError>;

    /// Determine the best natively available asset for a URL base. Returns
    /// the full download URL and the label it should be stored under.
    async fn probe_native(&self, url_base: &str) -> Result<(String, VariantLabel), UpstreamError>;

    async fn download(&self, url: &str) -> Result<Bytes, UpstreamError>;
}

/// HTTP implementation of [`ArchiveClient`] backed by a shared
/// [`reqwest::Client`].
#[derive(Debug, Clone)]
pub struct HttpArchiveClient {
    http: reqwest::Client,
    api_base: String,
    asset_base: String,
}

impl HttpArchiveClient {
    pub fn new(
        api_base: impl Into<String>,
        asset_base: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, UpstreamError> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            api_base: api_base.into(),
            asset_base: asset_base.into().trim_end_matches('/').to_string(),
        })
    }

    fn listing_url(&self, region: &Region, idx: u8, count: u8) -> String {
        format!(
            "{}?format=js&idx={idx}&n={count}&uhd=1&mkt={region}",
            self.api_base
        )
    }

    fn asset_url(&self, url_base: &str, label: VariantLabel) -> String {
        format!("{}{url_base}_{label}.jpg", self.asset_base)
    }
}

#[async_trait]
impl ArchiveClient for HttpArchiveClient {
    async fn query(
        &self,
        region: &Region,
        idx: u8,
        count: u8,
    ) -> Result<Vec<ArchiveImage>, UpstreamError> {
        let url = self.listing_url(region, idx, count);
        debug!(%region, idx, count, "querying image archive");
        let response = self
            .http
            .get(&url)
            .send()
            .await?
            .error_for_status()?
            .json::<ArchiveResponse>()
            .await?;
        Ok(response.images)
    }

    async fn probe_native(&self, url_base: &str) -> Result<(String, VariantLabel), UpstreamError> {
        let uhd_url = self.asset_url(url_base, VariantLabel::Uhd);
        match self.http.head(&uhd_url).send().await {
            Ok(response) if response.status().is_success() => {
                return Ok((uhd_url, VariantLabel::Uhd));
            }
            Ok(response) => {
                debug!(status = %response.status(), url = %uhd_url, "no UHD asset");
            }
            Err(err) => {
                debug!(error = %err, url = %uhd_url, "UHD probe failed");
            }
        }

        Ok((
            self.asset_url(url_base, VariantLabel::R1920x1080),
            VariantLabel::R1920x1080,
        ))
    }

    async fn download(&self, url: &str) -> Result<Bytes, UpstreamError> {
        let bytes = self
            .http
            .get(url)
            .send()
            .await?
            .error_for_status()?
            .bytes()
            .await?;
        Ok(bytes)
    }
}
