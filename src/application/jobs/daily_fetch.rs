//! Cron job running the scheduled acquisition pass and retention sweep.

use std::str::FromStr;
use std::sync::Arc;

use apalis::prelude::*;
use apalis_cron::Schedule;
use chrono::Utc;

use crate::application::fetcher::{FetchOptions, Fetcher};
use crate::application::retention::RetentionCollector;

/// Six-field cron expression: at minute 20 of every fourth hour between
/// 08:00 and 23:00, covering the upstream's typical publication window.
pub const DEFAULT_FETCH_SCHEDULE: &str = "0 20 8-23/4 * * *";

/// Marker struct for the cron-triggered acquisition job.
/// Must implement `From<chrono::DateTime<chrono::Utc>>` for apalis-cron.
#[derive(Default, Debug, Clone)]
pub struct DailyFetchJob;

impl From<chrono::DateTime<chrono::Utc>> for DailyFetchJob {
    fn from(_: chrono::DateTime<chrono::Utc>) -> Self {
        Self
    }
}

/// Context for the acquisition job worker.
#[derive(Clone)]
pub struct FetchJobContext {
    pub fetcher: Arc<Fetcher>,
    pub retention: Arc<RetentionCollector>,
    pub options: Arc<FetchOptions>,
    pub retention_days: u32,
}

/// Process one scheduled pass: acquire every configured region, then sweep
/// expired records. Region failures are logged inside the fetcher; the sweep
/// runs regardless.
pub async fn process_daily_fetch_job(
    _job: DailyFetchJob,
    ctx: Data<FetchJobContext>,
) -> Result<(), apalis::prelude::Error> {
    ctx.fetcher.fetch_all(&ctx.options).await;

    match ctx
        .retention
        .collect(Utc::now().date_naive(), ctx.retention_days)
        .await
    {
        Ok(removed) if removed > 0 => {
            tracing::info!(removed, "retention sweep removed expired images");
        }
        Err(err) => {
            tracing::warn!(error = %err, "retention sweep failed");
        }
        _ => {}
    }

    Ok(())
}

/// Parse the configured cron expression, falling back to the default when
/// none is configured.
pub fn daily_fetch_schedule(
    expression: Option<&str>,
) -> Result<Schedule, <Schedule as FromStr>::Err> {
    Schedule::from_str(expression.unwrap_or(DEFAULT_FETCH_SCHEDULE))
}
