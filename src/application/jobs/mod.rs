//! Scheduled background work.

mod daily_fetch;

pub use daily_fetch::{
    DEFAULT_FETCH_SCHEDULE, DailyFetchJob, FetchJobContext, daily_fetch_schedule,
    process_daily_fetch_job,
};
