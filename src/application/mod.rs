pub mod error;
pub mod fetcher;
pub mod images;
pub mod inflight;
pub mod jobs;
pub mod planner;
pub mod repos;
pub mod retention;

#[cfg(test)]
pub mod testing;
