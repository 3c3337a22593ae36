//! HTTP surface: JSON API plus direct blob serving.

mod images;

use std::sync::Arc;

use axum::{Router, routing::get};

use crate::application::images::ImageService;
use crate::infra::db::PostgresRepositories;
use crate::infra::store::ObjectStore;

#[derive(Clone)]
pub struct HttpState {
    pub images: Arc<ImageService>,
    pub store: Arc<dyn ObjectStore>,
    pub db: Arc<PostgresRepositories>,
    pub default_region: crate::domain::region::Region,
}

pub fn router(state: HttpState) -> Router {
    Router::new()
        .route("/api/v1/today", get(images::today))
        .route("/api/v1/random", get(images::random))
        .route("/api/v1/images", get(images::list))
        .route("/api/v1/images/{date}", get(images::by_date))
        .route("/api/v1/regions", get(images::regions))
        .route("/api/v1/regions/today", get(images::regions_today))
        .route("/picture/{*key}", get(images::picture))
        .route("/healthz", get(images::health))
        .with_state(state)
}
