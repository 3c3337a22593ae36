//! API handlers for image lookups and blob serving.

use axum::{
    Json,
    extract::{Path, Query, State},
    http::{StatusCode, header},
    response::{IntoResponse, Response},
};
use chrono::NaiveDate;
use serde::Deserialize;
use serde_json::json;
use tracing::warn;

use crate::application::error::AppError;
use crate::application::images::Lookup;
use crate::domain::region::KNOWN_REGIONS;
use crate::infra::store::StoreError;

use super::HttpState;

const DEFAULT_PAGE_SIZE: u32 = 30;
const MAX_PAGE_SIZE: u32 = 100;

#[derive(Debug, Deserialize)]
pub struct RegionQuery {
    region: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    region: Option<String>,
    month: Option<String>,
    limit: Option<u32>,
    offset: Option<u32>,
}

fn lookup_response(lookup: Lookup) -> Response {
    match lookup {
        Lookup::Found(image) => Json(image).into_response(),
        Lookup::FetchStarted => (
            StatusCode::ACCEPTED,
            Json(json!({
                "status": "fetching",
                "message": "image acquisition started, retry shortly"
            })),
        )
            .into_response(),
        Lookup::NotFound => AppError::NotFound.into_response(),
        Lookup::InvalidRegion => AppError::validation("unknown region code").into_response(),
    }
}

pub async fn today(
    State(state): State<HttpState>,
    Query(query): Query<RegionQuery>,
) -> Result<Response, AppError> {
    let region = query
        .region
        .unwrap_or_else(|| state.default_region.as_str().to_string());
    let lookup = state.images.get_today(&region).await?;
    Ok(lookup_response(lookup))
}

pub async fn by_date(
    State(state): State<HttpState>,
    Path(date): Path<String>,
    Query(query): Query<RegionQuery>,
) -> Result<Response, AppError> {
    let date = parse_date(&date)?;
    let region = query
        .region
        .unwrap_or_else(|| state.default_region.as_str().to_string());
    let lookup = state.images.get_by_date(date, &region).await?;
    Ok(lookup_response(lookup))
}

pub async fn random(
    State(state): State<HttpState>,
    Query(query): Query<RegionQuery>,
) -> Result<Response, AppError> {
    let region = query
        .region
        .unwrap_or_else(|| state.default_region.as_str().to_string());
    let lookup = state.images.get_random(&region).await?;
    Ok(lookup_response(lookup))
}

pub async fn list(
    State(state): State<HttpState>,
    Query(query): Query<ListQuery>,
) -> Result<Response, AppError> {
    let region = query
        .region
        .unwrap_or_else(|| state.default_region.as_str().to_string());
    let limit = query.limit.unwrap_or(DEFAULT_PAGE_SIZE).min(MAX_PAGE_SIZE);
    let offset = query.offset.unwrap_or(0);

    let Some(images) = state
        .images
        .list_images(&region, query.month, limit, offset)
        .await?
    else {
        return Err(AppError::validation("unknown region code"));
    };

    Ok(Json(json!({
        "images": images,
        "limit": limit,
        "offset": offset,
    }))
    .into_response())
}

pub async fn regions() -> Response {
    Json(json!({ "regions": KNOWN_REGIONS })).into_response()
}

pub async fn regions_today(State(state): State<HttpState>) -> Result<Response, AppError> {
    let images = state.images.today_across_regions().await?;
    Ok(Json(json!({ "images": images })).into_response())
}

/// Serve a stored blob directly. The content type follows the key's
/// extension.
pub async fn picture(
    State(state): State<HttpState>,
    Path(key): Path<String>,
) -> Result<Response, AppError> {
    match state.store.get(&key).await {
        Ok(data) => {
            let mime = mime_guess::from_path(&key).first_or_octet_stream();
            Ok((
                [(header::CONTENT_TYPE, mime.essence_str().to_string())],
                data,
            )
                .into_response())
        }
        Err(StoreError::NotFound { .. }) => Err(AppError::NotFound),
        Err(StoreError::InvalidKey { .. }) => Err(AppError::validation("invalid picture key")),
        Err(err) => {
            warn!(%key, error = %err, "blob read failed");
            Err(AppError::unexpected("blob read failed"))
        }
    }
}

pub async fn health(State(state): State<HttpState>) -> Response {
    match state.db.health_check().await {
        Ok(()) => (StatusCode::OK, "ok").into_response(),
        Err(err) => {
            warn!(error = %err, "health check failed");
            (StatusCode::SERVICE_UNAVAILABLE, "database unavailable").into_response()
        }
    }
}

fn parse_date(raw: &str) -> Result<NaiveDate, AppError> {
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .or_else(|_| NaiveDate::parse_from_str(raw, "%Y%m%d"))
        .map_err(|_| AppError::validation(format!("unparseable date `{raw}`")))
}
