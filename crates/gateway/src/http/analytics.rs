//! Moderator-only reporting surface over the view-event log.
//!
//! These endpoints are diagnostic reads; a failure here is returned to the
//! dashboard caller and never touches content serving.

use arkiv_contracts::period::{SeriesPreset, SeriesRange};
use arkiv_contracts::{DailyCount, OverviewTotals, PopularTarget};
use axum::Json;
use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode};
use chrono::{DateTime, NaiveDate, Utc};
use serde::Deserialize;

use super::{ApiError, AppState, json_error, observed, require_moderator, store_error};

pub(super) async fn overview(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<OverviewTotals>, ApiError> {
    let result = overview_inner(&state, &headers).await;
    observed("/v1/analytics/overview", result)
}

async fn overview_inner(
    state: &AppState,
    headers: &HeaderMap,
) -> Result<Json<OverviewTotals>, ApiError> {
    require_moderator(state, headers)?;

    let totals = state
        .store
        .overview_totals(Utc::now())
        .await
        .map_err(store_error)?;
    Ok(Json(totals))
}

pub(super) async fn popular(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<Vec<PopularTarget>>, ApiError> {
    let result = popular_inner(&state, &headers).await;
    observed("/v1/analytics/popular", result)
}

async fn popular_inner(
    state: &AppState,
    headers: &HeaderMap,
) -> Result<Json<Vec<PopularTarget>>, ApiError> {
    require_moderator(state, headers)?;

    let targets = state
        .store
        .popular_targets(state.config.popular_limit as i64)
        .await
        .map_err(store_error)?;
    Ok(Json(targets))
}

#[derive(Debug, Default, Deserialize)]
pub(super) struct ByDateParams {
    from: Option<String>,
    to: Option<String>,
    period: Option<String>,
}

pub(super) async fn by_date(
    State(state): State<AppState>,
    Query(params): Query<ByDateParams>,
    headers: HeaderMap,
) -> Result<Json<Vec<DailyCount>>, ApiError> {
    let result = by_date_inner(&state, &params, &headers).await;
    observed("/v1/analytics/by-date", result)
}

async fn by_date_inner(
    state: &AppState,
    params: &ByDateParams,
    headers: &HeaderMap,
) -> Result<Json<Vec<DailyCount>>, ApiError> {
    require_moderator(state, headers)?;

    let range = resolve_series_range(params, Utc::now())?;
    let series = state.store.daily_counts(&range).await.map_err(store_error)?;
    Ok(Json(series))
}

/// Explicit `from`/`to` dates win over the `period` preset; an unrecognized
/// preset falls back to the default 30-day window.
fn resolve_series_range(
    params: &ByDateParams,
    now: DateTime<Utc>,
) -> Result<SeriesRange, ApiError> {
    let from = params.from.as_deref().map(parse_date).transpose()?;
    let to = params.to.as_deref().map(parse_date).transpose()?;

    if let Some(from) = from {
        let to = to.unwrap_or_else(|| now.date_naive());
        if from > to {
            return Err(json_error(
                StatusCode::BAD_REQUEST,
                "ERR_INVALID_RANGE",
                "from date is after to date",
            ));
        }
        return Ok(SeriesRange::dates(from, to));
    }

    let preset = params
        .period
        .as_deref()
        .and_then(SeriesPreset::parse)
        .unwrap_or_default();
    let end = match to {
        Some(date) => SeriesRange::dates(date, date).to,
        None => now,
    };
    Ok(SeriesRange::preset(preset, end))
}

fn parse_date(raw: &str) -> Result<NaiveDate, ApiError> {
    NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d").map_err(|_| {
        json_error(
            StatusCode::BAD_REQUEST,
            "ERR_INVALID_RANGE",
            "dates must be formatted YYYY-MM-DD",
        )
    })
}
