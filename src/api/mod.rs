//! REST API for the committed indicator set
//!
//! Read-only access keyed by id or value, plus run statistics and the
//! refresh trigger. All mutation happens through the pipeline run.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde_json::{json, Value};
use validator::Validate;

use crate::collectors::{poll_all, FeedCollector};
use crate::models::{Ioc, IocFilter, Paginated, RawRecord, RunResult};
use crate::normalize::canonicalize;
use crate::pipeline::{CancelToken, Pipeline};
use crate::storage::IocStore;

/// Application state shared across handlers
pub struct AppState {
    pub store: Arc<dyn IocStore>,
    pub pipeline: Arc<Pipeline>,
    pub collectors: Vec<Arc<dyn FeedCollector>>,
}

/// Fetch every feed, run the pipeline against the prior committed set, and
/// persist the result. Shared by the refresh endpoint and the scheduler.
pub async fn run_refresh(state: &AppState) -> anyhow::Result<RunResult> {
    let polls = poll_all(&state.collectors).await;
    let mut batches: BTreeMap<String, Vec<RawRecord>> = BTreeMap::new();
    for poll in polls {
        if let Some(ref error) = poll.error {
            tracing::warn!(feed = %poll.feed_id, error = %error, "feed degraded for this run");
        }
        batches.insert(poll.feed_id, poll.records);
    }

    let prior = state.store.load().await?;
    let result = state
        .pipeline
        .run(batches, &prior.iocs, &CancelToken::new())
        .await?;
    state.store.commit(&result.iocs, &result.stats).await?;
    Ok(result)
}

/// Create the API router
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/api/v1/iocs", get(list_iocs))
        .route("/api/v1/iocs/:id", get(get_ioc))
        .route("/api/v1/lookup", get(lookup_ioc))
        .route("/api/v1/stats", get(get_stats))
        .route("/api/v1/refresh", post(refresh))
        .with_state(state)
}

// ==================== Handlers ====================

type ApiError = (StatusCode, Json<Value>);

fn internal_error(err: impl std::fmt::Display) -> ApiError {
    tracing::error!(error = %err, "request failed");
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({ "error": err.to_string() })),
    )
}

async fn health_check() -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "service": "iocsift",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

async fn list_iocs(
    State(state): State<Arc<AppState>>,
    Query(filter): Query<IocFilter>,
) -> Result<Json<Paginated<Ioc>>, ApiError> {
    filter.validate().map_err(|e| {
        (
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": e.to_string() })),
        )
    })?;

    let set = state.store.load().await.map_err(internal_error)?;
    let matches: Vec<Ioc> = set
        .iocs
        .into_iter()
        .filter(|ioc| filter.ioc_type.map_or(true, |t| ioc.ioc_type == t))
        .filter(|ioc| {
            filter
                .source
                .as_deref()
                .map_or(true, |source| ioc.has_source(source))
        })
        .filter(|ioc| {
            filter
                .min_confidence
                .map_or(true, |min| ioc.confidence >= min)
        })
        .collect();

    let page = filter.page.unwrap_or(1).max(1);
    let per_page = filter.per_page.unwrap_or(50);
    let total = matches.len();
    let total_pages = total.div_ceil(per_page).max(1);
    let data: Vec<Ioc> = matches
        .into_iter()
        .skip((page - 1) * per_page)
        .take(per_page)
        .collect();

    Ok(Json(Paginated {
        data,
        total,
        page,
        per_page,
        total_pages,
    }))
}

async fn get_ioc(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<Ioc>, ApiError> {
    let set = state.store.load().await.map_err(internal_error)?;
    set.iocs
        .into_iter()
        .find(|ioc| ioc.id == id)
        .map(Json)
        .ok_or_else(|| {
            (
                StatusCode::NOT_FOUND,
                Json(json!({ "error": "indicator not found" })),
            )
        })
}

async fn lookup_ioc(
    State(state): State<Arc<AppState>>,
    Query(params): Query<HashMap<String, String>>,
) -> Result<Json<Value>, ApiError> {
    let value = params.get("value").ok_or_else(|| {
        (
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": "missing 'value' parameter" })),
        )
    })?;

    let set = state.store.load().await.map_err(internal_error)?;
    let found = match canonicalize(value) {
        Some((_, canonical)) => set.iocs.into_iter().find(|ioc| ioc.value == canonical),
        None => set.iocs.into_iter().find(|ioc| &ioc.value == value),
    };

    match found {
        Some(ioc) => Ok(Json(json!({ "found": true, "indicator": ioc }))),
        None => Ok(Json(json!({ "found": false, "value": value }))),
    }
}

async fn get_stats(State(state): State<Arc<AppState>>) -> Result<Json<Value>, ApiError> {
    let set = state.store.load().await.map_err(internal_error)?;
    let history = state.store.stats_history().await.map_err(internal_error)?;

    let mut by_type: BTreeMap<String, usize> = BTreeMap::new();
    let mut by_source: BTreeMap<String, usize> = BTreeMap::new();
    for ioc in &set.iocs {
        *by_type.entry(ioc.ioc_type.to_string()).or_default() += 1;
        for source in &ioc.sources {
            *by_source.entry(source.name.clone()).or_default() += 1;
        }
    }

    Ok(Json(json!({
        "total_iocs": set.total_iocs,
        "last_updated": set.last_updated,
        "by_type": by_type,
        "by_source": by_source,
        "last_run": history.last(),
    })))
}

async fn refresh(State(state): State<Arc<AppState>>) -> Result<Json<Value>, ApiError> {
    let result = run_refresh(&state).await.map_err(internal_error)?;
    Ok(Json(json!({
        "run_id": result.run_id,
        "committed": result.iocs.len(),
        "rejected": result.errors.len(),
        "feeds": result.stats.feeds,
    })))
}
