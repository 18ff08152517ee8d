use std::collections::HashMap;
use std::sync::Arc;

use axum::{
    extract::{Query, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use serde_json::json;
use tower_http::cors::CorsLayer;

use crate::autocomplete::{Autocomplete, AutocompleteResponse};
use crate::catalog::{CatalogLookup, PriceLookup};
use crate::config::AppConfig;
use crate::deals::{find_deals, DealParams, DealsResponse};
use crate::error::{SearchError, StoreError};
use crate::ingest::fetch::FeedFetcher;
use crate::ingest::scheduler::IngestRunner;
use crate::ingest::{IngestReport, UPDATED_KEY};
use crate::search::{CatalogSource, SearchAggregator, SearchResponse, StoreNames, StoredFeedSource};
use crate::store::ChunkedStore;

#[derive(Clone)]
pub struct AppState {
    cfg: Arc<AppConfig>,
    store: ChunkedStore,
    names: Arc<StoreNames>,
    feeds: Arc<Vec<Arc<StoredFeedSource>>>,
    search: Arc<SearchAggregator>,
    autocomplete: Arc<Autocomplete>,
    ingest: Option<Arc<IngestRunner>>,
    cron_secret: Option<String>,
}

impl AppState {
    /// Wire the query side: one cached feed per enabled source, plus the
    /// optional catalog and marketplace collaborators.
    pub fn build(
        cfg: Arc<AppConfig>,
        store: ChunkedStore,
        catalog: Option<Arc<dyn CatalogLookup>>,
        prices: Option<Arc<dyn PriceLookup>>,
    ) -> Self {
        let names: StoreNames = cfg
            .sources
            .iter()
            .map(|s| (s.name.clone(), s.store_name.clone()))
            .collect();
        let feeds: Vec<Arc<StoredFeedSource>> = cfg
            .enabled_sources()
            .map(|s| {
                Arc::new(StoredFeedSource::new(
                    &s.name,
                    &s.store_key(),
                    store.clone(),
                    cfg.search.feed_cache_ttl(),
                ))
            })
            .collect();

        let mut search = SearchAggregator::new(cfg.search.clone(), names.clone());
        for feed in &feeds {
            search = search.with_source(feed.clone());
        }
        let mut autocomplete = Autocomplete::new(feeds.clone(), cfg.search.source_timeout());
        if let Some(catalog) = catalog {
            search = search.with_source(Arc::new(CatalogSource::new(catalog.clone())));
            autocomplete = autocomplete.with_catalog(catalog);
        }
        if let Some(prices) = prices {
            search = search.with_prices(prices);
        }

        Self {
            cfg,
            store,
            names: Arc::new(names),
            feeds: Arc::new(feeds),
            search: Arc::new(search),
            autocomplete: Arc::new(autocomplete),
            ingest: None,
            cron_secret: None,
        }
    }

    /// Enable ingestion (scheduler and `/admin/refresh`). Every run drops the
    /// feed caches so queries see fresh data.
    pub fn with_ingest(mut self, api_key: &str, fetcher: FeedFetcher) -> Self {
        let feeds = self.feeds.clone();
        let runner = IngestRunner::new(self.cfg.clone(), api_key, fetcher, self.store.clone())
            .on_report(move |_| feeds.iter().for_each(|f| f.invalidate()));
        self.ingest = Some(Arc::new(runner));
        self
    }

    pub fn with_cron_secret(mut self, secret: Option<String>) -> Self {
        self.cron_secret = secret;
        self
    }

    pub fn ingest(&self) -> Option<&Arc<IngestRunner>> {
        self.ingest.as_ref()
    }
}

#[derive(Debug)]
pub enum ApiError {
    Search(SearchError),
    Unauthorized,
    Unavailable(&'static str),
    Internal(anyhow::Error),
}

impl From<SearchError> for ApiError {
    fn from(e: SearchError) -> Self {
        ApiError::Search(e)
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(e: anyhow::Error) -> Self {
        ApiError::Internal(e)
    }
}

impl From<StoreError> for ApiError {
    fn from(e: StoreError) -> Self {
        ApiError::Internal(e.into())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, body) = match self {
            ApiError::Search(e @ SearchError::InvalidQuery(_)) => (
                StatusCode::BAD_REQUEST,
                json!({ "error": "invalid_query", "message": e.to_string() }),
            ),
            ApiError::Search(e @ SearchError::AllSourcesFailed(_)) => (
                StatusCode::BAD_GATEWAY,
                json!({ "error": "upstream_unavailable", "message": e.to_string() }),
            ),
            ApiError::Unauthorized => (StatusCode::UNAUTHORIZED, json!({ "error": "unauthorized" })),
            ApiError::Unavailable(what) => (
                StatusCode::SERVICE_UNAVAILABLE,
                json!({ "error": "unavailable", "message": what }),
            ),
            ApiError::Internal(e) => {
                tracing::error!(error = ?e, "request failed");
                (StatusCode::INTERNAL_SERVER_ERROR, json!({ "error": "internal" }))
            }
        };
        (status, Json(body)).into_response()
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(|| async { "OK" }))
        .route("/search", get(search))
        .route("/autocomplete", get(autocomplete))
        .route("/deals", get(deals))
        .route("/feed/status", get(feed_status))
        .route("/admin/refresh", post(admin_refresh))
        .layer(CorsLayer::very_permissive())
        .with_state(state)
}

fn param<'a>(q: &'a HashMap<String, String>, key: &str) -> &'a str {
    q.get(key).map(String::as_str).unwrap_or_default()
}

async fn search(
    State(state): State<AppState>,
    Query(q): Query<HashMap<String, String>>,
) -> Result<Json<SearchResponse>, ApiError> {
    Ok(Json(state.search.search(param(&q, "q")).await?))
}

async fn autocomplete(
    State(state): State<AppState>,
    Query(q): Query<HashMap<String, String>>,
) -> Result<Json<AutocompleteResponse>, ApiError> {
    Ok(Json(state.autocomplete.suggest(param(&q, "q")).await?))
}

async fn deals(
    State(state): State<AppState>,
    Query(q): Query<HashMap<String, String>>,
) -> Result<Json<DealsResponse>, ApiError> {
    let params = DealParams::from_query(&q);
    let mut products = Vec::new();
    for feed in state.feeds.iter() {
        match feed.products().await {
            Ok(items) => products.push(items),
            Err(e) => tracing::warn!(target: "store", source = feed.source(), error = ?e, "feed unavailable for deals"),
        }
    }
    let updated = state.store.read_timestamp(UPDATED_KEY).await?;
    Ok(Json(find_deals(
        products.iter().flat_map(|items| items.iter()),
        &state.names,
        &params,
        updated,
    )))
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SourceInfo {
    name: String,
    store_name: String,
    enabled: bool,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct FeedStatus {
    updated: Option<chrono::DateTime<chrono::Utc>>,
    ingest_enabled: bool,
    last_run: Option<IngestReport>,
    sources: Vec<SourceInfo>,
}

async fn feed_status(State(state): State<AppState>) -> Result<Json<FeedStatus>, ApiError> {
    let updated = state.store.read_timestamp(UPDATED_KEY).await?;
    Ok(Json(FeedStatus {
        updated,
        ingest_enabled: state.ingest.is_some(),
        last_run: state.ingest.as_ref().and_then(|r| r.last_report()),
        sources: state
            .cfg
            .sources
            .iter()
            .map(|s| SourceInfo {
                name: s.name.clone(),
                store_name: s.store_name.clone(),
                enabled: s.enabled,
            })
            .collect(),
    }))
}

fn authorized(headers: &HeaderMap, secret: Option<&str>) -> bool {
    let Some(secret) = secret else {
        return true;
    };
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .is_some_and(|token| token.trim() == secret)
}

async fn admin_refresh(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<IngestReport>, ApiError> {
    if !authorized(&headers, state.cron_secret.as_deref()) {
        tracing::warn!(target: "ingest", "refresh rejected: bad or missing bearer token");
        return Err(ApiError::Unauthorized);
    }
    let runner = state
        .ingest
        .as_ref()
        .ok_or(ApiError::Unavailable("ingestion is not configured"))?;
    Ok(Json(runner.run().await))
}
