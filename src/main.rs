//! vinyl-search: binary entrypoint.
//! Boots the Axum HTTP server, wires storage, collaborators and the ingest
//! scheduler from config + environment.

use anyhow::Context;
use shuttle_axum::ShuttleAxum;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use vinyl_search::api::{router, AppState};
use vinyl_search::catalog::{CatalogLookup, DiscogsClient, EbayClient, PriceLookup};
use vinyl_search::config::{AppConfig, BackendKind, Secrets};
use vinyl_search::ingest::fetch::FeedFetcher;
use vinyl_search::ingest::scheduler::spawn_scheduler;
use vinyl_search::metrics::Metrics;
use vinyl_search::store::memory::MemoryBackend;
use vinyl_search::store::upstash::UpstashBackend;
use vinyl_search::store::{ChunkedStore, KvBackend};

/// Compact logs by default, JSON when `LOG_FORMAT=json`.
fn init_tracing() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("vinyl_search=info,warn"));
    let json = std::env::var("LOG_FORMAT").is_ok_and(|v| v.eq_ignore_ascii_case("json"));

    let registry = tracing_subscriber::registry().with(filter);
    // Shuttle may already have installed a subscriber.
    let _ = if json {
        registry.with(fmt::layer().json()).try_init()
    } else {
        registry.with(fmt::layer().compact()).try_init()
    };
}

fn build_backend(cfg: &AppConfig, secrets: &Secrets) -> anyhow::Result<Arc<dyn KvBackend>> {
    let upstash = secrets.upstash();
    match (cfg.store.backend, upstash) {
        (BackendKind::Memory, _) | (BackendKind::Auto, None) => {
            tracing::warn!(target: "store", "using in-memory store; data is lost on restart");
            Ok(Arc::new(MemoryBackend::new()))
        }
        (BackendKind::Auto | BackendKind::Upstash, Some((url, token))) => {
            Ok(Arc::new(UpstashBackend::new(url, token)?))
        }
        (BackendKind::Upstash, None) => {
            anyhow::bail!("store.backend = \"upstash\" but UPSTASH_REDIS_REST_URL/TOKEN are unset")
        }
    }
}

async fn build_app() -> anyhow::Result<axum::Router> {
    let cfg = Arc::new(AppConfig::load_default().context("loading config")?);
    let secrets = Secrets::from_env();
    tracing::info!(?secrets, sources = cfg.enabled_sources().count(), "starting vinyl-search");

    let metrics = Metrics::init(&cfg)?;

    let backend = build_backend(&cfg, &secrets)?;
    let store = ChunkedStore::with_limits(backend, cfg.store.chunk_items, cfg.store.value_limit);

    let catalog: Option<Arc<dyn CatalogLookup>> = match secrets.discogs() {
        Some((key, secret)) => Some(Arc::new(DiscogsClient::new(key, secret)?)),
        None => {
            tracing::info!(target: "catalog", "discogs credentials unset; catalog lookups disabled");
            None
        }
    };
    let prices: Option<Arc<dyn PriceLookup>> = match secrets.ebay() {
        Some((id, secret)) => Some(Arc::new(EbayClient::new(id, secret)?)),
        None => {
            tracing::info!(target: "catalog", "ebay credentials unset; price enrichment disabled");
            None
        }
    };

    let mut state = AppState::build(cfg.clone(), store, catalog, prices)
        .with_cron_secret(secrets.cron_secret.clone());

    match secrets.awin_api_key.as_deref() {
        Some(key) => {
            state = state.with_ingest(key, FeedFetcher::new()?);
            if let Some(runner) = state.ingest() {
                spawn_scheduler(
                    runner.clone(),
                    Duration::from_secs(cfg.ingest.interval_secs),
                    cfg.ingest.run_on_start,
                );
            }
        }
        None => tracing::warn!(target: "ingest", "AWIN_API_KEY unset; ingestion disabled"),
    }

    Ok(router(state).merge(metrics.router()))
}

#[shuttle_runtime::main]
async fn axum() -> ShuttleAxum {
    // Load .env in local/dev; no-op in prod environments.
    let _ = dotenvy::dotenv();
    init_tracing();

    let app = build_app().await?;
    Ok(app.into())
}
