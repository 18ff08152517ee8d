// src/search/mod.rs
//! Query-time aggregation: concurrent candidate retrieval, relevance filter,
//! merge, ranking and optional price enrichment.

pub mod enrich;
pub mod matcher;
pub mod merge;

use async_trait::async_trait;
use futures_util::future::join_all;
use metrics::{counter, describe_counter, describe_histogram, histogram};
use once_cell::sync::OnceCell;
use parking_lot::Mutex;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::catalog::{CatalogLookup, PriceLookup};
use crate::config::SearchCfg;
use crate::error::SearchError;
use crate::model::{fold, CatalogEntry, MergedListing, Product};
use crate::store::ChunkedStore;

pub use enrich::{enrich, EnrichStats};
pub use matcher::{MatchConfig, Matcher, Query, QueryShape};
pub use merge::{merge, rank, StoreNames};

fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!("search_requests_total", "Search requests with a valid query.");
        describe_counter!(
            "search_source_unavailable_total",
            "Candidate sources that failed or timed out during a search."
        );
        describe_counter!(
            "search_enrichment_failed_total",
            "Marketplace price lookups that failed or timed out."
        );
        describe_histogram!("search_latency_ms", "End-to-end search latency in milliseconds.");
    });
}

/// Short stable id for a query, so logs can correlate without the raw text.
pub fn query_id(normalized: &str) -> String {
    Sha256::digest(normalized.as_bytes())
        .iter()
        .take(4)
        .map(|b| format!("{b:02x}"))
        .collect()
}

pub enum Candidates {
    Products(Vec<Product>),
    Catalog(Vec<CatalogEntry>),
}

#[async_trait]
pub trait CandidateSource: Send + Sync {
    fn name(&self) -> &str;
    async fn candidates(&self, q: &Query) -> anyhow::Result<Candidates>;
}

/// A retailer collection read from the chunked store, cached for `ttl`.
pub struct StoredFeedSource {
    source: String,
    key: String,
    store: ChunkedStore,
    ttl: Duration,
    cache: Mutex<Option<(Instant, Arc<Vec<Product>>)>>,
}

impl StoredFeedSource {
    pub fn new(source: &str, key: &str, store: ChunkedStore, ttl: Duration) -> Self {
        Self {
            source: source.to_string(),
            key: key.to_string(),
            store,
            ttl,
            cache: Mutex::new(None),
        }
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    /// Whole collection, from cache while fresh.
    pub async fn products(&self) -> anyhow::Result<Arc<Vec<Product>>> {
        let cached = self
            .cache
            .lock()
            .as_ref()
            .filter(|(at, _)| at.elapsed() < self.ttl)
            .map(|(_, items)| items.clone());
        if let Some(items) = cached {
            return Ok(items);
        }
        let items = Arc::new(self.store.read(&self.key).await?);
        *self.cache.lock() = Some((Instant::now(), items.clone()));
        tracing::debug!(target: "search", source = %self.source, items = items.len(), "feed cache filled");
        Ok(items)
    }

    /// Drop the cached copy, e.g. after a refresh.
    pub fn invalidate(&self) {
        *self.cache.lock() = None;
    }
}

#[async_trait]
impl CandidateSource for StoredFeedSource {
    fn name(&self) -> &str {
        &self.source
    }

    /// Cheap containment prefilter; the relevance filter runs later.
    async fn candidates(&self, q: &Query) -> anyhow::Result<Candidates> {
        let all = self.products().await?;
        let terms: Vec<&str> = q
            .normalized()
            .strip_prefix("the ")
            .unwrap_or(q.normalized())
            .split(' ')
            .collect();
        let hits = all
            .iter()
            .filter(|p| {
                let text = fold(&format!("{} {}", p.artist, p.album));
                terms.iter().all(|t| text.contains(t))
            })
            .cloned()
            .collect();
        Ok(Candidates::Products(hits))
    }
}

pub struct CatalogSource {
    lookup: Arc<dyn CatalogLookup>,
}

impl CatalogSource {
    pub fn new(lookup: Arc<dyn CatalogLookup>) -> Self {
        Self { lookup }
    }
}

#[async_trait]
impl CandidateSource for CatalogSource {
    fn name(&self) -> &str {
        self.lookup.name()
    }

    async fn candidates(&self, q: &Query) -> anyhow::Result<Candidates> {
        Ok(Candidates::Catalog(self.lookup.search(q.raw()).await?))
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SearchResponse {
    pub query: String,
    /// Listings found before the display cap.
    pub total: usize,
    pub results: Vec<MergedListing>,
}

pub struct SearchAggregator {
    sources: Vec<Arc<dyn CandidateSource>>,
    prices: Option<Arc<dyn PriceLookup>>,
    matcher: Matcher,
    names: StoreNames,
    cfg: SearchCfg,
}

impl SearchAggregator {
    pub fn new(cfg: SearchCfg, names: StoreNames) -> Self {
        Self {
            sources: Vec::new(),
            prices: None,
            matcher: Matcher::new(cfg.matching.clone()),
            names,
            cfg,
        }
    }

    pub fn with_source(mut self, source: Arc<dyn CandidateSource>) -> Self {
        self.sources.push(source);
        self
    }

    pub fn with_prices(mut self, prices: Arc<dyn PriceLookup>) -> Self {
        self.prices = Some(prices);
        self
    }

    pub fn matcher(&self) -> &Matcher {
        &self.matcher
    }

    pub async fn search(&self, raw: &str) -> Result<SearchResponse, SearchError> {
        ensure_metrics_described();
        let started = Instant::now();
        let q = Query::parse(raw)?;
        let qid = query_id(q.normalized());
        counter!("search_requests_total").increment(1);

        let timeout = self.cfg.source_timeout();
        let lookups = self.sources.iter().map(|s| {
            let q = &q;
            async move { (s.name().to_string(), tokio::time::timeout(timeout, s.candidates(q)).await) }
        });

        let mut products = Vec::new();
        let mut entries = Vec::new();
        let mut failed = 0usize;
        for (name, res) in join_all(lookups).await {
            match res {
                Ok(Ok(Candidates::Products(p))) => products.extend(p),
                Ok(Ok(Candidates::Catalog(c))) => entries.extend(c),
                Ok(Err(e)) => {
                    failed += 1;
                    counter!("search_source_unavailable_total", "source" => name.clone()).increment(1);
                    tracing::warn!(target: "search", %qid, source = %name, error = ?e, "source unavailable");
                }
                Err(_) => {
                    failed += 1;
                    counter!("search_source_unavailable_total", "source" => name.clone()).increment(1);
                    tracing::warn!(target: "search", %qid, source = %name, ?timeout, "source timed out");
                }
            }
        }
        if !self.sources.is_empty() && failed == self.sources.len() {
            return Err(SearchError::AllSourcesFailed(failed));
        }

        products.retain(|p| self.matcher.is_relevant(&q, &p.artist, &p.album));
        entries.retain(|e| self.matcher.is_relevant(&q, &e.artist, &e.album));
        let (n_products, n_entries) = (products.len(), entries.len());

        let mut listings = merge(products, entries, &self.names);
        rank(&mut listings);
        let total = listings.len();
        listings.truncate(self.cfg.result_cap);

        let enriched = match &self.prices {
            Some(prices) if self.cfg.enrich_top_n > 0 => {
                enrich(
                    &mut listings,
                    prices.as_ref(),
                    self.cfg.enrich_top_n,
                    self.cfg.enrich_timeout(),
                    &self.cfg.currency,
                )
                .await
            }
            _ => EnrichStats::default(),
        };

        let ms = started.elapsed().as_secs_f64() * 1000.0;
        histogram!("search_latency_ms").record(ms);
        tracing::info!(
            target: "search",
            %qid,
            shape = ?q.shape(),
            products = n_products,
            catalog = n_entries,
            total,
            failed_sources = failed,
            priced = enriched.priced,
            ms,
            "search done"
        );

        Ok(SearchResponse {
            query: q.raw().to_string(),
            total,
            results: listings,
        })
    }
}
