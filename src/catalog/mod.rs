// src/catalog/mod.rs
//! External collaborators consulted at query time: a music catalog for
//! unpriced releases and a marketplace for live prices.

pub mod discogs;
pub mod ebay;
pub mod token;

use async_trait::async_trait;
use metrics::describe_counter;
use once_cell::sync::OnceCell;

use crate::model::{CatalogEntry, MarketPrice};

pub use discogs::DiscogsClient;
pub use ebay::EbayClient;
pub use token::{ClientCredentialsTokens, TokenProvider};

pub(crate) fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!(
            "catalog_rate_limited_total",
            "Catalog/marketplace calls answered with HTTP 429."
        );
        describe_counter!(
            "catalog_token_refresh_total",
            "Client-credentials token exchanges."
        );
    });
}

#[async_trait]
pub trait CatalogLookup: Send + Sync {
    fn name(&self) -> &str;

    /// Releases matching `term`. Rate limiting yields an empty list.
    async fn search(&self, term: &str) -> anyhow::Result<Vec<CatalogEntry>>;

    /// Artist names for autocomplete.
    async fn suggest_artists(&self, term: &str) -> anyhow::Result<Vec<String>>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PriceRequest {
    pub external_id: Option<String>,
    pub artist: String,
    pub album: String,
}

#[async_trait]
pub trait PriceLookup: Send + Sync {
    fn name(&self) -> &str;

    /// Cheapest live offer, `None` when the marketplace has nothing.
    async fn price_for(&self, req: &PriceRequest, currency: &str) -> anyhow::Result<Option<MarketPrice>>;
}
