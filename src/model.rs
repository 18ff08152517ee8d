//! Core records shared by the ingest pipeline and the search path.
//!
//! `Product` is what a retailer feed produces and what the chunked store
//! persists. `CatalogEntry` comes from an external music database and carries
//! no price. `MergedListing` is the per-request view combining both.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Stock state of a retailer product.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Availability {
    #[serde(rename = "In Stock")]
    InStock,
    #[serde(rename = "Out of Stock")]
    OutOfStock,
}

/// A priced, purchasable record from one retailer feed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Product {
    pub artist: String,
    pub album: String,
    pub price: Decimal,
    pub currency: String,
    pub link: String,
    #[serde(default)]
    pub image: Option<String>,
    pub availability: Availability,
    pub source: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ean: Option<String>,
    /// Recommended retail price, kept only when above `price`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rrp: Option<Decimal>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub colour: Option<String>,
}

impl Product {
    pub fn key(&self) -> NormalizedKey {
        NormalizedKey::new(&self.artist, &self.album)
    }
}

/// An unpriced release known from an external catalog.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CatalogEntry {
    pub artist: String,
    pub album: String,
    pub year: Option<i32>,
    pub external_id: String,
    pub cover_url: Option<String>,
    #[serde(default)]
    pub catalog_url: Option<String>,
}

impl CatalogEntry {
    pub fn key(&self) -> NormalizedKey {
        NormalizedKey::new(&self.artist, &self.album)
    }
}

/// Case-folded `artist|||album` identity used for merge and dedup.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NormalizedKey(String);

impl NormalizedKey {
    pub const SEPARATOR: &'static str = "|||";

    pub fn new(artist: &str, album: &str) -> Self {
        Self(format!(
            "{}{}{}",
            fold(artist),
            Self::SEPARATOR,
            fold(album)
        ))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NormalizedKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Lowercase + collapse internal whitespace.
pub fn fold(s: &str) -> String {
    s.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// One way to buy a listing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BuyOption {
    pub store_name: String,
    pub source: String,
    pub price: Decimal,
    pub currency: String,
    pub link: String,
    pub availability: Availability,
}

/// Live marketplace price attached to a catalog-only listing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarketPrice {
    pub marketplace: String,
    pub price: Decimal,
    pub currency: String,
    #[serde(default)]
    pub link: Option<String>,
}

/// Response-time view of one release across all sources.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MergedListing {
    pub artist: String,
    pub album: String,
    pub cover_url: Option<String>,
    pub year: Option<i32>,
    pub buy_options: Vec<BuyOption>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub catalog_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub market_price: Option<MarketPrice>,
}

impl MergedListing {
    pub fn key(&self) -> NormalizedKey {
        NormalizedKey::new(&self.artist, &self.album)
    }

    pub fn is_priced(&self) -> bool {
        !self.buy_options.is_empty()
    }

    /// Lowest buy-option price, `None` for catalog-only listings.
    pub fn min_price(&self) -> Option<Decimal> {
        self.buy_options.iter().map(|o| o.price).min()
    }
}

/// Pointer record written after every chunk of a chunked collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkMetadata {
    /// Write generation; its chunks live under `key:{generation}:{i}`.
    #[serde(default)]
    pub generation: u64,
    pub chunk_count: usize,
    pub total_items: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn normalized_key_folds_case_and_whitespace() {
        let a = NormalizedKey::new("  Pink   Floyd", "The Dark Side Of The Moon ");
        let b = NormalizedKey::new("pink floyd", "the dark side of the moon");
        assert_eq!(a, b);
        assert_eq!(a.as_str(), "pink floyd|||the dark side of the moon");
    }

    #[test]
    fn product_json_uses_readable_availability() {
        let p = Product {
            artist: "Radiohead".into(),
            album: "OK Computer".into(),
            price: dec!(12.99),
            currency: "GBP".into(),
            link: "https://example.test/p".into(),
            image: None,
            availability: Availability::InStock,
            source: "emp".into(),
            ean: None,
            rrp: None,
            colour: None,
        };
        let json = serde_json::to_string(&p).unwrap();
        assert!(json.contains(r#""availability":"In Stock""#));
        let back: Product = serde_json::from_str(&json).unwrap();
        assert_eq!(back, p);
    }

    #[test]
    fn min_price_is_none_for_catalog_only() {
        let l = MergedListing {
            artist: "A".into(),
            album: "B".into(),
            cover_url: None,
            year: Some(1999),
            buy_options: vec![],
            external_id: None,
            catalog_url: None,
            market_price: None,
        };
        assert!(!l.is_priced());
        assert_eq!(l.min_price(), None);
    }
}
