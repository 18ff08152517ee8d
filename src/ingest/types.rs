// src/ingest/types.rs
use crate::error::SchemaError;
use crate::ingest::csv_stream::{CsvRecord, Header};
use crate::ingest::normalize::Rejection;
use crate::model::Product;

/// Columns requested from the feed provider, in request order.
pub const FEED_COLUMNS: &[&str] = &[
    "aw_deep_link",
    "product_name",
    "search_price",
    "merchant_name",
    "merchant_category",
    "merchant_image_url",
    "aw_image_url",
    "brand_name",
    "in_stock",
    "ean",
    "colour",
    "merchant_deep_link",
    "currency",
    "rrp_price",
    "product_type",
    "description",
];

/// A feed record after header validation. Empty cells are `None`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FeedRow {
    pub product_name: String,
    pub search_price: String,
    pub brand_name: Option<String>,
    pub merchant_name: Option<String>,
    pub merchant_category: Option<String>,
    pub product_type: Option<String>,
    pub description: Option<String>,
    pub in_stock: Option<String>,
    pub currency: Option<String>,
    pub aw_deep_link: Option<String>,
    pub merchant_deep_link: Option<String>,
    pub merchant_image_url: Option<String>,
    pub aw_image_url: Option<String>,
    pub ean: Option<String>,
    pub colour: Option<String>,
    pub rrp_price: Option<String>,
}

/// Header positions resolved once per feed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnMap {
    product_name: usize,
    search_price: usize,
    brand_name: Option<usize>,
    merchant_name: Option<usize>,
    merchant_category: Option<usize>,
    product_type: Option<usize>,
    description: Option<usize>,
    in_stock: Option<usize>,
    currency: Option<usize>,
    aw_deep_link: Option<usize>,
    merchant_deep_link: Option<usize>,
    merchant_image_url: Option<usize>,
    aw_image_url: Option<usize>,
    ean: Option<usize>,
    colour: Option<usize>,
    rrp_price: Option<usize>,
}

impl ColumnMap {
    /// Validate `header` against the expected columns. Returns the map plus the
    /// requested optional columns the feed did not deliver (schema drift).
    pub fn resolve(header: &Header) -> Result<(Self, Vec<&'static str>), SchemaError> {
        let required = |name: &'static str| {
            header
                .position(name)
                .ok_or(SchemaError::MissingColumn(name))
        };
        let product_name = required("product_name")?;
        let search_price = required("search_price")?;

        let missing = FEED_COLUMNS
            .iter()
            .copied()
            .filter(|c| header.position(c).is_none())
            .collect();

        let map = Self {
            product_name,
            search_price,
            brand_name: header.position("brand_name"),
            merchant_name: header.position("merchant_name"),
            merchant_category: header.position("merchant_category"),
            product_type: header.position("product_type"),
            description: header.position("description"),
            in_stock: header.position("in_stock"),
            currency: header.position("currency"),
            aw_deep_link: header.position("aw_deep_link"),
            merchant_deep_link: header.position("merchant_deep_link"),
            merchant_image_url: header.position("merchant_image_url"),
            aw_image_url: header.position("aw_image_url"),
            ean: header.position("ean"),
            colour: header.position("colour"),
            rrp_price: header.position("rrp_price"),
        };
        Ok((map, missing))
    }

    pub fn row(&self, rec: &CsvRecord) -> FeedRow {
        let opt = |idx: Option<usize>| {
            idx.and_then(|i| rec.field(i))
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
        };
        FeedRow {
            product_name: rec.field(self.product_name).unwrap_or_default().trim().to_string(),
            search_price: rec.field(self.search_price).unwrap_or_default().trim().to_string(),
            brand_name: opt(self.brand_name),
            merchant_name: opt(self.merchant_name),
            merchant_category: opt(self.merchant_category),
            product_type: opt(self.product_type),
            description: opt(self.description),
            in_stock: opt(self.in_stock),
            currency: opt(self.currency),
            aw_deep_link: opt(self.aw_deep_link),
            merchant_deep_link: opt(self.merchant_deep_link),
            merchant_image_url: opt(self.merchant_image_url),
            aw_image_url: opt(self.aw_image_url),
            ean: opt(self.ean),
            colour: opt(self.colour),
            rrp_price: opt(self.rrp_price),
        }
    }
}

/// Per-retailer conversion of a feed row into a product.
///
/// Implementations must be pure: the same row always yields the same result.
pub trait SourceNormalizer: Send + Sync {
    /// Retailer id, used in store keys and `Product::source`.
    fn source(&self) -> &str;

    /// Full outcome, with the reason a row was turned away.
    fn evaluate(&self, row: &FeedRow) -> Result<Product, Rejection>;

    fn normalize(&self, row: &FeedRow) -> Option<Product> {
        self.evaluate(row).ok()
    }
}
