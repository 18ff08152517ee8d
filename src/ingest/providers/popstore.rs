// src/ingest/providers/popstore.rs
use once_cell::sync::Lazy;

use crate::ingest::normalize::{
    assemble_product, is_in_stock, split_artist_album, Rejection, RuleAction, RuleTable,
};
use crate::ingest::types::{FeedRow, SourceNormalizer};
use crate::model::Product;

pub const SOURCE: &str = "popstore";

static DEFAULT_RULES: Lazy<RuleTable> = Lazy::new(|| {
    RuleTable::from_specs(&[
        ("parenthetical", r"\([^)]*\)|\[[^\]]*\]", RuleAction::Strip),
        ("comma_format", r",\s*(vinyl|\d*x?lp)\b", RuleAction::Truncate),
        (
            "format_words",
            r"\b(vinyl|\d*x?lp|gatefold|colou?red|limited|edition|deluxe)\b",
            RuleAction::Truncate,
        ),
        ("open_bracket", r"[(\[][^)\]]*$", RuleAction::Truncate),
    ])
    .expect("popstore default rules")
});

/// POP Store sells mostly merchandise; records are recognised loosely from
/// category and title.
#[derive(Debug, Clone)]
pub struct PopstoreNormalizer {
    currency: String,
    rules: RuleTable,
}

impl PopstoreNormalizer {
    pub fn new(currency: &str) -> Self {
        Self {
            currency: currency.to_string(),
            rules: DEFAULT_RULES.clone(),
        }
    }

    pub fn with_rules(mut self, rules: RuleTable) -> Self {
        self.rules = rules;
        self
    }

    pub fn rules(&self) -> &RuleTable {
        &self.rules
    }

    fn is_vinyl(row: &FeedRow) -> bool {
        let name = row.product_name.to_lowercase();
        let cat = row
            .merchant_category
            .as_deref()
            .unwrap_or_default()
            .to_lowercase();
        cat.contains("vinyl")
            || cat.contains("lp")
            || cat == "records"
            || name.contains("vinyl")
            || name.contains(" lp")
    }
}

impl SourceNormalizer for PopstoreNormalizer {
    fn source(&self) -> &str {
        SOURCE
    }

    fn evaluate(&self, row: &FeedRow) -> Result<Product, Rejection> {
        if !is_in_stock(row) {
            return Err(Rejection::OutOfStock);
        }
        if !Self::is_vinyl(row) {
            return Err(Rejection::NotVinyl);
        }
        let (artist, album) = split_artist_album(&row.product_name, row.brand_name.as_deref())
            .ok_or(Rejection::MissingArtistOrAlbum)?;
        assemble_product(row, SOURCE, &self.currency, &artist, &album, &self.rules)
    }
}
