// src/ingest/providers/emp.rs
use once_cell::sync::Lazy;

use crate::ingest::normalize::{
    assemble_product, has_vinyl_keyword, is_in_stock, split_artist_album, Rejection, RuleAction,
    RuleTable,
};
use crate::ingest::types::{FeedRow, SourceNormalizer};
use crate::model::Product;

pub const SOURCE: &str = "emp";

/// Merchant category codes EMP uses for records.
const VINYL_CATEGORIES: &[&str] = &["lp", "vinyl", "855"];

static DEFAULT_RULES: Lazy<RuleTable> = Lazy::new(|| {
    RuleTable::from_specs(&[
        ("parenthetical", r"\([^)]*\)|\[[^\]]*\]", RuleAction::Strip),
        ("lp_format", r"\b\d*x?lps?\b", RuleAction::Truncate),
        (
            "edition_words",
            r"\b(vinyl|gatefold|reissue|remaster(ed)?|deluxe|limited|edition|heavyweight|180\s?g(ram)?)\b",
            RuleAction::Truncate,
        ),
        ("open_bracket", r"[(\[][^)\]]*$", RuleAction::Truncate),
    ])
    .expect("emp default rules")
});

#[derive(Debug, Clone)]
pub struct EmpNormalizer {
    currency: String,
    rules: RuleTable,
}

impl EmpNormalizer {
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
        let by_category = row
            .merchant_category
            .as_deref()
            .map(|c| VINYL_CATEGORIES.iter().any(|v| c.trim().eq_ignore_ascii_case(v)))
            .unwrap_or(false);
        by_category || has_vinyl_keyword(&row.product_name)
    }
}

impl SourceNormalizer for EmpNormalizer {
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
