// src/ingest/providers/vinylcastle.rs
use once_cell::sync::Lazy;
use regex::{Regex, RegexBuilder};

use crate::ingest::normalize::{
    assemble_product, is_in_stock, split_artist_album, Rejection, RuleAction, RuleTable,
};
use crate::ingest::types::{FeedRow, SourceNormalizer};
use crate::model::Product;

pub const SOURCE: &str = "vinylcastle";

static VINYL_INCLUDE: Lazy<Regex> = Lazy::new(|| {
    RegexBuilder::new(
        r#"\b(vinyl|lp|record|gatefold|heavyweight|picture disc|180g|double lp|\d+x?lp)\b|\b12("|\s?inch)"#,
    )
    .case_insensitive(true)
    .build()
    .expect("vinylcastle include regex")
});

static VINYL_EXCLUDE: Lazy<Regex> = Lazy::new(|| {
    RegexBuilder::new(
        r"\b(cd|compact disc|dvd|blu-ray|cassette|tape|turntable|record player|stylus|cartridge|slipmat|t-shirt|tee|hoodie|poster|tote bag|mug|keyring|pin badge|patch|beanie|cap|headphones|speaker|cleaning|brush|accessories|merch)\b",
    )
    .case_insensitive(true)
    .build()
    .expect("vinylcastle exclude regex")
});

/// Accessory phrases built on the word "record"; they must not pass as vinyl.
static RECORD_ACCESSORY: Lazy<Regex> = Lazy::new(|| {
    RegexBuilder::new(
        r"\brecords?\s+(players?|cleaners?|cleaning|brush(es)?|bags?|box(es)?|crates?|storage|frames?|stands?|weights?|clamps?|sleeves?|shelf|shelves)\b",
    )
    .case_insensitive(true)
    .build()
    .expect("vinylcastle accessory regex")
});

static DEFAULT_RULES: Lazy<RuleTable> = Lazy::new(|| {
    RuleTable::from_specs(&[
        (
            "bracketed_format",
            r"[(\[](vinyl|vinyl lp|lp|vinyl record|gatefold|heavyweight vinyl|colou?red vinyl|limited edition|deluxe edition vinyl|2xlp|2lp|double lp|180g|180 gram|picture disc|remastered)[)\]]",
            RuleAction::Strip,
        ),
        (
            "trailing_format",
            r"[-,]\s*(vinyl lp|vinyl|lp|heavyweight vinyl|gatefold lp|colou?red vinyl|180g vinyl|limited vinyl)\s*$",
            RuleAction::Truncate,
        ),
        (
            "format_words",
            r#"\b(vinyl|\d*x?lp)\b|\b(12|10|7)("|''|\s?inch)"#,
            RuleAction::Truncate,
        ),
        ("parenthetical", r"\([^)]*\)", RuleAction::Strip),
        ("open_bracket", r"[(\[][^)\]]*$", RuleAction::Truncate),
    ])
    .expect("vinylcastle default rules")
});

/// VinylCastle's feed mixes records with players and accessories, so the gate
/// weighs include and exclude keywords across several columns.
#[derive(Debug, Clone)]
pub struct VinylCastleNormalizer {
    currency: String,
    rules: RuleTable,
}

impl VinylCastleNormalizer {
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
        let combined = [
            Some(row.product_name.as_str()),
            row.merchant_category.as_deref(),
            row.product_type.as_deref(),
            row.description.as_deref(),
        ]
        .into_iter()
        .flatten()
        .collect::<Vec<_>>()
        .join(" ");
        let combined = RECORD_ACCESSORY.replace_all(&combined, " accessories ");
        let name = RECORD_ACCESSORY.replace_all(&row.product_name, " accessories ");

        // An exclude keyword only wins if the name itself does not say vinyl.
        if VINYL_EXCLUDE.is_match(&combined) && !VINYL_INCLUDE.is_match(&name) {
            return false;
        }
        VINYL_INCLUDE.is_match(&combined)
    }
}

impl SourceNormalizer for VinylCastleNormalizer {
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
