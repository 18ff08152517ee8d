// src/ingest/normalize.rs
//! Steps shared by every retailer normalizer: text cleanup, stock gate,
//! artist/album split, descriptor rule tables and price parsing.

use once_cell::sync::Lazy;
use regex::{Regex, RegexBuilder};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::str::FromStr;

use crate::ingest::types::FeedRow;
use crate::model::{Availability, Product};

/// Why a feed row did not become a product.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Rejection {
    OutOfStock,
    NotVinyl,
    MissingArtistOrAlbum,
    InvalidPrice,
}

impl Rejection {
    pub fn as_str(&self) -> &'static str {
        match self {
            Rejection::OutOfStock => "out_of_stock",
            Rejection::NotVinyl => "not_vinyl",
            Rejection::MissingArtistOrAlbum => "no_artist_album",
            Rejection::InvalidPrice => "invalid_price",
        }
    }
}

/// Decode HTML entities, fold typographic quotes and collapse whitespace.
pub fn clean_text(s: &str) -> String {
    let decoded = html_escape::decode_html_entities(s);
    let folded = decoded
        .replace(['\u{201C}', '\u{201D}', '\u{00AB}', '\u{00BB}'], "\"")
        .replace(['\u{2018}', '\u{2019}'], "'");
    folded.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Stock gate. A feed without an `in_stock` column counts as in stock.
pub fn is_in_stock(row: &FeedRow) -> bool {
    match row.in_stock.as_deref() {
        None => true,
        Some(v) => matches!(
            v.trim().to_ascii_lowercase().as_str(),
            "1" | "true" | "yes" | "y" | "in stock"
        ),
    }
}

static VINYL_WORD: Lazy<Regex> = Lazy::new(|| {
    RegexBuilder::new(r"\b(vinyl|\d*x?lp|lps)\b")
        .case_insensitive(true)
        .build()
        .expect("vinyl keyword regex")
});

/// `vinyl`, `lp`, `2LP`, `3xLP` … anywhere in `text`.
pub fn has_vinyl_keyword(text: &str) -> bool {
    VINYL_WORD.is_match(text)
}

static TITLE_DASH: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\s+[-\u{2013}\u{2014}]\s+").expect("title dash regex"));

static LEADING_SEPARATORS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[\s\-\u{2013}\u{2014},:;/]+").expect("leading separator regex"));

static TRAILING_SEPARATORS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[\s\-\u{2013}\u{2014},:;/]+$").expect("trailing separator regex"));

static EMPTY_BRACKETS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\(\s*\)|\[\s*\]").expect("empty bracket regex"));

/// Split a product title into `(artist, album)`.
///
/// Prefers a literal `Artist - Album` delimiter; otherwise uses `brand` as the
/// artist and drops a repeated artist prefix from the title.
pub fn split_artist_album(title: &str, brand: Option<&str>) -> Option<(String, String)> {
    if let Some(m) = TITLE_DASH.find(title) {
        let artist = title[..m.start()].trim();
        let album = title[m.end()..].trim();
        if !artist.is_empty() {
            return Some((artist.to_string(), album.to_string()));
        }
    }

    let brand = brand.map(str::trim).filter(|b| !b.is_empty())?;
    let album = match strip_prefix_ci(title, brand) {
        Some(rest) => LEADING_SEPARATORS.replace(rest, "").into_owned(),
        None => title.to_string(),
    };
    Some((brand.to_string(), album.trim().to_string()))
}

/// Case-insensitive `strip_prefix` that only cuts on a word boundary.
fn strip_prefix_ci<'a>(text: &'a str, prefix: &str) -> Option<&'a str> {
    let n = prefix.chars().count();
    let cut = text
        .char_indices()
        .nth(n)
        .map(|(i, _)| i)
        .unwrap_or(text.len());
    if text[..cut].to_lowercase() != prefix.to_lowercase() {
        return None;
    }
    let rest = &text[cut..];
    match rest.chars().next() {
        Some(c) if c.is_alphanumeric() => None,
        _ => Some(rest),
    }
}

/// Parse a feed price. Non-positive or unparseable values are `None`.
pub fn parse_price(raw: &str) -> Option<Decimal> {
    let s = raw
        .trim()
        .trim_start_matches(['£', '$', '€'])
        .trim();
    let value = Decimal::from_str(s).ok()?.round_dp(2);
    (value > Decimal::ZERO).then_some(value)
}

/* ----------------------------
Descriptor rule tables
---------------------------- */

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuleAction {
    /// Cut the album at the first match, dropping everything after it.
    Truncate,
    /// Remove every match.
    Strip,
}

/// Rule as written in config (`[[sources.rules]]`).
#[derive(Debug, Clone, Deserialize)]
pub struct RuleCfg {
    pub name: String,
    pub pattern: String,
    pub action: RuleAction,
}

#[derive(Debug, Clone)]
pub struct DescriptorRule {
    name: String,
    re: Regex,
    action: RuleAction,
}

impl DescriptorRule {
    /// Patterns are matched case-insensitively.
    pub fn new(name: &str, pattern: &str, action: RuleAction) -> anyhow::Result<Self> {
        let re = RegexBuilder::new(pattern)
            .case_insensitive(true)
            .build()
            .map_err(|e| anyhow::anyhow!("rule `{}` regex error: {}", name, e))?;
        Ok(Self {
            name: name.to_string(),
            re,
            action,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn apply(&self, album: &str) -> String {
        match self.action {
            RuleAction::Truncate => match self.re.find(album) {
                Some(m) => album[..m.start()].to_string(),
                None => album.to_string(),
            },
            RuleAction::Strip => self.re.replace_all(album, " ").into_owned(),
        }
    }
}

/// Ordered descriptor-stripping rules for one source.
#[derive(Debug, Clone, Default)]
pub struct RuleTable {
    rules: Vec<DescriptorRule>,
}

impl RuleTable {
    pub fn from_cfg(cfg: &[RuleCfg]) -> anyhow::Result<Self> {
        let rules = cfg
            .iter()
            .map(|r| DescriptorRule::new(&r.name, &r.pattern, r.action))
            .collect::<anyhow::Result<Vec<_>>>()?;
        Ok(Self { rules })
    }

    pub fn from_specs(specs: &[(&str, &str, RuleAction)]) -> anyhow::Result<Self> {
        let rules = specs
            .iter()
            .map(|(name, pattern, action)| DescriptorRule::new(name, pattern, *action))
            .collect::<anyhow::Result<Vec<_>>>()?;
        Ok(Self { rules })
    }

    pub fn rules(&self) -> &[DescriptorRule] {
        &self.rules
    }

    pub fn rule(&self, name: &str) -> Option<&DescriptorRule> {
        self.rules.iter().find(|r| r.name == name)
    }

    /// Run every rule in order, then tidy what is left.
    pub fn apply(&self, album: &str) -> String {
        let stripped = self
            .rules
            .iter()
            .fold(album.to_string(), |acc, rule| rule.apply(&acc));
        tidy_album(&stripped)
    }
}

/// Drop empty brackets and dangling separators, collapse whitespace.
pub fn tidy_album(s: &str) -> String {
    let s = EMPTY_BRACKETS.replace_all(s, " ");
    let s = TRAILING_SEPARATORS.replace(&s, "");
    let s = LEADING_SEPARATORS.replace(&s, "");
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Finish a product from an already gated row and a raw `(artist, album)`
/// pair: cleanup, descriptor rules, emptiness check, price parse.
pub fn assemble_product(
    row: &FeedRow,
    source: &str,
    default_currency: &str,
    artist: &str,
    album: &str,
    rules: &RuleTable,
) -> Result<Product, Rejection> {
    let artist = clean_text(artist);
    let album = rules.apply(&clean_text(album));
    if artist.is_empty() || album.is_empty() {
        return Err(Rejection::MissingArtistOrAlbum);
    }

    let price = parse_price(&row.search_price).ok_or(Rejection::InvalidPrice)?;
    let rrp = row
        .rrp_price
        .as_deref()
        .and_then(parse_price)
        .filter(|rrp| *rrp > price);

    Ok(Product {
        artist,
        album,
        price,
        currency: row
            .currency
            .clone()
            .unwrap_or_else(|| default_currency.to_string()),
        link: row
            .aw_deep_link
            .clone()
            .or_else(|| row.merchant_deep_link.clone())
            .unwrap_or_default(),
        image: row
            .merchant_image_url
            .clone()
            .or_else(|| row.aw_image_url.clone()),
        availability: Availability::InStock,
        source: source.to_string(),
        ean: row.ean.clone(),
        rrp,
        colour: row.colour.clone(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn clean_text_decodes_and_collapses() {
        assert_eq!(clean_text("  Simon &amp;  Garfunkel\t"), "Simon & Garfunkel");
        assert_eq!(clean_text("\u{2018}Live\u{2019}"), "'Live'");
    }

    #[test]
    fn split_prefers_dash_delimiter() {
        let (a, b) = split_artist_album("Radiohead - OK Computer", Some("XL")).unwrap();
        assert_eq!((a.as_str(), b.as_str()), ("Radiohead", "OK Computer"));
        let (a, b) = split_artist_album("Blur \u{2013} Parklife", None).unwrap();
        assert_eq!((a.as_str(), b.as_str()), ("Blur", "Parklife"));
    }

    #[test]
    fn split_falls_back_to_brand_and_strips_prefix() {
        let (a, b) = split_artist_album("Metallica: Master Of Puppets", Some("Metallica")).unwrap();
        assert_eq!((a.as_str(), b.as_str()), ("Metallica", "Master Of Puppets"));
        // prefix must end on a word boundary
        let (_, b) = split_artist_album("Museum Pieces", Some("Muse")).unwrap();
        assert_eq!(b, "Museum Pieces");
        assert!(split_artist_album("Untitled", None).is_none());
    }

    #[test]
    fn price_parse_rejects_zero_and_garbage() {
        assert_eq!(parse_price("12.99"), Some(dec!(12.99)));
        assert_eq!(parse_price(" £20 "), Some(dec!(20)));
        assert_eq!(parse_price("0"), None);
        assert_eq!(parse_price("-3.50"), None);
        assert_eq!(parse_price("n/a"), None);
    }

    #[test]
    fn stock_gate_values() {
        let mut row = FeedRow::default();
        assert!(is_in_stock(&row));
        row.in_stock = Some("0".into());
        assert!(!is_in_stock(&row));
        row.in_stock = Some("1".into());
        assert!(is_in_stock(&row));
    }

    #[test]
    fn truncate_and_strip_actions() {
        let t = DescriptorRule::new("t", r"\bvinyl\b", RuleAction::Truncate).unwrap();
        assert_eq!(t.apply("Blue Vinyl Edition"), "Blue ");
        let s = DescriptorRule::new("s", r"\(.*?\)", RuleAction::Strip).unwrap();
        assert_eq!(s.apply("Abbey Road (Remastered) (2019)"), "Abbey Road    ");
    }

    #[test]
    fn tidy_removes_dangling_separators() {
        assert_eq!(tidy_album("OK Computer, "), "OK Computer");
        assert_eq!(tidy_album("Nevermind - ()"), "Nevermind");
    }
}
