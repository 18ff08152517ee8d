// src/search/merge.rs
//! Grouping of relevant candidates into listings, catalog dedup and ranking.

use std::cmp::Ordering;
use std::collections::HashMap;

use crate::model::{fold, BuyOption, CatalogEntry, MergedListing, NormalizedKey, Product};

/// Retailer id → display name (`emp` → `EMP`).
pub type StoreNames = HashMap<String, String>;

#[derive(Default)]
struct Groups {
    listings: Vec<MergedListing>,
    index: HashMap<NormalizedKey, usize>,
}

impl Groups {
    fn entry(&mut self, key: NormalizedKey, init: impl FnOnce() -> MergedListing) -> &mut MergedListing {
        let idx = *self.index.entry(key).or_insert_with(|| {
            self.listings.push(init());
            self.listings.len() - 1
        });
        &mut self.listings[idx]
    }
}

fn fill_from_catalog(listing: &mut MergedListing, entry: &CatalogEntry) {
    if listing.year.is_none() {
        listing.year = entry.year;
    }
    if listing.cover_url.is_none() {
        listing.cover_url = entry.cover_url.clone();
    }
    if listing.external_id.is_none() {
        listing.external_id = Some(entry.external_id.clone());
    }
    if listing.catalog_url.is_none() {
        listing.catalog_url = entry.catalog_url.clone();
    }
}

/// Merge products and catalog entries by [`NormalizedKey`].
///
/// Each source contributes at most one buy option per listing (its cheapest).
/// A catalog entry never creates a second listing for a release a retailer
/// already carries: exact key matches and entries whose `artist album` text
/// contains a retailer group's artist and album both fold into that group.
pub fn merge(products: Vec<Product>, entries: Vec<CatalogEntry>, names: &StoreNames) -> Vec<MergedListing> {
    let mut groups = Groups::default();

    for p in products {
        let listing = groups.entry(p.key(), || MergedListing {
            artist: p.artist.clone(),
            album: p.album.clone(),
            cover_url: None,
            year: None,
            buy_options: Vec::new(),
            external_id: None,
            catalog_url: None,
            market_price: None,
        });
        if listing.cover_url.is_none() {
            listing.cover_url = p.image.clone();
        }
        let option = BuyOption {
            store_name: names.get(&p.source).cloned().unwrap_or_else(|| p.source.clone()),
            source: p.source,
            price: p.price,
            currency: p.currency,
            link: p.link,
            availability: p.availability,
        };
        match listing.buy_options.iter_mut().find(|o| o.source == option.source) {
            Some(existing) if option.price < existing.price => *existing = option,
            Some(_) => {}
            None => listing.buy_options.push(option),
        }
    }

    for entry in entries {
        let key = entry.key();
        if let Some(&idx) = groups.index.get(&key) {
            fill_from_catalog(&mut groups.listings[idx], &entry);
            continue;
        }

        let text = fold(&format!("{} {}", entry.artist, entry.album));
        let dup = groups.listings.iter_mut().find(|l| {
            l.is_priced() && text.contains(&fold(&l.artist)) && text.contains(&fold(&l.album))
        });
        if let Some(listing) = dup {
            fill_from_catalog(listing, &entry);
            continue;
        }

        groups.entry(key, || MergedListing {
            artist: entry.artist.clone(),
            album: entry.album.clone(),
            cover_url: entry.cover_url.clone(),
            year: entry.year,
            buy_options: Vec::new(),
            external_id: Some(entry.external_id.clone()),
            catalog_url: entry.catalog_url.clone(),
            market_price: None,
        });
    }

    let mut listings = groups.listings;
    for l in &mut listings {
        l.buy_options.sort_by(|a, b| a.price.cmp(&b.price));
    }
    listings
}

/// Priced listings first by ascending minimum price, then catalog-only
/// listings by descending year with unknown years last. Stable.
pub fn rank(listings: &mut [MergedListing]) {
    listings.sort_by(|a, b| match (a.min_price(), b.min_price()) {
        (Some(pa), Some(pb)) => pa.cmp(&pb),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => match (a.year, b.year) {
            (Some(ya), Some(yb)) => yb.cmp(&ya),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => Ordering::Equal,
        },
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Availability;
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;

    fn product(source: &str, artist: &str, album: &str, price: Decimal) -> Product {
        Product {
            artist: artist.into(),
            album: album.into(),
            price,
            currency: "GBP".into(),
            link: format!("https://{source}.example/{album}"),
            image: Some(format!("https://{source}.example/{album}.jpg")),
            availability: Availability::InStock,
            source: source.into(),
            ean: None,
            rrp: None,
            colour: None,
        }
    }

    fn entry(artist: &str, album: &str, year: Option<i32>) -> CatalogEntry {
        CatalogEntry {
            artist: artist.into(),
            album: album.into(),
            year,
            external_id: format!("{artist}-{album}"),
            cover_url: Some("https://img.example/c.jpg".into()),
            catalog_url: None,
        }
    }

    #[test]
    fn one_option_per_source_cheapest_wins() {
        let out = merge(
            vec![
                product("emp", "Radiohead", "OK Computer", dec!(24.99)),
                product("emp", "radiohead", "ok  computer", dec!(19.99)),
                product("popstore", "Radiohead", "OK Computer", dec!(21.00)),
            ],
            vec![],
            &StoreNames::from([("emp".to_string(), "EMP".to_string())]),
        );
        assert_eq!(out.len(), 1);
        let opts = &out[0].buy_options;
        assert_eq!(opts.len(), 2);
        assert_eq!((opts[0].source.as_str(), opts[0].price), ("emp", dec!(19.99)));
        assert_eq!(opts[0].store_name, "EMP");
        assert_eq!(opts[1].store_name, "popstore");
    }

    #[test]
    fn catalog_fills_metadata_without_new_listing() {
        let out = merge(
            vec![product("emp", "Radiohead", "OK Computer", dec!(20))],
            vec![
                entry("Radiohead", "OK Computer", Some(1997)),
                entry("Radiohead", "OK Computer OKNOTOK 1997 2017", Some(2017)),
            ],
            &StoreNames::new(),
        );
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].year, Some(1997));
        assert!(out[0].external_id.is_some());
    }

    #[test]
    fn rank_priced_first_then_year() {
        let mut out = merge(
            vec![
                product("emp", "A", "Pricey", dec!(30)),
                product("emp", "A", "Cheap", dec!(10)),
            ],
            vec![
                entry("A", "Old", Some(1970)),
                entry("A", "Unknown", None),
                entry("A", "New", Some(2020)),
            ],
            &StoreNames::new(),
        );
        rank(&mut out);
        let albums: Vec<_> = out.iter().map(|l| l.album.as_str()).collect();
        assert_eq!(albums, ["Cheap", "Pricey", "New", "Old", "Unknown"]);
    }
}
