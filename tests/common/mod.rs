// tests/common/mod.rs
// Shared builders for integration tests.
#![allow(dead_code)]

use rust_decimal::Decimal;
use std::collections::HashMap;

use vinyl_search::model::{Availability, CatalogEntry, Product};
use vinyl_search::search::StoreNames;

pub fn product(source: &str, artist: &str, album: &str, price: Decimal) -> Product {
    Product {
        artist: artist.into(),
        album: album.into(),
        price,
        currency: "GBP".into(),
        link: format!("https://{source}.example/{}", album.replace(' ', "-")),
        image: None,
        availability: Availability::InStock,
        source: source.into(),
        ean: None,
        rrp: None,
        colour: None,
    }
}

pub fn entry(id: &str, artist: &str, album: &str, year: Option<i32>) -> CatalogEntry {
    CatalogEntry {
        artist: artist.into(),
        album: album.into(),
        year,
        external_id: id.into(),
        cover_url: Some(format!("https://img.example/{id}.jpg")),
        catalog_url: Some(format!("https://www.discogs.com/release/{id}")),
    }
}

pub fn store_names() -> StoreNames {
    HashMap::from([
        ("emp".to_string(), "EMP".to_string()),
        ("popstore".to_string(), "POP Store".to_string()),
        ("vinylcastle".to_string(), "VinylCastle".to_string()),
    ])
}

/// A tiny gzip CSV feed body.
pub fn gzip(data: &[u8]) -> Vec<u8> {
    use flate2::{write::GzEncoder, Compression};
    use std::io::Write;
    let mut enc = GzEncoder::new(Vec::new(), Compression::default());
    enc.write_all(data).expect("gzip write");
    enc.finish().expect("gzip finish")
}
