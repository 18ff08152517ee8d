// tests/ingest_normalize.rs
//
// Retailer normalizers end to end on typed feed rows.

use rust_decimal_macros::dec;
use vinyl_search::ingest::normalize::{Rejection, RuleAction, RuleCfg, RuleTable};
use vinyl_search::ingest::providers::{
    emp::EmpNormalizer, normalizer_for, popstore::PopstoreNormalizer,
    vinylcastle::VinylCastleNormalizer,
};
use vinyl_search::ingest::types::{FeedRow, SourceNormalizer};
use vinyl_search::model::Availability;

fn row(name: &str, price: &str) -> FeedRow {
    FeedRow {
        product_name: name.to_string(),
        search_price: price.to_string(),
        in_stock: Some("1".into()),
        aw_deep_link: Some("https://www.awin1.com/pclick.php?p=1".into()),
        merchant_image_url: Some("https://img.example/1.jpg".into()),
        ..FeedRow::default()
    }
}

#[test]
fn emp_title_with_format_descriptor() {
    let n = EmpNormalizer::new("GBP");
    let p = n
        .normalize(&row("Radiohead - OK Computer, Vinyl LP", "12.99"))
        .expect("in-stock vinyl row");
    assert_eq!(p.artist, "Radiohead");
    assert_eq!(p.album, "OK Computer");
    assert_eq!(p.price, dec!(12.99));
    assert_eq!(p.currency, "GBP");
    assert_eq!(p.source, "emp");
    assert_eq!(p.availability, Availability::InStock);
    assert_eq!(p.link, "https://www.awin1.com/pclick.php?p=1");
}

#[test]
fn out_of_stock_is_rejected_first() {
    let mut r = row("Radiohead - OK Computer, Vinyl LP", "12.99");
    r.in_stock = Some("0".into());
    let n = EmpNormalizer::new("GBP");
    assert_eq!(n.evaluate(&r).unwrap_err(), Rejection::OutOfStock);
    assert!(n.normalize(&r).is_none());

    // stock gate wins even when the price is garbage too
    r.search_price = "n/a".into();
    assert_eq!(n.evaluate(&r).unwrap_err(), Rejection::OutOfStock);
}

#[test]
fn bad_price_and_missing_artist() {
    let n = EmpNormalizer::new("GBP");
    assert_eq!(
        n.evaluate(&row("Radiohead - OK Computer LP", "0.00")).unwrap_err(),
        Rejection::InvalidPrice
    );
    assert_eq!(
        n.evaluate(&row("OK Computer LP", "12.99")).unwrap_err(),
        Rejection::MissingArtistOrAlbum
    );
}

#[test]
fn brand_supplies_the_artist_when_title_has_no_dash() {
    let mut r = row("Metallica Master Of Puppets LP", "21.00");
    r.brand_name = Some("Metallica".into());
    let p = EmpNormalizer::new("GBP").normalize(&r).unwrap();
    assert_eq!(p.artist, "Metallica");
    assert_eq!(p.album, "Master Of Puppets");
}

#[test]
fn rrp_kept_only_above_price() {
    let mut r = row("Ghost - Meliora LP", "15.00");
    r.rrp_price = Some("29.99".into());
    let p = EmpNormalizer::new("GBP").normalize(&r).unwrap();
    assert_eq!(p.rrp, Some(dec!(29.99)));

    r.rrp_price = Some("15.00".into());
    assert_eq!(EmpNormalizer::new("GBP").normalize(&r).unwrap().rrp, None);
}

#[test]
fn normalizing_is_idempotent() {
    let normalizers: Vec<Box<dyn SourceNormalizer>> = vec![
        Box::new(EmpNormalizer::new("GBP")),
        Box::new(PopstoreNormalizer::new("GBP")),
        Box::new(VinylCastleNormalizer::new("GBP")),
    ];
    let titles = [
        "Radiohead - OK Computer, Vinyl LP",
        "Fleetwood Mac - Rumours (Vinyl LP)",
        "Nirvana - Nevermind [Gatefold] 180g Vinyl",
    ];
    for n in &normalizers {
        for title in titles {
            let mut r = row(title, "19.99");
            r.merchant_category = Some("Vinyl".into());
            let Some(first) = n.normalize(&r) else {
                panic!("{} rejected {title}", n.source());
            };
            assert_eq!(n.normalize(&r), Some(first.clone()), "same row, same result");

            // feeding the cleaned title back changes nothing
            let mut again = r.clone();
            again.product_name = format!("{} - {}", first.artist, first.album);
            let second = n.normalize(&again).expect("clean title still accepted");
            assert_eq!((second.artist, second.album), (first.artist, first.album), "{}", n.source());
        }
    }
}

#[test]
fn each_source_strips_its_descriptors() {
    let mut r = row("Fleetwood Mac - Rumours (Vinyl LP)", "24.00");
    r.merchant_category = Some("Vinyl".into());
    assert_eq!(VinylCastleNormalizer::new("GBP").normalize(&r).unwrap().album, "Rumours");

    let mut r = row("Nirvana - Nevermind, Vinyl", "18.00");
    r.merchant_category = Some("Music".into());
    assert_eq!(PopstoreNormalizer::new("GBP").normalize(&r).unwrap().album, "Nevermind");
}

#[test]
fn configured_rule_table_replaces_defaults() {
    let cfg = vec![RuleCfg {
        name: "anniversary".into(),
        pattern: r"\s*\d+(st|nd|rd|th) anniversary.*$".into(),
        action: RuleAction::Truncate,
    }];
    let table = RuleTable::from_cfg(&cfg).unwrap();
    let n = normalizer_for("emp", "GBP", Some(table)).expect("emp is registered");
    let p = n
        .normalize(&row("Oasis - Definitely Maybe 30th Anniversary LP", "30.00"))
        .unwrap();
    assert_eq!(p.album, "Definitely Maybe");

    assert!(normalizer_for("nosuchshop", "GBP", None).is_none());
}

#[test]
fn bad_rule_pattern_names_the_rule() {
    let cfg = vec![RuleCfg {
        name: "broken".into(),
        pattern: "(unclosed".into(),
        action: RuleAction::Strip,
    }];
    let err = RuleTable::from_cfg(&cfg).unwrap_err().to_string();
    assert!(err.contains("broken"), "{err}");
}
