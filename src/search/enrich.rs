// src/search/enrich.rs
use futures_util::future::join_all;
use metrics::counter;
use std::time::Duration;

use crate::catalog::{PriceLookup, PriceRequest};
use crate::model::MergedListing;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EnrichStats {
    pub attempted: usize,
    pub priced: usize,
    pub failed: usize,
}

/// Look up live prices for the first `top_n` catalog-only listings,
/// concurrently, each bounded by `timeout`. Results land in `market_price`;
/// buy options and order are untouched. Failures leave a listing unpriced.
pub async fn enrich(
    listings: &mut [MergedListing],
    lookup: &dyn PriceLookup,
    top_n: usize,
    timeout: Duration,
    currency: &str,
) -> EnrichStats {
    let targets: Vec<usize> = listings
        .iter()
        .enumerate()
        .filter(|(_, l)| !l.is_priced() && l.market_price.is_none())
        .map(|(i, _)| i)
        .take(top_n)
        .collect();

    let calls = targets.iter().map(|&i| {
        let req = PriceRequest {
            external_id: listings[i].external_id.clone(),
            artist: listings[i].artist.clone(),
            album: listings[i].album.clone(),
        };
        async move {
            let res = tokio::time::timeout(timeout, lookup.price_for(&req, currency)).await;
            (i, res)
        }
    });
    let results = join_all(calls).await;

    let mut stats = EnrichStats {
        attempted: targets.len(),
        ..EnrichStats::default()
    };
    for (i, res) in results {
        match res {
            Ok(Ok(Some(price))) => {
                listings[i].market_price = Some(price);
                stats.priced += 1;
            }
            Ok(Ok(None)) => {}
            Ok(Err(e)) => {
                stats.failed += 1;
                counter!("search_enrichment_failed_total", "reason" => "error").increment(1);
                tracing::debug!(target: "search", marketplace = lookup.name(), error = ?e, "price lookup failed");
            }
            Err(_) => {
                stats.failed += 1;
                counter!("search_enrichment_failed_total", "reason" => "timeout").increment(1);
                tracing::debug!(target: "search", marketplace = lookup.name(), "price lookup timed out");
            }
        }
    }
    stats
}
