// src/catalog/ebay.rs
use anyhow::{anyhow, Context};
use async_trait::async_trait;
use metrics::counter;
use rust_decimal::Decimal;
use serde::Deserialize;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use super::token::{send_with_retry, ClientCredentialsTokens, TokenProvider};
use super::{ensure_metrics_described, PriceLookup, PriceRequest};
use crate::model::{fold, MarketPrice};

pub const EBAY_API: &str = "https://api.ebay.com";
const SCOPE: &str = "https://api.ebay.com/oauth/api_scope";
const VINYL_CATEGORY: &str = "176985";
const MARKETPLACE: &str = "EBAY_GB";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SearchReply {
    #[serde(default)]
    item_summaries: Vec<ItemSummary>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ItemSummary {
    #[serde(default)]
    title: String,
    price: Option<Amount>,
    item_web_url: Option<String>,
    item_affiliate_web_url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Amount {
    value: String,
    currency: String,
}

/// Cheapest item in `currency` whose title mentions the album.
fn cheapest(items: Vec<ItemSummary>, album: &str, currency: &str) -> Option<MarketPrice> {
    let album = fold(album);
    items
        .into_iter()
        .filter(|it| fold(&it.title).contains(&album))
        .filter_map(|it| {
            let amount = it.price?;
            if !amount.currency.eq_ignore_ascii_case(currency) {
                return None;
            }
            let price = Decimal::from_str(amount.value.trim()).ok()?.round_dp(2);
            (price > Decimal::ZERO).then(|| MarketPrice {
                marketplace: "ebay".to_string(),
                price,
                currency: amount.currency,
                link: it.item_affiliate_web_url.or(it.item_web_url),
            })
        })
        .min_by(|a, b| a.price.cmp(&b.price))
}

pub struct EbayClient {
    http: reqwest::Client,
    base: String,
    tokens: Arc<dyn TokenProvider>,
}

impl EbayClient {
    pub fn new(client_id: &str, client_secret: &str) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .context("building ebay http client")?;
        let tokens = ClientCredentialsTokens::new(
            http.clone(),
            &format!("{EBAY_API}/identity/v1/oauth2/token"),
            client_id,
            client_secret,
        )
        .with_scope(SCOPE);
        Ok(Self::with_parts(http, EBAY_API, Arc::new(tokens)))
    }

    pub fn with_parts(http: reqwest::Client, base: &str, tokens: Arc<dyn TokenProvider>) -> Self {
        Self {
            http,
            base: base.trim_end_matches('/').to_string(),
            tokens,
        }
    }
}

#[async_trait]
impl PriceLookup for EbayClient {
    fn name(&self) -> &str {
        "ebay"
    }

    async fn price_for(&self, req: &PriceRequest, currency: &str) -> anyhow::Result<Option<MarketPrice>> {
        ensure_metrics_described();
        let q = format!("{} {} vinyl", req.artist, req.album);
        let url = format!("{}/buy/browse/v1/item_summary/search", self.base);
        let params = [
            ("q", q.as_str()),
            ("category_ids", VINYL_CATEGORY),
            ("filter", "itemLocationCountry:GB,buyingOptions:{FIXED_PRICE}"),
            ("limit", "20"),
            ("sort", "price"),
        ];

        let resp = send_with_retry(self.tokens.as_ref(), |token| {
            self.http
                .get(&url)
                .query(&params)
                .bearer_auth(token)
                .header("X-EBAY-C-MARKETPLACE-ID", MARKETPLACE)
                .header("Accept", "application/json")
        })
        .await?;

        let status = resp.status();
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            counter!("catalog_rate_limited_total", "service" => "ebay").increment(1);
            return Ok(None);
        }
        if !status.is_success() {
            return Err(anyhow!("ebay returned HTTP {}", status.as_u16()));
        }
        let reply: SearchReply = resp.json().await.context("ebay search reply")?;
        Ok(cheapest(reply.item_summaries, &req.album, currency))
    }
}
