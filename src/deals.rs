// src/deals.rs
//! Discounted retailer items: products whose price sits below the RRP.

use chrono::{DateTime, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::HashMap;

use crate::model::Product;
use crate::search::StoreNames;

pub const DEFAULT_LIMIT: usize = 50;
pub const MAX_LIMIT: usize = 100;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DealSort {
    #[default]
    Percent,
    Saving,
    Price,
}

impl DealSort {
    fn parse(s: &str) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            "saving" => DealSort::Saving,
            "price" => DealSort::Price,
            _ => DealSort::Percent,
        }
    }
}

/// Query parameters, parsed leniently: junk values fall back to defaults.
#[derive(Debug, Clone, PartialEq)]
pub struct DealParams {
    /// Savings percentage a deal must exceed.
    pub min_percent: f64,
    pub max_price: Option<Decimal>,
    pub sort: DealSort,
    pub limit: usize,
    pub offset: usize,
}

impl Default for DealParams {
    fn default() -> Self {
        Self {
            min_percent: 0.0,
            max_price: None,
            sort: DealSort::Percent,
            limit: DEFAULT_LIMIT,
            offset: 0,
        }
    }
}

impl DealParams {
    pub fn from_query(q: &HashMap<String, String>) -> Self {
        let get = |k: &str| q.get(k).map(|v| v.trim()).filter(|v| !v.is_empty());
        let limit = get("limit")
            .and_then(|v| v.parse::<usize>().ok())
            .filter(|n| *n > 0)
            .unwrap_or(DEFAULT_LIMIT)
            .min(MAX_LIMIT);
        Self {
            min_percent: get("min").and_then(|v| v.parse().ok()).unwrap_or(0.0),
            max_price: get("max").and_then(|v| v.parse().ok()),
            sort: get("sort").map(DealSort::parse).unwrap_or_default(),
            limit,
            offset: get("offset").and_then(|v| v.parse().ok()).unwrap_or(0),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Deal {
    pub artist: String,
    pub album: String,
    pub price: Decimal,
    pub rrp: Decimal,
    pub saving: Decimal,
    /// One decimal place.
    pub savings_percent: f64,
    pub currency: String,
    pub link: String,
    pub image: Option<String>,
    pub store: String,
    pub source: String,
}

impl Deal {
    fn from_product(p: &Product, store: &str) -> Option<Self> {
        let rrp = p.rrp?;
        if p.price <= Decimal::ZERO || rrp <= p.price {
            return None;
        }
        let saving = rrp - p.price;
        let percent = (saving / rrp).to_f64()? * 100.0;
        Some(Self {
            artist: p.artist.clone(),
            album: p.album.clone(),
            price: p.price,
            rrp,
            saving,
            savings_percent: (percent * 10.0).round() / 10.0,
            currency: p.currency.clone(),
            link: p.link.clone(),
            image: p.image.clone(),
            store: store.to_string(),
            source: p.source.clone(),
        })
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct DealsResponse {
    /// Matching deals before paging.
    pub total: usize,
    pub offset: usize,
    pub limit: usize,
    pub sort: DealSort,
    pub updated: Option<DateTime<Utc>>,
    pub deals: Vec<Deal>,
}

pub fn find_deals<'a>(
    products: impl IntoIterator<Item = &'a Product>,
    names: &StoreNames,
    params: &DealParams,
    updated: Option<DateTime<Utc>>,
) -> DealsResponse {
    let mut deals: Vec<Deal> = products
        .into_iter()
        .filter_map(|p| {
            let store = names.get(&p.source).map(String::as_str).unwrap_or(&p.source);
            Deal::from_product(p, store)
        })
        .filter(|d| d.savings_percent > params.min_percent)
        .filter(|d| params.max_price.map_or(true, |max| d.price <= max))
        .collect();

    match params.sort {
        DealSort::Percent => deals.sort_by(|a, b| b.savings_percent.total_cmp(&a.savings_percent)),
        DealSort::Saving => deals.sort_by(|a, b| b.saving.cmp(&a.saving)),
        DealSort::Price => deals.sort_by(|a, b| a.price.cmp(&b.price)),
    }

    let total = deals.len();
    let page = deals.into_iter().skip(params.offset).take(params.limit).collect();
    DealsResponse {
        total,
        offset: params.offset,
        limit: params.limit,
        sort: params.sort,
        updated,
        deals: page,
    }
}
