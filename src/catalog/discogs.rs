// src/catalog/discogs.rs
use anyhow::{anyhow, Context};
use async_trait::async_trait;
use metrics::counter;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use std::collections::HashSet;
use std::time::Duration;

use super::{ensure_metrics_described, CatalogLookup};
use crate::model::CatalogEntry;

pub const DISCOGS_API: &str = "https://api.discogs.com";
const WEB_BASE: &str = "https://www.discogs.com";

/// Discogs disambiguates homonymous artists as `Name (2)`.
static DISAMBIGUATION: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\s*\(\d+\)$|\*$").expect("discogs disambiguation regex"));

static EP_WORD: Lazy<Regex> = Lazy::new(|| Regex::new(r"\bep\b").expect("ep regex"));

#[derive(Debug, Deserialize)]
struct SearchReply {
    #[serde(default)]
    results: Vec<SearchHit>,
}

#[derive(Debug, Deserialize)]
struct SearchHit {
    id: u64,
    #[serde(default)]
    title: String,
    #[serde(default, rename = "type")]
    kind: Option<String>,
    #[serde(default)]
    year: Option<serde_json::Value>,
    #[serde(default)]
    format: Vec<String>,
    #[serde(default)]
    cover_image: Option<String>,
    #[serde(default)]
    thumb: Option<String>,
    #[serde(default)]
    uri: Option<String>,
}

pub fn clean_artist(name: &str) -> String {
    DISAMBIGUATION.replace(name.trim(), "").trim().to_string()
}

/// Singles and EPs are not albums; a 12" single or an EP on LP still counts.
fn is_album(formats: &[String]) -> bool {
    let f = formats.join(" ").to_lowercase();
    if f.contains("7\"") || f.contains("7'") {
        return false;
    }
    if f.contains("single") && !f.contains("12\"") {
        return false;
    }
    if EP_WORD.is_match(&f) && !f.contains("lp") {
        return false;
    }
    true
}

fn parse_year(v: &Option<serde_json::Value>) -> Option<i32> {
    let year = match v.as_ref()? {
        serde_json::Value::Number(n) => n.as_i64().map(|y| y as i32),
        serde_json::Value::String(s) => s.trim().parse().ok(),
        _ => None,
    };
    year.filter(|y| *y > 0)
}

fn to_entry(hit: SearchHit) -> CatalogEntry {
    let (artist, album) = match hit.title.split_once(" - ") {
        Some((a, rest)) => (clean_artist(a), rest.trim().to_string()),
        None => ("Unknown Artist".to_string(), hit.title.trim().to_string()),
    };
    CatalogEntry {
        artist,
        album,
        year: parse_year(&hit.year),
        external_id: hit.id.to_string(),
        cover_url: hit
            .cover_image
            .filter(|u| !u.is_empty() && !u.ends_with("spacer.gif"))
            .or(hit.thumb.filter(|u| !u.is_empty())),
        catalog_url: hit.uri.map(|u| format!("{WEB_BASE}{u}")),
    }
}

#[derive(Clone)]
pub struct DiscogsClient {
    http: reqwest::Client,
    base: String,
    key: String,
    secret: String,
}

impl DiscogsClient {
    pub fn new(key: &str, secret: &str) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent(concat!("vinyl-search/", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_secs(10))
            .build()
            .context("building discogs http client")?;
        Ok(Self::with_client(http, DISCOGS_API, key, secret))
    }

    pub fn with_client(http: reqwest::Client, base: &str, key: &str, secret: &str) -> Self {
        Self {
            http,
            base: base.trim_end_matches('/').to_string(),
            key: key.to_string(),
            secret: secret.to_string(),
        }
    }

    /// `None` when Discogs rate-limited the call.
    async fn database_search(&self, params: &[(&str, &str)]) -> anyhow::Result<Option<Vec<SearchHit>>> {
        ensure_metrics_described();
        let resp = self
            .http
            .get(format!("{}/database/search", self.base))
            .query(params)
            .query(&[("key", self.key.as_str()), ("secret", self.secret.as_str())])
            .send()
            .await
            .context("discogs search request")?;

        let status = resp.status();
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            counter!("catalog_rate_limited_total", "service" => "discogs").increment(1);
            tracing::warn!(target: "catalog", "discogs rate limited");
            return Ok(None);
        }
        if !status.is_success() {
            return Err(anyhow!("discogs returned HTTP {}", status.as_u16()));
        }
        let reply: SearchReply = resp.json().await.context("discogs search reply")?;
        Ok(Some(reply.results))
    }
}

#[async_trait]
impl CatalogLookup for DiscogsClient {
    fn name(&self) -> &str {
        "discogs"
    }

    async fn search(&self, term: &str) -> anyhow::Result<Vec<CatalogEntry>> {
        let hits = self
            .database_search(&[
                ("q", term),
                ("type", "release"),
                ("format", "vinyl"),
                ("per_page", "100"),
            ])
            .await?
            .unwrap_or_default();

        let entries: Vec<_> = hits
            .into_iter()
            .filter(|h| is_album(&h.format))
            .map(to_entry)
            .collect();
        tracing::debug!(target: "catalog", albums = entries.len(), "discogs search");
        Ok(entries)
    }

    /// Artist hits first; thin results are topped up with artists taken from
    /// matching release titles.
    async fn suggest_artists(&self, term: &str) -> anyhow::Result<Vec<String>> {
        let needle = term.trim().to_lowercase();
        let hits = self
            .database_search(&[("q", term), ("type", "artist"), ("per_page", "10")])
            .await?
            .unwrap_or_default();

        let mut seen = HashSet::new();
        let mut names: Vec<String> = hits
            .into_iter()
            .filter(|h| h.kind.as_deref() == Some("artist"))
            .map(|h| clean_artist(&h.title))
            .filter(|n| !n.is_empty() && seen.insert(n.to_lowercase()))
            .collect();

        if names.len() < 5 {
            let releases = self
                .database_search(&[
                    ("q", term),
                    ("type", "release"),
                    ("format", "vinyl"),
                    ("per_page", "30"),
                ])
                .await;
            match releases {
                Ok(Some(hits)) => {
                    for h in hits {
                        let Some((artist, _)) = h.title.split_once(" - ") else {
                            continue;
                        };
                        let artist = clean_artist(artist);
                        if artist.to_lowercase().contains(&needle) && seen.insert(artist.to_lowercase()) {
                            names.push(artist);
                        }
                    }
                }
                Ok(None) => {}
                Err(e) => tracing::warn!(target: "catalog", error = ?e, "discogs release top-up failed"),
            }
        }
        Ok(names)
    }
}
