// src/autocomplete.rs
//! Artist and album suggestions for the search box.

use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use crate::catalog::CatalogLookup;
use crate::error::SearchError;
use crate::model::{fold, Product};
use crate::search::StoredFeedSource;

pub const MIN_QUERY_CHARS: usize = 2;
const MAX_LOCAL_ARTISTS: usize = 3;
const MAX_LOCAL_ALBUMS: usize = 3;
const MAX_CATALOG_ARTISTS: usize = 7;
const MAX_SUGGESTIONS: usize = 8;
const DID_YOU_MEAN_MIN_SIMILARITY: f64 = 0.55;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SuggestionKind {
    Artist,
    Album,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Suggestion {
    #[serde(rename = "type")]
    pub kind: SuggestionKind,
    pub name: String,
    pub source: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AutocompleteResponse {
    pub query: String,
    pub suggestions: Vec<Suggestion>,
    pub total: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub did_you_mean: Option<String>,
}

pub struct Autocomplete {
    feeds: Vec<Arc<StoredFeedSource>>,
    catalog: Option<Arc<dyn CatalogLookup>>,
    catalog_timeout: Duration,
}

impl Autocomplete {
    pub fn new(feeds: Vec<Arc<StoredFeedSource>>, catalog_timeout: Duration) -> Self {
        Self {
            feeds,
            catalog: None,
            catalog_timeout,
        }
    }

    pub fn with_catalog(mut self, catalog: Arc<dyn CatalogLookup>) -> Self {
        self.catalog = Some(catalog);
        self
    }

    pub async fn suggest(&self, raw: &str) -> Result<AutocompleteResponse, SearchError> {
        let query = raw.trim();
        if query.chars().count() < MIN_QUERY_CHARS {
            return Err(SearchError::InvalidQuery("query must be at least 2 characters"));
        }
        let needle = fold(query);

        let mut products: Vec<Product> = Vec::new();
        for feed in &self.feeds {
            match feed.products().await {
                Ok(items) => products.extend(items.iter().cloned()),
                Err(e) => tracing::warn!(target: "search", source = feed.source(), error = ?e, "feed unavailable for autocomplete"),
            }
        }

        let mut suggestions = local_suggestions(&products, &needle);

        if let Some(catalog) = &self.catalog {
            match tokio::time::timeout(self.catalog_timeout, catalog.suggest_artists(query)).await {
                Ok(Ok(names)) => {
                    let mut seen: HashSet<String> = suggestions
                        .iter()
                        .filter(|s| s.kind == SuggestionKind::Artist)
                        .map(|s| fold(&s.name))
                        .collect();
                    suggestions.extend(
                        names
                            .into_iter()
                            .filter(|n| seen.insert(fold(n)))
                            .take(MAX_CATALOG_ARTISTS)
                            .map(|name| Suggestion {
                                kind: SuggestionKind::Artist,
                                name,
                                source: catalog.name().to_string(),
                            }),
                    );
                }
                Ok(Err(e)) => tracing::warn!(target: "catalog", error = ?e, "artist suggestions failed"),
                Err(_) => tracing::warn!(target: "catalog", "artist suggestions timed out"),
            }
        }
        suggestions.truncate(MAX_SUGGESTIONS);

        let did_you_mean = if suggestions.is_empty() {
            did_you_mean(&needle, products.iter().map(|p| p.artist.as_str()))
        } else {
            None
        };

        Ok(AutocompleteResponse {
            query: query.to_string(),
            total: suggestions.len(),
            suggestions,
            did_you_mean,
        })
    }
}

/// Distinct artists then albums from stored products containing `needle`.
pub fn local_suggestions(products: &[Product], needle: &str) -> Vec<Suggestion> {
    let mut artists = Vec::new();
    let mut albums = Vec::new();
    let mut seen_artists = HashSet::new();
    let mut seen_albums = HashSet::new();

    for p in products {
        let artist = fold(&p.artist);
        if artists.len() < MAX_LOCAL_ARTISTS && artist.contains(needle) && seen_artists.insert(artist) {
            artists.push(Suggestion {
                kind: SuggestionKind::Artist,
                name: p.artist.clone(),
                source: p.source.clone(),
            });
        }
        let album = fold(&p.album);
        if albums.len() < MAX_LOCAL_ALBUMS && album.contains(needle) && seen_albums.insert(p.key()) {
            albums.push(Suggestion {
                kind: SuggestionKind::Album,
                name: format!("{} - {}", p.artist, p.album),
                source: p.source.clone(),
            });
        }
        if artists.len() == MAX_LOCAL_ARTISTS && albums.len() == MAX_LOCAL_ALBUMS {
            break;
        }
    }
    artists.extend(albums);
    artists
}

/// Closest known artist to a query that matched nothing.
pub fn did_you_mean<'a>(needle: &str, artists: impl Iterator<Item = &'a str>) -> Option<String> {
    let mut best: Option<(f64, &str)> = None;
    let mut seen = HashSet::new();
    for name in artists {
        let folded = fold(name);
        if !seen.insert(folded.clone()) {
            continue;
        }
        if folded.contains(needle) || needle.contains(folded.as_str()) {
            continue;
        }
        let score = strsim::normalized_levenshtein(needle, &folded);
        if score >= DID_YOU_MEAN_MIN_SIMILARITY && best.map_or(true, |(s, _)| score > s) {
            best = Some((score, name));
        }
    }
    best.map(|(_, name)| name.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Availability;
    use rust_decimal_macros::dec;

    fn product(artist: &str, album: &str) -> Product {
        Product {
            artist: artist.into(),
            album: album.into(),
            price: dec!(20),
            currency: "GBP".into(),
            link: "https://shop.example/p".into(),
            image: None,
            availability: Availability::InStock,
            source: "emp".into(),
            ean: None,
            rrp: None,
            colour: None,
        }
    }

    #[test]
    fn artists_before_albums_and_capped() {
        let items = vec![
            product("Radiohead", "OK Computer"),
            product("Radiohead", "Kid A"),
            product("Radio Birdman", "Radios Appear"),
            product("Radio Moscow", "Brain Cycles"),
            product("Radio Dept", "Pet Grief"),
        ];
        let s = local_suggestions(&items, "radio");
        let artists: Vec<_> = s.iter().filter(|s| s.kind == SuggestionKind::Artist).collect();
        assert_eq!(artists.len(), 3);
        assert_eq!(artists[0].name, "Radiohead");
        assert_eq!(s.last().unwrap().name, "Radio Birdman - Radios Appear");
    }

    #[test]
    fn did_you_mean_picks_closest_artist() {
        let artists = ["Radiohead", "Blur", "Portishead"];
        assert_eq!(
            did_you_mean("radiohaed", artists.iter().copied()).as_deref(),
            Some("Radiohead")
        );
        assert_eq!(did_you_mean("zzzz", artists.iter().copied()), None);
    }

    #[tokio::test]
    async fn short_query_is_rejected() {
        let ac = Autocomplete::new(Vec::new(), Duration::from_secs(1));
        assert_eq!(
            ac.suggest(" r ").await.unwrap_err(),
            SearchError::InvalidQuery("query must be at least 2 characters")
        );
    }
}
