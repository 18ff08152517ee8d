// src/search/matcher.rs
//! Query normalization and the per-candidate relevance filter.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;

use crate::error::SearchError;
use crate::model::fold;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryShape {
    SingleTerm,
    MultiTerm,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Query {
    raw: String,
    normalized: String,
    shape: QueryShape,
}

impl Query {
    /// Lowercase, trim and collapse whitespace. Blank input is rejected.
    pub fn parse(raw: &str) -> Result<Self, SearchError> {
        let normalized = fold(raw);
        if normalized.is_empty() {
            return Err(SearchError::InvalidQuery("search query required"));
        }
        let shape = if normalized.contains(' ') {
            QueryShape::MultiTerm
        } else {
            QueryShape::SingleTerm
        };
        Ok(Self {
            raw: raw.trim().to_string(),
            normalized,
            shape,
        })
    }

    pub fn raw(&self) -> &str {
        &self.raw
    }

    pub fn normalized(&self) -> &str {
        &self.normalized
    }

    pub fn shape(&self) -> QueryShape {
        self.shape
    }

    pub fn terms(&self) -> impl Iterator<Item = &str> {
        self.normalized.split(' ')
    }
}

fn default_conjunctions() -> Vec<String> {
    ["&", "and", "featuring", "feat.", "feat", "ft.", "ft", "/", ",", "+", "x", "with", "vs", "vs."]
        .into_iter()
        .map(String::from)
        .collect()
}

/// Matching strictness knobs.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MatchConfig {
    /// Tokens allowed right after a prefix match (`Pink Floyd & Syd Barrett`).
    pub conjunctions: Vec<String>,
    /// Single-term queries also match a whole word of the artist name.
    pub single_term_whole_word: bool,
    /// Drop tribute/cover/various-artists candidates unless asked for.
    pub exclude_tributes: bool,
}

impl Default for MatchConfig {
    fn default() -> Self {
        Self {
            conjunctions: default_conjunctions(),
            single_term_whole_word: true,
            exclude_tributes: true,
        }
    }
}

static TRIBUTE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\b(tribute|covers?|lullaby renditions|rockabye baby|various artists?|various)\b")
        .expect("tribute regex")
});

fn strip_the(s: &str) -> &str {
    s.strip_prefix("the ").unwrap_or(s)
}

#[derive(Debug, Clone, Default)]
pub struct Matcher {
    cfg: MatchConfig,
}

impl Matcher {
    pub fn new(cfg: MatchConfig) -> Self {
        Self { cfg }
    }

    pub fn config(&self) -> &MatchConfig {
        &self.cfg
    }

    pub fn artist_matches(&self, q: &Query, artist: &str) -> bool {
        let artist = fold(artist);
        let query = q.normalized();

        if artist == query || strip_the(&artist) == strip_the(query) {
            return true;
        }

        let candidates = [artist.as_str(), strip_the(&artist)];
        let queries = [query, strip_the(query)];
        for a in candidates {
            for qq in queries {
                if let Some(rest) = a.strip_prefix(qq) {
                    if self.is_conjunction_tail(rest) {
                        return true;
                    }
                }
            }
        }

        self.cfg.single_term_whole_word
            && q.shape() == QueryShape::SingleTerm
            && artist
                .split(|c: char| !c.is_alphanumeric() && c != '\'')
                .any(|w| w == query)
    }

    /// `rest` is what follows a prefix match: accepted when empty or when it
    /// opens with a conjunction token.
    fn is_conjunction_tail(&self, rest: &str) -> bool {
        if rest.is_empty() {
            return true;
        }
        let spaced = rest.starts_with(' ');
        let tail = rest.trim_start();
        self.cfg.conjunctions.iter().any(|c| {
            let Some(after) = tail.strip_prefix(c.as_str()) else {
                return false;
            };
            let symbol = !c.chars().any(char::is_alphanumeric);
            if symbol {
                true
            } else {
                spaced && (after.is_empty() || after.starts_with(' '))
            }
        })
    }

    pub fn album_matches(&self, q: &Query, album: &str) -> bool {
        fold(album).contains(q.normalized())
    }

    fn is_tribute(&self, q: &Query, artist: &str, album: &str) -> bool {
        if !self.cfg.exclude_tributes || TRIBUTE.is_match(q.normalized()) {
            return false;
        }
        TRIBUTE.is_match(&fold(artist)) || TRIBUTE.is_match(&fold(album))
    }

    /// Multi-term queries need an artist match; single-term ones also accept
    /// album containment.
    pub fn is_relevant(&self, q: &Query, artist: &str, album: &str) -> bool {
        if self.is_tribute(q, artist, album) {
            return false;
        }
        if self.artist_matches(q, artist) {
            return true;
        }
        q.shape() == QueryShape::SingleTerm && self.album_matches(q, album)
    }
}
