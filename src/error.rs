//! Typed error taxonomy for the ingest, store and search paths.
//!
//! Row-level outcomes (skipped rows, rejected normalizations) are not errors;
//! they are counted in [`crate::ingest::IngestStats`].

use std::time::Duration;
use thiserror::Error;

/// Failures while retrieving a feed.
#[derive(Error, Debug)]
pub enum FetchError {
    #[error("feed fetch timed out after {0:?}")]
    Timeout(Duration),

    #[error("feed provider returned HTTP {status}")]
    Http { status: u16 },

    #[error("feed transport error: {0}")]
    Network(#[source] reqwest::Error),

    #[error("feed decompression failed: {0}")]
    Decompress(#[source] std::io::Error),
}

/// The feed header does not carry the columns a normalizer needs.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SchemaError {
    #[error("feed header is missing required column `{0}`")]
    MissingColumn(&'static str),

    #[error("feed ended before a header row was seen")]
    NoHeader,
}

/// Key-value backend and chunk assembly failures.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("backend error: {0}")]
    Backend(String),

    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("a single item of {size} bytes exceeds the {limit}-byte value ceiling")]
    ValueTooLarge { size: usize, limit: usize },

    #[error("chunk `{key}` listed in metadata is missing")]
    MissingChunk { key: String },
}

/// Failure of one source's ingestion run.
#[derive(Error, Debug)]
pub enum IngestError {
    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error(transparent)]
    Schema(#[from] SchemaError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("ingest task aborted: {0}")]
    Aborted(String),
}

/// Errors surfaced by a search request.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SearchError {
    #[error("invalid query: {0}")]
    InvalidQuery(&'static str),

    #[error("all {0} sources failed")]
    AllSourcesFailed(usize),
}
