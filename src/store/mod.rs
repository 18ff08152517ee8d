// src/store/mod.rs
//! Chunked persistence of product collections over a key-value backend with a
//! per-value size ceiling.
//!
//! Layout for a collection stored under `key`:
//! - small collections: one JSON array under `key`;
//! - large ones: `key:{g}:0 .. key:{g}:{n-1}` JSON arrays for generation `g`
//!   plus `key:meta` (`{"generation", "chunkCount", "totalItems"}`).
//!
//! A new generation never touches the chunks the live `key:meta` points at.
//! Its chunks go to fresh keys, `key:meta` switches last, and only then is the
//! previous generation deleted. A reader sees one generation or the other.

pub mod memory;
pub mod upstash;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures_util::future::try_join_all;
use std::sync::Arc;

use crate::error::StoreError;
use crate::model::{ChunkMetadata, Product};

pub use memory::MemoryBackend;
pub use upstash::UpstashBackend;

pub const DEFAULT_CHUNK_ITEMS: usize = 5000;
pub const DEFAULT_VALUE_LIMIT: usize = 900_000;

/// Minimal string key-value store.
#[async_trait]
pub trait KvBackend: Send + Sync {
    /// Largest value, in bytes, a single `set` may carry.
    fn max_value_bytes(&self) -> usize;
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;
    async fn set(&self, key: &str, value: &str) -> Result<(), StoreError>;
    async fn del(&self, key: &str) -> Result<(), StoreError>;
}

pub fn meta_key(key: &str) -> String {
    format!("{key}:meta")
}

pub fn chunk_key(key: &str, generation: u64, index: usize) -> String {
    format!("{key}:{generation}:{index}")
}

/// Reads retried when the generation switched under them.
const READ_ATTEMPTS: usize = 3;

/// How a collection ended up being written.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteLayout {
    Direct,
    Chunked(ChunkMetadata),
}

#[derive(Clone)]
pub struct ChunkedStore {
    backend: Arc<dyn KvBackend>,
    chunk_items: usize,
    value_limit: usize,
}

impl ChunkedStore {
    pub fn new(backend: Arc<dyn KvBackend>) -> Self {
        Self::with_limits(backend, DEFAULT_CHUNK_ITEMS, DEFAULT_VALUE_LIMIT)
    }

    /// `value_limit` is clamped to what the backend accepts.
    pub fn with_limits(backend: Arc<dyn KvBackend>, chunk_items: usize, value_limit: usize) -> Self {
        let value_limit = value_limit.min(backend.max_value_bytes());
        Self {
            backend,
            chunk_items: chunk_items.max(1),
            value_limit,
        }
    }

    pub fn backend(&self) -> &Arc<dyn KvBackend> {
        &self.backend
    }

    pub fn value_limit(&self) -> usize {
        self.value_limit
    }

    pub async fn write(&self, key: &str, items: &[Product]) -> Result<WriteLayout, StoreError> {
        let previous = self.read_meta(key).await?;
        let whole = serde_json::to_string(items)?;

        if items.is_empty() || whole.len() <= self.value_limit {
            self.backend.set(key, &whole).await?;
            if let Some(prev) = previous {
                self.backend.del(&meta_key(key)).await?;
                self.remove_generation(key, &prev).await?;
            }
            tracing::debug!(target: "store", key, bytes = whole.len(), items = items.len(), "wrote direct");
            return Ok(WriteLayout::Direct);
        }
        drop(whole);

        let slices = self.split(items)?;
        let generation = previous.map_or(1, |p| p.generation.wrapping_add(1));
        for (i, slice) in slices.iter().enumerate() {
            self.backend.set(&chunk_key(key, generation, i), slice).await?;
        }
        let meta = ChunkMetadata {
            generation,
            chunk_count: slices.len(),
            total_items: items.len(),
        };
        self.backend
            .set(&meta_key(key), &serde_json::to_string(&meta)?)
            .await?;

        // New generation is visible; drop what the old one left behind.
        self.backend.del(key).await?;
        if let Some(prev) = previous {
            self.remove_generation(key, &prev).await?;
        }

        tracing::info!(
            target: "store",
            key,
            generation,
            chunks = meta.chunk_count,
            items = meta.total_items,
            "wrote chunked"
        );
        Ok(WriteLayout::Chunked(meta))
    }

    /// Serialized slices, halving the slice size until every one fits.
    fn split(&self, items: &[Product]) -> Result<Vec<String>, StoreError> {
        let mut size = self.chunk_items.min(items.len()).max(1);
        loop {
            let mut out = Vec::with_capacity(items.len().div_ceil(size));
            let mut oversize = None;
            for slice in items.chunks(size) {
                let json = serde_json::to_string(slice)?;
                if json.len() > self.value_limit {
                    oversize = Some(json.len());
                    break;
                }
                out.push(json);
            }
            match oversize {
                None => return Ok(out),
                Some(bytes) if size == 1 => {
                    return Err(StoreError::ValueTooLarge {
                        size: bytes,
                        limit: self.value_limit,
                    })
                }
                Some(_) => size = (size / 2).max(1),
            }
        }
    }

    async fn remove_generation(&self, key: &str, meta: &ChunkMetadata) -> Result<(), StoreError> {
        for i in 0..meta.chunk_count {
            self.backend.del(&chunk_key(key, meta.generation, i)).await?;
        }
        Ok(())
    }

    async fn read_meta(&self, key: &str) -> Result<Option<ChunkMetadata>, StoreError> {
        match self.backend.get(&meta_key(key)).await? {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    /// A chunk vanishing mid-read means a newer generation replaced the one
    /// being read; the read starts over from the new metadata.
    pub async fn read(&self, key: &str) -> Result<Vec<Product>, StoreError> {
        let mut attempt = 1;
        loop {
            let Some(meta) = self.read_meta(key).await? else {
                return match self.backend.get(key).await? {
                    Some(raw) => Ok(serde_json::from_str(&raw)?),
                    None => Ok(Vec::new()),
                };
            };
            let res = self.read_generation(key, &meta).await;
            let torn = matches!(res, Err(StoreError::MissingChunk { .. }));
            if torn && attempt < READ_ATTEMPTS && self.read_meta(key).await? != Some(meta) {
                tracing::debug!(target: "store", key, generation = meta.generation, "generation replaced during read");
                attempt += 1;
                continue;
            }
            return res;
        }
    }

    async fn read_generation(&self, key: &str, meta: &ChunkMetadata) -> Result<Vec<Product>, StoreError> {
        let fetches = (0..meta.chunk_count).map(|i| {
            let ck = chunk_key(key, meta.generation, i);
            async move {
                match self.backend.get(&ck).await? {
                    Some(raw) => Ok(serde_json::from_str::<Vec<Product>>(&raw)?),
                    None => Err(StoreError::MissingChunk { key: ck }),
                }
            }
        });
        let chunks = try_join_all(fetches).await?;

        let mut out = Vec::with_capacity(meta.total_items);
        for c in chunks {
            out.extend(c);
        }
        if out.len() != meta.total_items {
            tracing::warn!(
                target: "store",
                key,
                expected = meta.total_items,
                actual = out.len(),
                "chunked read total mismatch"
            );
        }
        Ok(out)
    }

    pub async fn write_timestamp(&self, key: &str, at: DateTime<Utc>) -> Result<(), StoreError> {
        self.backend.set(key, &at.to_rfc3339()).await
    }

    /// Unparseable timestamps read as absent.
    pub async fn read_timestamp(&self, key: &str) -> Result<Option<DateTime<Utc>>, StoreError> {
        let raw = self.backend.get(key).await?;
        Ok(raw.and_then(|s| {
            DateTime::parse_from_rfc3339(s.trim().trim_matches('"'))
                .map(|t| t.with_timezone(&Utc))
                .ok()
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Availability;
    use rust_decimal_macros::dec;

    fn product(i: usize) -> Product {
        Product {
            artist: format!("Artist {i}"),
            album: format!("Album {i}"),
            price: dec!(10.00),
            currency: "GBP".into(),
            link: format!("https://shop.example/{i}"),
            image: None,
            availability: Availability::InStock,
            source: "emp".into(),
            ean: None,
            rrp: None,
            colour: None,
        }
    }

    #[tokio::test]
    async fn small_collection_is_direct() {
        let backend = Arc::new(MemoryBackend::new());
        let store = ChunkedStore::new(backend.clone());
        let items: Vec<_> = (0..3).map(product).collect();
        assert_eq!(store.write("feed:emp", &items).await.unwrap(), WriteLayout::Direct);
        assert!(backend.contains("feed:emp"));
        assert_eq!(store.read("feed:emp").await.unwrap(), items);
    }

    #[tokio::test]
    async fn halving_until_slices_fit() {
        let one = serde_json::to_string(&[product(0)]).unwrap().len();
        let backend = Arc::new(MemoryBackend::with_limit(one * 3));
        let store = ChunkedStore::with_limits(backend, 100, usize::MAX);
        let items: Vec<_> = (0..10).map(product).collect();
        match store.write("k", &items).await.unwrap() {
            WriteLayout::Chunked(meta) => {
                assert!(meta.chunk_count >= 4);
                assert_eq!(meta.total_items, 10);
            }
            other => panic!("expected chunked, got {other:?}"),
        }
        assert_eq!(store.read("k").await.unwrap(), items);
    }

    #[tokio::test]
    async fn single_oversized_item_is_rejected() {
        let backend = Arc::new(MemoryBackend::with_limit(20));
        let store = ChunkedStore::new(backend);
        let err = store.write("k", &[product(0), product(1)]).await.unwrap_err();
        assert!(matches!(err, StoreError::ValueTooLarge { limit: 20, .. }));
    }

    #[tokio::test]
    async fn timestamp_round_trip_and_garbage() {
        let backend = Arc::new(MemoryBackend::new());
        let store = ChunkedStore::new(backend.clone());
        let t = DateTime::parse_from_rfc3339("2024-05-01T10:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        store.write_timestamp("feed:updated", t).await.unwrap();
        assert_eq!(store.read_timestamp("feed:updated").await.unwrap(), Some(t));
        backend.set("feed:updated", "yesterday").await.unwrap();
        assert_eq!(store.read_timestamp("feed:updated").await.unwrap(), None);
    }
}
