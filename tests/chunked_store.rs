// tests/chunked_store.rs
//
// Chunked persistence: round trips across the chunk boundary and
// generation replacement over the in-memory backend.

use async_trait::async_trait;
use rand::Rng;
use rust_decimal::Decimal;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use vinyl_search::error::StoreError;
use vinyl_search::model::{Availability, Product};
use vinyl_search::store::memory::{KvOp, MemoryBackend};
use vinyl_search::store::{chunk_key, meta_key, ChunkedStore, KvBackend, WriteLayout};

const C: usize = 8;
const KEY: &str = "feed:emp";

fn word(rng: &mut impl Rng, n: usize) -> String {
    (0..n).map(|_| rng.random_range(b'a'..=b'z') as char).collect()
}

fn random_product(rng: &mut impl Rng, i: usize) -> Product {
    let album_len = rng.random_range(8..16);
    Product {
        artist: word(rng, 10),
        album: format!("{} {i:04}", word(rng, album_len)),
        price: Decimal::new(rng.random_range(500..5000), 2),
        currency: "GBP".into(),
        link: format!("https://shop.example/p/{i}"),
        image: None,
        availability: Availability::InStock,
        source: "emp".into(),
        ean: None,
        rrp: None,
        colour: None,
    }
}

fn products(n: usize, offset: usize) -> Vec<Product> {
    let mut rng = rand::rng();
    (0..n).map(|i| random_product(&mut rng, offset + i)).collect()
}

/// A ceiling that always fits `C` items but never the whole of `10 * C`.
fn value_limit() -> usize {
    let widest = serde_json::to_string(&[Product {
        artist: "x".repeat(10),
        album: format!("{} 999999", "x".repeat(15)),
        price: Decimal::new(4999, 2),
        ..random_product(&mut rand::rng(), 999_999)
    }])
    .unwrap()
    .len();
    C * widest
}

fn store(backend: &Arc<MemoryBackend>) -> ChunkedStore {
    ChunkedStore::with_limits(backend.clone(), C, value_limit())
}

#[tokio::test]
async fn round_trip_around_the_chunk_boundary() {
    for n in [0, 1, C, C + 1, 10 * C] {
        let backend = Arc::new(MemoryBackend::new());
        let store = store(&backend);
        let items = products(n, 0);

        let layout = store.write(KEY, &items).await.unwrap();
        match (n, layout) {
            (0 | 1 | C, WriteLayout::Direct) => {}
            (n, WriteLayout::Chunked(meta)) if n > C => {
                assert_eq!(meta.chunk_count, n.div_ceil(C));
                assert_eq!(meta.total_items, n);
            }
            (n, WriteLayout::Direct) if n == C + 1 => {}
            (n, other) => panic!("n={n}: unexpected layout {other:?}"),
        }
        assert_eq!(store.read(KEY).await.unwrap(), items, "n={n}");
    }
}

#[tokio::test]
async fn missing_key_reads_empty() {
    let backend = Arc::new(MemoryBackend::new());
    assert!(store(&backend).read("feed:nothing").await.unwrap().is_empty());
}

#[tokio::test]
async fn newer_generation_replaces_older_and_meta_is_written_last() {
    let backend = Arc::new(MemoryBackend::new());
    let store = store(&backend);

    let gen_a = products(10 * C, 0);
    assert!(matches!(store.write(KEY, &gen_a).await.unwrap(), WriteLayout::Chunked(_)));
    backend.clear_ops();

    let gen_b = products(3 * C, 10_000);
    let WriteLayout::Chunked(meta) = store.write(KEY, &gen_b).await.unwrap() else {
        panic!("generation B should be chunked");
    };
    assert_eq!(meta.chunk_count, 3);
    assert_eq!(meta.generation, 2);

    // a reader starting now sees exactly B
    assert_eq!(store.read(KEY).await.unwrap(), gen_b);

    let ops = backend.ops();
    let meta_at = ops
        .iter()
        .position(|op| *op == KvOp::Set(meta_key(KEY)))
        .expect("meta written");
    for i in 0..3 {
        let set_at = ops.iter().position(|op| *op == KvOp::Set(chunk_key(KEY, 2, i))).unwrap();
        assert!(set_at < meta_at, "chunk {i} must land before meta");
    }
    // generation A's chunks are never overwritten, only removed after the switch
    for i in 0..10 {
        assert!(!ops.contains(&KvOp::Set(chunk_key(KEY, 1, i))));
        let del_at = ops
            .iter()
            .position(|op| *op == KvOp::Del(chunk_key(KEY, 1, i)))
            .unwrap_or_else(|| panic!("stale chunk {i} not removed"));
        assert!(del_at > meta_at, "stale chunk {i} removed before meta switch");
        assert!(!backend.contains(&chunk_key(KEY, 1, i)));
    }
}

#[tokio::test]
async fn shrinking_to_direct_drops_chunks() {
    let backend = Arc::new(MemoryBackend::new());
    let store = store(&backend);

    store.write(KEY, &products(4 * C, 0)).await.unwrap();
    assert!(backend.contains(&meta_key(KEY)));

    let small = products(2, 500);
    assert_eq!(store.write(KEY, &small).await.unwrap(), WriteLayout::Direct);
    assert_eq!(backend.keys(), vec![KEY.to_string()]);
    assert_eq!(store.read(KEY).await.unwrap(), small);
}

#[tokio::test]
async fn gap_in_chunk_set_is_an_error() {
    let backend = Arc::new(MemoryBackend::new());
    let store = store(&backend);
    store.write(KEY, &products(3 * C, 0)).await.unwrap();

    backend.del(&chunk_key(KEY, 1, 1)).await.unwrap();
    let err = store.read(KEY).await.unwrap_err();
    assert!(err.to_string().contains(&chunk_key(KEY, 1, 1)), "{err}");
}

/// Backend that reads the whole collection back after every mutation, the
/// way a concurrent query would see it mid-write.
struct ReadingBackend {
    inner: Arc<MemoryBackend>,
    armed: AtomicBool,
    seen: parking_lot::Mutex<Vec<Vec<Product>>>,
}

impl ReadingBackend {
    async fn observe(&self) {
        if self.armed.load(Ordering::SeqCst) {
            let snapshot = ChunkedStore::new(self.inner.clone()).read(KEY).await.unwrap();
            self.seen.lock().push(snapshot);
        }
    }
}

#[async_trait]
impl KvBackend for ReadingBackend {
    fn max_value_bytes(&self) -> usize {
        self.inner.max_value_bytes()
    }

    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        self.inner.get(key).await
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.inner.set(key, value).await?;
        self.observe().await;
        Ok(())
    }

    async fn del(&self, key: &str) -> Result<(), StoreError> {
        self.inner.del(key).await?;
        self.observe().await;
        Ok(())
    }
}

#[tokio::test]
async fn readers_during_a_write_see_exactly_one_generation() {
    let backend = Arc::new(ReadingBackend {
        inner: Arc::new(MemoryBackend::new()),
        armed: AtomicBool::new(false),
        seen: parking_lot::Mutex::new(Vec::new()),
    });
    let store = ChunkedStore::with_limits(backend.clone(), C, value_limit());

    let gen_a = products(10 * C, 0);
    let gen_b = products(10 * C, 10_000);
    store.write(KEY, &gen_a).await.unwrap();

    backend.armed.store(true, Ordering::SeqCst);
    store.write(KEY, &gen_b).await.unwrap();

    let seen = backend.seen.lock().clone();
    assert!(seen.len() > 10, "a read after every mutation");
    for (n, snapshot) in seen.iter().enumerate() {
        assert!(
            *snapshot == gen_a || *snapshot == gen_b,
            "read {n} mixed generations ({} items)",
            snapshot.len()
        );
    }
    assert_eq!(seen.first(), Some(&gen_a));
    assert_eq!(seen.last(), Some(&gen_b));
}

/// Backend whose first fetch of a generation-1 chunk lets a writer replace
/// the whole collection before the fetch is answered.
struct SwitchingBackend {
    inner: Arc<MemoryBackend>,
    pending: parking_lot::Mutex<Option<Vec<Product>>>,
}

#[async_trait]
impl KvBackend for SwitchingBackend {
    fn max_value_bytes(&self) -> usize {
        self.inner.max_value_bytes()
    }

    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        if key == chunk_key(KEY, 1, 0) {
            let next = self.pending.lock().take();
            if let Some(items) = next {
                let writer = ChunkedStore::with_limits(self.inner.clone(), C, value_limit());
                writer.write(KEY, &items).await?;
            }
        }
        self.inner.get(key).await
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.inner.set(key, value).await
    }

    async fn del(&self, key: &str) -> Result<(), StoreError> {
        self.inner.del(key).await
    }
}

#[tokio::test]
async fn read_restarts_when_the_generation_moves_underneath() {
    let inner = Arc::new(MemoryBackend::new());
    let gen_a = products(3 * C, 0);
    ChunkedStore::with_limits(inner.clone(), C, value_limit())
        .write(KEY, &gen_a)
        .await
        .unwrap();

    let gen_b = products(2 * C, 500);
    let backend = Arc::new(SwitchingBackend {
        inner: inner.clone(),
        pending: parking_lot::Mutex::new(Some(gen_b.clone())),
    });
    let got = ChunkedStore::with_limits(backend.clone(), C, value_limit())
        .read(KEY)
        .await
        .unwrap();

    assert!(backend.pending.lock().is_none(), "the switch happened mid-read");
    assert!(!inner.contains(&chunk_key(KEY, 1, 0)));
    assert_eq!(got, gen_b);
}
