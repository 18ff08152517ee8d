// src/ingest/fetch.rs
//! Bounded-time feed download with streamed gzip decoding.
//!
//! Decoded bytes are handed to the caller block by block while the body is
//! still arriving, so nothing holds the whole feed in memory.

use flate2::write::GzDecoder;
use futures_util::StreamExt;
use std::io::{self, Write};
use std::ops::ControlFlow;
use std::time::Duration;
use tokio::time::Instant;

use crate::error::FetchError;
use crate::ingest::types::FEED_COLUMNS;

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

pub const DEFAULT_FEED_BASE_URL: &str = "https://productdata.awin.com";

/// Awin datafeed URL for one feed id, restricted to the columns the
/// normalizers read.
pub fn feed_url(base: &str, api_key: &str, feed_id: &str) -> String {
    format!(
        "{}/datafeed/download/apikey/{}/language/en/fid/{}/columns/{}/format/csv/delimiter/%2C/compression/gzip/",
        base.trim_end_matches('/'),
        api_key,
        feed_id,
        FEED_COLUMNS.join("%2C"),
    )
}

/// What a completed fetch transferred.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FetchSummary {
    /// Bytes received off the wire.
    pub wire_bytes: u64,
    /// Bytes handed to the consumer after decompression.
    pub decoded_bytes: u64,
    pub gzip: bool,
    /// The consumer asked to stop before the body ended.
    pub stopped_early: bool,
}

#[derive(Clone)]
pub struct FeedFetcher {
    client: reqwest::Client,
}

impl FeedFetcher {
    pub fn new() -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("vinyl-search/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { client })
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }

    /// Fetch `url` within `budget`, see [`FeedFetcher::fetch_until`].
    pub async fn fetch_with<F>(
        &self,
        url: &str,
        budget: Duration,
        on_chunk: F,
    ) -> Result<FetchSummary, FetchError>
    where
        F: FnMut(&[u8]) -> ControlFlow<()>,
    {
        self.fetch_until(url, Instant::now() + budget, on_chunk).await
    }

    /// Stream `url` into `on_chunk` until the body ends, the consumer breaks,
    /// or `deadline` passes. On timeout the request future is dropped, which
    /// aborts the transfer and releases the connection.
    pub async fn fetch_until<F>(
        &self,
        url: &str,
        deadline: Instant,
        on_chunk: F,
    ) -> Result<FetchSummary, FetchError>
    where
        F: FnMut(&[u8]) -> ControlFlow<()>,
    {
        let budget = deadline.saturating_duration_since(Instant::now());
        match tokio::time::timeout_at(deadline, self.stream(url, on_chunk)).await {
            Ok(res) => res,
            Err(_) => {
                tracing::warn!(target: "ingest", ?budget, "feed fetch deadline hit");
                Err(FetchError::Timeout(budget))
            }
        }
    }

    async fn stream<F>(&self, url: &str, on_chunk: F) -> Result<FetchSummary, FetchError>
    where
        F: FnMut(&[u8]) -> ControlFlow<()>,
    {
        let resp = self
            .client
            .get(url)
            .send()
            .await
            .map_err(FetchError::Network)?;

        let status = resp.status();
        if !status.is_success() {
            return Err(FetchError::Http {
                status: status.as_u16(),
            });
        }

        let mut decoder = BodyDecoder::new(on_chunk);
        let mut wire_bytes = 0u64;
        let mut body = resp.bytes_stream();
        while let Some(chunk) = body.next().await {
            let chunk = chunk.map_err(FetchError::Network)?;
            wire_bytes += chunk.len() as u64;
            decoder.push(&chunk).map_err(FetchError::Decompress)?;
            if decoder.stopped() {
                break;
            }
        }
        let mut summary = decoder.finish().map_err(FetchError::Decompress)?;
        summary.wire_bytes = wire_bytes;
        Ok(summary)
    }
}

/// `Write` adapter feeding decoded bytes to the consumer callback.
struct ChunkSink<F> {
    on_chunk: F,
    decoded: u64,
    stopped: bool,
}

impl<F: FnMut(&[u8]) -> ControlFlow<()>> Write for ChunkSink<F> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if !self.stopped && !buf.is_empty() {
            self.decoded += buf.len() as u64;
            if (self.on_chunk)(buf).is_break() {
                self.stopped = true;
            }
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

enum Mode<F: FnMut(&[u8]) -> ControlFlow<()>> {
    /// Fewer than two bytes seen; cannot tell gzip from plain yet.
    Sniffing(Vec<u8>, ChunkSink<F>),
    Plain(ChunkSink<F>),
    Gzip(GzDecoder<ChunkSink<F>>),
    Poisoned,
}

/// Push decoder choosing gzip or passthrough from the body's magic bytes.
pub(crate) struct BodyDecoder<F: FnMut(&[u8]) -> ControlFlow<()>> {
    mode: Mode<F>,
}

impl<F: FnMut(&[u8]) -> ControlFlow<()>> BodyDecoder<F> {
    pub(crate) fn new(on_chunk: F) -> Self {
        let sink = ChunkSink {
            on_chunk,
            decoded: 0,
            stopped: false,
        };
        Self {
            mode: Mode::Sniffing(Vec::with_capacity(2), sink),
        }
    }

    pub(crate) fn push(&mut self, bytes: &[u8]) -> io::Result<()> {
        match std::mem::replace(&mut self.mode, Mode::Poisoned) {
            Mode::Sniffing(mut head, sink) => {
                head.extend_from_slice(bytes);
                if head.len() < GZIP_MAGIC.len() {
                    self.mode = Mode::Sniffing(head, sink);
                    return Ok(());
                }
                self.mode = if head[..2] == GZIP_MAGIC {
                    Mode::Gzip(GzDecoder::new(sink))
                } else {
                    Mode::Plain(sink)
                };
                self.write_all(&head)
            }
            other => {
                self.mode = other;
                self.write_all(bytes)
            }
        }
    }

    fn write_all(&mut self, bytes: &[u8]) -> io::Result<()> {
        match &mut self.mode {
            Mode::Plain(sink) => sink.write_all(bytes),
            Mode::Gzip(gz) => gz.write_all(bytes),
            Mode::Sniffing(..) | Mode::Poisoned => Ok(()),
        }
    }

    pub(crate) fn stopped(&self) -> bool {
        match &self.mode {
            Mode::Sniffing(_, sink) | Mode::Plain(sink) => sink.stopped,
            Mode::Gzip(gz) => gz.get_ref().stopped,
            Mode::Poisoned => true,
        }
    }

    /// Flush whatever is buffered. A truncated gzip stream is an error unless
    /// the consumer already stopped reading.
    pub(crate) fn finish(self) -> io::Result<FetchSummary> {
        let summary = |sink: &ChunkSink<F>, gzip: bool| FetchSummary {
            wire_bytes: 0,
            decoded_bytes: sink.decoded,
            gzip,
            stopped_early: sink.stopped,
        };
        match self.mode {
            Mode::Sniffing(head, mut sink) => {
                sink.write_all(&head)?;
                Ok(summary(&sink, false))
            }
            Mode::Plain(sink) => Ok(summary(&sink, false)),
            Mode::Gzip(mut gz) => {
                let res = gz.try_finish();
                let sink = gz.get_ref();
                match res {
                    Err(e) if !sink.stopped => Err(e),
                    _ => Ok(summary(sink, true)),
                }
            }
            Mode::Poisoned => Err(io::Error::new(io::ErrorKind::Other, "decoder poisoned")),
        }
    }
}
