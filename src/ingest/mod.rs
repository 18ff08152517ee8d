// src/ingest/mod.rs
pub mod csv_stream;
pub mod fetch;
pub mod normalize;
pub mod providers;
pub mod scheduler;
pub mod types;

use chrono::{DateTime, Utc};
use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use once_cell::sync::OnceCell;
use serde::Serialize;
use std::collections::BTreeMap;
use std::ops::ControlFlow;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::config::{AppConfig, SourceCfg};
use crate::error::{IngestError, SchemaError};
use crate::ingest::csv_stream::CsvStreamParser;
use crate::ingest::fetch::{feed_url, FeedFetcher};
use crate::ingest::types::{ColumnMap, SourceNormalizer};
use crate::model::Product;
use crate::store::{ChunkedStore, WriteLayout};

pub const UPDATED_KEY: &str = "feed:updated";

/// One-time metrics registration (so series show up on /metrics).
fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!("ingest_rows_total", "Feed rows parsed.");
        describe_counter!("ingest_rows_skipped_total", "Rows dropped for a field-count mismatch.");
        describe_counter!("ingest_kept_total", "Rows that became products.");
        describe_counter!("ingest_rejected_total", "Rows rejected by a normalizer, by reason.");
        describe_counter!(
            "ingest_schema_missing_columns",
            "Requested optional columns absent from a feed header."
        );
        describe_counter!("ingest_source_errors_total", "Failed source ingestions.");
        describe_histogram!("ingest_source_ms", "Per-source ingestion time in milliseconds.");
        describe_gauge!("ingest_pipeline_last_run_ts", "Unix ts when ingest pipeline last ran.");
    });
}

/// Row-level counters for one source run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestStats {
    pub rows: u64,
    pub skipped_rows: u64,
    pub kept: u64,
    pub rejected: BTreeMap<&'static str, u64>,
    pub missing_columns: Vec<&'static str>,
    pub wire_bytes: u64,
    pub decoded_bytes: u64,
}

/// Parser → typed row → normalizer, fed incrementally with decoded bytes.
pub struct RowPipeline<'a> {
    normalizer: &'a dyn SourceNormalizer,
    parser: CsvStreamParser,
    columns: Option<ColumnMap>,
    schema_error: Option<SchemaError>,
    products: Vec<Product>,
    stats: IngestStats,
}

impl<'a> RowPipeline<'a> {
    pub fn new(normalizer: &'a dyn SourceNormalizer) -> Self {
        Self {
            normalizer,
            parser: CsvStreamParser::new(),
            columns: None,
            schema_error: None,
            products: Vec::new(),
            stats: IngestStats::default(),
        }
    }

    /// Breaks once the header proved unusable; nothing after it matters.
    pub fn push(&mut self, bytes: &[u8]) -> ControlFlow<()> {
        if self.schema_error.is_some() {
            return ControlFlow::Break(());
        }
        self.parser.push(bytes);
        self.drain()
    }

    fn drain(&mut self) -> ControlFlow<()> {
        while let Some(rec) = self.parser.next_row() {
            if self.columns.is_none() {
                match ColumnMap::resolve(rec.header()) {
                    Ok((map, missing)) => {
                        if !missing.is_empty() {
                            counter!("ingest_schema_missing_columns", "source" => self.normalizer.source().to_string())
                                .increment(missing.len() as u64);
                            tracing::info!(
                                target: "ingest",
                                source = self.normalizer.source(),
                                ?missing,
                                "feed lacks optional columns"
                            );
                        }
                        self.stats.missing_columns = missing;
                        self.columns = Some(map);
                    }
                    Err(e) => {
                        self.schema_error = Some(e);
                        return ControlFlow::Break(());
                    }
                }
            }
            let Some(columns) = &self.columns else {
                return ControlFlow::Break(());
            };

            self.stats.rows += 1;
            let row = columns.row(&rec);
            match self.normalizer.evaluate(&row) {
                Ok(p) => {
                    self.stats.kept += 1;
                    self.products.push(p);
                }
                Err(why) => *self.stats.rejected.entry(why.as_str()).or_default() += 1,
            }
        }
        ControlFlow::Continue(())
    }

    pub fn finish(mut self) -> Result<(Vec<Product>, IngestStats), SchemaError> {
        if let Some(e) = self.schema_error.take() {
            return Err(e);
        }
        self.parser.finish();
        let _ = self.drain();
        if let Some(e) = self.schema_error.take() {
            return Err(e);
        }
        // A header-only feed resolves its columns via the parser's header.
        if self.columns.is_none() {
            match self.parser.header() {
                Some(h) => {
                    ColumnMap::resolve(h)?;
                }
                None => return Err(SchemaError::NoHeader),
            }
        }
        self.stats.skipped_rows = self.parser.stats().skipped;
        Ok((self.products, self.stats))
    }
}

/// Outcome of one source in a run.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum SourceStatus {
    Ok {
        stats: IngestStats,
        chunks: usize,
        ms: u64,
    },
    Failed {
        error: String,
    },
}

impl SourceStatus {
    pub fn is_ok(&self) -> bool {
        matches!(self, SourceStatus::Ok { .. })
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestReport {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub sources: BTreeMap<String, SourceStatus>,
    /// `feed:updated` value written by this run, if any source succeeded.
    pub updated: Option<DateTime<Utc>>,
}

/// Fetch, parse, normalize and store one source.
pub async fn ingest_source(
    fetcher: &FeedFetcher,
    store: &ChunkedStore,
    src: &SourceCfg,
    url: &str,
    budget: Duration,
) -> Result<(IngestStats, WriteLayout), IngestError> {
    let rules = src
        .normalizer_rules()
        .map_err(|e| IngestError::Aborted(format!("{e:#}")))?;
    let normalizer = providers::normalizer_for(&src.name, &src.currency, rules)
        .ok_or_else(|| IngestError::Aborted(format!("no normalizer for source `{}`", src.name)))?;

    let mut pipe = RowPipeline::new(normalizer.as_ref());
    let summary = fetcher.fetch_with(url, budget, |b| pipe.push(b)).await?;
    let (products, mut stats) = pipe.finish()?;
    stats.wire_bytes = summary.wire_bytes;
    stats.decoded_bytes = summary.decoded_bytes;

    let layout = store.write(&src.store_key(), &products).await?;
    Ok((stats, layout))
}

fn record_stats(source: &str, stats: &IngestStats) {
    let label = source.to_string();
    counter!("ingest_rows_total", "source" => label.clone()).increment(stats.rows);
    counter!("ingest_rows_skipped_total", "source" => label.clone()).increment(stats.skipped_rows);
    counter!("ingest_kept_total", "source" => label.clone()).increment(stats.kept);
    for (reason, n) in &stats.rejected {
        counter!("ingest_rejected_total", "source" => label.clone(), "reason" => *reason).increment(*n);
    }
}

/// Run every enabled source concurrently, one task each. A failing or
/// panicking source only marks itself failed. `feed:updated` is written when
/// at least one source succeeded.
pub async fn run_once(
    cfg: &AppConfig,
    api_key: &str,
    fetcher: &FeedFetcher,
    store: &ChunkedStore,
) -> IngestReport {
    ensure_metrics_described();
    let started_at = Utc::now();
    let budget = cfg.ingest.fetch_timeout();

    let mut handles = Vec::new();
    for src in cfg.enabled_sources() {
        let src = Arc::new(src.clone());
        let url = feed_url(&cfg.ingest.feed_base_url, api_key, &src.feed_id);
        let fetcher = fetcher.clone();
        let store = store.clone();
        let task_src = src.clone();
        let handle = tokio::spawn(async move {
            let t0 = Instant::now();
            let res = ingest_source(&fetcher, &store, &task_src, &url, budget).await;
            (res, t0.elapsed())
        });
        handles.push((src, handle));
    }

    let mut sources = BTreeMap::new();
    for (src, handle) in handles {
        let status = match handle.await {
            Ok((Ok((stats, layout)), took)) => {
                let ms = took.as_millis() as u64;
                histogram!("ingest_source_ms", "source" => src.name.clone()).record(ms as f64);
                record_stats(&src.name, &stats);
                tracing::info!(
                    target: "ingest",
                    source = %src.name,
                    rows = stats.rows,
                    kept = stats.kept,
                    skipped = stats.skipped_rows,
                    ms,
                    "source ingested"
                );
                SourceStatus::Ok {
                    chunks: match layout {
                        WriteLayout::Direct => 0,
                        WriteLayout::Chunked(meta) => meta.chunk_count,
                    },
                    stats,
                    ms,
                }
            }
            Ok((Err(e), _)) => {
                counter!("ingest_source_errors_total", "source" => src.name.clone()).increment(1);
                tracing::warn!(target: "ingest", source = %src.name, error = %e, "source failed");
                SourceStatus::Failed { error: e.to_string() }
            }
            Err(join) => {
                counter!("ingest_source_errors_total", "source" => src.name.clone()).increment(1);
                tracing::error!(target: "ingest", source = %src.name, error = %join, "source task aborted");
                SourceStatus::Failed {
                    error: IngestError::Aborted(join.to_string()).to_string(),
                }
            }
        };
        sources.insert(src.name.clone(), status);
    }

    let mut updated = None;
    if sources.values().any(SourceStatus::is_ok) {
        let now = Utc::now();
        match store.write_timestamp(UPDATED_KEY, now).await {
            Ok(()) => updated = Some(now),
            Err(e) => tracing::warn!(target: "ingest", error = %e, "could not write feed:updated"),
        }
    }
    gauge!("ingest_pipeline_last_run_ts").set(Utc::now().timestamp().max(0) as f64);

    IngestReport {
        started_at,
        finished_at: Utc::now(),
        sources,
        updated,
    }
}
