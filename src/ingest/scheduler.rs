// src/ingest/scheduler.rs
use metrics::{counter, describe_counter};
use parking_lot::RwLock;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::config::AppConfig;
use crate::ingest::fetch::FeedFetcher;
use crate::ingest::{run_once, IngestReport};
use crate::store::ChunkedStore;

type ReportHook = Box<dyn Fn(&IngestReport) + Send + Sync>;

/// Owns everything an ingestion run needs. Runs are serialized so each
/// collection key keeps a single writer; the scheduler and `/admin/refresh`
/// share one runner.
pub struct IngestRunner {
    cfg: Arc<AppConfig>,
    api_key: String,
    fetcher: FeedFetcher,
    store: ChunkedStore,
    running: tokio::sync::Mutex<()>,
    last: RwLock<Option<IngestReport>>,
    hooks: Vec<ReportHook>,
}

impl IngestRunner {
    pub fn new(cfg: Arc<AppConfig>, api_key: &str, fetcher: FeedFetcher, store: ChunkedStore) -> Self {
        Self {
            cfg,
            api_key: api_key.to_string(),
            fetcher,
            store,
            running: tokio::sync::Mutex::new(()),
            last: RwLock::new(None),
            hooks: Vec::new(),
        }
    }

    /// Called after every run, e.g. to drop read caches.
    pub fn on_report<F>(mut self, hook: F) -> Self
    where
        F: Fn(&IngestReport) + Send + Sync + 'static,
    {
        self.hooks.push(Box::new(hook));
        self
    }

    pub async fn run(&self) -> IngestReport {
        static DESCRIBED: once_cell::sync::OnceCell<()> = once_cell::sync::OnceCell::new();
        DESCRIBED.get_or_init(|| describe_counter!("ingest_runs_total", "Completed ingestion runs."));

        let _guard = self.running.lock().await;
        let report = run_once(&self.cfg, &self.api_key, &self.fetcher, &self.store).await;
        counter!("ingest_runs_total").increment(1);

        let failed = report.sources.values().filter(|s| !s.is_ok()).count();
        tracing::info!(
            target: "ingest",
            sources = report.sources.len(),
            failed,
            updated = report.updated.is_some(),
            "ingest run finished"
        );

        *self.last.write() = Some(report.clone());
        for hook in &self.hooks {
            hook(&report);
        }
        report
    }

    pub fn last_report(&self) -> Option<IngestReport> {
        self.last.read().clone()
    }
}

/// Tick `runner` every `every`. A zero interval disables scheduling. Unless
/// `run_on_start`, the first run happens one interval after startup.
pub fn spawn_scheduler(
    runner: Arc<IngestRunner>,
    every: Duration,
    run_on_start: bool,
) -> Option<JoinHandle<()>> {
    if every.is_zero() {
        tracing::info!(target: "ingest", "scheduled ingestion disabled");
        return None;
    }
    Some(tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        if !run_on_start {
            // interval yields immediately on the first tick
            ticker.tick().await;
        }
        loop {
            ticker.tick().await;
            runner.run().await;
        }
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::MemoryBackend;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn runner_without_sources() -> IngestRunner {
        let cfg = AppConfig::default();
        let fetcher = FeedFetcher::with_client(reqwest::Client::new());
        let store = ChunkedStore::new(Arc::new(MemoryBackend::new()));
        IngestRunner::new(Arc::new(cfg), "key", fetcher, store)
    }

    #[tokio::test]
    async fn zero_interval_disables_scheduling() {
        let runner = Arc::new(runner_without_sources());
        assert!(spawn_scheduler(runner, Duration::ZERO, true).is_none());
    }

    #[tokio::test]
    async fn run_keeps_last_report_and_calls_hooks() {
        let calls = Arc::new(AtomicUsize::new(0));
        let seen = calls.clone();
        let runner = runner_without_sources().on_report(move |_| {
            seen.fetch_add(1, Ordering::SeqCst);
        });
        assert!(runner.last_report().is_none());

        let report = runner.run().await;
        assert!(report.sources.is_empty());
        // nothing succeeded, so no timestamp
        assert!(report.updated.is_none());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(runner.last_report().is_some());
    }

    #[tokio::test]
    async fn scheduler_runs_on_start_when_asked() {
        let calls = Arc::new(AtomicUsize::new(0));
        let seen = calls.clone();
        let runner = Arc::new(runner_without_sources().on_report(move |_| {
            seen.fetch_add(1, Ordering::SeqCst);
        }));
        let handle = spawn_scheduler(runner, Duration::from_secs(60), true).unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        handle.abort();
    }
}
