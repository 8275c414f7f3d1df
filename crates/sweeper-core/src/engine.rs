use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info};

use crate::activity::{ActivityEvent, ActivityKind};
use crate::analysis::Heuristics;
use crate::batcher::{BatchSink, BatcherStats, EventBatcher};
use crate::brain::HttpSuggestionProvider;
use crate::config::AppConfig;
use crate::error::{Error, Result};
use crate::executor::CleanupExecutor;
use crate::journal::{self, JournalReader, JournalSource, ReaderStats};
use crate::orchestrator::Orchestrator;
use crate::storage::Database;

/// Wires reader, batcher and orchestrator for one volume.
pub struct MonitorEngine {
    config: AppConfig,
    heuristics: Arc<Heuristics>,
    orchestrator: Arc<Orchestrator>,
    cancel: Arc<AtomicBool>,
}

#[derive(Debug)]
pub struct MonitorStats {
    pub reader: ReaderStats,
    pub batcher: BatcherStats,
    pub duration: Duration,
}

impl MonitorEngine {
    pub fn new(config: AppConfig) -> Result<Self> {
        let heuristics = Arc::new(Heuristics::from_config(&config));
        let cancel = Arc::new(AtomicBool::new(false));

        let mut orchestrator = Orchestrator::new(&config, heuristics.clone())
            .with_executor(CleanupExecutor::new(cancel.clone()));

        if let Some(url) = &config.brain.url {
            let provider = HttpSuggestionProvider::new(url, config.brain.timeout())
                .map_err(|e| Error::Other(format!("Suggestion client: {}", e)))?;
            orchestrator = orchestrator.with_brain(Arc::new(provider));
            info!("Suggestion service: {}", url);
        } else {
            info!("No suggestion service configured, using local heuristics");
        }

        if let Some(path) = &config.report_db {
            let db = Database::open(path)?;
            orchestrator = orchestrator.with_report_store(Arc::new(Mutex::new(db)));
            debug!("Cleanup reports stored in {}", path);
        }

        Ok(Self {
            config,
            heuristics,
            orchestrator: Arc::new(orchestrator),
            cancel,
        })
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn orchestrator(&self) -> Arc<Orchestrator> {
        self.orchestrator.clone()
    }

    pub fn cancel_token(&self) -> Arc<AtomicBool> {
        self.cancel.clone()
    }

    pub fn shutdown(&self) {
        info!("Shutdown requested");
        self.cancel.store(true, Ordering::Relaxed);
    }

    /// Watch the configured volume until cancelled.
    pub async fn watch_volume(&self) -> Result<MonitorStats> {
        let source = journal::open_volume(&self.config.volume, &self.config.journal)?;
        self.run(source).await
    }

    /// Run the pipeline over `source` until cancelled or the reader stops.
    ///
    /// A journal that cannot be queried fails here; everything after that is
    /// retried or logged by the stages themselves.
    pub async fn run<S: JournalSource>(&self, source: S) -> Result<MonitorStats> {
        let start = Instant::now();
        let reader = JournalReader::new(source, self.config.journal.clone());
        let (rx, handle) = reader.start(self.cancel.clone())?;

        self.orchestrator.activity().publish(ActivityEvent::new(
            ActivityKind::Monitor,
            format!("volume:{}", self.config.volume),
            "Monitoring started",
        ));

        let batcher = EventBatcher::new(self.config.batcher.clone(), self.heuristics.clone());
        let sink: Arc<dyn BatchSink> = self.orchestrator.clone();
        let batcher_stats = batcher.run(rx, sink).await;

        let reader_stats = tokio::task::spawn_blocking(move || handle.join())
            .await
            .map_err(|e| Error::Other(format!("Reader join failed: {}", e)))?;

        let duration = start.elapsed();
        self.orchestrator.activity().publish(
            ActivityEvent::new(
                ActivityKind::Monitor,
                format!("volume:{}", self.config.volume),
                "Monitoring stopped",
            )
            .with_meta("records", reader_stats.records_emitted)
            .with_meta("cursor", reader_stats.final_cursor),
        );
        info!(
            "Monitor stopped after {:.2}s: {} records read, {} batches dispatched",
            duration.as_secs_f64(),
            reader_stats.records_emitted,
            batcher_stats.batches_dispatched
        );

        Ok(MonitorStats {
            reader: reader_stats,
            batcher: batcher_stats,
            duration,
        })
    }
}
