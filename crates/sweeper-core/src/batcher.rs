//! Time-or-count windowing of raw change records.
//!
//! A window opens on its first record and flushes when it holds
//! `max_events` records or when `window` has elapsed since it opened,
//! whichever comes first. Empty windows never flush. Flushed batches are
//! filtered for significance and handed to a [`BatchSink`] on their own task,
//! so a slow or failing consumer never stalls ingestion.

use async_trait::async_trait;
use std::future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, error, info};

use crate::analysis::Heuristics;
use crate::config::BatcherConfig;
use crate::error::Result;
use crate::journal::ChangeRecord;

/// Buffer of records collected since the window opened.
#[derive(Debug)]
pub struct EventWindow {
    records: Vec<ChangeRecord>,
    opened_at: Option<Instant>,
    window: Duration,
    max_events: usize,
}

impl EventWindow {
    pub fn new(window: Duration, max_events: usize) -> Self {
        Self {
            records: Vec::new(),
            opened_at: None,
            window,
            max_events: max_events.max(1),
        }
    }

    pub fn from_config(config: &BatcherConfig) -> Self {
        Self::new(config.window(), config.max_events)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Add a record; returns the full window when it hits the ceiling.
    pub fn push(&mut self, record: ChangeRecord, now: Instant) -> Option<Vec<ChangeRecord>> {
        if self.records.is_empty() {
            self.opened_at = Some(now);
        }
        self.records.push(record);
        if self.records.len() >= self.max_events {
            self.take()
        } else {
            None
        }
    }

    /// Returns the window once its time budget has run out.
    pub fn poll(&mut self, now: Instant) -> Option<Vec<ChangeRecord>> {
        match self.deadline() {
            Some(deadline) if now >= deadline => self.take(),
            _ => None,
        }
    }

    /// When a non-empty window is due, if it is open.
    pub fn deadline(&self) -> Option<Instant> {
        self.opened_at.map(|opened| opened + self.window)
    }

    pub fn take(&mut self) -> Option<Vec<ChangeRecord>> {
        self.opened_at = None;
        if self.records.is_empty() {
            None
        } else {
            Some(std::mem::take(&mut self.records))
        }
    }
}

/// One flushed window: the non-ignored raw records plus the significant subset.
#[derive(Debug, Clone)]
pub struct EventBatch {
    pub records: Vec<ChangeRecord>,
    pub significant: Vec<ChangeRecord>,
}

impl EventBatch {
    pub fn from_window(records: Vec<ChangeRecord>, heuristics: &Heuristics) -> Self {
        let records: Vec<ChangeRecord> = records
            .into_iter()
            .filter(|r| !heuristics.is_ignored(&r.full_path))
            .collect();
        let significant = records
            .iter()
            .filter(|r| heuristics.is_significant(r))
            .cloned()
            .collect();
        Self {
            records,
            significant,
        }
    }

    pub fn is_significant(&self) -> bool {
        !self.significant.is_empty()
    }
}

/// Consumer of significant batches.
#[async_trait]
pub trait BatchSink: Send + Sync {
    async fn handle_batch(&self, batch: EventBatch) -> Result<()>;
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatcherStats {
    pub records_received: u64,
    pub batches_dispatched: u64,
    pub batches_dropped: u64,
    pub sink_failures: u64,
}

pub struct EventBatcher {
    config: BatcherConfig,
    heuristics: Arc<Heuristics>,
}

impl EventBatcher {
    pub fn new(config: BatcherConfig, heuristics: Arc<Heuristics>) -> Self {
        Self { config, heuristics }
    }

    /// Consume records until the channel closes, flush the remainder and wait
    /// for every dispatched batch to finish.
    pub async fn run(
        self,
        mut rx: mpsc::Receiver<ChangeRecord>,
        sink: Arc<dyn BatchSink>,
    ) -> BatcherStats {
        let mut window = EventWindow::from_config(&self.config);
        let mut tasks: JoinSet<bool> = JoinSet::new();
        let mut stats = BatcherStats::default();
        info!(
            "Event batcher started: {}s window, {} record ceiling",
            self.config.window_secs, self.config.max_events
        );

        loop {
            let deadline = window.deadline();
            tokio::select! {
                maybe = rx.recv() => match maybe {
                    Some(record) => {
                        stats.records_received += 1;
                        if let Some(records) = window.push(record, Instant::now()) {
                            self.dispatch(records, &sink, &mut tasks, &mut stats);
                        }
                    }
                    None => break,
                },
                _ = wait_for(deadline) => {
                    if let Some(records) = window.poll(Instant::now()) {
                        self.dispatch(records, &sink, &mut tasks, &mut stats);
                    }
                }
            }
            while let Some(done) = tasks.try_join_next() {
                record_completion(done, &mut stats);
            }
        }

        if let Some(records) = window.take() {
            self.dispatch(records, &sink, &mut tasks, &mut stats);
        }
        while let Some(done) = tasks.join_next().await {
            record_completion(done, &mut stats);
        }
        info!(
            "Event batcher stopped: {} records, {} batches dispatched, {} dropped",
            stats.records_received, stats.batches_dispatched, stats.batches_dropped
        );
        stats
    }

    fn dispatch(
        &self,
        records: Vec<ChangeRecord>,
        sink: &Arc<dyn BatchSink>,
        tasks: &mut JoinSet<bool>,
        stats: &mut BatcherStats,
    ) {
        let total = records.len();
        let batch = EventBatch::from_window(records, &self.heuristics);
        if !batch.is_significant() {
            debug!("Dropping batch of {} records with nothing significant", total);
            stats.batches_dropped += 1;
            return;
        }

        debug!(
            "Dispatching batch: {} records, {} significant",
            batch.records.len(),
            batch.significant.len()
        );
        stats.batches_dispatched += 1;
        let sink = sink.clone();
        tasks.spawn(async move {
            match sink.handle_batch(batch).await {
                Ok(()) => true,
                Err(e) => {
                    error!("Batch processing failed: {}", e);
                    false
                }
            }
        });
    }
}

fn record_completion(done: std::result::Result<bool, tokio::task::JoinError>, stats: &mut BatcherStats) {
    match done {
        Ok(true) => {}
        Ok(false) => stats.sink_failures += 1,
        Err(e) => {
            error!("Batch task aborted: {}", e);
            stats.sink_failures += 1;
        }
    }
}

async fn wait_for(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => future::pending().await,
    }
}
