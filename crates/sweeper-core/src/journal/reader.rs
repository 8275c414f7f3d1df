use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use tokio::sync::mpsc;
use tracing::{debug, error, info, trace, warn};

use super::parse::parse_buffer;
use super::record::{ChangeRecord, ReasonFlags};
use crate::config::JournalConfig;
use crate::error::Result;

/// Identity and extent of a volume's change journal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JournalInfo {
    pub journal_id: u64,
    pub first_usn: u64,
    pub next_usn: u64,
}

/// The native journal calls. Only the reader thread ever holds a source.
pub trait JournalSource: Send + 'static {
    fn query_journal(&mut self) -> Result<JournalInfo>;

    /// Raw output of one read: next cursor followed by packed records.
    fn read_journal(
        &mut self,
        start_cursor: u64,
        reason_mask: ReasonFlags,
        journal_id: u64,
    ) -> Result<Vec<u8>>;

    /// Full path of the directory with the given file reference number.
    fn resolve_directory(&mut self, _reference: u64) -> Option<PathBuf> {
        None
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReaderStats {
    pub buffers_read: u64,
    pub records_emitted: u64,
    pub records_dropped: u64,
    pub errors: u64,
    pub final_cursor: u64,
}

/// Handle to the running reader thread.
pub struct ReaderHandle {
    thread: JoinHandle<ReaderStats>,
    cancel: Arc<AtomicBool>,
    cursor: Arc<AtomicU64>,
}

impl ReaderHandle {
    pub fn is_running(&self) -> bool {
        !self.thread.is_finished()
    }

    /// Current read cursor as last committed by the loop.
    pub fn cursor(&self) -> u64 {
        self.cursor.load(Ordering::Acquire)
    }

    pub fn cancel(&self) {
        self.cancel.store(true, Ordering::Relaxed);
    }

    pub fn join(self) -> ReaderStats {
        match self.thread.join() {
            Ok(stats) => stats,
            Err(_) => {
                error!("Journal reader thread panicked");
                ReaderStats::default()
            }
        }
    }
}

pub struct JournalReader<S: JournalSource> {
    source: S,
    config: JournalConfig,
}

impl<S: JournalSource> JournalReader<S> {
    pub fn new(source: S, config: JournalConfig) -> Self {
        Self { source, config }
    }

    /// Query the journal on the calling thread, then poll it on a dedicated thread.
    ///
    /// A failed query is returned to the caller; every error after that point is
    /// logged and retried by the loop.
    pub fn start(
        mut self,
        cancel: Arc<AtomicBool>,
    ) -> Result<(mpsc::Receiver<ChangeRecord>, ReaderHandle)> {
        let info = self.source.query_journal()?;
        info!(
            "Change journal {:#x}: first usn {}, next usn {}",
            info.journal_id, info.first_usn, info.next_usn
        );

        let (tx, rx) = mpsc::channel(self.config.channel_capacity.max(1));
        let cursor = Arc::new(AtomicU64::new(info.next_usn));

        let mut state = PollState {
            source: self.source,
            directories: DirectoryCache::new(self.config.directory_cache_entries),
            journal_id: info.journal_id,
            cursor: info.next_usn,
            shared_cursor: Arc::clone(&cursor),
            stats: ReaderStats::default(),
        };
        let config = self.config;
        let loop_cancel = Arc::clone(&cancel);

        let thread = thread::Builder::new()
            .name("journal-reader".to_string())
            .spawn(move || {
                state.run(&tx, &loop_cancel, &config);
                state.stats.final_cursor = state.cursor;
                state.stats
            })?;

        Ok((
            rx,
            ReaderHandle {
                thread,
                cancel,
                cursor,
            },
        ))
    }
}

struct PollState<S: JournalSource> {
    source: S,
    directories: DirectoryCache,
    journal_id: u64,
    cursor: u64,
    shared_cursor: Arc<AtomicU64>,
    stats: ReaderStats,
}

impl<S: JournalSource> PollState<S> {
    fn run(
        &mut self,
        tx: &mpsc::Sender<ChangeRecord>,
        cancel: &AtomicBool,
        config: &JournalConfig,
    ) {
        debug!("Journal polling started at usn {}", self.cursor);
        while !cancel.load(Ordering::Relaxed) {
            if tx.is_closed() {
                info!("Record consumer closed, stopping journal reader");
                return;
            }
            match self.poll_once() {
                Ok(records) if records.is_empty() => {
                    sleep_unless_cancelled(cancel, config.idle_delay());
                }
                Ok(records) => {
                    for record in records {
                        if tx.blocking_send(record).is_err() {
                            info!("Record consumer closed, stopping journal reader");
                            return;
                        }
                        self.stats.records_emitted += 1;
                    }
                }
                Err(e) => {
                    self.stats.errors += 1;
                    warn!(
                        "Journal read failed at usn {}: {}; retrying in {:?}",
                        self.cursor,
                        e,
                        config.error_backoff()
                    );
                    sleep_unless_cancelled(cancel, config.error_backoff());
                }
            }
        }
        info!(
            "Journal reader cancelled at usn {} ({} records emitted)",
            self.cursor, self.stats.records_emitted
        );
    }

    /// One read call. The cursor only moves once the whole buffer parsed.
    fn poll_once(&mut self) -> Result<Vec<ChangeRecord>> {
        let buffer = self
            .source
            .read_journal(self.cursor, ReasonFlags::ALL, self.journal_id)?;
        let parsed = parse_buffer(&buffer)?;
        self.stats.buffers_read += 1;
        self.stats.records_dropped += parsed.dropped as u64;

        if parsed.next_cursor < self.cursor {
            warn!(
                "Journal reported cursor {} behind current {}, keeping current",
                parsed.next_cursor, self.cursor
            );
        } else {
            self.cursor = parsed.next_cursor;
            self.shared_cursor.store(self.cursor, Ordering::Release);
        }

        let mut records = parsed.records;
        for record in records.iter_mut() {
            self.complete(record);
        }
        trace!(
            "Read {} records, cursor now {}",
            records.len(),
            self.cursor
        );
        Ok(records)
    }

    /// Fill in the full path and current size of a freshly parsed record.
    fn complete(&mut self, record: &mut ChangeRecord) {
        if record.is_directory()
            && record
                .reason
                .intersects(ReasonFlags::RENAME_NEW_NAME | ReasonFlags::FILE_DELETE)
        {
            self.directories.forget(record.file_reference);
        }

        let source = &mut self.source;
        let parent = self
            .directories
            .get_or_resolve(record.parent_reference, |reference| {
                source.resolve_directory(reference)
            });
        if let Some(parent) = parent {
            record.full_path = parent.join(&record.file_name);
            if !record.is_directory() && !record.reason.contains(ReasonFlags::FILE_DELETE) {
                record.file_size_bytes = fs::metadata(&record.full_path)
                    .map(|m| m.len())
                    .unwrap_or(0);
            }
        }
    }
}

/// Parent-directory lookups, reset wholesale when full.
struct DirectoryCache {
    entries: HashMap<u64, Option<PathBuf>>,
    capacity: usize,
}

impl DirectoryCache {
    fn new(capacity: usize) -> Self {
        Self {
            entries: HashMap::new(),
            capacity: capacity.max(1),
        }
    }

    fn get_or_resolve<F>(&mut self, reference: u64, resolve: F) -> Option<PathBuf>
    where
        F: FnOnce(u64) -> Option<PathBuf>,
    {
        if let Some(hit) = self.entries.get(&reference) {
            return hit.clone();
        }
        if self.entries.len() >= self.capacity {
            debug!("Directory cache full ({} entries), clearing", self.entries.len());
            self.entries.clear();
        }
        let resolved = resolve(reference);
        self.entries.insert(reference, resolved.clone());
        resolved
    }

    fn forget(&mut self, reference: u64) {
        self.entries.remove(&reference);
    }
}

fn sleep_unless_cancelled(cancel: &AtomicBool, duration: Duration) {
    const SLICE: Duration = Duration::from_millis(10);
    let deadline = Instant::now() + duration;
    while !cancel.load(Ordering::Relaxed) {
        let now = Instant::now();
        if now >= deadline {
            break;
        }
        thread::sleep(SLICE.min(deadline - now));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::journal::parse::testing::{build_buffer, RawRecord};
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Replays scripted reads, then reports an idle journal at the last cursor.
    struct ScriptedSource {
        query: Option<Result<JournalInfo>>,
        reads: VecDeque<Result<Vec<u8>>>,
        requested: Arc<Mutex<Vec<u64>>>,
    }

    impl ScriptedSource {
        fn new(reads: Vec<Result<Vec<u8>>>) -> Self {
            Self {
                query: Some(Ok(JournalInfo {
                    journal_id: 0xABCD,
                    first_usn: 0,
                    next_usn: 10,
                })),
                reads: reads.into(),
                requested: Arc::new(Mutex::new(Vec::new())),
            }
        }
    }

    impl JournalSource for ScriptedSource {
        fn query_journal(&mut self) -> Result<JournalInfo> {
            self.query
                .take()
                .unwrap_or_else(|| Err(Error::Journal("queried twice".into())))
        }

        fn read_journal(&mut self, start: u64, _mask: ReasonFlags, id: u64) -> Result<Vec<u8>> {
            assert_eq!(id, 0xABCD);
            self.requested.lock().unwrap().push(start);
            match self.reads.pop_front() {
                Some(read) => read,
                None => Ok(start.to_le_bytes().to_vec()),
            }
        }

        fn resolve_directory(&mut self, reference: u64) -> Option<PathBuf> {
            (reference == 5).then(|| PathBuf::from("/vol/projects"))
        }
    }

    fn fast_config() -> JournalConfig {
        JournalConfig {
            idle_delay_ms: 1,
            error_backoff_ms: 5,
            ..JournalConfig::default()
        }
    }

    #[test]
    fn test_query_failure_is_fatal() {
        let mut source = ScriptedSource::new(vec![]);
        source.query = Some(Err(Error::Journal("access denied".into())));
        let reader = JournalReader::new(source, fast_config());
        assert!(reader.start(Arc::new(AtomicBool::new(false))).is_err());
    }

    #[test]
    fn test_emits_records_and_resumes_after_error() {
        let source = ScriptedSource::new(vec![
            Ok(build_buffer(
                30,
                &[
                    RawRecord::new(11, "a.log", 0x2),
                    RawRecord::new(12, "b.log", 0x100).with_parent(99),
                ],
            )),
            Err(Error::Journal("transient".into())),
            Ok(vec![1, 2]),
            Ok(build_buffer(40, &[RawRecord::new(31, "c.log", 0x2)])),
        ]);
        let requested = Arc::clone(&source.requested);
        let cancel = Arc::new(AtomicBool::new(false));
        let (mut rx, handle) = JournalReader::new(source, fast_config())
            .start(Arc::clone(&cancel))
            .unwrap();

        let first = rx.blocking_recv().unwrap();
        let second = rx.blocking_recv().unwrap();
        let third = rx.blocking_recv().unwrap();
        handle.cancel();
        let stats = handle.join();

        assert_eq!(first.full_path, PathBuf::from("/vol/projects").join("a.log"));
        // Unresolvable parent keeps the bare name.
        assert_eq!(second.full_path, PathBuf::from("b.log"));
        assert_eq!(third.usn, 31);
        assert_eq!(stats.errors, 2);
        assert_eq!(stats.records_emitted, 3);
        assert_eq!(stats.final_cursor, 40);

        // The failed reads were retried from the last good cursor.
        let requested = requested.lock().unwrap();
        assert_eq!(&requested[..4], &[10, 30, 30, 30]);
        assert!(requested[4..].iter().all(|&c| c == 40));
    }

    #[test]
    fn test_cursor_never_rewinds() {
        let source = ScriptedSource::new(vec![
            Ok(build_buffer(100, &[RawRecord::new(50, "x", 0x2)])),
            Ok(build_buffer(60, &[RawRecord::new(70, "y", 0x2)])),
            Ok(build_buffer(200, &[RawRecord::new(150, "z", 0x2)])),
        ]);
        let requested = Arc::clone(&source.requested);
        let (mut rx, handle) = JournalReader::new(source, fast_config())
            .start(Arc::new(AtomicBool::new(false)))
            .unwrap();

        for _ in 0..3 {
            rx.blocking_recv().unwrap();
        }
        handle.cancel();
        let stats = handle.join();

        let requested = requested.lock().unwrap();
        assert_eq!(&requested[..3], &[10, 100, 100]);
        assert!(requested.windows(2).all(|w| w[0] <= w[1]));
        assert_eq!(stats.final_cursor, 200);
    }

    #[test]
    fn test_dropping_receiver_stops_reader() {
        let source = ScriptedSource::new(vec![Ok(build_buffer(
            20,
            &[RawRecord::new(11, "a", 0x2), RawRecord::new(12, "b", 0x2)],
        ))]);
        let (rx, handle) = JournalReader::new(source, fast_config())
            .start(Arc::new(AtomicBool::new(false)))
            .unwrap();
        drop(rx);
        // Joins without cancellation once the closed channel is noticed.
        let stats = handle.join();
        assert!(stats.records_emitted <= 2);
    }

    #[test]
    fn test_cancel_interrupts_backoff() {
        let source = ScriptedSource::new(vec![Err(Error::Journal("down".into()))]);
        let config = JournalConfig {
            error_backoff_ms: 60_000,
            ..fast_config()
        };
        let cancel = Arc::new(AtomicBool::new(false));
        let (_rx, handle) = JournalReader::new(source, config)
            .start(Arc::clone(&cancel))
            .unwrap();
        thread::sleep(Duration::from_millis(30));
        let started = Instant::now();
        cancel.store(true, Ordering::Relaxed);
        let stats = handle.join();
        assert!(started.elapsed() < Duration::from_secs(5));
        assert_eq!(stats.errors, 1);
    }

    #[test]
    fn test_directory_cache_resets_when_full() {
        let mut cache = DirectoryCache::new(2);
        let mut calls = 0;
        for reference in [1, 2, 1, 3, 1] {
            cache.get_or_resolve(reference, |r| {
                calls += 1;
                Some(PathBuf::from(format!("/d{}", r)))
            });
        }
        // 1, 2 resolved; 1 hit; 3 clears the cache; 1 resolved again.
        assert_eq!(calls, 4);
    }
}
