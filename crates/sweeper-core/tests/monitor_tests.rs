use std::collections::VecDeque;
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tempfile::tempdir;

use sweeper_core::config::{BatcherConfig, JournalConfig};
use sweeper_core::journal::parse::testing::{build_buffer, RawRecord};
use sweeper_core::journal::{JournalInfo, JournalSource, ReasonFlags};
use sweeper_core::{AppConfig, Error, MonitorEngine, Result, SessionState};

const NODE_MODULES_REF: u64 = 5;

/// Replays canned buffers, then reports an idle journal.
struct ReplaySource {
    fail_query: bool,
    buffers: VecDeque<Vec<u8>>,
    directory: PathBuf,
}

impl JournalSource for ReplaySource {
    fn query_journal(&mut self) -> Result<JournalInfo> {
        if self.fail_query {
            return Err(Error::Journal("journal not active".to_string()));
        }
        Ok(JournalInfo {
            journal_id: 1,
            first_usn: 0,
            next_usn: 100,
        })
    }

    fn read_journal(&mut self, start: u64, _mask: ReasonFlags, _journal_id: u64) -> Result<Vec<u8>> {
        Ok(self
            .buffers
            .pop_front()
            .unwrap_or_else(|| start.to_le_bytes().to_vec()))
    }

    fn resolve_directory(&mut self, reference: u64) -> Option<PathBuf> {
        (reference == NODE_MODULES_REF).then(|| self.directory.clone())
    }
}

fn config() -> AppConfig {
    AppConfig {
        report_db: None,
        journal: JournalConfig {
            idle_delay_ms: 5,
            error_backoff_ms: 5,
            ..JournalConfig::default()
        },
        batcher: BatcherConfig {
            window_secs: 30,
            max_events: 1,
        },
        ..AppConfig::default()
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_journal_activity_reaches_approval() {
    let dir = tempdir().unwrap();
    let cache = dir.path().join("node_modules");
    fs::create_dir_all(&cache).unwrap();
    fs::write(cache.join("left-pad.tgz"), vec![0u8; 256]).unwrap();

    let source = ReplaySource {
        fail_query: false,
        buffers: VecDeque::from(vec![build_buffer(
            200,
            &[RawRecord::new(150, "left-pad.tgz", ReasonFlags::FILE_CREATE.bits())
                .with_parent(NODE_MODULES_REF)],
        )]),
        directory: cache.clone(),
    };

    let engine = Arc::new(MonitorEngine::new(config()).unwrap());
    let orchestrator = engine.orchestrator();
    let running = tokio::spawn({
        let engine = engine.clone();
        async move { engine.run(source).await }
    });

    let mut pending = Vec::new();
    for _ in 0..300 {
        pending = orchestrator.get_pending_analyses();
        if pending.iter().any(|s| s.state == SessionState::Approval) {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].state, SessionState::Approval);
    assert_eq!(pending[0].suggestions[0].file_path, cache.join("left-pad.tgz"));
    assert_eq!(pending[0].suggestions[0].size_bytes, 256);

    engine.shutdown();
    let stats = tokio::time::timeout(Duration::from_secs(5), running)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert_eq!(stats.reader.records_emitted, 1);
    assert!(stats.reader.final_cursor >= 200);
    assert_eq!(stats.batcher.batches_dispatched, 1);
}

#[tokio::test]
async fn test_unreadable_journal_fails_the_run() {
    let source = ReplaySource {
        fail_query: true,
        buffers: VecDeque::new(),
        directory: PathBuf::new(),
    };
    let engine = MonitorEngine::new(config()).unwrap();
    let err = engine.run(source).await.unwrap_err();
    assert!(matches!(err, Error::Journal(_)));
}
