use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;

use super::heuristics::Heuristics;
use crate::journal::{ChangeRecord, ReasonFlags};
use crate::orchestrator::FileEvent;

/// Which cleanup-worthy signals a batch raised.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct TriageSignals {
    pub volatile: bool,
    pub temp: bool,
    pub heavy_write: bool,
}

impl TriageSignals {
    pub fn of_record(record: &ChangeRecord, heuristics: &Heuristics) -> Self {
        let path = record.normalized_path();
        Self {
            volatile: heuristics.has_volatile_marker(&path),
            temp: heuristics.has_temp_marker(&path),
            heavy_write: heuristics.is_heavy(record.file_size_bytes),
        }
    }

    pub fn evaluate(records: &[ChangeRecord], heuristics: &Heuristics) -> Self {
        records.iter().fold(Self::default(), |acc, record| {
            acc.merge(Self::of_record(record, heuristics))
        })
    }

    pub fn any(&self) -> bool {
        self.volatile || self.temp || self.heavy_write
    }

    fn merge(self, other: Self) -> Self {
        Self {
            volatile: self.volatile || other.volatile,
            temp: self.temp || other.temp,
            heavy_write: self.heavy_write || other.heavy_write,
        }
    }
}

impl fmt::Display for TriageSignals {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names = Vec::new();
        if self.volatile {
            names.push("volatile");
        }
        if self.temp {
            names.push("temp");
        }
        if self.heavy_write {
            names.push("heavy-write");
        }
        if names.is_empty() {
            write!(f, "none")
        } else {
            write!(f, "{}", names.join("+"))
        }
    }
}

/// Result of triaging one batch.
#[derive(Debug, Clone)]
pub struct TriageOutcome {
    pub signals: TriageSignals,
    pub triggers: Vec<FileEvent>,
}

/// Pick the records of a batch that deserve an analysis session.
///
/// Directories, deletions and ignored paths never trigger. When a path
/// appears several times the latest record wins.
pub fn triage(records: &[ChangeRecord], heuristics: &Heuristics) -> TriageOutcome {
    let mut signals = TriageSignals::default();
    let mut order: Vec<PathBuf> = Vec::new();
    let mut latest: HashMap<PathBuf, FileEvent> = HashMap::new();

    for record in records {
        if record.is_directory()
            || record.reason.contains(ReasonFlags::FILE_DELETE)
            || heuristics.is_ignored(&record.full_path)
        {
            continue;
        }
        let record_signals = TriageSignals::of_record(record, heuristics);
        if !record_signals.any() {
            continue;
        }
        signals = signals.merge(record_signals);

        let event = FileEvent::from(record);
        if latest.insert(record.full_path.clone(), event).is_none() {
            order.push(record.full_path.clone());
        }
    }

    let triggers = order
        .into_iter()
        .filter_map(|path| latest.remove(&path))
        .collect();

    TriageOutcome { signals, triggers }
}
