//! Batch persistence: the storage seam and the retrying wrapper around it.

use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use brewery_core::{Batch, ErrorKind, PipelineError, WorkItem};
use brewery_logging::{brew_debug, brew_warn};

use crate::retry::RetryPolicy;
use crate::scheduler::guard_panic;
use crate::signals::{Checkpoint, RunSignals};

/// What a storage backend reports for one write of a batch, per item key.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PersistOutcome {
    pub persisted: Vec<String>,
    pub failed: Vec<(String, PipelineError)>,
}

impl PersistOutcome {
    pub fn all_persisted(batch: &Batch) -> Self {
        Self {
            persisted: batch.keys().map(str::to_string).collect(),
            failed: Vec::new(),
        }
    }

    pub fn all_failed(batch: &Batch, error: &PipelineError) -> Self {
        Self {
            persisted: Vec::new(),
            failed: batch.keys().map(|key| (key.to_string(), error.clone())).collect(),
        }
    }
}

/// Storage backend for finished items.
///
/// Writes must be upserts keyed by item identity: persisting the same item
/// twice leaves one record.
pub trait PersistenceSink: Send + Sync {
    fn persist(&self, batch: &Batch) -> PersistOutcome;
}

impl<T: PersistenceSink + ?Sized> PersistenceSink for Arc<T> {
    fn persist(&self, batch: &Batch) -> PersistOutcome {
        self.as_ref().persist(batch)
    }
}

/// Final per-item result of persisting one batch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PersistReport {
    pub batch_index: usize,
    pub persisted: Vec<String>,
    pub failed: Vec<(String, PipelineError)>,
    /// Items never written because the run was cancelled first.
    pub cancelled: Vec<String>,
    pub attempts: u32,
    /// The acknowledged items, marked persisted, in the order the sink
    /// accepted them.
    pub stored: Vec<WorkItem>,
}

/// Commits batches in ordinal order, retrying only the items whose write
/// failed with a retryable error.
pub struct ResultSink {
    sink: Arc<dyn PersistenceSink>,
    retry: Arc<RetryPolicy>,
    signals: Arc<RunSignals>,
}

impl ResultSink {
    pub fn new(
        sink: Arc<dyn PersistenceSink>,
        retry: Arc<RetryPolicy>,
        signals: Arc<RunSignals>,
    ) -> Self {
        Self {
            sink,
            retry,
            signals,
        }
    }

    /// Blocks while the run is paused; writes nothing once it is cancelled.
    pub fn persist(&self, mut batch: Batch) -> PersistReport {
        batch.sort_by_ordinal();
        let index = batch.index();
        let mut report = PersistReport {
            batch_index: index,
            ..PersistReport::default()
        };
        let mut pending = batch;
        loop {
            if self.signals.checkpoint() == Checkpoint::Cancelled {
                report.cancelled.extend(pending.keys().map(str::to_string));
                return report;
            }
            report.attempts += 1;
            let outcome = guard_panic(|| Ok(self.sink.persist(&pending)))
                .unwrap_or_else(|error| PersistOutcome::all_failed(&pending, &error));
            let acknowledged = report.persisted.len();
            let retryable = self.settle(&pending, outcome, &mut report);
            pending = take_stored(pending, &retryable, &mut report, acknowledged);
            if retryable.is_empty() {
                return report;
            }

            let hint = strongest_error(&retryable);
            if !self.retry.should_retry(&hint, report.attempts) {
                report.failed.extend(retryable);
                return report;
            }
            brew_warn!(
                "batch {}: {} item(s) not persisted ({}), retrying",
                index,
                retryable.len(),
                hint
            );
            if self.retry.wait_before_retry(&self.signals, &hint, report.attempts)
                == Checkpoint::Cancelled
            {
                report.cancelled.extend(pending.keys().map(str::to_string));
                return report;
            }
        }
    }

    /// Records final outcomes in `report` and returns the retryable failures.
    fn settle(
        &self,
        pending: &Batch,
        outcome: PersistOutcome,
        report: &mut PersistReport,
    ) -> Vec<(String, PipelineError)> {
        let expected: HashSet<&str> = pending.keys().collect();
        let mut seen = HashSet::new();
        let mut retryable = Vec::new();
        for key in outcome.persisted {
            if expected.contains(key.as_str()) && seen.insert(key.clone()) {
                report.persisted.push(key);
            }
        }
        for (key, error) in outcome.failed {
            if !expected.contains(key.as_str()) || !seen.insert(key.clone()) {
                continue;
            }
            if error.kind().is_retryable() {
                retryable.push((key, error));
            } else {
                report.failed.push((key, error));
            }
        }
        for key in pending.keys().filter(|key| !seen.contains(*key)) {
            brew_debug!("batch {}: sink did not report `{}`", pending.index(), key);
            report.failed.push((
                key.to_string(),
                PipelineError::persistence(ErrorKind::Fatal, "sink did not acknowledge item"),
            ));
        }
        retryable
    }
}

/// Moves the items acknowledged since `acknowledged` into `report.stored`
/// and returns the batch left to retry.
fn take_stored(
    pending: Batch,
    retryable: &[(String, PipelineError)],
    report: &mut PersistReport,
    acknowledged: usize,
) -> Batch {
    let index = pending.index();
    let stored: HashSet<String> = report.persisted[acknowledged..].iter().cloned().collect();
    let retry: HashSet<&str> = retryable.iter().map(|(key, _)| key.as_str()).collect();
    let mut remaining = Vec::with_capacity(retry.len());
    for mut item in pending.into_items() {
        if stored.contains(item.key()) {
            item.mark_persisted();
            report.stored.push(item);
        } else if retry.contains(item.key()) {
            remaining.push(item);
        }
    }
    Batch::new(index, remaining)
}

/// Picks the error that should pace the next attempt: rate limits first, and
/// among those the longest server hint.
fn strongest_error(failures: &[(String, PipelineError)]) -> PipelineError {
    failures
        .iter()
        .map(|(_, error)| error)
        .max_by_key(|error| {
            (
                error.kind() == ErrorKind::RateLimited,
                error.retry_after_ms().unwrap_or(0),
            )
        })
        .cloned()
        .unwrap_or_else(|| PipelineError::persistence(ErrorKind::Transient, "retry"))
}

/// A record held by [`MemorySink`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredRecord {
    pub key: String,
    pub ordinal: usize,
    pub batch: usize,
    pub content: String,
}

/// In-memory upsert store, used for dry runs and tests.
#[derive(Debug, Default)]
pub struct MemorySink {
    records: Mutex<BTreeMap<String, StoredRecord>>,
    persist_calls: AtomicUsize,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<StoredRecord> {
        let records = self.records.lock().unwrap_or_else(PoisonError::into_inner);
        let mut all: Vec<_> = records.values().cloned().collect();
        all.sort_by_key(|record| (record.batch, record.ordinal));
        all
    }

    pub fn get(&self, key: &str) -> Option<StoredRecord> {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of times a batch was handed to this sink, retries included.
    pub fn persist_calls(&self) -> usize {
        self.persist_calls.load(Ordering::Relaxed)
    }
}

impl PersistenceSink for MemorySink {
    fn persist(&self, batch: &Batch) -> PersistOutcome {
        self.persist_calls.fetch_add(1, Ordering::Relaxed);
        let mut records = self.records.lock().unwrap_or_else(PoisonError::into_inner);
        for item in batch.items() {
            records.insert(
                item.key().to_string(),
                StoredRecord {
                    key: item.key().to_string(),
                    ordinal: item.ordinal(),
                    batch: batch.index(),
                    content: item.input().to_string(),
                },
            );
        }
        PersistOutcome::all_persisted(batch)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rate_limits_pace_retries_before_transient_errors() {
        let failures = vec![
            ("a".to_string(), PipelineError::persistence(ErrorKind::Transient, "reset")),
            (
                "b".to_string(),
                PipelineError::RateLimited {
                    message: "slow down".into(),
                    retry_after_ms: Some(20),
                },
            ),
        ];
        assert_eq!(strongest_error(&failures).retry_after_ms(), Some(20));
    }
}
