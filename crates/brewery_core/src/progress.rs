use serde::Serialize;

use crate::JobState;

/// A single mutation of the live counters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProgressDelta {
    /// Work was enumerated: total unique items and batch count.
    Planned { items: usize, batches: usize },
    /// One item left the last stage (successfully or not).
    ItemFinished,
    Processed { count: usize },
    /// An item was given up on; the message is appended to the error list.
    Skipped { key: String, message: String },
    Cancelled { count: usize },
    BatchFinished,
    /// Absolute value of the run's retry counter.
    Retries(u64),
    Log(String),
}

/// Live counters of one run. Kept behind a single lock by the reporter.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Progress {
    total: usize,
    current: usize,
    processed: usize,
    skipped: usize,
    cancelled: usize,
    retries: u64,
    errors: Vec<String>,
    last_log: Option<String>,
    batches_done: usize,
    batches_total: usize,
}

impl Progress {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn apply(&mut self, delta: ProgressDelta) {
        match delta {
            ProgressDelta::Planned { items, batches } => {
                self.total = items;
                self.batches_total = batches;
            }
            ProgressDelta::ItemFinished => {
                self.current = (self.current + 1).min(self.total);
            }
            ProgressDelta::Processed { count } => {
                self.processed += count.min(self.remaining());
            }
            ProgressDelta::Skipped { key, message } => {
                if self.remaining() > 0 {
                    self.skipped += 1;
                }
                let line = format!("{key}: {message}");
                self.last_log = Some(line.clone());
                self.errors.push(line);
            }
            ProgressDelta::Cancelled { count } => {
                self.cancelled += count.min(self.remaining());
            }
            ProgressDelta::BatchFinished => {
                self.batches_done = (self.batches_done + 1).min(self.batches_total);
            }
            ProgressDelta::Retries(retries) => self.retries = retries,
            ProgressDelta::Log(line) => self.last_log = Some(line),
        }
    }

    /// Items without a terminal outcome yet.
    pub fn remaining(&self) -> usize {
        self.total
            .saturating_sub(self.processed + self.skipped + self.cancelled)
    }

    pub fn snapshot(&self, state: JobState, just_completed: bool) -> ProgressSnapshot {
        ProgressSnapshot {
            state,
            total: self.total,
            current: self.current,
            processed: self.processed,
            skipped: self.skipped,
            cancelled: self.cancelled,
            retries: self.retries,
            errors: self.errors.clone(),
            last_log: self.last_log.clone(),
            just_completed,
            batches_done: self.batches_done,
            batches_total: self.batches_total,
        }
    }
}

/// Point-in-time copy of a job's status, safe to hand to any thread.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct ProgressSnapshot {
    pub state: JobState,
    pub total: usize,
    /// Items that have left the pipeline so far.
    pub current: usize,
    pub processed: usize,
    pub skipped: usize,
    pub cancelled: usize,
    pub retries: u64,
    pub errors: Vec<String>,
    pub last_log: Option<String>,
    pub just_completed: bool,
    pub batches_done: usize,
    pub batches_total: usize,
}

impl ProgressSnapshot {
    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }
}
