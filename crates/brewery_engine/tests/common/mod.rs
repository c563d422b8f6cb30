#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use brewery_core::{
    Batch, ErrorKind, JobConfig, PipelineError, RetrySettings, StageParams, WorkItem,
};
use brewery_engine::{Fetcher, MemorySink, PersistOutcome, PersistenceSink, Transformer};

pub fn urls(count: usize) -> Vec<String> {
    (0..count)
        .map(|i| format!("https://news.example.com/posts/{i}"))
        .collect()
}

pub fn config(batch_size: usize, workers: usize) -> JobConfig {
    JobConfig {
        name: "test".into(),
        batch_size,
        default_workers: workers,
        retry: RetrySettings::immediate(4),
        ..JobConfig::default()
    }
}

/// Records every payload it fetched, optionally failing or sleeping for some.
#[derive(Default)]
pub struct ScriptedFetcher {
    pub calls: Mutex<Vec<String>>,
    pub fatal: Vec<String>,
    pub delay: Duration,
    /// payload -> number of rate-limited responses before success
    pub rate_limited: Mutex<HashMap<String, usize>>,
}

impl ScriptedFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing(mut self, payload: &str) -> Self {
        self.fatal.push(payload.to_string());
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    pub fn fetched(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

impl Fetcher for ScriptedFetcher {
    fn fetch(&self, item: &WorkItem) -> Result<String, PipelineError> {
        self.calls.lock().unwrap().push(item.payload().to_string());
        if !self.delay.is_zero() {
            std::thread::sleep(self.delay);
        }
        if self.fatal.iter().any(|p| p == item.payload()) {
            return Err(PipelineError::fetch(ErrorKind::Fatal, "404 not found"));
        }
        let mut limited = self.rate_limited.lock().unwrap();
        if let Some(left) = limited.get_mut(item.payload()) {
            if *left > 0 {
                *left -= 1;
                return Err(PipelineError::rate_limited("429 too many requests"));
            }
        }
        Ok(format!("<body>{}</body>", item.payload()))
    }
}

/// Prefixes its input with a tag; can be told to rate-limit a number of calls.
pub struct TagTransformer {
    pub tag: &'static str,
    pub calls: AtomicUsize,
    pub rate_limit_first: AtomicUsize,
}

impl TagTransformer {
    pub fn new(tag: &'static str) -> Self {
        Self {
            tag,
            calls: AtomicUsize::new(0),
            rate_limit_first: AtomicUsize::new(0),
        }
    }

    pub fn rate_limited(tag: &'static str, times: usize) -> Self {
        let transformer = Self::new(tag);
        transformer.rate_limit_first.store(times, Ordering::SeqCst);
        transformer
    }
}

impl Transformer for TagTransformer {
    fn transform(&self, text: &str, _params: &StageParams) -> Result<String, PipelineError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let limited = self
            .rate_limit_first
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok();
        if limited {
            return Err(PipelineError::rate_limited("slow down"));
        }
        Ok(format!("[{}]{}", self.tag, text))
    }
}

/// Stores batches in memory, except the ones it was told to reject.
pub struct ScriptedSink {
    pub stored: MemorySink,
    /// Batch indices to reject; `None` rejects every batch.
    pub rejected: Option<Vec<usize>>,
    pub kind: ErrorKind,
    pub calls: AtomicUsize,
}

impl ScriptedSink {
    pub fn rejecting(batches: &[usize], kind: ErrorKind) -> Self {
        Self {
            stored: MemorySink::new(),
            rejected: Some(batches.to_vec()),
            kind,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn rejecting_all(kind: ErrorKind) -> Self {
        Self {
            rejected: None,
            ..Self::rejecting(&[], kind)
        }
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl PersistenceSink for ScriptedSink {
    fn persist(&self, batch: &Batch) -> PersistOutcome {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let rejected = match &self.rejected {
            Some(batches) => batches.contains(&batch.index()),
            None => true,
        };
        if rejected {
            let error = PipelineError::persistence(self.kind, "disk quota exceeded");
            return PersistOutcome::all_failed(batch, &error);
        }
        self.stored.persist(batch)
    }
}
