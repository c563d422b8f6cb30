use std::fs;
use std::path::Path;

use brewery_core::{JobConfig, WorkItem};

#[derive(Debug, thiserror::Error)]
pub enum CollectError {
    #[error("source unavailable: {0}")]
    Unavailable(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Enumerates the candidate work items of a run, in submission order.
pub trait SourceCollector: Send + Sync {
    fn collect(&self, config: &JobConfig) -> Result<Vec<WorkItem>, CollectError>;
}

/// A fixed list of payloads, typically URLs pasted or read from a file.
#[derive(Debug, Clone, Default)]
pub struct StaticCollector {
    payloads: Vec<String>,
}

impl StaticCollector {
    pub fn new<I, S>(payloads: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            payloads: payloads.into_iter().map(Into::into).collect(),
        }
    }

    /// One payload per line; blank lines and `#` comments are ignored.
    pub fn from_lines(raw: &str) -> Self {
        Self::new(
            raw.lines()
                .map(str::trim)
                .filter(|line| !line.is_empty() && !line.starts_with('#')),
        )
    }

    pub fn from_file(path: &Path) -> Result<Self, CollectError> {
        Ok(Self::from_lines(&fs::read_to_string(path)?))
    }

    pub fn len(&self) -> usize {
        self.payloads.len()
    }

    pub fn is_empty(&self) -> bool {
        self.payloads.is_empty()
    }
}

impl SourceCollector for StaticCollector {
    fn collect(&self, _config: &JobConfig) -> Result<Vec<WorkItem>, CollectError> {
        Ok(self
            .payloads
            .iter()
            .enumerate()
            .map(|(ordinal, payload)| WorkItem::new(ordinal, payload.as_str()))
            .collect())
    }
}
