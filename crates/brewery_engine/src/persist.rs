use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use brewery_core::{Batch, ErrorKind, PipelineError, WorkItem};
use brewery_logging::brew_debug;
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;

use crate::filename::record_filename;
use crate::sink::{PersistOutcome, PersistenceSink};

#[derive(Debug, thiserror::Error)]
pub enum PersistError {
    #[error("output directory missing or not writable: {0}")]
    OutputDir(String),
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("failed to encode record: {0}")]
    Encode(#[from] serde_json::Error),
}

impl PersistError {
    /// Interrupted or timed-out writes may succeed on retry; anything else
    /// (permissions, full disk, a file where a directory should be) will not.
    pub fn kind(&self) -> ErrorKind {
        match self {
            PersistError::Io(err)
                if matches!(
                    err.kind(),
                    io::ErrorKind::Interrupted | io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock
                ) =>
            {
                ErrorKind::Transient
            }
            _ => ErrorKind::Fatal,
        }
    }
}

impl From<PersistError> for PipelineError {
    fn from(err: PersistError) -> Self {
        PipelineError::persistence(err.kind(), err.to_string())
    }
}

/// Ensure output directory exists; create if missing.
pub fn ensure_output_dir(dir: &Path) -> Result<(), PersistError> {
    if dir.exists() {
        let meta = fs::metadata(dir).map_err(|e| PersistError::OutputDir(e.to_string()))?;
        if !meta.is_dir() {
            return Err(PersistError::OutputDir("path is not a directory".into()));
        }
    } else {
        fs::create_dir_all(dir).map_err(|e| PersistError::OutputDir(e.to_string()))?;
    }
    Ok(())
}

/// Writes `{dir}/{filename}` through a temp file in the same directory, so a
/// reader never sees a half-written record.
#[derive(Debug, Clone)]
pub struct AtomicFileWriter {
    dir: PathBuf,
}

impl AtomicFileWriter {
    pub fn new(dir: PathBuf) -> Self {
        Self { dir }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn write(&self, filename: &str, content: &[u8]) -> Result<PathBuf, PersistError> {
        ensure_output_dir(&self.dir)?;

        let target = self.dir.join(filename);
        let mut tmp = NamedTempFile::new_in(&self.dir)?;
        tmp.write_all(content)?;
        tmp.flush()?;
        tmp.as_file_mut().sync_all()?;
        // `persist` renames over an existing record.
        tmp.persist(&target).map_err(|e| PersistError::Io(e.error))?;
        Ok(target)
    }
}

/// On-disk form of one persisted item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemRecord {
    pub key: String,
    pub ordinal: usize,
    pub batch: usize,
    pub payload: String,
    pub content: String,
}

impl ItemRecord {
    fn from_item(batch: usize, item: &WorkItem) -> Self {
        Self {
            key: item.key().to_string(),
            ordinal: item.ordinal(),
            batch,
            payload: item.payload().to_string(),
            content: item.input().to_string(),
        }
    }
}

/// One pretty-printed JSON file per item, named after the item's key.
#[derive(Debug, Clone)]
pub struct FileSink {
    writer: AtomicFileWriter,
}

impl FileSink {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            writer: AtomicFileWriter::new(dir.into()),
        }
    }

    pub fn path_for(&self, key: &str) -> PathBuf {
        self.writer.dir().join(record_filename(key))
    }

    pub fn write_record(&self, record: &ItemRecord) -> Result<PathBuf, PersistError> {
        let mut bytes = serde_json::to_vec_pretty(record)?;
        bytes.push(b'\n');
        self.writer.write(&record_filename(&record.key), &bytes)
    }

    pub fn read_record(&self, key: &str) -> Result<ItemRecord, PersistError> {
        let raw = fs::read(self.path_for(key))?;
        Ok(serde_json::from_slice(&raw)?)
    }
}

impl PersistenceSink for FileSink {
    fn persist(&self, batch: &Batch) -> PersistOutcome {
        if let Err(err) = ensure_output_dir(self.writer.dir()) {
            return PersistOutcome::all_failed(batch, &err.into());
        }
        let mut outcome = PersistOutcome::default();
        for item in batch.items() {
            match self.write_record(&ItemRecord::from_item(batch.index(), item)) {
                Ok(path) => {
                    brew_debug!("wrote {}", path.display());
                    outcome.persisted.push(item.key().to_string());
                }
                Err(err) => outcome.failed.push((item.key().to_string(), err.into())),
            }
        }
        outcome
    }
}
